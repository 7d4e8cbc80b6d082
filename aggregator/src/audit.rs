//! Audit logging for dropped events and operational events.
//!
//! All events are emitted via `tracing` with dedicated targets so they can be
//! filtered and formatted (e.g. JSON) separately from the regular log stream.

use loadfold_shared::types::aggregate::AggregateKey;
use tracing::{info, warn};

const AUDIT_TARGET: &str = "loadfold::audit";
const DROPS_TARGET: &str = "loadfold::drops";

/// Log one event that was not folded.
pub fn dropped_event(index: usize, key: Option<&AggregateKey>, reason: &str, detail: &str) {
    match key {
        Some(key) => warn!(
            target: DROPS_TARGET,
            event = "dropped_event",
            index = index,
            weekday = key.weekday,
            time_slice = key.time_slice,
            plug_id = key.plug_id,
            reason = %reason,
            detail = %detail,
        ),
        None => warn!(
            target: DROPS_TARGET,
            event = "dropped_event",
            index = index,
            reason = %reason,
            detail = %detail,
        ),
    }
}

/// Log a batch cut short by the strict failure policy.
pub fn batch_aborted(index: usize, unprocessed: usize) {
    warn!(
        target: DROPS_TARGET,
        event = "batch_aborted",
        index = index,
        unprocessed = unprocessed,
    );
}

/// Log worker connection lifecycle.
pub fn worker_connection(worker: usize, action: &str) {
    info!(
        target: AUDIT_TARGET,
        event = "worker_connection",
        worker = worker,
        action = %action,
    );
}

/// Log admin HTTP request (sensitive endpoints: metrics, readiness).
pub fn admin_http_request(path: &str, status: u16) {
    info!(
        target: AUDIT_TARGET,
        event = "admin_http_request",
        path = %path,
        status = %status,
    );
}
