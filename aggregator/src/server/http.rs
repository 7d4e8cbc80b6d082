//! Admin HTTP server for health checks and metrics

use crate::audit;
use crate::metrics;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server, StatusCode};
use std::convert::Infallible;
use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;

/// Start the admin HTTP server serving /healthz, /readyz, and /metrics until `cancel` fires.
pub async fn serve_admin(addr: SocketAddr, cancel: CancellationToken) -> Result<(), hyper::Error> {
    let make_svc = make_service_fn(|_| async {
        Ok::<_, Infallible>(service_fn(|req: Request<Body>| async move {
            Ok::<_, Infallible>(handle(&req))
        }))
    });

    let server = Server::try_bind(&addr)?.serve(make_svc);
    tracing::info!("Admin HTTP server listening on {}", addr);
    server
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
}

fn text(status: StatusCode, content_type: &'static str, body: impl Into<Body>) -> Response<Body> {
    let mut response = Response::new(body.into());
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

fn handle(req: &Request<Body>) -> Response<Body> {
    let path = req.uri().path();
    let response = match path {
        "/healthz" => text(StatusCode::OK, "text/plain", "ok\n"),

        "/readyz" => {
            if metrics::ACTIVE_WORKERS.get() > 0.0 {
                text(StatusCode::OK, "text/plain", "ready\n")
            } else {
                text(StatusCode::SERVICE_UNAVAILABLE, "text/plain", "not ready\n")
            }
        }

        "/metrics" => text(
            StatusCode::OK,
            "text/plain; version=0.0.4",
            metrics::encode_metrics(),
        ),

        _ => text(StatusCode::NOT_FOUND, "text/plain", "not found\n"),
    };

    if path == "/metrics" || path == "/readyz" || path == "/healthz" {
        audit::admin_http_request(path, response.status().as_u16());
    }
    response
}
