//! Change-event type definitions
//!
//! These types represent the row-change notifications delivered by the feed
//! and the measurement extracted from them for folding.

use crate::types::aggregate::AggregateKey;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Column holding the day of week of a reading
pub const WEEKDAY_COLUMN: &str = "weekday";

/// Column holding the discretized time-of-day bucket
pub const TIME_SLICE_COLUMN: &str = "time_slice";

/// Column identifying the measured plug
pub const PLUG_ID_COLUMN: &str = "plug_id";

/// Kind of row mutation a change event describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    AfterInsert,
    AfterUpdate,
    AfterDelete,
    BulkDml,
    /// Any other mutation kind (`bulk_insert`, `before_*`, ...); never folded
    #[serde(other)]
    Other,
}

/// A single scalar column value carried by a change event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    /// Arrays, objects and anything else that is not a scalar
    Other(serde_json::Value),
}

/// Errors raised while reading typed values out of a change event
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldError {
    #[error("column '{0}' is missing from the event")]
    Missing(String),

    #[error("column '{0}' is null")]
    Null(String),

    #[error("column '{column}' is not a valid {expected}")]
    TypeMismatch {
        column: String,
        expected: &'static str,
    },

    #[error("column '{0}' is out of range")]
    OutOfRange(String),
}

impl FieldValue {
    /// Read the value as a 32-bit integer. Integral floats and numeric text are accepted.
    pub fn as_i32(&self, column: &str) -> Result<i32, FieldError> {
        let mismatch = || FieldError::TypeMismatch {
            column: column.to_string(),
            expected: "integer",
        };
        match self {
            FieldValue::Null => Err(FieldError::Null(column.to_string())),
            FieldValue::Int(v) => {
                i32::try_from(*v).map_err(|_| FieldError::OutOfRange(column.to_string()))
            }
            FieldValue::Float(v) => {
                if v.fract() != 0.0 || !v.is_finite() {
                    return Err(mismatch());
                }
                if *v < i32::MIN as f64 || *v > i32::MAX as f64 {
                    return Err(FieldError::OutOfRange(column.to_string()));
                }
                Ok(*v as i32)
            }
            FieldValue::Text(s) => s.trim().parse().map_err(|_| mismatch()),
            FieldValue::Bool(_) | FieldValue::Other(_) => Err(mismatch()),
        }
    }

    /// Read the value as a finite float. Integers and numeric text are accepted.
    pub fn as_f64(&self, column: &str) -> Result<f64, FieldError> {
        let mismatch = || FieldError::TypeMismatch {
            column: column.to_string(),
            expected: "number",
        };
        let value = match self {
            FieldValue::Null => return Err(FieldError::Null(column.to_string())),
            FieldValue::Int(v) => *v as f64,
            FieldValue::Float(v) => *v,
            FieldValue::Text(s) => s.trim().parse::<f64>().map_err(|_| mismatch())?,
            FieldValue::Bool(_) | FieldValue::Other(_) => return Err(mismatch()),
        };
        if !value.is_finite() {
            return Err(mismatch());
        }
        Ok(value)
    }
}

/// One row-change notification as delivered by the feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Mutation kind; only `after_insert` events are folded
    #[serde(rename = "type")]
    pub event_type: EventType,

    /// Column values of the new row
    #[serde(default)]
    pub fields: BTreeMap<String, FieldValue>,
}

impl ChangeEvent {
    /// Create an `after_insert` event from column/value pairs
    pub fn insert<I, K>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, FieldValue)>,
        K: Into<String>,
    {
        Self {
            event_type: EventType::AfterInsert,
            fields: fields.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    /// Whether this event should be folded
    pub fn is_insert(&self) -> bool {
        self.event_type == EventType::AfterInsert
    }

    /// Look up a column. SQL column names are case-insensitive, so an exact
    /// match is tried first and an ASCII case-insensitive match second.
    pub fn field(&self, column: &str) -> Option<&FieldValue> {
        self.fields.get(column).or_else(|| {
            self.fields
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(column))
                .map(|(_, value)| value)
        })
    }

    fn require(&self, column: &str) -> Result<&FieldValue, FieldError> {
        self.field(column)
            .ok_or_else(|| FieldError::Missing(column.to_string()))
    }

    pub fn get_i32(&self, column: &str) -> Result<i32, FieldError> {
        self.require(column)?.as_i32(column)
    }

    pub fn get_f64(&self, column: &str) -> Result<f64, FieldError> {
        self.require(column)?.as_f64(column)
    }
}

/// A reading reduced to its aggregation key and the value to fold
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeasurementEvent {
    pub weekday: i32,
    pub time_slice: i32,
    pub plug_id: i32,
    pub value: f64,
}

impl MeasurementEvent {
    /// Extract the key columns and the configured value column from a change event.
    pub fn from_change(event: &ChangeEvent, value_column: &str) -> Result<Self, FieldError> {
        Ok(Self {
            weekday: event.get_i32(WEEKDAY_COLUMN)?,
            time_slice: event.get_i32(TIME_SLICE_COLUMN)?,
            plug_id: event.get_i32(PLUG_ID_COLUMN)?,
            value: event.get_f64(value_column)?,
        })
    }

    pub fn key(&self) -> AggregateKey {
        AggregateKey::new(self.weekday, self.time_slice, self.plug_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(value: FieldValue) -> ChangeEvent {
        ChangeEvent::insert([
            ("weekday", FieldValue::Int(1)),
            ("time_slice", FieldValue::Int(3)),
            ("plug_id", FieldValue::Int(7)),
            ("value", value),
        ])
    }

    #[test]
    fn test_extract_measurement() {
        let m = MeasurementEvent::from_change(&reading(FieldValue::Float(5.0)), "value").unwrap();
        assert_eq!(m.key(), AggregateKey::new(1, 3, 7));
        assert_eq!(m.value, 5.0);
    }

    #[test]
    fn test_value_column_is_configurable() {
        let mut event = reading(FieldValue::Float(5.0));
        event
            .fields
            .insert("temperature".to_string(), FieldValue::Float(21.5));
        let m = MeasurementEvent::from_change(&event, "temperature").unwrap();
        assert_eq!(m.value, 21.5);
    }

    #[test]
    fn test_integer_and_text_values_accepted() {
        let m = MeasurementEvent::from_change(&reading(FieldValue::Int(4)), "value").unwrap();
        assert_eq!(m.value, 4.0);

        let m = MeasurementEvent::from_change(&reading(FieldValue::Text(" 2.5 ".into())), "value")
            .unwrap();
        assert_eq!(m.value, 2.5);
    }

    #[test]
    fn test_null_value_is_rejected() {
        let err = MeasurementEvent::from_change(&reading(FieldValue::Null), "value").unwrap_err();
        assert_eq!(err, FieldError::Null("value".to_string()));
    }

    #[test]
    fn test_missing_value_column() {
        let err =
            MeasurementEvent::from_change(&reading(FieldValue::Float(1.0)), "cpu_load").unwrap_err();
        assert_eq!(err, FieldError::Missing("cpu_load".to_string()));
    }

    #[test]
    fn test_case_insensitive_lookup() {
        let event = ChangeEvent::insert([
            ("WEEKDAY", FieldValue::Int(0)),
            ("Time_Slice", FieldValue::Int(95)),
            ("plug_id", FieldValue::Int(2)),
            ("Value", FieldValue::Float(0.5)),
        ]);
        let m = MeasurementEvent::from_change(&event, "value").unwrap();
        assert_eq!(m.key(), AggregateKey::new(0, 95, 2));
    }

    #[test]
    fn test_key_type_checks() {
        assert!(matches!(
            FieldValue::Float(1.5).as_i32("weekday"),
            Err(FieldError::TypeMismatch { .. })
        ));
        assert_eq!(FieldValue::Float(3.0).as_i32("weekday"), Ok(3));
        assert_eq!(
            FieldValue::Int(i64::MAX).as_i32("plug_id"),
            Err(FieldError::OutOfRange("plug_id".to_string()))
        );
        assert!(FieldValue::Bool(true).as_f64("value").is_err());
        assert!(FieldValue::Text("NaN".into()).as_f64("value").is_err());
    }

    #[test]
    fn test_change_event_json() {
        let json = r#"{"type":"after_insert","fields":{"weekday":1,"time_slice":3,"plug_id":7,"value":5.0,"note":null,"house":"h1"}}"#;
        let event: ChangeEvent = serde_json::from_str(json).unwrap();
        assert!(event.is_insert());
        assert_eq!(event.field("weekday"), Some(&FieldValue::Int(1)));
        assert_eq!(event.field("value"), Some(&FieldValue::Float(5.0)));
        assert_eq!(event.field("note"), Some(&FieldValue::Null));
        assert_eq!(event.field("house"), Some(&FieldValue::Text("h1".into())));

        let delete: ChangeEvent = serde_json::from_str(r#"{"type":"after_delete"}"#).unwrap();
        assert_eq!(delete.event_type, EventType::AfterDelete);
        assert!(delete.fields.is_empty());
    }

    #[test]
    fn test_unknown_event_types_decode_as_other() {
        for kind in ["bulk_insert", "before_insert", "before_update"] {
            let json = format!(r#"{{"type":"{}","fields":{{"plug_id":7}}}}"#, kind);
            let event: ChangeEvent = serde_json::from_str(&json).unwrap();
            assert_eq!(event.event_type, EventType::Other);
            assert!(!event.is_insert());
        }
    }

    #[test]
    fn test_non_scalar_field_rejected_per_column() {
        let json = r#"{"type":"after_insert","fields":{"weekday":1,"time_slice":3,"plug_id":7,"value":{"kw":2.0},"tags":["x"]}}"#;
        let event: ChangeEvent = serde_json::from_str(json).unwrap();
        assert_eq!(
            event.field("tags"),
            Some(&FieldValue::Other(serde_json::json!(["x"])))
        );
        assert_eq!(
            MeasurementEvent::from_change(&event, "value").unwrap_err(),
            FieldError::TypeMismatch {
                column: "value".to_string(),
                expected: "number",
            }
        );
        // Extra non-scalar columns do not matter when the value column is usable
        let mut event = event;
        event.fields.insert("value".into(), FieldValue::Float(2.0));
        assert_eq!(MeasurementEvent::from_change(&event, "value").unwrap().value, 2.0);
    }
}
