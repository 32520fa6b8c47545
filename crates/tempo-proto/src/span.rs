use serde::{Deserialize, Serialize};

use crate::ids::{SpanId, TraceId};

/// Maximum length, in bytes, of a span's operation name.
pub const MAX_SPAN_NAME_BYTES: usize = 256;
/// Maximum length, in bytes, of an attribute key.
pub const MAX_ATTRIBUTE_KEY_BYTES: usize = 128;
/// Maximum length, in bytes, of an attribute value.
pub const MAX_ATTRIBUTE_VALUE_BYTES: usize = 4 * 1024;
/// Maximum number of spans accepted in a single batch.
pub const MAX_SPANS_PER_BATCH: usize = 1 << 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanKind {
    Unspecified,
    Internal,
    Server,
    Client,
    Producer,
    Consumer,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusCode {
    Unset,
    Ok,
    Error,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Status {
    pub code: StatusCode,
    pub message: Option<String>,
}

impl Status {
    pub fn unset() -> Self {
        Status {
            code: StatusCode::Unset,
            message: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum AttributeValue {
    String(String),
    Int64(i64),
    Float64(f64),
    Bool(bool),
    Bytes(Vec<u8>),
}

impl AttributeValue {
    fn encoded_len(&self) -> usize {
        match self {
            AttributeValue::String(s) => s.len(),
            AttributeValue::Int64(_) => 8,
            AttributeValue::Float64(_) => 8,
            AttributeValue::Bool(_) => 1,
            AttributeValue::Bytes(b) => b.len(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    pub key: String,
    pub value: AttributeValue,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub time_unix_nano: u64,
    pub name: String,
    pub attributes: Vec<Attribute>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    pub attributes: Vec<Attribute>,
}

/// The atomic record. Immutable once emitted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Span {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    pub parent_span_id: Option<SpanId>,
    pub service_name: String,
    pub operation_name: String,
    pub kind: SpanKind,
    pub start_unix_nano: u64,
    pub duration_nano: u64,
    pub status: Status,
    pub attributes: Vec<Attribute>,
    pub events: Vec<Event>,
    pub links: Vec<Link>,
}

impl Span {
    /// `start ≤ start+duration ≤ 2^63-1`.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let end = self
            .start_unix_nano
            .checked_add(self.duration_nano)
            .ok_or(ValidationError::DurationOverflow)?;
        if end > (i64::MAX as u64) {
            return Err(ValidationError::DurationOverflow);
        }
        if self.operation_name.len() > MAX_SPAN_NAME_BYTES {
            return Err(ValidationError::SpanNameTooLong);
        }
        for attr in &self.attributes {
            validate_attribute(attr)?;
        }
        for event in &self.events {
            for attr in &event.attributes {
                validate_attribute(attr)?;
            }
        }
        for link in &self.links {
            for attr in &link.attributes {
                validate_attribute(attr)?;
            }
        }
        Ok(())
    }
}

fn validate_attribute(attr: &Attribute) -> Result<(), ValidationError> {
    if attr.key.len() > MAX_ATTRIBUTE_KEY_BYTES {
        return Err(ValidationError::AttributeKeyTooLong);
    }
    if attr.value.encoded_len() > MAX_ATTRIBUTE_VALUE_BYTES {
        return Err(ValidationError::AttributeValueTooLong);
    }
    Ok(())
}

/// A tenant-tagged batch of spans as received at ingress.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SpanBatch {
    pub spans: Vec<Span>,
}

impl SpanBatch {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.spans.len() > MAX_SPANS_PER_BATCH {
            return Err(ValidationError::BatchTooLarge);
        }
        for span in &self.spans {
            span.validate()?;
        }
        Ok(())
    }

    pub fn total_bytes(&self) -> usize {
        self.spans
            .iter()
            .map(|s| {
                s.operation_name.len()
                    + s.service_name.len()
                    + s.attributes
                        .iter()
                        .map(|a| a.key.len() + a.value.encoded_len())
                        .sum::<usize>()
                    + 48 // fixed-size fields, approximated
            })
            .sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("span start+duration overflows the valid nanosecond range")]
    DurationOverflow,
    #[error("span name exceeds {MAX_SPAN_NAME_BYTES} bytes")]
    SpanNameTooLong,
    #[error("attribute key exceeds {MAX_ATTRIBUTE_KEY_BYTES} bytes")]
    AttributeKeyTooLong,
    #[error("attribute value exceeds {MAX_ATTRIBUTE_VALUE_BYTES} bytes")]
    AttributeValueTooLong,
    #[error("batch exceeds {MAX_SPANS_PER_BATCH} spans")]
    BatchTooLarge,
}

#[cfg(test)]
mod test {
    use super::*;

    fn span(start: u64, dur: u64) -> Span {
        Span {
            trace_id: TraceId([1; 16]),
            span_id: SpanId([2; 8]),
            parent_span_id: None,
            service_name: "svc".into(),
            operation_name: "op".into(),
            kind: SpanKind::Server,
            start_unix_nano: start,
            duration_nano: dur,
            status: Status::unset(),
            attributes: vec![],
            events: vec![],
            links: vec![],
        }
    }

    #[test]
    fn rejects_duration_overflow() {
        let s = span(u64::MAX - 1, 10);
        assert_eq!(s.validate(), Err(ValidationError::DurationOverflow));
    }

    #[test]
    fn accepts_well_formed_span() {
        let s = span(1_000, 500);
        assert!(s.validate().is_ok());
    }

    #[test]
    fn rejects_oversized_attribute_key() {
        let mut s = span(0, 1);
        s.attributes.push(Attribute {
            key: "x".repeat(MAX_ATTRIBUTE_KEY_BYTES + 1),
            value: AttributeValue::Bool(true),
        });
        assert_eq!(s.validate(), Err(ValidationError::AttributeKeyTooLong));
    }

    #[test]
    fn rejects_oversized_attribute_value() {
        let mut s = span(0, 1);
        s.attributes.push(Attribute {
            key: "k".into(),
            value: AttributeValue::String("x".repeat(MAX_ATTRIBUTE_VALUE_BYTES + 1)),
        });
        assert_eq!(s.validate(), Err(ValidationError::AttributeValueTooLong));
    }

    #[test]
    fn batch_rejects_oversized_span_count() {
        let batch = SpanBatch {
            spans: std::iter::repeat_with(|| span(0, 1))
                .take(MAX_SPANS_PER_BATCH + 1)
                .collect(),
        };
        assert_eq!(batch.validate(), Err(ValidationError::BatchTooLarge));
    }
}
