//! Payload resolution for outgoing messages
//!
//! Each worker owns a [`PayloadResolver`] that produces the body of its next
//! publish. Three strategies exist:
//! - `Static`: the template is sent verbatim
//! - `Incrementing`: the template is a starting integer, bumped on every publish
//! - `Generated`: the template is a `name:type,...` list rendered to a fresh JSON
//!   object on every publish

use bytes::Bytes;
use fake::Fake;
use fake::faker::internet::en::{SafeEmail, Username};
use fake::faker::phone_number::en::PhoneNumber;
use rand::Rng;
use std::collections::BTreeMap;
use std::num::ParseIntError;
use thiserror::Error;
use uuid::Uuid;

/// Payload used when no payload flag is given
pub const DEFAULT_PAYLOAD: &str = "mqtt-stress";

/// Starting value for incrementing payloads
pub const DEFAULT_COUNTER_START: &str = "0";

/// Inclusive bounds for generated `number` fields
const NUMBER_RANGE: std::ops::RangeInclusive<u32> = 1..=9999;

/// Errors produced while resolving a payload
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("invalid field entry {entry:?}, expected <name>:<type>")]
    InvalidField { entry: String },

    #[error("counter value {value:?} is not an integer: {source}")]
    ParseCounter {
        value: String,
        #[source]
        source: ParseIntError,
    },

    #[error("counter value {0} cannot be incremented without overflow")]
    CounterOverflow(i64),

    #[error("failed to serialize generated payload: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Strategy used to produce each outgoing message body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadMode {
    Static,
    Incrementing,
    Generated,
}

impl PayloadMode {
    pub fn name(&self) -> &'static str {
        match self {
            PayloadMode::Static => "static",
            PayloadMode::Incrementing => "incrementing",
            PayloadMode::Generated => "generated",
        }
    }
}

/// Value generator for one generated field
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    Number,
    String,
    Id,
    Phone,
    Email,
    /// Unrecognized type tag, emitted as-is
    Literal(String),
}

impl From<&str> for FieldKind {
    fn from(tag: &str) -> Self {
        match tag {
            "number" => FieldKind::Number,
            "string" => FieldKind::String,
            "id" => FieldKind::Id,
            "phone" => FieldKind::Phone,
            "email" => FieldKind::Email,
            other => FieldKind::Literal(other.to_string()),
        }
    }
}

impl FieldKind {
    /// Produce a representative value for this kind
    pub fn generate(&self) -> String {
        match self {
            FieldKind::Number => rand::rng().random_range(NUMBER_RANGE).to_string(),
            FieldKind::String => Username().fake(),
            FieldKind::Id => Uuid::new_v4().to_string(),
            FieldKind::Phone => PhoneNumber().fake(),
            FieldKind::Email => SafeEmail().fake(),
            FieldKind::Literal(value) => value.clone(),
        }
    }
}

/// Parse a `name:type,name:type` field list.
///
/// Every entry must split on `:` into exactly two non-empty parts.
/// A repeated name keeps its last type.
pub fn parse_fields(list: &str) -> Result<BTreeMap<String, FieldKind>, PayloadError> {
    let mut fields = BTreeMap::new();
    for entry in list.split(',') {
        let parts: Vec<&str> = entry.split(':').map(str::trim).collect();
        match parts.as_slice() {
            [name, tag] if !name.is_empty() && !tag.is_empty() => {
                fields.insert((*name).to_string(), FieldKind::from(*tag));
            }
            _ => {
                return Err(PayloadError::InvalidField {
                    entry: entry.to_string(),
                });
            }
        }
    }
    Ok(fields)
}

/// Render a field list into a JSON object with freshly generated values
pub fn render_fields(fields: &BTreeMap<String, FieldKind>) -> Result<Vec<u8>, PayloadError> {
    let values: BTreeMap<&str, String> = fields
        .iter()
        .map(|(name, kind)| (name.as_str(), kind.generate()))
        .collect();
    Ok(serde_json::to_vec(&values)?)
}

/// Per-worker payload state
#[derive(Debug, Clone)]
pub struct PayloadResolver {
    mode: PayloadMode,
    /// Literal payload, current counter value, or field list depending on mode
    template: String,
}

impl PayloadResolver {
    pub fn new(mode: PayloadMode, template: impl Into<String>) -> Self {
        Self {
            mode,
            template: template.into(),
        }
    }

    pub fn mode(&self) -> PayloadMode {
        self.mode
    }

    /// Current template; for incrementing payloads this is the last value sent
    pub fn template(&self) -> &str {
        &self.template
    }

    /// Produce the next payload.
    ///
    /// On an incrementing failure the stored value is left untouched, so the
    /// counter keeps its last good value.
    pub fn resolve(&mut self) -> Result<Bytes, PayloadError> {
        match self.mode {
            PayloadMode::Static => Ok(Bytes::from(self.template.clone())),
            PayloadMode::Incrementing => {
                let current: i64 =
                    self.template
                        .trim()
                        .parse()
                        .map_err(|source| PayloadError::ParseCounter {
                            value: self.template.clone(),
                            source,
                        })?;
                let next = current
                    .checked_add(1)
                    .ok_or(PayloadError::CounterOverflow(current))?;
                self.template = next.to_string();
                Ok(Bytes::from(self.template.clone()))
            }
            PayloadMode::Generated => {
                let fields = parse_fields(&self.template)?;
                Ok(Bytes::from(render_fields(&fields)?))
            }
        }
    }

    /// Payload sent when [`resolve`](Self::resolve) fails
    pub fn fallback(&self) -> Bytes {
        match self.mode {
            PayloadMode::Generated => Bytes::new(),
            PayloadMode::Static | PayloadMode::Incrementing => Bytes::from(self.template.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_payload_is_template() {
        let mut resolver = PayloadResolver::new(PayloadMode::Static, "hello");
        assert_eq!(resolver.resolve().unwrap(), Bytes::from_static(b"hello"));
        assert_eq!(resolver.resolve().unwrap(), Bytes::from_static(b"hello"));
    }

    #[test]
    fn test_incrementing_counts_up_from_start() {
        let mut resolver = PayloadResolver::new(PayloadMode::Incrementing, "41");
        let sent: Vec<Bytes> = (0..5).map(|_| resolver.resolve().unwrap()).collect();
        let expected: Vec<Bytes> = (42..47).map(|n: i64| Bytes::from(n.to_string())).collect();
        assert_eq!(sent, expected);
        assert_eq!(resolver.template(), "46");
    }

    #[test]
    fn test_incrementing_handles_negative_start() {
        let mut resolver = PayloadResolver::new(PayloadMode::Incrementing, "-2");
        assert_eq!(resolver.resolve().unwrap(), Bytes::from_static(b"-1"));
        assert_eq!(resolver.resolve().unwrap(), Bytes::from_static(b"0"));
    }

    #[test]
    fn test_incrementing_parse_failure_keeps_value() {
        let mut resolver = PayloadResolver::new(PayloadMode::Incrementing, "abc");
        let err = resolver.resolve().unwrap_err();
        assert!(matches!(err, PayloadError::ParseCounter { .. }));
        assert_eq!(resolver.template(), "abc");
        assert_eq!(resolver.fallback(), Bytes::from_static(b"abc"));
    }

    #[test]
    fn test_incrementing_overflow_is_an_error() {
        let mut resolver = PayloadResolver::new(PayloadMode::Incrementing, i64::MAX.to_string());
        assert!(matches!(
            resolver.resolve(),
            Err(PayloadError::CounterOverflow(v)) if v == i64::MAX
        ));
        assert_eq!(resolver.template(), i64::MAX.to_string());
    }

    #[test]
    fn test_generated_keys_match_fields() {
        let mut resolver = PayloadResolver::new(
            PayloadMode::Generated,
            "count:number,user:string,customer:id,mobile:phone,contact:email,kind:sensor",
        );
        let payload = resolver.resolve().unwrap();
        let object: BTreeMap<String, String> = serde_json::from_slice(&payload).unwrap();

        let keys: Vec<&str> = object.keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            vec!["contact", "count", "customer", "kind", "mobile", "user"]
        );

        let count: u32 = object["count"].parse().unwrap();
        assert!(NUMBER_RANGE.contains(&count));
        assert!(Uuid::parse_str(&object["customer"]).is_ok());
        assert!(object["contact"].contains('@'));
        assert!(!object["user"].is_empty());
        assert!(!object["mobile"].is_empty());
        assert_eq!(object["kind"], "sensor");
    }

    #[test]
    fn test_generated_numbers_stay_in_range() {
        let fields = parse_fields("n:number").unwrap();
        for _ in 0..500 {
            let payload = render_fields(&fields).unwrap();
            let object: BTreeMap<String, String> = serde_json::from_slice(&payload).unwrap();
            let n: u32 = object["n"].parse().unwrap();
            assert!((1..=9999).contains(&n), "out of range: {}", n);
        }
    }

    #[test]
    fn test_generated_values_change_between_publishes() {
        let mut resolver = PayloadResolver::new(PayloadMode::Generated, "id:id");
        let first = resolver.resolve().unwrap();
        let second = resolver.resolve().unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_malformed_fields_are_rejected() {
        for list in ["a", "a:number:extra", ":number", "a:", "a:number,", "", "a:number,,b:id"] {
            let err = parse_fields(list).unwrap_err();
            assert!(
                matches!(err, PayloadError::InvalidField { .. }),
                "field list {:?} should be rejected",
                list
            );
        }
    }

    #[test]
    fn test_malformed_generated_payload_falls_back_to_empty() {
        let mut resolver = PayloadResolver::new(PayloadMode::Generated, "broken");
        assert!(resolver.resolve().is_err());
        assert!(resolver.fallback().is_empty());
    }

    #[test]
    fn test_field_whitespace_is_trimmed() {
        let fields = parse_fields(" a : number , b:id").unwrap();
        assert_eq!(fields["a"], FieldKind::Number);
        assert_eq!(fields["b"], FieldKind::Id);
    }
}
