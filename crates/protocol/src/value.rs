//! The closed value union carried in message arguments and payloads.

use bytes::Bytes;
use serde::de::{self, Deserialize, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::ser::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// A value exchanged with the engine over the wire.
///
/// This is a closed union: the wire codec has a total encode function over
/// it rather than reflecting over arbitrary JSON trees. `Binary` exists
/// only in memory: the framing layer extracts binary buffers into their
/// own frames before text encoding, and serializing a `Binary` (or a
/// non-finite float) directly is a serialization error.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineValue {
    /// Absent / null.
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Floating point. Must be finite to be encodable.
    Float(f64),
    /// UTF-8 string.
    Str(String),
    /// Ordered sequence.
    Sequence(Vec<EngineValue>),
    /// String-keyed mapping.
    Mapping(BTreeMap<String, EngineValue>),
    /// Raw binary buffer, carried out-of-band by the framing layer.
    Binary(Bytes),
}

impl EngineValue {
    /// Build a mapping from key/value pairs.
    pub fn mapping<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, EngineValue)>,
    {
        Self::Mapping(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// An empty mapping, the conventional "no options" argument.
    #[must_use]
    pub fn empty_mapping() -> Self {
        Self::Mapping(BTreeMap::new())
    }

    /// Whether this value is a binary buffer.
    #[must_use]
    pub const fn is_binary(&self) -> bool {
        matches!(self, Self::Binary(_))
    }

    /// Borrow as a string, if this value is one.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Borrow as an integer, if this value is one.
    #[must_use]
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Borrow as a mapping, if this value is one.
    #[must_use]
    pub const fn as_mapping(&self) -> Option<&BTreeMap<String, EngineValue>> {
        match self {
            Self::Mapping(m) => Some(m),
            _ => None,
        }
    }

    /// Borrow as a binary buffer, if this value is one.
    #[must_use]
    pub const fn as_binary(&self) -> Option<&Bytes> {
        match self {
            Self::Binary(b) => Some(b),
            _ => None,
        }
    }

    /// Look up a key, if this value is a mapping.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&EngineValue> {
        self.as_mapping().and_then(|m| m.get(key))
    }
}

impl From<bool> for EngineValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for EngineValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for EngineValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for EngineValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for EngineValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<Bytes> for EngineValue {
    fn from(v: Bytes) -> Self {
        Self::Binary(v)
    }
}

impl From<Vec<EngineValue>> for EngineValue {
    fn from(v: Vec<EngineValue>) -> Self {
        Self::Sequence(v)
    }
}

impl Serialize for EngineValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_unit(),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Int(i) => serializer.serialize_i64(*i),
            Self::Float(f) => {
                if f.is_finite() {
                    serializer.serialize_f64(*f)
                } else {
                    Err(serde::ser::Error::custom(
                        "non-finite number is not representable on the wire",
                    ))
                }
            }
            Self::Str(s) => serializer.serialize_str(s),
            Self::Sequence(items) => serializer.collect_seq(items),
            Self::Mapping(map) => serializer.collect_map(map),
            Self::Binary(_) => Err(serde::ser::Error::custom(
                "binary buffer must be extracted into its own frame before text encoding",
            )),
        }
    }
}

impl<'de> Deserialize<'de> for EngineValue {
    fn deserialize<D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        struct ValueVisitor;

        impl<'de> Visitor<'de> for ValueVisitor {
            type Value = EngineValue;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("any wire value")
            }

            fn visit_unit<E: de::Error>(self) -> std::result::Result<Self::Value, E> {
                Ok(EngineValue::Null)
            }

            fn visit_none<E: de::Error>(self) -> std::result::Result<Self::Value, E> {
                Ok(EngineValue::Null)
            }

            fn visit_some<D: Deserializer<'de>>(
                self,
                deserializer: D,
            ) -> std::result::Result<Self::Value, D::Error> {
                EngineValue::deserialize(deserializer)
            }

            fn visit_bool<E: de::Error>(self, v: bool) -> std::result::Result<Self::Value, E> {
                Ok(EngineValue::Bool(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<Self::Value, E> {
                Ok(EngineValue::Int(v))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<Self::Value, E> {
                // Integers that overflow i64 degrade to floats, as JSON does.
                Ok(i64::try_from(v)
                    .map_or_else(|_| EngineValue::Float(v as f64), EngineValue::Int))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> std::result::Result<Self::Value, E> {
                Ok(EngineValue::Float(v))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<Self::Value, E> {
                Ok(EngineValue::Str(v.to_string()))
            }

            fn visit_string<E: de::Error>(self, v: String) -> std::result::Result<Self::Value, E> {
                Ok(EngineValue::Str(v))
            }

            fn visit_seq<A: SeqAccess<'de>>(
                self,
                mut seq: A,
            ) -> std::result::Result<Self::Value, A::Error> {
                let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0));
                while let Some(item) = seq.next_element()? {
                    items.push(item);
                }
                Ok(EngineValue::Sequence(items))
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut map: A,
            ) -> std::result::Result<Self::Value, A::Error> {
                let mut entries = BTreeMap::new();
                while let Some((key, value)) = map.next_entry::<String, EngineValue>()? {
                    entries.insert(key, value);
                }
                Ok(EngineValue::Mapping(entries))
            }
        }

        deserializer.deserialize_any(ValueVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_roundtrip() {
        let value = EngineValue::mapping([
            ("a", EngineValue::Int(1)),
            ("b", EngineValue::Float(2.5)),
            (
                "c",
                EngineValue::Sequence(vec![EngineValue::Null, EngineValue::Bool(true)]),
            ),
            ("d", EngineValue::Str("text".to_string())),
        ]);

        let encoded = serde_json::to_string(&value).unwrap();
        let decoded: EngineValue = serde_json::from_str(&encoded).unwrap();
        assert_eq!(value, decoded);
    }

    #[test]
    fn test_integral_numbers_decode_as_int() {
        let decoded: EngineValue = serde_json::from_str("42").unwrap();
        assert_eq!(decoded, EngineValue::Int(42));

        let decoded: EngineValue = serde_json::from_str("42.5").unwrap();
        assert_eq!(decoded, EngineValue::Float(42.5));
    }

    #[test]
    fn test_non_finite_float_fails_to_encode() {
        assert!(serde_json::to_string(&EngineValue::Float(f64::NAN)).is_err());
        assert!(serde_json::to_string(&EngineValue::Float(f64::INFINITY)).is_err());
    }

    #[test]
    fn test_binary_fails_to_encode() {
        let value = EngineValue::Binary(Bytes::from_static(b"\x01\x02"));
        assert!(serde_json::to_string(&value).is_err());
    }
}
