use std::fmt;
use serde::de::{self, Deserialize, Deserializer, Visitor};

/// Sentinel newtype-struct name the decoder recognises to capture a value's
/// exact byte span instead of walking into it. Mirrors the
/// `$serde_json::private::RawValue` convention.
pub(crate) const RAW_VALUE_TOKEN: &str = "$bencode::RawValue";

/// The untouched bencoded bytes of a value, borrowed from the original input.
///
/// Used to recover the canonical info-hash: the info dictionary must be
/// hashed exactly as it appeared in the source file, never as a re-encoding
/// of the parsed struct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawValue<'de>(pub &'de [u8]);

impl<'de> RawValue<'de> {
    pub fn as_bytes(&self) -> &'de [u8] {
        self.0
    }
}

impl<'de> Deserialize<'de> for RawValue<'de> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct RawValueVisitor;

        impl<'de> Visitor<'de> for RawValueVisitor {
            type Value = RawValue<'de>;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, "a raw bencode value")
            }

            fn visit_borrowed_bytes<E>(self, v: &'de [u8]) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(RawValue(v))
            }
        }

        deserializer.deserialize_newtype_struct(RAW_VALUE_TOKEN, RawValueVisitor)
    }
}
