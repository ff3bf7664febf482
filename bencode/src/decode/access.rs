use serde::de;

use crate::error::{Error, Result};
use super::decoder::Decoder;

pub struct Access<'a, 'de> {
    d: &'a mut Decoder<'de>,
    last_key: Option<Vec<u8>>,
}

impl<'a, 'de> Access<'a, 'de> {
    pub fn new(d: &'a mut Decoder<'de>, _remaining: Option<usize>) -> Self {
        Self { d, last_key: None }
    }
}

impl<'de, 'a> de::SeqAccess<'de> for Access<'a, 'de> {
    type Error = Error;

    fn next_element_seed<T>(&mut self, seed: T) -> Result<Option<T::Value>>
    where
        T: de::DeserializeSeed<'de>,
    {
        if self.d.peek()? == b'e' {
            return Ok(None);
        }
        seed.deserialize(&mut *self.d).map(Some)
    }
}

impl<'de, 'a> de::MapAccess<'de> for Access<'a, 'de> {
    type Error = Error;

    fn next_key_seed<K>(&mut self, seed: K) -> Result<Option<K::Value>>
    where
        K: de::DeserializeSeed<'de>,
    {
        if self.d.peek()? == b'e' {
            return Ok(None);
        }
        let key_bytes = self.d.parse_bytestring()?;
        if let Some(last) = &self.last_key {
            if key_bytes <= last.as_slice() {
                return Err(Error::InvalidToken {
                    expected: "strictly ascending dictionary keys".to_string(),
                    found: String::from_utf8_lossy(key_bytes).into_owned(),
                });
            }
        }
        self.last_key = Some(key_bytes.to_vec());
        let key_str = std::str::from_utf8(key_bytes).map_err(|e| Error::Custom(e.to_string()))?;
        seed.deserialize(serde::de::value::BorrowedStrDeserializer::new(key_str))
            .map(Some)
    }

    fn next_value_seed<V>(&mut self, seed: V) -> Result<V::Value>
    where
        V: de::DeserializeSeed<'de>,
    {
        seed.deserialize(&mut *self.d)
    }
}

impl<'de, 'a> de::EnumAccess<'de> for Access<'a, 'de> {
    type Error = Error;
    type Variant = Self;

    fn variant_seed<V>(self, seed: V) -> Result<(V::Value, Self::Variant)>
    where
        V: de::DeserializeSeed<'de>,
    {
        let value = seed.deserialize(&mut *self.d)?;
        Ok((value, self))
    }
}

impl<'de, 'a> de::VariantAccess<'de> for Access<'a, 'de> {
    type Error = Error;

    fn unit_variant(self) -> Result<()> {
        Ok(())
    }

    fn newtype_variant_seed<T>(self, seed: T) -> Result<T::Value>
    where
        T: de::DeserializeSeed<'de>,
    {
        seed.deserialize(&mut *self.d)
    }

    fn tuple_variant<V>(self, _len: usize, visitor: V) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        de::Deserializer::deserialize_seq(&mut *self.d, visitor)
    }

    fn struct_variant<V>(self, _fields: &'static [&'static str], visitor: V) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        de::Deserializer::deserialize_map(&mut *self.d, visitor)
    }
}
