use serde::ser;
use crate::error::Error;

// Bencode dictionary keys must be byte strings, always known at encode time
// (struct field names, enum variants, `String`/`&str` map keys). This
// serializer captures just the raw key bytes, unframed, so `SerializeMap`
// can sort and re-frame them as `<len>:<bytes>` itself.
pub struct KeySerializer;

impl ser::Serializer for &mut KeySerializer {
    type Ok = Vec<u8>;
    type Error = Error;

    type SerializeSeq = ser::Impossible<Vec<u8>, Error>;
    type SerializeTuple = ser::Impossible<Vec<u8>, Error>;
    type SerializeTupleStruct = ser::Impossible<Vec<u8>, Error>;
    type SerializeTupleVariant = ser::Impossible<Vec<u8>, Error>;
    type SerializeMap = ser::Impossible<Vec<u8>, Error>;
    type SerializeStruct = ser::Impossible<Vec<u8>, Error>;
    type SerializeStructVariant = ser::Impossible<Vec<u8>, Error>;

    fn serialize_str(self, v: &str) -> Result<Vec<u8>, Error> {
        Ok(v.as_bytes().to_vec())
    }

    fn serialize_bytes(self, v: &[u8]) -> Result<Vec<u8>, Error> {
        Ok(v.to_vec())
    }

    fn serialize_bool(self, _v: bool) -> Result<Vec<u8>, Error> {
        Err(Error::InvalidType("bencode dict keys must be byte strings".to_string()))
    }
    fn serialize_i8(self, _v: i8) -> Result<Vec<u8>, Error> { key_err() }
    fn serialize_i16(self, _v: i16) -> Result<Vec<u8>, Error> { key_err() }
    fn serialize_i32(self, _v: i32) -> Result<Vec<u8>, Error> { key_err() }
    fn serialize_i64(self, _v: i64) -> Result<Vec<u8>, Error> { key_err() }
    fn serialize_u8(self, _v: u8) -> Result<Vec<u8>, Error> { key_err() }
    fn serialize_u16(self, _v: u16) -> Result<Vec<u8>, Error> { key_err() }
    fn serialize_u32(self, _v: u32) -> Result<Vec<u8>, Error> { key_err() }
    fn serialize_u64(self, _v: u64) -> Result<Vec<u8>, Error> { key_err() }
    fn serialize_f32(self, _v: f32) -> Result<Vec<u8>, Error> { key_err() }
    fn serialize_f64(self, _v: f64) -> Result<Vec<u8>, Error> { key_err() }

    fn serialize_char(self, v: char) -> Result<Vec<u8>, Error> {
        let mut buf = [0u8; 4];
        Ok(v.encode_utf8(&mut buf).as_bytes().to_vec())
    }

    fn serialize_none(self) -> Result<Vec<u8>, Error> { key_err() }
    fn serialize_some<T: ?Sized>(self, value: &T) -> Result<Vec<u8>, Error>
    where
        T: serde::Serialize,
    {
        value.serialize(self)
    }
    fn serialize_unit(self) -> Result<Vec<u8>, Error> { key_err() }
    fn serialize_unit_struct(self, _name: &'static str) -> Result<Vec<u8>, Error> { key_err() }
    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
    ) -> Result<Vec<u8>, Error> {
        Ok(variant.as_bytes().to_vec())
    }
    fn serialize_newtype_struct<T: ?Sized>(self, _name: &'static str, value: &T) -> Result<Vec<u8>, Error>
    where
        T: serde::Serialize,
    {
        value.serialize(self)
    }
    fn serialize_newtype_variant<T: ?Sized>(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _value: &T,
    ) -> Result<Vec<u8>, Error>
    where
        T: serde::Serialize,
    {
        key_err()
    }
    fn serialize_seq(self, _len: Option<usize>) -> Result<Self::SerializeSeq, Error> { key_err() }
    fn serialize_tuple(self, _len: usize) -> Result<Self::SerializeTuple, Error> { key_err() }
    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeTupleStruct, Error> {
        key_err()
    }
    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeTupleVariant, Error> {
        key_err()
    }
    fn serialize_map(self, _len: Option<usize>) -> Result<Self::SerializeMap, Error> { key_err() }
    fn serialize_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeStruct, Error> {
        key_err()
    }
    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeStructVariant, Error> {
        key_err()
    }
}

fn key_err() -> Result<Vec<u8>, Error> {
    Err(Error::InvalidType("bencode dict keys must be byte strings".to_string()))
}
