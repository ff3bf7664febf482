// Convention from https://serde.rs/conventions.html
mod decode;
mod encode;
mod error;
mod raw;

pub use decode::{decode_bytes, decode_str};
pub use encode::{encode_to_raw, encode_to_string};
pub use error::{Error, Result};
pub use raw::RawValue;
