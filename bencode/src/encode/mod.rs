use serde::ser;

use crate::error::{Error, Result};

mod encoder;
mod key;
mod map;
#[cfg(test)]
mod test;

pub fn encode_to_raw<T: ser::Serialize>(v: &T) -> Result<Vec<u8>> {
    let mut encoder = encoder::Encoder::new();
    v.serialize(&mut encoder)?;
    Ok(encoder.into_buf())
}

pub fn encode_to_string<T: ser::Serialize>(v: &T) -> Result<String> {
    let mut encoder = encoder::Encoder::new();
    v.serialize(&mut encoder)?;
    std::str::from_utf8(encoder.as_ref())
        .map(|s| s.to_string())
        .map_err(|_| Error::InvalidType("encoded bencode was not valid utf-8".to_string()))
}
