use serde::{de, de::Deserializer, forward_to_deserialize_any};

use crate::error::{Error, Result};
use crate::raw::RAW_VALUE_TOKEN;
use super::access::Access;

// A strict bencode decoder operating directly over a borrowed byte slice.
//
// Unlike a `Read`-backed scanner this can hand out zero-copy borrowed
// strings/bytes, and critically it can report the exact byte range a value
// occupied in the input -- required to recover a torrent's info-hash without
// re-encoding the parsed structure.
pub struct Decoder<'de> {
    input: &'de [u8],
    pos: usize,
}

impl<'de> Decoder<'de> {
    pub fn new(input: &'de [u8]) -> Self {
        Self { input, pos: 0 }
    }

    pub(crate) fn peek(&self) -> Result<u8> {
        self.input.get(self.pos).copied().ok_or(Error::Eof)
    }

    fn bump(&mut self) -> Result<u8> {
        let b = self.peek()?;
        self.pos += 1;
        Ok(b)
    }

    fn expect(&mut self, want: u8) -> Result<()> {
        let got = self.bump()?;
        if got != want {
            return Err(Error::InvalidToken {
                expected: (want as char).to_string(),
                found: (got as char).to_string(),
            });
        }
        Ok(())
    }

    // Parses `i<digits>e`, rejecting leading zeros and negative zero.
    fn parse_integer(&mut self) -> Result<i64> {
        self.expect(b'i')?;
        let start = self.pos;
        if self.peek()? == b'-' {
            self.pos += 1;
        }
        let digits_start = self.pos;
        loop {
            match self.peek()? {
                b'e' => break,
                c if c.is_ascii_digit() => self.pos += 1,
                c => {
                    return Err(Error::InvalidToken {
                        expected: "ascii digit".to_string(),
                        found: (c as char).to_string(),
                    })
                }
            }
        }
        if self.pos == digits_start {
            return Err(Error::InvalidToken {
                expected: "at least one digit".to_string(),
                found: "e".to_string(),
            });
        }
        let digits = &self.input[digits_start..self.pos];
        if digits.len() > 1 && digits[0] == b'0' {
            return Err(Error::InvalidToken {
                expected: "no leading zero".to_string(),
                found: String::from_utf8_lossy(digits).into_owned(),
            });
        }
        if &self.input[start..self.pos] == b"-0" {
            return Err(Error::InvalidToken {
                expected: "no negative zero".to_string(),
                found: "-0".to_string(),
            });
        }
        let text = std::str::from_utf8(&self.input[start..self.pos])
            .map_err(|e| Error::Custom(e.to_string()))?;
        let n: i64 = text
            .parse()
            .map_err(|_| Error::Custom(format!("cannot parse {text} as i64")))?;
        self.expect(b'e')?;
        Ok(n)
    }

    // Parses the `<len>` prefix of a byte string, up to and including the `:`.
    fn parse_bytestring_len(&mut self) -> Result<usize> {
        let start = self.pos;
        loop {
            match self.peek()? {
                b':' => break,
                c if c.is_ascii_digit() => self.pos += 1,
                c => {
                    return Err(Error::InvalidToken {
                        expected: "ascii digit or ':'".to_string(),
                        found: (c as char).to_string(),
                    })
                }
            }
        }
        let digits = &self.input[start..self.pos];
        if digits.is_empty() {
            return Err(Error::InvalidToken {
                expected: "at least one length digit".to_string(),
                found: ":".to_string(),
            });
        }
        if digits.len() > 1 && digits[0] == b'0' {
            return Err(Error::InvalidToken {
                expected: "no leading zero in length".to_string(),
                found: String::from_utf8_lossy(digits).into_owned(),
            });
        }
        let text = std::str::from_utf8(digits).map_err(|e| Error::Custom(e.to_string()))?;
        let len: usize = text
            .parse()
            .map_err(|_| Error::Custom(format!("cannot parse {text} as length")))?;
        self.expect(b':')?;
        Ok(len)
    }

    pub(crate) fn parse_bytestring(&mut self) -> Result<&'de [u8]> {
        let len = self.parse_bytestring_len()?;
        if self.pos + len > self.input.len() {
            return Err(Error::Eof);
        }
        let s = &self.input[self.pos..self.pos + len];
        self.pos += len;
        Ok(s)
    }

    // Walks over one value without materialising it, only advancing `pos`.
    // Used to capture a value's raw byte span for `RawValue`, and also
    // enforces strict dictionary key ordering along the way.
    pub(crate) fn skip_value(&mut self) -> Result<()> {
        match self.peek()? {
            b'i' => {
                self.parse_integer()?;
            }
            b'0'..=b'9' => {
                self.parse_bytestring()?;
            }
            b'l' => {
                self.bump()?;
                while self.peek()? != b'e' {
                    self.skip_value()?;
                }
                self.bump()?;
            }
            b'd' => {
                self.bump()?;
                let mut last_key: Option<Vec<u8>> = None;
                while self.peek()? != b'e' {
                    let key = self.parse_bytestring()?.to_vec();
                    if let Some(last) = &last_key {
                        if key.as_slice() <= last.as_slice() {
                            return Err(Error::InvalidToken {
                                expected: "strictly ascending dictionary keys".to_string(),
                                found: String::from_utf8_lossy(&key).into_owned(),
                            });
                        }
                    }
                    last_key = Some(key);
                    self.skip_value()?;
                }
                self.bump()?;
            }
            c => {
                return Err(Error::InvalidToken {
                    expected: "i, l, d, or a digit".to_string(),
                    found: (c as char).to_string(),
                })
            }
        }
        Ok(())
    }
}

impl<'de, 'a> Deserializer<'de> for &'a mut Decoder<'de> {
    type Error = Error;

    fn deserialize_any<V>(self, visitor: V) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        match self.peek()? {
            b'i' => {
                let n = self.parse_integer()?;
                visitor.visit_i64(n)
            }
            b'0'..=b'9' => {
                let bytes = self.parse_bytestring()?;
                visitor.visit_borrowed_bytes(bytes)
            }
            b'l' => {
                self.bump()?;
                let value = visitor.visit_seq(Access::new(self, None))?;
                self.expect(b'e')?;
                Ok(value)
            }
            b'd' => {
                self.bump()?;
                let value = visitor.visit_map(Access::new(self, None))?;
                self.expect(b'e')?;
                Ok(value)
            }
            c => Err(Error::InvalidToken {
                expected: "i, l, d, or a digit".to_string(),
                found: (c as char).to_string(),
            }),
        }
    }

    forward_to_deserialize_any! {
        bool char
        i8 i16 i32 i64
        u8 u16 u32 u64
        f32 f64
        unit bytes byte_buf
        seq map unit_struct tuple_struct
        ignored_any struct
    }

    fn deserialize_newtype_struct<V>(self, name: &'static str, visitor: V) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        if name == RAW_VALUE_TOKEN {
            let start = self.pos;
            self.skip_value()?;
            return visitor.visit_borrowed_bytes(&self.input[start..self.pos]);
        }
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_option<V>(self, visitor: V) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        visitor.visit_some(self)
    }

    fn deserialize_enum<V>(
        self,
        _name: &'static str,
        _variants: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        match self.peek()? {
            b'd' => {
                self.bump()?;
                let value = visitor.visit_enum(Access::new(self, None))?;
                self.expect(b'e')?;
                Ok(value)
            }
            b'0'..=b'9' => visitor.visit_enum(Access::new(self, None)),
            c => Err(Error::InvalidToken {
                expected: "d for dict or a byte string".to_string(),
                found: (c as char).to_string(),
            }),
        }
    }

    fn deserialize_str<V>(self, visitor: V) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        let bytes = self.parse_bytestring()?;
        let s = std::str::from_utf8(bytes).map_err(|e| Error::Custom(e.to_string()))?;
        visitor.visit_borrowed_str(s)
    }

    fn deserialize_string<V>(self, visitor: V) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        self.deserialize_str(visitor)
    }

    fn deserialize_tuple<V>(self, _len: usize, visitor: V) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        self.expect(b'l')?;
        let value = visitor.visit_seq(Access::new(self, None))?;
        self.expect(b'e')?;
        Ok(value)
    }

    fn deserialize_identifier<V>(self, visitor: V) -> Result<V::Value>
    where
        V: de::Visitor<'de>,
    {
        self.deserialize_str(visitor)
    }
}
