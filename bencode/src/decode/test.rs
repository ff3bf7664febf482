use std::collections::BTreeMap;
use serde_derive::Deserialize;
use super::decode_str;
use crate::raw::RawValue;

#[test]
fn decode_to_num() {
    let r: i64 = decode_str("i666e").unwrap();
    assert_eq!(r, 666);
}

#[test]
fn decode_negative_num() {
    let r: i64 = decode_str("i-42e").unwrap();
    assert_eq!(r, -42);
}

#[test]
fn decode_rejects_negative_zero() {
    let r: Result<i64, _> = super::decode_bytes(b"i-0e");
    assert!(r.is_err());
}

#[test]
fn decode_rejects_leading_zero() {
    let r: Result<i64, _> = super::decode_bytes(b"i042e");
    assert!(r.is_err());
}

#[test]
fn decode_to_string() {
    let r: String = decode_str("3:yes").unwrap();
    assert_eq!(r, "yes");
}

#[test]
fn decode_rejects_truncated_bytestring() {
    let r: Result<String, _> = super::decode_bytes(b"10:short");
    assert!(r.is_err());
}

#[test]
fn decode_to_struct() {
    let b = "d1:xi1111e1:y3:dog1:z2:yoe";
    #[derive(PartialEq, Debug, Deserialize)]
    struct Fake {
        y: String,
        x: i64,
        #[serde(default)]
        z: Option<String>,
        #[serde(default)]
        a: Option<String>,
    }
    let r: Fake = decode_str(b).unwrap();
    assert_eq!(
        r,
        Fake {
            x: 1111,
            y: "dog".to_string(),
            z: Some("yo".to_string()),
            a: None,
        }
    );
}

#[test]
fn decode_to_map() {
    let r: BTreeMap<String, i64> = decode_str("d1:xi1111e1:yi2ee").unwrap();
    assert_eq!(r.get("x"), Some(&1111));
    assert_eq!(r.get("y"), Some(&2));
}

#[test]
fn decode_rejects_unordered_dict_keys() {
    // "z" before "a" violates strict ascending key order.
    let r: Result<BTreeMap<String, i64>, _> = super::decode_bytes(b"d1:zi1e1:ai2ee");
    assert!(r.is_err());
}

#[test]
fn deserialize_to_vec() {
    let r: Vec<i64> = decode_str("li666ee").unwrap();
    assert_eq!(r, [666]);
}

#[test]
fn raw_value_captures_exact_span() {
    #[derive(Deserialize)]
    struct Wrapper<'a> {
        #[serde(borrow)]
        info: RawValue<'a>,
    }
    let doc = b"d4:infod4:name3:abc6:lengthi3eee";
    let w: Wrapper = super::decode_bytes(doc).unwrap();
    assert_eq!(w.info.as_bytes(), &b"d4:name3:abc6:lengthi3ee"[..]);
}
