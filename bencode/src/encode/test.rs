use std::collections::HashMap;
use serde::Serialize;
use serde_derive::Serialize as DeriveSerialize;

use super::encode_to_string;
use crate::decode::decode_bytes;

#[test]
fn serialize_string() {
    let r = encode_to_string(&"foo").unwrap();
    assert_eq!(r, "3:foo");
}

#[test]
fn serialize_num() {
    let r = encode_to_string(&999).unwrap();
    assert_eq!(r, "i999e");
}

#[test]
fn serialize_vec() {
    let r = encode_to_string(&vec!["fooo", "bar"]).unwrap();
    assert_eq!(r, "l4:fooo3:bare");
}

#[test]
fn serialize_struct_sorts_keys() {
    #[derive(DeriveSerialize)]
    struct S {
        zebra: i64,
        apple: i64,
    }
    let r = encode_to_string(&S { zebra: 1, apple: 2 }).unwrap();
    assert_eq!(r, "d5:applei2e5:zebrai1ee");
}

#[test]
fn serialize_map_sorts_keys() {
    let mut m: HashMap<&str, Vec<u8>> = HashMap::new();
    m.insert("foo", vec![1, 2, 3]);
    m.insert("bar", vec![4, 5, 6]);
    let r = encode_to_string(&m).unwrap();
    assert_eq!(r, "d3:barli4ei5ei6ee3:fooli1ei2ei3eee");
}

#[test]
fn round_trip_struct() {
    #[derive(DeriveSerialize, serde_derive::Deserialize, PartialEq, Debug)]
    struct S {
        a: String,
        b: i64,
    }
    let original = S { a: "hi".to_string(), b: 7 };
    let bytes = super::encode_to_raw(&original).unwrap();
    let back: S = decode_bytes(&bytes).unwrap();
    assert_eq!(original, back);
}

#[test]
fn serialize_keeps_explicitly_empty_list() {
    let r = encode_to_string(&Vec::<i64>::new()).unwrap();
    assert_eq!(r, "le");
}

#[test]
fn serialize_struct_omits_none_fields() {
    #[derive(DeriveSerialize)]
    struct S {
        present: i64,
        absent: Option<i64>,
    }
    let r = encode_to_string(&S { present: 1, absent: None }).unwrap();
    assert_eq!(r, "d7:presenti1ee");
}

fn _silence_unused_import<T: Serialize>(_: T) {}
