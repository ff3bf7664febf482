use std::path::PathBuf;

use rand::seq::SliceRandom;
use serde_derive::{Deserialize, Serialize};
use sha1::Digest;

use crate::store::FileInfo;

#[derive(Debug, thiserror::Error)]
pub enum MetaInfoError {

    #[error("malformed bencode: {0}")]
    Malformed(#[from] bencode::Error),

    #[error("invalid file extension, expected .torrent")]
    InvalidExtension,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    // `pieces` must be a non-empty, exact multiple of 20 bytes (one SHA-1 digest per piece).
    #[error("pieces table must be a non-empty multiple of 20 bytes")]
    BadHashTable,

    // Piece length and every file length must be strictly positive.
    #[error("piece length or a file length was not positive")]
    BadLength,

    #[error("file has no path segments")]
    FileEmptyPath,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct File {

    // A list containing one or more string elements that together represent the path and filename.
    #[serde(deserialize_with = "crate::de::path_deserialize")]
    pub path: PathBuf,

    pub length: u64,

    #[serde(default)]
    pub md5sum: Option<String>,

}

#[derive(Clone, Deserialize, Serialize)]
pub struct Info {

    // File name, or directory name for a multi-file torrent.
    pub name: String,

    // Concatenation of all 20-byte SHA1 hash values, one per piece.
    #[serde(with = "serde_bytes")]
    pub pieces: Vec<u8>,

    // Number of bytes in each piece.
    #[serde(rename = "piece length")]
    pub piece_length: u32,

    // A 32-character hexadecimal string corresponding to the MD5 sum of the file.
    #[serde(default)]
    pub md5sum: Option<String>,

    // Length of the file in bytes; present for single-file torrents only.
    #[serde(default)]
    pub length: Option<u64>,

    // One entry per file; present for multi-file torrents only.
    #[serde(default)]
    pub files: Option<Vec<File>>,

    // If set to 1, peers MUST be discovered only via the trackers named in
    // this file (no DHT/PEX). Out of scope here, kept only so it round-trips.
    #[serde(default)]
    pub private: Option<u8>,

    #[serde(default)]
    #[serde(rename = "root hash")]
    pub root_hash: Option<String>,

}

// The announce/announce-list/info triple as it appears at the top level of a
// .torrent file. `info` is captured as an untouched byte span rather than
// walked directly: the canonical info-hash must be the SHA1 of exactly those
// bytes, and re-encoding the parsed struct is not guaranteed to reproduce
// them (key order, absent-vs-default fields, etc. can all drift).
#[derive(Deserialize)]
struct RawDoc<'de> {
    #[serde(deserialize_with = "crate::de::url_deserialize")]
    announce: url::Url,

    #[serde(borrow)]
    info: bencode::RawValue<'de>,

    #[serde(default)]
    #[serde(rename = "announce-list")]
    #[serde(deserialize_with = "crate::de::announce_list_deserialize")]
    announce_list: Option<Vec<Vec<url::Url>>>,

    #[serde(default)]
    encoding: Option<String>,

    #[serde(default)]
    #[serde(rename = "creation date")]
    creation_date: Option<i64>,

    #[serde(default)]
    comment: Option<String>,

    #[serde(default)]
    #[serde(rename = "created by")]
    created_by: Option<String>,
}

#[derive(Clone)]
pub struct MetaInfo {

    pub announce: url::Url,

    pub info: Info,

    // SHA1 of the info dictionary's raw bytes, captured at parse time.
    pub info_hash: [u8; 20],

    pub encoding: Option<String>,

    pub announce_list: Option<Vec<Vec<url::Url>>>,

    pub creation_date: Option<i64>,

    pub comment: Option<String>,

    pub created_by: Option<String>,

}

impl MetaInfo {

    pub fn new<P: AsRef<std::path::Path>>(path: P) -> Result<MetaInfo, MetaInfoError> {

        if path.as_ref().extension().unwrap_or_default() != "torrent" {
            return Err(MetaInfoError::InvalidExtension);
        }

        let bytes = std::fs::read(path)?;
        Self::from_bytes(&bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<MetaInfo, MetaInfoError> {

        let raw: RawDoc = bencode::decode_bytes(bytes)?;
        let info_bytes = raw.info.as_bytes();
        let info: Info = bencode::decode_bytes(info_bytes)?;

        if info.pieces.is_empty() || info.pieces.len() % 20 != 0 {
            return Err(MetaInfoError::BadHashTable);
        }
        if info.piece_length == 0 {
            return Err(MetaInfoError::BadLength);
        }
        match (&info.length, &info.files) {
            (None, None) => return Err(MetaInfoError::MissingField("length or files")),
            (Some(0), _) => return Err(MetaInfoError::BadLength),
            (_, Some(files)) if files.iter().any(|f| f.length == 0) => return Err(MetaInfoError::BadLength),
            _ => {}
        }

        let mut hasher = sha1::Sha1::new();
        hasher.update(info_bytes);
        let info_hash: [u8; 20] = hasher.finalize().into();

        let metainfo = MetaInfo {
            announce: raw.announce,
            info,
            info_hash,
            encoding: raw.encoding,
            announce_list: raw.announce_list,
            creation_date: raw.creation_date,
            comment: raw.comment,
            created_by: raw.created_by,
        };
        tracing::debug!("metainfo loaded: {:#?}", metainfo);
        Ok(metainfo)
    }

    pub fn piece_hashes(&self) -> Vec<[u8; 20]> {
        self.info.pieces
            .chunks_exact(20)
            // Safe: `pieces.len() % 20 == 0` was checked in `from_bytes`.
            .map(|c| c.try_into().unwrap())
            .collect()
    }

    pub fn piece_len(&self) -> usize { self.info.piece_length as usize }

    pub fn num_pieces(&self) -> u32 { self.info.pieces.len() as u32 / 20 }

    pub fn is_multi_file(&self) -> bool { self.info.files.is_some() }

    pub fn single_file_len(&self) -> Option<u64> { self.info.length }

    pub fn total_len(&self) -> u64 {
        if let Some(files) = &self.info.files {
            files.iter().map(|f| f.length).sum()
        } else {
            self.info.length.unwrap_or(0)
        }
    }

    pub fn info_hash(&self) -> [u8; 20] { self.info_hash }

    pub fn name(&self) -> &str { &self.info.name }

    // BEP 12 tiers: shuffle within each tier, fall through tiers in order.
    // BEP 12 tiers of tracker URLs, shuffled within each tier. Trackers
    // consume these directly (one task per URL); tier order is preserved
    // so a tier only gets used once every URL in the tier before it has
    // been tried and failed.
    pub fn trackers(&self) -> Vec<Vec<url::Url>> {
        if let Some(announce_list) = self.announce_list.clone() {
            let mut trackers = Vec::new();
            for mut tier in announce_list {
                tier.shuffle(&mut rand::thread_rng());
                trackers.push(tier);
            }
            trackers
        } else {
            vec![vec![self.announce.clone()]]
        }
    }

    pub fn files(&self) -> Vec<FileInfo> {
        if let Some(files) = &self.info.files {
            let mut offset = 0usize;
            files.iter().map(|f| {
                let file_info = FileInfo {
                    path: f.path.clone(),
                    length: f.length as usize,
                    offset,
                    md5sum: f.md5sum.clone(),
                };
                offset += f.length as usize;
                file_info
            }).collect()
        } else {
            vec![FileInfo {
                path: PathBuf::from(&self.info.name),
                length: self.info.length.unwrap_or(0) as usize,
                offset: 0,
                md5sum: None,
            }]
        }
    }

    // Formatting helpers.

    pub fn creation_date_fmt(&self) -> Option<String> {
        self.creation_date.map(|v| {
            chrono::DateTime::from_timestamp(v, 0)
                .map(|v| v.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "invalid date".to_string())
        })
    }

    pub fn info_hash_hex(&self) -> String {
        hex::encode(self.info_hash)
    }

    pub fn size_fmt(&self) -> String {
        format_size(self.total_len())
    }
}

fn format_size(bytes: u64) -> String {
    let mut size = bytes as f64;
    let mut unit = "B";
    for next_unit in ["KiB", "MiB", "GiB", "TiB"] {
        if size <= 1024.0 {
            break;
        }
        size /= 1024.0;
        unit = next_unit;
    }
    format!("{size:.2} {unit}")
}

impl std::fmt::Debug for MetaInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetaInfo")
            .field("announce", &self.announce.as_str())
            .field("info", &self.info)
            .field("info_hash", &self.info_hash_hex())
            .field("encoding", &self.encoding)
            .field("announce_list", &self.announce_list.as_ref().map(|tiers|
                tiers.iter().map(|tier|
                    tier.iter().map(url::Url::as_str).collect()
                ).collect::<Vec<Vec<&str>>>()
            ))
            .field("creation_date", &self.creation_date_fmt())
            .field("comment", &self.comment)
            .field("created_by", &self.created_by)
            .finish()
    }
}

// Don't print the (huge, binary) pieces field.
impl std::fmt::Debug for Info {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Info")
            .field("name", &self.name)
            .field("num_pieces", &(self.pieces.len() / 20))
            .field("piece_length", &self.piece_length)
            .field("md5sum", &self.md5sum)
            .field("length", &self.length)
            .field("files", &self.files)
            .field("private", &self.private)
            .field("root_hash", &self.root_hash)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Hand-built minimal single-file torrent: 3-byte file "abc", one 4-byte
    // piece (shorter than piece_length, since total_len < piece_length).
    fn single_file_torrent() -> Vec<u8> {
        use sha1::Digest;
        let piece_hash = {
            let mut h = sha1::Sha1::new();
            h.update(b"abc");
            h.finalize()
        };
        let mut info = b"d6:lengthi3e4:name1:a12:piece lengthi4e6:pieces20:".to_vec();
        info.extend_from_slice(&piece_hash);
        info.push(b'e');
        let mut doc = format!("d8:announce20:http://tracker.test/4:info{}:", info.len()).into_bytes();
        doc.extend_from_slice(&info);
        doc.push(b'e');
        doc
    }

    #[test]
    fn parses_single_file_torrent_and_recovers_info_hash() {
        let bytes = single_file_torrent();
        let metainfo = MetaInfo::from_bytes(&bytes).unwrap();

        assert_eq!(metainfo.total_len(), 3);
        assert_eq!(metainfo.num_pieces(), 1);
        assert!(!metainfo.is_multi_file());
        assert_eq!(metainfo.announce.as_str(), "http://tracker.test/");

        // Recompute independently: info-hash must equal SHA1 of exactly the
        // raw `info` bytes, not a re-encoding of the parsed struct.
        let start = bytes.windows(5).position(|w| w == b"4:info").unwrap() + "4:info".len();
        // Locate the length-prefixed info value directly in the source bytes.
        let info_len_end = bytes[start..].iter().position(|&b| b == b':').unwrap();
        let info_len: usize = std::str::from_utf8(&bytes[start..start + info_len_end]).unwrap().parse().unwrap();
        let info_start = start + info_len_end + 1;
        let raw_info = &bytes[info_start..info_start + info_len];

        let mut hasher = sha1::Sha1::new();
        hasher.update(raw_info);
        let expected: [u8; 20] = hasher.finalize().into();
        assert_eq!(metainfo.info_hash(), expected);
    }

    #[test]
    fn rejects_non_multiple_of_twenty_pieces() {
        let bytes = b"d8:announce4:a://4:infod6:lengthi3e4:name1:a12:piece lengthi4e6:pieces3:abceee".to_vec();
        let err = MetaInfo::from_bytes(&bytes).unwrap_err();
        assert!(matches!(err, MetaInfoError::BadHashTable));
    }

    #[test]
    fn rejects_zero_piece_length() {
        let mut info = b"d6:lengthi3e4:name1:a12:piece lengthi0e6:pieces20:".to_vec();
        info.extend_from_slice(&[0u8; 20]);
        info.push(b'e');
        let mut doc = format!("d8:announce4:a://4:info{}:", info.len()).into_bytes();
        doc.extend_from_slice(&info);
        doc.push(b'e');
        let err = MetaInfo::from_bytes(&doc).unwrap_err();
        assert!(matches!(err, MetaInfoError::BadLength));
    }
}
