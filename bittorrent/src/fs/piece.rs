use std::{collections::BTreeMap, io::IoSlice, ops::Range, sync::RwLock};

use sha1::{Digest, Sha1};

use super::file::TorrentFile;
use crate::block::num_blocks;

// A piece's blocks as they arrive from peers, keyed by in-piece byte offset.
#[derive(Debug)]
pub struct Piece {
    pub hash: [u8; 20],
    pub length: usize,
    pub blocks: BTreeMap<usize, Vec<u8>>,
    pub file_overlap: Range<usize>,
}

impl Piece {
    pub fn add_block(&mut self, offset: usize, data: Vec<u8>) {
        use std::collections::btree_map::Entry;
        match self.blocks.entry(offset) {
            Entry::Occupied(_) => tracing::warn!("duplicate block at offset {}", offset),
            Entry::Vacant(e) => {
                e.insert(data);
            }
        }
    }

    pub fn is_complete(&self) -> bool {
        self.blocks.len() == num_blocks(self.length) as usize
    }

    // Concatenates the blocks in offset order. Only valid once `is_complete`.
    fn into_bytes(self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.length);
        for (_, block) in self.blocks {
            buf.extend_from_slice(&block);
        }
        buf
    }

    pub fn verify_hash(&self) -> bool {
        let mut hasher = Sha1::new();
        for block in self.blocks.values() {
            hasher.update(block);
        }
        let digest: [u8; 20] = hasher.finalize().into();
        digest == self.hash
    }

    // Writes the piece across every file it overlaps, one vectored write per file.
    pub fn write(self, piece_offset: usize, files: &[RwLock<TorrentFile>]) -> super::Result<()> {
        let file_overlap = self.file_overlap.clone();
        let data = self.into_bytes();
        let files = &files[file_overlap];

        let mut cursor = 0usize;
        for file in files {
            let mut f = file.write()?;
            let range = f.info.byte_range();

            let abs_start = piece_offset + cursor;
            let write_start = abs_start.max(range.start);
            let write_end = (piece_offset + data.len()).min(range.end);
            if write_start >= write_end {
                continue;
            }

            let slice = &data[write_start - piece_offset..write_end - piece_offset];
            let n = f.write_vectored_at(write_start - range.start, &[IoSlice::new(slice)])?;
            debug_assert_eq!(n, slice.len());
            cursor = write_end - piece_offset;
        }

        debug_assert_eq!(cursor, data.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FileInfo;
    use std::path::PathBuf;

    fn file_info(path: &str, offset: usize, length: usize) -> FileInfo {
        FileInfo { path: PathBuf::from(path), length, offset, md5sum: None }
    }

    #[test]
    fn verifies_correct_hash() {
        let mut hasher = Sha1::new();
        hasher.update(b"hello world");
        let hash: [u8; 20] = hasher.finalize().into();

        let mut piece = Piece { hash, length: 11, blocks: BTreeMap::new(), file_overlap: 0..1 };
        piece.add_block(0, b"hello world".to_vec());
        assert!(piece.verify_hash());
    }

    #[test]
    fn rejects_wrong_hash() {
        let mut piece = Piece { hash: [0; 20], length: 11, blocks: BTreeMap::new(), file_overlap: 0..1 };
        piece.add_block(0, b"hello world".to_vec());
        assert!(!piece.verify_hash());
    }

    #[test]
    fn writes_piece_spanning_two_files() {
        let dir = tempfile::tempdir().unwrap();
        let a = TorrentFile::new(dir.path(), file_info("a", 0, 5)).unwrap();
        let b = TorrentFile::new(dir.path(), file_info("b", 5, 5)).unwrap();
        let files = vec![RwLock::new(a), RwLock::new(b)];

        let mut piece = Piece { hash: [0; 20], length: 10, blocks: BTreeMap::new(), file_overlap: 0..2 };
        piece.add_block(0, b"0123456789".to_vec());
        piece.write(0, &files).unwrap();

        let contents_a = std::fs::read(dir.path().join("a")).unwrap();
        let contents_b = std::fs::read(dir.path().join("b")).unwrap();
        assert_eq!(contents_a, b"01234");
        assert_eq!(contents_b, b"56789");
    }
}
