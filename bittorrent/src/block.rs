use std::sync::Arc;

use crate::{store::StoreInfo, BLOCK_SIZE};

// Identifies a block by position within a piece; shared by wire-level
// request/cancel messages and internal request-queue bookkeeping.
#[derive(Debug, Hash, PartialEq, Eq, Clone, Copy)]
pub struct BlockInfo {
    pub piece_idx: usize,
    pub offset: usize,
    pub len: usize,
}

impl BlockInfo {
    #[inline]
    pub fn idx_in_piece(&self) -> usize {
        self.offset / BLOCK_SIZE
    }

    // Bounds-checks a peer-supplied request/cancel against torrent geometry.
    pub fn is_valid(&self, info: &StoreInfo) -> bool {
        self.piece_idx < info.num_pieces as usize
            && self.offset % BLOCK_SIZE == 0
            && self.len > 0
            && self.len <= BLOCK_SIZE
            && self.offset + self.len <= info.piece_length(self.piece_idx)
    }
}

// Pending-request bookkeeping uses the same shape as a wire block request.
pub type BlockRequest = BlockInfo;

// Payload of a wire `piece` message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockData {
    pub piece_idx: usize,
    pub offset: usize,
    pub data: Vec<u8>,
}

impl BlockData {
    pub fn as_info(&self) -> BlockInfo {
        BlockInfo { piece_idx: self.piece_idx, offset: self.offset, len: self.data.len() }
    }
}

// Data backing a block handed from the disk task to a peer session.
// `Cached` avoids copying shared read-cache entries; `Owned` is a one-off
// buffer (e.g. data that arrived from a peer and is being relayed nowhere
// else).
#[derive(Debug, Clone)]
pub enum BlockSource {
    Cached(Arc<Vec<u8>>),
    Owned(Vec<u8>),
}

impl BlockSource {
    pub fn len(&self) -> usize {
        match self {
            BlockSource::Cached(b) => b.len(),
            BlockSource::Owned(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_vec(self) -> Vec<u8> {
        match self {
            BlockSource::Cached(b) => (*b).clone(),
            BlockSource::Owned(b) => b,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Block {
    pub piece_idx: usize,
    pub offset: usize,
    pub data: BlockSource,
}

pub fn block_len(piece_len: usize, block_idx: usize) -> usize {
    BLOCK_SIZE.min(piece_len - (block_idx * BLOCK_SIZE))
}

pub fn num_blocks(piece_len: usize) -> u32 {
    ((piece_len + (BLOCK_SIZE - 1)) / BLOCK_SIZE) as u32
}
