use std::{
    collections::HashMap,
    sync::{Arc, Mutex, RwLock},
};

use tokio::{sync::mpsc, task};

use crate::{
    block::{num_blocks, Block, BlockInfo, BlockSource},
    p2p::{PeerCommand, PeerTx},
    progress::Progress,
    store::StoreInfo,
    torrent::{CommandToTorrent, TorrentTx},
    Bitfield,
};
use file::TorrentFile;
use piece::Piece;

mod file;
mod piece;
#[cfg(test)]
mod tests;

#[derive(thiserror::Error, Debug)]
pub enum DiskError {

    #[error(transparent)]
    IoError(#[from] std::io::Error),

    #[error("lock poisoned: {0}")]
    SyncError(String),

    #[error("channel closed: {0}")]
    ChannelError(String),

}

impl<T> From<std::sync::PoisonError<T>> for DiskError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        DiskError::SyncError(e.to_string())
    }
}

impl<T> From<mpsc::error::SendError<T>> for DiskError {
    fn from(e: mpsc::error::SendError<T>) -> Self {
        DiskError::ChannelError(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DiskError>;
pub type DiskTx = mpsc::UnboundedSender<CommandToDisk>;
pub type DiskRx = mpsc::UnboundedReceiver<CommandToDisk>;

pub enum CommandToDisk {

    WriteBlock {
        block: BlockInfo,
        data: Vec<u8>,
    },

    ReadBlock {
        block: BlockInfo,
        tx: PeerTx,
    },

    Shutdown,

}

#[derive(Debug)]
pub struct Disk {

    info: StoreInfo,

    write_buf: HashMap<usize, Piece>,

    piece_hashes: Vec<[u8; 20]>,

    disk_rx: DiskRx,

    ctx: Arc<Ctx>,

}

// Shared across spawn_blocking closures; must not hold the disk_rx.
#[derive(Debug)]
struct Ctx {

    files: Vec<RwLock<TorrentFile>>,

    torrent_tx: TorrentTx,

    read_cache: Mutex<lru::LruCache<usize, Vec<Arc<Vec<u8>>>>>,

    // Pieces already verified and persisted to disk; guards reads of
    // blocks that have not been written yet.
    have: Mutex<Bitfield>,

}

const READ_CACHE_SIZE: usize = 500;

pub async fn spawn(
    info: StoreInfo,
    piece_hashes: Vec<[u8; 20]>,
    have: Bitfield,
    torrent_tx: TorrentTx,
) -> Result<(task::JoinHandle<Result<()>>, DiskTx)> {
    tracing::info!("spawning disk task");
    let (mut disk, disk_tx) = Disk::new(info, piece_hashes, have, torrent_tx)?;
    let handle = tokio::task::spawn(async move { disk.run().await });
    Ok((handle, disk_tx))
}

impl Disk {

    pub fn new(
        info: StoreInfo,
        piece_hashes: Vec<[u8; 20]>,
        have: Bitfield,
        torrent_tx: TorrentTx,
    ) -> Result<(Self, DiskTx)> {

        if !info.output_dir.is_dir() {
            std::fs::create_dir_all(&info.output_dir)?;
            tracing::info!("created missing output directory: {:?}", info.output_dir);
        }

        debug_assert!(!info.files.is_empty());
        let mut files = Vec::with_capacity(info.files.len());
        for file in info.files.iter() {
            let path = info.output_dir.join(&file.path);
            if let Some(subdir) = path.parent() {
                if !subdir.exists() {
                    tracing::info!("creating sub-directory: {:?}", subdir);
                    std::fs::create_dir_all(subdir)?;
                }
            }
            files.push(RwLock::new(TorrentFile::new(&info.output_dir, file.clone())?));
        }

        let (disk_tx, disk_rx) = mpsc::unbounded_channel();
        // Unwrap safe, READ_CACHE_SIZE is a nonzero literal.
        let read_cache = Mutex::new(lru::LruCache::new(std::num::NonZeroUsize::new(READ_CACHE_SIZE).unwrap()));

        Ok((
            Self {
                info,
                piece_hashes,
                write_buf: HashMap::new(),
                disk_rx,
                ctx: Arc::new(Ctx {
                    files,
                    torrent_tx,
                    read_cache,
                    have: Mutex::new(have),
                }),
            },
            disk_tx,
        ))
    }

    #[tracing::instrument(name = "disk", skip_all)]
    pub async fn run(&mut self) -> Result<()> {
        tracing::info!("starting disk task");
        while let Some(cmd) = self.disk_rx.recv().await {
            match cmd {
                CommandToDisk::WriteBlock { block, data } => self.write_block(block, data)?,
                CommandToDisk::ReadBlock { block, tx } => self.read_block(block, tx)?,
                CommandToDisk::Shutdown => {
                    tracing::info!("disk task shutting down");
                    break;
                }
            }
        }
        Ok(())
    }

    fn write_block(&mut self, info: BlockInfo, data: Vec<u8>) -> Result<()> {
        tracing::trace!("received block: {:?}", info);
        let piece_idx = info.piece_idx;

        if !self.write_buf.contains_key(&piece_idx) {
            self.new_piece(piece_idx);
        }
        let piece = self.write_buf.get_mut(&piece_idx).expect("just inserted");
        piece.add_block(info.offset, data);

        if piece.is_complete() {
            let piece = self.write_buf.remove(&piece_idx).expect("checked above");
            let offset = self.info.piece_byte_offset(piece_idx);
            let ctx = Arc::clone(&self.ctx);

            tokio::task::spawn_blocking(move || {
                let valid = piece.verify_hash();
                let result = if valid {
                    tracing::trace!("piece {} hash verified", piece_idx);
                    piece.write(offset, &ctx.files)
                } else {
                    tracing::warn!("piece {} failed hash verification", piece_idx);
                    Ok(())
                };

                match result {
                    Ok(()) => {
                        if valid {
                            ctx.have.lock().unwrap().set(piece_idx, true);
                            ctx.read_cache.lock().unwrap().pop(&piece_idx);
                        }
                        ctx.torrent_tx
                            .send(CommandToTorrent::PieceWritten { idx: piece_idx, valid })
                            .map_err(|e| tracing::error!("failed to notify torrent of piece write: {}", e))
                            .ok();
                    }
                    Err(e) => {
                        tracing::error!("failed to write piece {} to disk: {}", piece_idx, e);
                        ctx.torrent_tx
                            .send(CommandToTorrent::PieceWritten { idx: piece_idx, valid: false })
                            .ok();
                    }
                }
            });
        }
        Ok(())
    }

    fn new_piece(&mut self, piece_idx: usize) {
        let length = self.info.piece_length(piece_idx);
        self.write_buf.insert(
            piece_idx,
            Piece {
                hash: self.piece_hashes[piece_idx],
                length,
                blocks: std::collections::BTreeMap::new(),
                file_overlap: self.info.piece_file_intersections(piece_idx),
            },
        );
    }

    fn read_block(&self, block_info: BlockInfo, peer_tx: PeerTx) -> Result<()> {
        let piece_idx = block_info.piece_idx;
        let have = self.ctx.have.lock()?.get(piece_idx).map(|b| *b).unwrap_or(false);
        if !have {
            tracing::warn!("refusing read of piece {} not yet verified on disk", piece_idx);
            return Ok(());
        }

        let block_idx = block_info.idx_in_piece();

        if let Some(cached) = self.ctx.read_cache.lock()?.get(&piece_idx) {
            if block_idx >= cached.len() {
                tracing::warn!("block index {} out of range for piece {}", block_idx, piece_idx);
                return Ok(());
            }
            let block = Block {
                piece_idx,
                offset: block_info.offset,
                data: BlockSource::Cached(cached[block_idx].clone()),
            };
            peer_tx.send(PeerCommand::BlockRead(block))?;
        } else {
            let file_range = self.info.piece_file_intersections(piece_idx);
            let piece_offset = self.info.piece_byte_offset(piece_idx);
            let piece_len = self.info.piece_length(piece_idx);
            let ctx = Arc::clone(&self.ctx);

            tokio::task::spawn_blocking(move || {
                let blocks = match read_piece(piece_offset, piece_len, file_range, &ctx.files) {
                    Ok(blocks) => blocks,
                    Err(e) => {
                        tracing::error!("failed to read piece {} from disk: {}", piece_idx, e);
                        return;
                    }
                };
                let block = Arc::clone(&blocks[block_idx]);
                ctx.read_cache.lock().unwrap().put(piece_idx, blocks);

                peer_tx
                    .send(PeerCommand::BlockRead(Block {
                        piece_idx,
                        offset: block_info.offset,
                        data: BlockSource::Cached(block),
                    }))
                    .map_err(|e| tracing::error!("failed to send block to peer: {}", e))
                    .ok();
            });
        }

        Ok(())
    }
}

// Resume support: trust a parsed progress sidecar if present, otherwise
// verify every piece already on disk by re-hashing it. Synchronous; callers
// run this via `spawn_blocking` before the disk task owns the files.
pub fn resume_bitfield(info: &StoreInfo, piece_hashes: &[[u8; 20]], progress: Option<Progress>) -> Bitfield {
    if let Some(progress) = progress {
        if let Some(bf) = progress.into_bitfield(info.num_pieces as usize) {
            tracing::info!("resuming from progress file: {} pieces already verified", bf.count_ones());
            return bf;
        }
        tracing::warn!("progress file present but unparseable, falling back to on-disk verification");
    }
    verify_on_disk(info, piece_hashes)
}

fn verify_on_disk(info: &StoreInfo, piece_hashes: &[[u8; 20]]) -> Bitfield {
    let mut bf = Bitfield::repeat(false, info.num_pieces as usize);
    for idx in 0..info.num_pieces as usize {
        match piece_matches_disk(info, piece_hashes, idx) {
            Ok(true) => bf.set(idx, true),
            Ok(false) => {}
            Err(e) => tracing::trace!("piece {} not resumable: {}", idx, e),
        }
    }
    tracing::info!("on-disk verification found {} pieces already complete", bf.count_ones());
    bf
}

fn piece_matches_disk(info: &StoreInfo, piece_hashes: &[[u8; 20]], idx: usize) -> std::io::Result<bool> {
    use sha1::{Digest, Sha1};
    use std::io::{Read, Seek, SeekFrom};

    let piece_len = info.piece_length(idx);
    let mut buf = vec![0u8; piece_len];
    let mut bytes_read = 0;
    let mut total_offset = info.piece_byte_offset(idx);

    for file in &info.files[info.piece_file_intersections(idx)] {
        let path = info.output_dir.join(&file.path);
        let mut f = std::fs::File::open(&path)?;
        let byte_range = file.byte_range();
        let file_offset = total_offset - byte_range.start;
        let piece_remaining = piece_len - bytes_read;
        let file_remaining = byte_range.end - total_offset;
        let n_wanted = piece_remaining.min(file_remaining);

        f.seek(SeekFrom::Start(file_offset as u64))?;
        f.read_exact(&mut buf[bytes_read..bytes_read + n_wanted])?;
        bytes_read += n_wanted;
        total_offset += n_wanted;
    }

    if bytes_read != piece_len {
        return Ok(false);
    }
    let digest: [u8; 20] = Sha1::digest(&buf).into();
    Ok(digest == piece_hashes[idx])
}

fn read_piece(
    piece_offset: usize,
    piece_len: usize,
    file_range: std::ops::Range<usize>,
    files: &[RwLock<TorrentFile>],
) -> Result<Vec<Arc<Vec<u8>>>> {

    let mut bytes_read = 0;
    let mut total_offset = piece_offset;
    let mut buf = vec![0; piece_len];

    for file in &files[file_range] {
        let mut f = file.write()?;
        let byte_range = f.info.byte_range();
        let file_offset = total_offset - byte_range.start;
        let piece_remaining = piece_len - bytes_read;
        let file_remaining = byte_range.end - total_offset;
        let n_wanted = piece_remaining.min(file_remaining);

        let n = f.read_at(file_offset, &mut buf[bytes_read..bytes_read + n_wanted])?;
        bytes_read += n;
        total_offset += n;
    }
    debug_assert_eq!(bytes_read, piece_len);

    Ok(buf
        .chunks(crate::BLOCK_SIZE)
        .map(|chunk| Arc::new(chunk.to_vec()))
        .collect())
}
