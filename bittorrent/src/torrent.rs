use std::{
    collections::HashMap,
    net::SocketAddr,
    path::PathBuf,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::mpsc;
use crate::{
    config::{ClientConfig, EngineConfig},
    context::Context,
    fs,
    metainfo::MetaInfo,
    p2p::{state::SessionState, PeerCommand, PeerHandle},
    picker::Picker,
    progress::Progress,
    store::StoreInfo,
    tracker::{AnnounceParams, Event, TrackerError, TrackersHandle},
};

#[derive(Debug, thiserror::Error)]
pub enum TorrentError {

    #[error("tracker error: {0}")]
    TrackerError(#[from] TrackerError),

    #[error("disk error: {0}")]
    DiskError(#[from] fs::DiskError),

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("channel error: {0}")]
    Channel(String),
}

impl<T> From<mpsc::error::SendError<T>> for TorrentError {
    fn from(e: mpsc::error::SendError<T>) -> Self {
        TorrentError::Channel(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TorrentError>;
pub type TorrentTx = mpsc::UnboundedSender<CommandToTorrent>;
pub type TorrentRx = mpsc::UnboundedReceiver<CommandToTorrent>;

// Commands that can be sent to a torrent from other tasks.
pub enum CommandToTorrent {

    // Sent by a peer session right after a successful handshake.
    PeerConnected { address: SocketAddr, id: [u8; 20] },

    // Sent by a peer session whenever its SessionState changes.
    PeerState { address: SocketAddr, state: SessionState },

    // Sent by disk task when a piece has been hashed and written.
    PieceWritten { idx: usize, valid: bool },

    // Sent by a tracker task with the peers from its last announce.
    Peers(Vec<SocketAddr>),

    // Sent by itself to shutdown.
    Shutdown,

}

// Where a torrent is in its lifecycle; surfaced via TorrentStats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TorrentState {
    #[default]
    Starting,
    Downloading,
    Seeding,
    Complete,
    Error,
}

#[derive(Debug)]
pub struct Torrent {

    // Context is a read-only state accessible by peers in threads.
    ctx: Arc<TorrentContext>,

    state: TorrentState,

    // Peers we have active sessions with.
    peers: HashMap<SocketAddr, PeerHandle>,

    // Peers we know about but don't have a session with, deduplicated by
    // endpoint against both this queue and `peers`.
    available: Vec<SocketAddr>,

    // Receiver for commands.
    torrent_rx: TorrentRx,

    // Sender for commands, used on shutdown and by the disk/tracker tasks.
    torrent_tx: TorrentTx,

    // Time when torrent started.
    start_time: Option<Instant>,

    // Address to listen for incoming connections on.
    listen_address: SocketAddr,

    // Handle for disk task.
    // Option is for moving out of the handle behind a mutable ref.
    disk_handle: Option<tokio::task::JoinHandle<fs::Result<()>>>,

    trackers: TrackersHandle,

    // Where the progress sidecar lives, for deleting it on completion.
    progress_path: PathBuf,

}

#[derive(Debug)]
pub struct TorrentContext {

    // The info hash for this torrent.
    pub info_hash: [u8; 20],

    // The client ID for this client.
    pub client_id: [u8; 20],

    // Tunables shared by every session and by the swarm manager itself.
    pub config: EngineConfig,

    // Clock, RNG and progress persistence, threaded explicitly rather than
    // reached for as globals.
    pub rt: Context,

    // Allows for peers to pick next block to download.
    pub picker: Picker,

    // Commands to the torrent.
    pub torrent_tx: TorrentTx,

    // Commands to disk.
    pub disk_tx: fs::DiskTx,

    // Torrent storage information.
    pub info: StoreInfo,

}

impl Torrent {

    // Not async in the teacher; is here because resuming requires re-hashing
    // on-disk pieces and handing the disk task its initial `have` bitfield.
    pub async fn new(metainfo: MetaInfo, engine_config: EngineConfig, client_config: ClientConfig) -> Result<Self> {

        let info = StoreInfo::new(&metainfo, engine_config.output_dir.clone());
        let piece_hashes = metainfo.piece_hashes();
        let progress_path = info.output_dir.join(format!("{}.progress", metainfo.name()));

        let progress = if engine_config.seed_mode {
            None
        } else {
            Progress::load(&progress_path)
        };

        let have = {
            let info = info.clone();
            let hashes = piece_hashes.clone();
            tokio::task::spawn_blocking(move || fs::resume_bitfield(&info, &hashes, progress))
                .await
                .expect("resume verification task panicked")
        };

        let (torrent_tx, torrent_rx) = mpsc::unbounded_channel();
        let (disk_handle, disk_tx) = fs::spawn(info.clone(), piece_hashes, have.clone(), torrent_tx.clone()).await?;

        let picker = Picker::new(info.num_pieces, info.piece_len, info.last_piece_len);
        picker.piece_picker.write().await.set_own_bitfield(have.clone());

        let listen_address = engine_config.listen_address;
        let trackers = TrackersHandle::new(metainfo.trackers());

        let state = if have.all() { TorrentState::Seeding } else { TorrentState::Starting };

        Ok(Torrent {
            ctx: Arc::new(
                TorrentContext {
                    info_hash: metainfo.info_hash(),
                    client_id: client_config.peer_id,
                    rt: Context::new(client_config.peer_id, progress_path.clone()),
                    picker,
                    torrent_tx: torrent_tx.clone(),
                    info,
                    disk_tx,
                    config: engine_config,
                }
            ),
            state,
            peers: HashMap::new(),
            available: Vec::new(),
            torrent_rx,
            torrent_tx,
            start_time: None,
            listen_address,
            disk_handle: Some(disk_handle),
            trackers,
            progress_path,
        })
    }

    // A sender external callers (the CLI's signal handler) can use to
    // request a graceful shutdown from outside the run loop.
    pub fn handle(&self) -> TorrentTx {
        self.torrent_tx.clone()
    }

    #[tracing::instrument(skip(self), fields(info_hash = %hex::encode(self.ctx.info_hash)))]
    pub async fn start(&mut self) -> Result<()> {
        tracing::info!("starting torrent");
        self.start_time = Some(Instant::now());
        self.trackers.start(self.torrent_tx.clone()).await;
        self.announce(Some(Event::Started)).await?;
        self.run().await?;
        Ok(())
    }

    // Sends the swarm's current announce parameters down the shared watch
    // channel; every tracker task observes the change and decides, via its
    // own interval bookkeeping, whether this is worth an actual request.
    async fn announce(&mut self, event: Option<Event>) -> Result<()> {
        let num_peers = self.peers.len() + self.available.len();
        let max_peers = self.ctx.config.max_peers as usize;

        let num_want = if event == Some(Event::Stopped) {
            None
        } else if num_peers < max_peers {
            Some((max_peers - num_peers).max(1))
        } else {
            None
        };

        let downloaded_pieces = self.ctx.picker.piece_picker.read().await.own_bitfield().count_ones() as u64;
        let downloaded = (downloaded_pieces * self.ctx.info.piece_len as u64).min(self.ctx.info.total_len);
        // Each session's throughput counter tracks its own cumulative bytes
        // served; summing across every known peer gives the swarm total.
        let uploaded: u64 = self.peers.values().map(|peer| peer.state.throughput.up.total()).sum();
        let params = AnnounceParams {
            info_hash: self.ctx.info_hash,
            client_id: self.ctx.client_id,
            port: self.listen_address.port(),
            uploaded,
            downloaded,
            left: self.ctx.info.total_len.saturating_sub(downloaded),
            event,
            num_want,
        };

        self.trackers.tracker_tx.send(Some(params)).ok();
        Ok(())
    }

    fn admit_peers(&mut self, candidates: Vec<SocketAddr>) {
        for address in candidates {
            if address == self.listen_address {
                continue;
            }
            if self.peers.contains_key(&address) || self.available.contains(&address) {
                continue;
            }
            self.available.push(address);
        }
    }

    fn connect_to_peers(&mut self) {
        let max_peers = self.ctx.config.max_peers as usize;
        let count = self.available.len().min(max_peers.saturating_sub(self.peers.len()));
        if count == 0 {
            return;
        }

        tracing::info!("connecting to {} peers", count);
        for address in self.available.drain(0..count) {
            self.peers.insert(address, PeerHandle::start_session(address, self.ctx.clone(), None));
        }
    }

    #[tracing::instrument(skip_all, name = "torrent")]
    async fn run(&mut self) -> Result<()> {

        let listener = tokio::net::TcpListener::bind(&self.listen_address).await?;
        self.listen_address = listener.local_addr()?;
        tracing::info!("listening on {}", self.listen_address);

        self.connect_to_peers();

        let mut refill_ticker = tokio::time::interval(Duration::from_secs(10));
        let mut announce_ticker = tokio::time::interval(self.ctx.config.announce_interval);
        let mut choke_ticker = tokio::time::interval(Duration::from_secs(10));
        let mut optimistic_unchoke_ticker = tokio::time::interval(Duration::from_secs(30));

        loop { tokio::select! {

            new_peer_conn = listener.accept() => {
                let (stream, address) = match new_peer_conn {
                    Ok((stream, address)) => (stream, address),
                    Err(e) => {
                        tracing::warn!("inbound peer connection error: {}", e);
                        continue;
                    },
                };
                if self.peers.len() >= self.ctx.config.max_peers as usize || self.peers.contains_key(&address) {
                    tracing::warn!("rejecting inbound connection from {}", address);
                    continue;
                }
                self.peers.insert(address, PeerHandle::start_session(address, self.ctx.clone(), Some(stream)));
            }

            _ = refill_ticker.tick() => {
                if (self.peers.len() as u32) < self.ctx.config.low_water {
                    self.connect_to_peers();
                }
            }

            _ = announce_ticker.tick() => {
                self.announce(None).await?;
            }

            _ = choke_ticker.tick() => {
                self.reciprocate_unchokes();
            }

            _ = optimistic_unchoke_ticker.tick() => {
                self.optimistic_unchoke();
            }

            Some(cmd) = self.torrent_rx.recv() => {
                match cmd {

                    CommandToTorrent::PeerConnected { address, id } => {
                        if let Some(peer) = self.peers.get_mut(&address) {
                            peer.id = Some(id);
                        }
                    },

                    CommandToTorrent::PeerState { address, state } => {
                        if let Some(peer) = self.peers.get_mut(&address) {
                            peer.state = state;
                        }
                    },

                    CommandToTorrent::Peers(peers) => {
                        self.admit_peers(peers);
                        self.connect_to_peers();
                    },

                    CommandToTorrent::PieceWritten { idx, valid } => {
                        if self.handle_piece_write(idx, valid).await? {
                            break;
                        }
                    },

                    CommandToTorrent::Shutdown => {
                        break;
                    },
                }
            }
        }}

        self.shutdown().await
    }

    // Unchokes the `unchoke_slots` sessions with the best recent rate towards
    // us (downloaded, or uploaded in seed mode), choking everyone else that
    // isn't already choked by the optimistic slot.
    fn reciprocate_unchokes(&mut self) {
        let slots = self.ctx.config.unchoke_slots as usize;
        let seeding = self.ctx.config.seed_mode;

        let mut ranked: Vec<(SocketAddr, u64)> = self.peers.iter()
            .filter(|(_, peer)| peer.state.peer_interested)
            .map(|(addr, peer)| {
                let rate = if seeding { peer.state.throughput.up.round() } else { peer.state.throughput.down.round() };
                (*addr, rate)
            })
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1));

        let unchoke: std::collections::HashSet<SocketAddr> = ranked.into_iter().take(slots).map(|(a, _)| a).collect();

        for (address, peer) in self.peers.iter() {
            let should_unchoke = unchoke.contains(address);
            peer.peer_tx.send(PeerCommand::SetChoke(!should_unchoke)).ok();
        }
    }

    // Every 30s, give one random choked-and-interested peer a free unchoke
    // regardless of rate, so new entrants get a chance to prove themselves.
    fn optimistic_unchoke(&mut self) {
        use rand::seq::IteratorRandom;
        let mut rng = self.ctx.rt.rng.lock().expect("rng lock poisoned");
        let candidate = self.peers.iter()
            .filter(|(_, peer)| peer.state.choked && peer.state.peer_interested)
            .choose(&mut *rng)
            .map(|(addr, _)| *addr);
        drop(rng);

        if let Some(address) = candidate {
            if let Some(peer) = self.peers.get(&address) {
                peer.peer_tx.send(PeerCommand::SetChoke(false)).ok();
            }
        }
    }

    // Returns whether the torrent is now complete and the run loop should stop.
    async fn handle_piece_write(&mut self, idx: usize, valid: bool) -> Result<bool> {

        if valid {

            self.ctx.picker.partial_pieces.write().await.remove(&idx);
            self.ctx.picker.piece_picker.write().await.received_piece(idx);

            let have = self.ctx.picker.piece_picker.read().await.own_bitfield().clone();
            self.ctx.rt.progress_sink.persist(&have);
            let num_pieces_missing = have.count_zeros();
            tracing::info!("piece {} downloaded, {} pieces remain", idx, num_pieces_missing);

            for peer in self.peers.values() {
                peer.peer_tx.send(PeerCommand::PieceWritten(idx)).ok();
            }

            if num_pieces_missing == 0 {
                tracing::info!("torrent download complete");
                self.state = TorrentState::Complete;
                return Ok(true);
            }

        } else {
            if let Some(piece) = self.ctx.picker.partial_pieces.read().await.get(&idx) {
                piece.write().await.free_all_blocks();
            }
        }

        Ok(false)
    }

    async fn shutdown(&mut self) -> Result<()> {

        tracing::info!("disconnecting from {} peers", self.peers.len());
        for peer in self.peers.values() {
            peer.peer_tx.send(PeerCommand::Shutdown).ok();
        }

        for peer in self.peers.values_mut() {
            if let Some(handle) = peer.session_handle.take() {
                if let Err(e) = handle.await {
                    tracing::warn!("peer task join error: {}", e);
                }
            }
        }

        self.ctx.disk_tx.send(fs::CommandToDisk::Shutdown)?;
        self.disk_handle
            .take()
            .expect("missing disk handle")
            .await
            .map_err(|e| TorrentError::Channel(e.to_string()))??;

        self.announce(Some(Event::Stopped)).await?;
        self.trackers.shutdown().await;

        if self.state == TorrentState::Complete && !self.ctx.config.seed_mode {
            std::fs::remove_file(&self.progress_path).ok();
        }

        self.torrent_tx.send(CommandToTorrent::Shutdown)?;
        Ok(())
    }
}
