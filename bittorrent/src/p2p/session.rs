use std::{collections::HashMap, net::SocketAddr, sync::Arc, time::Instant};
use tokio::{sync::mpsc, net::TcpStream, time};
use tokio_util::codec::Framed;
use futures::{SinkExt, StreamExt, stream::SplitSink};
use crate::{
    block::{Block, BlockData, BlockInfo},
    fs,
    torrent::{CommandToTorrent, TorrentContext},
    Bitfield,
};
use super::{*, message::*, handshake::*, state::*};

type MessageSink = SplitSink<Framed<TcpStream, MessageCodec>, Message>;

#[derive(Debug)]
pub struct PeerSession {

    // The peer's IP address.
    address: SocketAddr,

    // Context is a read only state accessible by all peers.
    torrent_ctx: Arc<TorrentContext>,

    // Commands to the peer.
    peer_rx: PeerRx,

    // Internal send channel for disk reads.
    peer_tx: PeerTx,

    // Pending block requests from peer to the client.
    requests_in: std::collections::HashSet<BlockInfo>,

    // Pending block requests from client to peer, with the time they were issued.
    requests_out: HashMap<BlockInfo, Instant>,

    // Bitfield of pieces the peer currently has.
    bitfield: Bitfield,

    state: SessionState,

    last_rx: Instant,

    last_tx: Instant,

}

impl PeerSession {

    pub fn new(address: SocketAddr, torrent_ctx: Arc<TorrentContext>) -> (PeerSession, PeerTx) {

        let (peer_tx, peer_rx) = mpsc::unbounded_channel();
        let bitfield = Bitfield::repeat(false, torrent_ctx.info.num_pieces as usize);
        let now = Instant::now();

        (
            PeerSession {
                address,
                torrent_ctx,
                peer_rx,
                peer_tx: peer_tx.clone(),
                bitfield,
                state: SessionState::default(),
                requests_in: std::collections::HashSet::new(),
                requests_out: HashMap::new(),
                last_rx: now,
                last_tx: now,
            },
            peer_tx,
        )
    }

    #[tracing::instrument(name = "peer", skip(self, inbound_stream), fields(address = %self.address))]
    pub async fn start_session(&mut self, inbound_stream: Option<TcpStream>) -> Result<()> {

        self.state.update(|state| state.conn_state = ConnState::Connecting);
        let inbound = inbound_stream.is_some();
        let mut socket = if let Some(stream) = inbound_stream {
            Framed::new(stream, HandshakeCodec)
        } else {
            let timeout = time::Duration::from_secs(10);
            let stream = time::timeout(timeout, TcpStream::connect(self.address))
                .await
                .map_err(|_| PeerError::Timeout)??;
            tracing::trace!("outbound connection successful");
            Framed::new(stream, HandshakeCodec)
        };

        self.exchange_handshake(&mut socket, inbound).await?;

        let socket = Framed::new(socket.into_inner(), MessageCodec);
        self.run(socket).await
    }

    pub async fn disconnect(&mut self) {
        self.state.update(|state| *state = SessionState::default());
        self.torrent_ctx.torrent_tx.send(CommandToTorrent::PeerState {
            address: self.address,
            state: self.state,
        }).ok();
    }

    async fn exchange_handshake(&mut self, socket: &mut Framed<TcpStream, HandshakeCodec>, inbound: bool) -> Result<()> {

        self.state.update(|state| state.conn_state = ConnState::Handshaking);
        let handshake = Handshake::new(self.torrent_ctx.info_hash, self.torrent_ctx.client_id);

        if !inbound {
            tracing::info!("send handshake");
            socket.send(handshake).await?;
        }

        tracing::trace!("waiting for handshake");
        if let Some(Ok(handshake)) = socket.next().await {
            tracing::info!("read: handshake");

            if handshake.protocol != PROTOCOL {
                return Err(PeerError::IncorrectProtocol);
            }
            if handshake.info_hash != self.torrent_ctx.info_hash {
                return Err(PeerError::IncorrectInfoHash);
            }

            if inbound {
                tracing::info!("send handshake");
                socket.send(handshake).await?;
            }

            tracing::info!("handshake successful, peer connected");
            self.torrent_ctx.torrent_tx.send(CommandToTorrent::PeerConnected {
                address: self.address,
                id: handshake.peer_id,
            })?;
            Ok(())

        } else {
            Err(PeerError::NoHandshake)
        }
    }

    async fn run(&mut self, socket: Framed<TcpStream, MessageCodec>) -> Result<()> {

        let now = Instant::now();
        self.last_rx = now;
        self.last_tx = now;
        self.state.update(|state| {
            state.conn_state = ConnState::Introducing;
            state.connect_time = Some(now);
        });
        let (mut sink, mut stream) = socket.split();
        let mut ticker = time::interval(time::Duration::from_secs(1));

        let own_bitfield = self.torrent_ctx.picker.piece_picker.read().await.own_bitfield().clone();
        if own_bitfield.any() {
            self.send_message(&mut sink, Message::Bitfield(own_bitfield)).await?;
        }

        loop { tokio::select! {

            Some(Ok(msg)) = stream.next() => {
                self.last_rx = Instant::now();
                self.handle_msg(&mut sink, msg).await?
            },

            Some(cmd) = self.peer_rx.recv() => {
                match cmd {

                    PeerCommand::BlockRead(block) => self.send_block(&mut sink, block).await?,

                    PeerCommand::PieceWritten(idx) => self.handle_written_piece(&mut sink, idx).await?,

                    PeerCommand::SetChoke(choke) => self.set_choke(&mut sink, choke).await?,

                    PeerCommand::Shutdown => {
                        tracing::info!("session shutdown");
                        break;
                    },

                }
            }

            t = ticker.tick() => self.tick(t.into_std(), &mut sink).await?,

        }}

        Ok(())
    }

    #[inline(always)]
    async fn send_message(&mut self, sink: &mut MessageSink, msg: Message) -> Result<()> {
        tracing::info!("send: {}", msg);
        sink.send(msg).await?;
        self.last_tx = Instant::now();
        Ok(())
    }

    async fn handle_msg(&mut self, sink: &mut MessageSink, msg: Message) -> Result<()> {
        tracing::info!("read: {}", msg);

        match msg {

            Message::Bitfield(bitfield) => {
                if self.state.conn_state == ConnState::Introducing {
                    self.handle_bitfield(sink, bitfield).await?;
                } else {
                    tracing::error!("unexpected bitfield");
                    return Err(PeerError::UnexpectedBitfield);
                }
            },

            Message::KeepAlive => {},

            Message::Choke => {
                if !self.state.peer_choking {
                    self.state.peer_choking = true;
                    self.free_requests_out().await;
                }
            },

            Message::Unchoke => {
                if self.state.peer_choking {
                    self.state.peer_choking = false;
                    if self.state.interested {
                        self.make_requests(sink).await?;
                    }
                }
            },

            Message::Interested => self.state.update(|state| state.peer_interested = true),

            Message::NotInterested => self.state.update(|state| state.peer_interested = false),

            Message::Block(block) => {
                self.handle_block(block).await?;
                self.make_requests(sink).await?;
            },

            Message::Request(request) => self.handle_request(request).await?,

            Message::Have { idx } => self.handle_have(sink, idx).await?,

            Message::Port { port: _ } => {},

            Message::Cancel(block_info) => self.handle_cancel(block_info).await?,

        }

        if self.state.conn_state == ConnState::Introducing {

            if self.torrent_ctx.picker.piece_picker.read().await.own_bitfield().not_any()
            && self.bitfield.not_any()
            {
                tracing::warn!("no pieces in connection");
                self.peer_tx.send(PeerCommand::Shutdown)?;
                return Ok(())
            }

            self.state.update(|state| state.conn_state = ConnState::Connected);
        }

        Ok(())
    }

    async fn handle_bitfield(&mut self, sink: &mut MessageSink, mut bitfield: Bitfield) -> Result<()> {
        tracing::info!("peer has {}/{} pieces", bitfield.count_ones(), self.torrent_ctx.info.num_pieces);
        if bitfield.len() > self.torrent_ctx.info.num_pieces as usize
            && bitfield[self.torrent_ctx.info.num_pieces as usize..].any()
        {
            tracing::error!("bitfield has non-zero padding bits");
            return Err(PeerError::InvalidMessage);
        }
        bitfield.resize(self.torrent_ctx.info.num_pieces as usize, false);
        let interested = self.torrent_ctx.picker.piece_picker.write().await.bitfield_update(&bitfield);
        self.state.update(|state| state.num_pieces = bitfield.count_ones());
        self.bitfield = bitfield;
        self.update_interest(sink, interested && !self.torrent_ctx.config.seed_mode).await
    }

    async fn handle_have(&mut self, sink: &mut MessageSink, idx: u32) -> Result<()> {
        if idx >= self.torrent_ctx.info.num_pieces {
            tracing::error!("have msg with invalid idx: {}", idx);
            return Err(PeerError::InvalidMessage);
        }
        if self.bitfield[idx as usize] {
            return Ok(());
        }
        self.bitfield.set(idx as usize, true);
        self.state.update(|state| state.num_pieces += 1);

        let interested = self
            .torrent_ctx
            .picker
            .piece_picker
            .write()
            .await
            .increment_piece(idx as usize);

        self.update_interest(sink, interested && !self.torrent_ctx.config.seed_mode).await
    }

    async fn handle_block(&mut self, block: BlockData) -> Result<()> {

        let request = block.as_info();
        if self.requests_out.remove(&request).is_none() {
            tracing::warn!("unexpected block: {:?}", &request);
        }

        let is_duplicate = if let Some(partial_piece) = self
            .torrent_ctx
            .picker
            .partial_pieces
            .read()
            .await
            .get(&request.piece_idx)
        {
            partial_piece.write().await.received_block(&request)
        } else {
            tracing::warn!("received block for non-existent piece: {:?}", &request);
            return Ok(());
        };

        if !is_duplicate {
            self.state.update(|state| state.throughput.down += block.data.len() as u64);
            self.torrent_ctx.disk_tx
                .send(fs::CommandToDisk::WriteBlock { block: request, data: block.data })
                .map_err(Into::into)
        } else {
            tracing::warn!("duplicate block: {:?}", &request);
            Ok(())
        }
    }

    async fn handle_request(&mut self, request: BlockInfo) -> Result<()> {

        if self.state.choked {
            tracing::debug!("dropping request from peer we're choking: {:?}", request);
            return Ok(());
        }
        if !request.is_valid(&self.torrent_ctx.info) {
            tracing::error!("invalid request: {:?}", request);
            return Err(PeerError::InvalidMessage);
        }
        if self.requests_in.contains(&request) {
            tracing::warn!("duplicate request: {:?}", request);
            return Ok(());
        }

        self.requests_in.insert(request);
        self.torrent_ctx.disk_tx.send(fs::CommandToDisk::ReadBlock {
            block: request,
            tx: self.peer_tx.clone(),
        })?;

        Ok(())
    }

    async fn handle_cancel(&mut self, block_info: BlockInfo) -> Result<()> {
        if !block_info.is_valid(&self.torrent_ctx.info) {
            tracing::warn!("invalid cancel: {:?}", block_info);
            return Err(PeerError::InvalidMessage);
        }
        self.requests_in.remove(&block_info);
        Ok(())
    }

    // When a piece is written to disk:
    // - Send a have message if the peer doesn't have it.
    // - Cancel any requests for the piece.
    async fn handle_written_piece(&mut self, sink: &mut MessageSink, idx: usize) -> Result<()> {

        if !self.bitfield[idx] {
            self.send_message(sink, Message::Have { idx: idx as u32 }).await?;
        } else {
            let in_piece: Vec<BlockInfo> = self
                .requests_out
                .keys()
                .filter(|b| b.piece_idx == idx)
                .copied()
                .collect();
            for block in in_piece {
                self.send_message(sink, Message::Cancel(block)).await?;
            }
        }

        Ok(())
    }

    // Queue requests up to the configured per-session target queue length.
    async fn make_requests(&mut self, sink: &mut MessageSink) -> Result<()> {

        if self.state.peer_choking || !self.state.interested {
            return Ok(())
        }

        let current: std::collections::HashSet<BlockInfo> = self.requests_out.keys().copied().collect();
        let requests = self
            .torrent_ctx.picker
            .pick_blocks(&current, self.torrent_ctx.config.max_inflight_per_peer, &self.bitfield)
            .await;

        let now = Instant::now();
        for block in requests {
            tracing::info!("send request: {:?}", block);
            self.requests_out.insert(block, now);
            self.send_message(sink, Message::Request(block)).await?;
        }

        Ok(())
    }

    // Remove the pending request and send the peer the block.
    async fn send_block(&mut self, sink: &mut MessageSink, block: Block) -> Result<()> {
        let request = BlockInfo { piece_idx: block.piece_idx, offset: block.offset, len: block.data.len() };
        if !self.requests_in.remove(&request) {
            tracing::warn!("block read but no request: {:?}", request);
            return Ok(());
        }
        let len = block.data.len() as u64;
        self.send_message(sink, Message::Block(BlockData {
            piece_idx: block.piece_idx,
            offset: block.offset,
            data: block.data.into_vec(),
        })).await?;
        self.state.update(|state| state.throughput.up += len);
        Ok(())
    }

    // Free all requested blocks, making them available for other peers.
    async fn free_requests_out(&mut self) {
        tracing::info!("freeing requested blocks");
        let partial_pieces = self.torrent_ctx.picker.partial_pieces.read().await;
        for (request, _) in self.requests_out.drain() {
            if let Some(partial_piece) = partial_pieces.get(&request.piece_idx) {
                partial_piece.write().await.free_block(&request);
                tracing::trace!("freed block request: {:?}", request);
            }
        }
    }

    // Applies the SwarmManager's choke decision for this peer.
    async fn set_choke(&mut self, sink: &mut MessageSink, choke: bool) -> Result<()> {
        if choke == self.state.choked {
            return Ok(());
        }
        self.state.update(|state| state.choked = choke);
        if choke {
            self.send_message(sink, Message::Choke).await
        } else {
            self.send_message(sink, Message::Unchoke).await
        }
    }

    // If we have BECOME interested, send a message to indicate this.
    async fn update_interest(&mut self, sink: &mut MessageSink, interested: bool) -> Result<()> {
        if !self.state.interested && interested {
            self.state.interested = true;
            self.send_message(sink, Message::Interested).await?;
        } else if self.state.interested && !interested {
            self.state.interested = false;
            self.send_message(sink, Message::NotInterested).await?;
        }
        Ok(())
    }

    // Re-queue any request that has outlived request_timeout, returning its
    // block to the partial piece's free pool for another session to pick up.
    async fn sweep_timed_out_requests(&mut self, now: Instant) {
        let timeout = self.torrent_ctx.config.request_timeout;
        let expired: Vec<BlockInfo> = self
            .requests_out
            .iter()
            .filter(|(_, issued_at)| now.saturating_duration_since(**issued_at) >= timeout)
            .map(|(block, _)| *block)
            .collect();

        if expired.is_empty() {
            return;
        }
        tracing::warn!("{} requests to {} timed out", expired.len(), self.address);
        let partial_pieces = self.torrent_ctx.picker.partial_pieces.read().await;
        for block in expired {
            self.requests_out.remove(&block);
            if let Some(partial_piece) = partial_pieces.get(&block.piece_idx) {
                partial_piece.write().await.free_block(&block);
            }
        }
    }

    async fn tick(&mut self, time: Instant, sink: &mut MessageSink) -> Result<()> {

        if time.saturating_duration_since(self.last_rx) >= self.torrent_ctx.config.read_timeout {
            tracing::warn!("disconnecting peer due to read timeout");
            return Err(PeerError::Timeout);
        }

        if time.saturating_duration_since(self.last_tx) >= self.torrent_ctx.config.keepalive_interval {
            self.send_message(sink, Message::KeepAlive).await?;
        }

        self.sweep_timed_out_requests(time).await;

        if self.state.changed {
            self.torrent_ctx.torrent_tx.send(CommandToTorrent::PeerState {
                address: self.address,
                state: self.state,
            })?;
        }
        self.state.tick();

        Ok(())
    }
}
