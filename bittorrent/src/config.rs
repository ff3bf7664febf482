use std::{
    net::{Ipv4Addr, SocketAddr},
    path::PathBuf,
    time::Duration,
};

// Tunables for a single torrent's swarm and piece engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {

    pub output_dir: PathBuf,

    pub listen_address: SocketAddr,

    // Session cap (BEP-agnostic resource bound, not a wire value).
    pub max_peers: u32,

    // Below this many active+known peers, pull a fresh batch from trackers.
    // Defaults to max_peers / 2.
    pub low_water: u32,

    pub announce_interval: Duration,

    // Per-session outstanding request cap.
    pub max_inflight_per_peer: usize,

    // Swarm-wide cap on duplicate in-flight requests for the same block,
    // only relevant once endgame mode engages.
    pub max_inflight_per_block: usize,

    // How long a request may go unanswered before the piece engine re-queues it.
    pub request_timeout: Duration,

    // Idle-link keepalive: send a zero-length frame if we've sent nothing in this long.
    pub keepalive_interval: Duration,

    // Drop a session if nothing has been received from it in this long.
    pub read_timeout: Duration,

    // Number of peers unchoked by the regular reciprocation round.
    pub unchoke_slots: u32,

    // Enter endgame once fewer than this many pieces remain unverified.
    pub endgame_threshold: usize,

    // Seeding: verify everything on disk at startup and never express
    // interest in a peer's pieces, regardless of what resume state says.
    pub seed_mode: bool,
}

impl EngineConfig {
    pub fn new(output_dir: PathBuf, listen_address: SocketAddr, max_peers: u32) -> Self {
        Self {
            output_dir,
            listen_address,
            max_peers,
            low_water: (max_peers / 2).max(1),
            ..Self::default()
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        let max_peers = 50;
        Self {
            output_dir: PathBuf::from("downloads"),
            listen_address: SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), 6881),
            max_peers,
            low_water: max_peers / 2,
            announce_interval: Duration::from_secs(1800),
            max_inflight_per_peer: 10,
            max_inflight_per_block: 2,
            request_timeout: Duration::from_secs(30),
            keepalive_interval: Duration::from_secs(120),
            read_timeout: Duration::from_secs(150),
            unchoke_slots: 4,
            endgame_threshold: 4,
            seed_mode: false,
        }
    }
}

// Identity shared by every torrent a process runs.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub peer_id: [u8; 20],
}

const DEFAULT_CLIENT_ID_PREFIX: &[u8; 8] = b"-RS0133-";

impl ClientConfig {
    // Azureus-style peer id: "-XX####-" followed by 12 random bytes.
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut peer_id = [0u8; 20];
        peer_id[..8].copy_from_slice(DEFAULT_CLIENT_ID_PREFIX);
        rand::thread_rng().fill_bytes(&mut peer_id[8..]);
        Self { peer_id }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::generate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_config_derives_low_water_from_max_peers() {
        let cfg = EngineConfig::new(PathBuf::from("/tmp"), "0.0.0.0:6881".parse().unwrap(), 40);
        assert_eq!(cfg.low_water, 20);
    }

    #[test]
    fn client_config_peer_id_has_expected_prefix() {
        let cfg = ClientConfig::generate();
        assert_eq!(&cfg.peer_id[..8], DEFAULT_CLIENT_ID_PREFIX);
    }
}
