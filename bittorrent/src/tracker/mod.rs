use std::{net::SocketAddr, time::{Duration, Instant}};
use tokio::task::JoinHandle;
use tracing::Instrument;
use url::Url;
use crate::torrent::{CommandToTorrent, TorrentTx};

// 20-byte SHA-1 info-hash or peer id.
pub type Id = [u8; 20];

mod http;
mod udp;
pub use udp::UdpTracker;
pub use http::HttpTracker;

type Result<T> = std::result::Result<T, TrackerError>;
pub type TrackerTx = tokio::sync::watch::Sender<Option<AnnounceParams>>;
pub type TrackerRx = tokio::sync::watch::Receiver<Option<AnnounceParams>>;

// In cases where the tracker doesn't give us a min interval.
const DEFAULT_MIN_ANNOUNCE_INTERVAL: u64 = 60; // seconds

#[derive(thiserror::Error, Debug)]
pub enum TrackerError {

    #[error("request error: {0}")]
    ReqwestError(#[from] reqwest::Error),

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("error deserializing response: {0}")]
    BencodeError(#[from]bencode::Error),

    #[error("timeout")]
    Timeout(#[from] tokio::time::error::Elapsed),

    #[error("invalid url")]
    InvalidUrl,
    
    #[error("response error: {0}")]
    ResponseError(String),

}

pub struct TrackersHandle {

    // Tiers as given by the metainfo, preserved so each tier can be worked
    // (and reordered on success) independently of the others, per BEP 12.
    tiers: Vec<Vec<Url>>,

    handles: Vec<JoinHandle<()>>,

    tracker_rx: TrackerRx,

    pub tracker_tx: TrackerTx,

}

impl TrackersHandle {

    pub fn new(tiers: Vec<Vec<Url>>) -> Self {

        let (tracker_tx, tracker_rx) = tokio::sync::watch::channel(None);

        Self {
            tiers,
            tracker_rx,
            tracker_tx,
            handles: Vec::new(),
        }
    }

    pub async fn start(&mut self, torrent_tx: TorrentTx) {

        let mut handles = vec![];
        for tier in self.tiers.iter().cloned() {
            let tx = torrent_tx.clone();
            let rx = self.tracker_rx.clone();
            let handle = tokio::spawn(
                run_tier(tier, tx, rx).instrument(tracing::info_span!("tracker-tier"))
            );
            handles.push(handle);
        }

        self.handles = handles;
    }

    // Tier tasks block on `tracker_rx.changed()` (or a backoff sleep)
    // between rounds and have no way to observe that the torrent is
    // shutting down, so a stopped-event announce pushed just before this
    // call would otherwise keep every tier looping forever. Abort them
    // outright rather than waiting for a self-termination that never comes.
    pub async fn shutdown(&mut self) {
        for handle in self.handles.drain(..) {
            handle.abort();
        }
    }
}

// One task per tier. Trackers within a tier are tried in order on every
// announce; a working tracker is promoted to the head of the tier so
// subsequent announces prefer it, per BEP 12.
async fn run_tier(urls: Vec<Url>, torrent_tx: TorrentTx, mut tracker_rx: TrackerRx) {

    let mut trackers: Vec<Box<dyn Tracker>> = Vec::with_capacity(urls.len());
    for url in &urls {
        match url.scheme() {
            "http" => trackers.push(Box::new(HttpTracker::new(url.clone()))),
            "udp"  => trackers.push(Box::new(UdpTracker::new(url.clone()).await)),
            _ => tracing::warn!("unsupported tracker scheme: {}", url.scheme()),
        }
    }

    if trackers.is_empty() {
        tracing::warn!("tier has no usable trackers, giving up");
        return;
    }

    loop {

        tracker_rx.changed().await.ok();
        let params = *tracker_rx.borrow();
        let time = Instant::now();

        let Some(params) = params else { continue };

        let due = params.event.is_some()
            || (params.num_want > Some(0) && trackers[0].can_announce(time))
            || trackers[0].should_announce(time);
        if !due {
            continue;
        }

        let mut announced = false;
        for idx in 0..trackers.len() {
            if let Some(peers) = announce_with_backoff(trackers[idx].as_mut(), params).await {
                if torrent_tx.send(CommandToTorrent::Peers(peers)).is_err() {
                    return;
                }
                if idx != 0 {
                    let working = trackers.remove(idx);
                    tracing::info!("promoting tracker to head of tier");
                    trackers.insert(0, working);
                }
                announced = true;
                break;
            }
        }

        if !announced {
            tracing::warn!("every tracker in tier failed this round");
        }
    }
}

// Retries a single tracker's announce with exponential backoff: 15 * 2^n
// seconds for n = 0..=8, then gives up on this tracker for the round so the
// tier can fall through to the next one.
async fn announce_with_backoff(tracker: &mut dyn Tracker, params: AnnounceParams) -> Option<Vec<SocketAddr>> {
    let mut attempt: u32 = 0;
    loop {
        match tracker.announce(params).await {
            Ok(peers) => return Some(peers),
            Err(e) => {
                if attempt > 8 {
                    tracing::warn!("tracker giving up after {} attempts: {}", attempt, e);
                    return None;
                }
                let delay = Duration::from_secs(15 << attempt);
                tracing::warn!(
                    "tracker announce failed (attempt {}), retrying in {:?}: {}",
                    attempt + 1, delay, e,
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[async_trait::async_trait]
pub trait Tracker: Send + Sync {

    async fn announce(&mut self, params: AnnounceParams) -> Result<Vec<SocketAddr>>;

    fn can_announce(&self, time: Instant) -> bool;

    fn should_announce(&self, time: Instant) -> bool;

}

#[derive(Debug, Copy, Clone, Default)]
pub struct AnnounceParams {
    
    // Hash of info dict.
    pub info_hash:  Id,

    // Urlencoded 20-byte string used as a unique ID for the client.
    pub client_id:    Id,
    
    // Port number.
    pub port:       u16,
    
    // The total amount uploaded (since the client sent the 'started' event to the tracker) in base ten ASCII..
    pub uploaded:   u64,
    
    // The total amount downloaded (since the client sent the 'started' event to the tracker) in base ten ASCII..
    pub downloaded: u64,
    
    // The number of bytes this client still has to download in base ten ASCII. 
    // Clarification: The number of bytes needed to download to be 100% complete and get all the included files in the torrent.
    pub left:       u64,
    
    // If specified, must be one of started, completed, stopped, (or empty which is the same as not being specified). 
    // If not specified, then this request is one performed at regular intervals.
    pub event:     Option<Event>,
    
    // Number of peers that the client would like to receive from the tracker.
    pub num_want: Option<usize>,

}

#[derive(Copy, Clone, Debug, PartialEq, Default)]
pub enum Event {

    Completed,
    
    #[default]
    Started,

    Stopped,

}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Event::Completed => write!(f, "completed"),
            Event::Started => write!(f, "started"),
            Event::Stopped => write!(f, "stopped"),
        }
    }
}