use std::{
    net::SocketAddr,
    sync::{Arc, Mutex, atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering}}
};
use anyhow::Result;
use chrono::{DateTime, Local};
use tokio::{
    net::{TcpListener, TcpStream},
    io::{AsyncRead, AsyncWrite, BufStream},
    sync::{Notify, Semaphore}
};
use tracing::{debug, info, warn};

use crate::{
    client,
    config::Settings,
    playlist::Playlist,
    producer::{self, Selection},
    store::BufferStore,
    transcode::Transcoder
};

pub trait Socket: Send + Sync + AsyncRead + AsyncWrite + Unpin {}
impl Socket for BufStream<TcpStream> {}
pub type Stream = Box<dyn Socket>;

/// Struct holding all info related to the station
pub struct Server {
    pub config: Settings,
    /// Semaphore intended to cap concurrent connections to the server
    pub max_clients: Arc<Semaphore>,
    pub playlist: Playlist,
    pub transcoder: Arc<Transcoder>,
    /// The shared buffer published by the producer, read by every listener
    pub store: BufferStore,
    /// Track-selection state shared between the producer and the control
    /// endpoints, guarded so neither side observes a half-written choice
    pub selection: Mutex<Selection>,
    /// Raised by /skip; the producer drops its file handle on the next pass
    pub skip_requested: AtomicBool,
    /// Wakes the producer out of its pacing sleep when a skip comes in
    pub skip_notify: Notify,
    /// Station general stats (this excludes calls on control endpoints)
    pub stats: ServerStats
}

pub struct ServerStats {
    /// Server startup time in milliseconds since the epoch
    pub start_time_ms: i64,
    /// Number of connections since startup (accumulating counter)
    pub connections: AtomicUsize,
    /// Number of listeners currently receiving the broadcast
    pub active_listeners: AtomicUsize,
    /// Highest simultaneous listener count seen so far
    pub peak_listeners: AtomicUsize,
    /// Bytes written to listener sockets since startup, metadata included
    pub bytes_streamed: AtomicU64,
    /// Window for the bandwidth figure reported by /metrics
    bandwidth: Mutex<BandwidthWindow>
}

struct BandwidthWindow {
    last_check_ms: i64,
    last_bytes: u64
}

impl ServerStats {
    pub fn new(start_time_ms: i64) -> Self {
        Self {
            start_time_ms,
            connections: AtomicUsize::new(0),
            active_listeners: AtomicUsize::new(0),
            peak_listeners: AtomicUsize::new(0),
            bytes_streamed: AtomicU64::new(0),
            bandwidth: Mutex::new(BandwidthWindow {
                last_check_ms: start_time_ms,
                last_bytes: 0
            })
        }
    }

    pub fn add_bytes_streamed(&self, n: u64) {
        self.bytes_streamed.fetch_add(n, Ordering::Relaxed);
    }

    /// Average Mbps since the previous call, then restart the window
    pub fn bandwidth_mbps(&self) -> f64 {
        let now_ms = chrono::Utc::now().timestamp_millis();
        let bytes  = self.bytes_streamed.load(Ordering::Relaxed);

        let mut window = self.bandwidth.lock().expect("bandwidth lock poisoned");
        let elapsed_ms = now_ms - window.last_check_ms;
        let diff       = bytes.saturating_sub(window.last_bytes);
        window.last_check_ms = now_ms;
        window.last_bytes    = bytes;

        if elapsed_ms <= 0 {
            return 0.0;
        }
        // bytes per second over 125000 gives megabits per second
        (diff as f64 / elapsed_ms as f64) * 1000.0 / 125000.0
    }
}

/// A client session
pub struct ClientSession {
    /// Server info
    pub server: Arc<Server>,
    /// Socket of this client session
    pub stream: Stream,
    /// Address of our peer
    pub addr: SocketAddr
}

/// Accept loop: one task per connection, bounded by the client semaphore.
/// The permit is claimed here and rides along into the task, so over-cap
/// connections are dropped before anything is spawned for them.
async fn serve(serv: Arc<Server>, listener: TcpListener) -> Result<()> {
    loop {
        let (socket, addr) = match listener.accept().await {
            Ok(v) => v,
            Err(e) => {
                warn!("Accepting a connection failed: {}", e);
                continue;
            }
        };

        serv.stats.connections.fetch_add(1, Ordering::Relaxed);

        let permit = match serv.max_clients.clone().try_acquire_owned() {
            Ok(v) => v,
            Err(_) => {
                debug!("Client cap reached, dropping {}", addr);
                continue;
            }
        };

        let serv = serv.clone();
        tokio::spawn(async move {
            let _permit = permit;
            client::handle(ClientSession {
                server: serv,
                // Buffered socket so the many small stream writes don't
                // each cost a syscall
                stream: Box::new(BufStream::new(socket)),
                addr
            }).await;
        });
    }
}

pub async fn listener(config: Settings) -> Result<()> {
    let start_time = chrono::offset::Utc::now();

    let playlist   = Playlist::new(config.directory.clone(), config.random);
    let transcoder = Arc::new(Transcoder::new(
        config.normalize,
        config.cache_dir.clone(),
        config.standard_bitrate.clone(),
        config.standard_sample_rate.clone(),
        config.cache_ttl_minutes
    ));

    let serv = Arc::new(Server {
        max_clients: Arc::new(Semaphore::new(config.limits.clients)),
        playlist,
        transcoder,
        store: BufferStore::new(),
        selection: Mutex::new(Selection::default()),
        skip_requested: AtomicBool::new(false),
        skip_notify: Notify::new(),
        stats: ServerStats::new(start_time.timestamp_millis()),
        config
    });

    info!("Music directory is {}.", serv.config.directory.display());

    if serv.config.normalize {
        serv.transcoder.start_sweeper();
    }

    tokio::spawn(producer::run(serv.clone()));

    let bind_addr = format!("{}:{}", serv.config.host, serv.config.port);
    let listener  = TcpListener::bind(&bind_addr).await
        .map_err(|e| anyhow::Error::msg(format!("Could not listen on {}: {}", bind_addr, e)))?;
    info!("Listening on {}", bind_addr);

    {
        let local: DateTime<Local> = DateTime::from(start_time);
        info!("Server started on {}", local);
    }

    serve(serv, listener).await
}
