use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, error, info};

use crate::{
    frame::{self, FrameReader},
    playlist::{self, Track},
    server::Server,
    store::{BufferSnapshot, NowPlaying, RollingWindow}
};

/// Frames in the rolling window handed to fresh clients, enough to prefill a
/// typical decoder and avoid underflow before the next unit publishes
const INITIAL_FRAMES: usize = 500;
/// Frames read per pacing tick
const UNIT_FRAMES: usize = 50;
/// Consecutive empty reads before the producer gives up the current pass
const MAX_EMPTY_READS: usize = 5;
/// Selection attempts per pass when files refuse to open
const MAX_OPEN_RETRIES: usize = 16;

/// Track-selection state shared with the control endpoints. `cached_next` is
/// precomputed eagerly so /next can answer without touching the producer;
/// `next_override` is consumed exactly once at the following transition.
#[derive(Default)]
pub struct Selection {
    /// Index of the track on air; None until the first selection happens
    pub current_index: Option<usize>,
    pub cached_next: Option<usize>,
    pub next_override: Option<String>
}

struct Producer {
    serv: Arc<Server>,
    reader: Option<FrameReader>,
    /// The prefill window every snapshot's `initial` is copied from.
    /// Owned here, the producer is its only writer.
    window: RollingWindow,
    /// The first frame decoded after a selection carries the rates the
    /// now-playing info is still missing
    rates_pending: bool
}

/// The single pacing loop. Reads frames into the shared store and sleeps the
/// real-time duration of what it just published; every listener session runs
/// off the store at its own pace.
pub async fn run(serv: Arc<Server>) {
    info!("Broadcast producer started");
    let mut producer = Producer {
        serv,
        reader: None,
        window: RollingWindow::new(INITIAL_FRAMES),
        rates_pending: false
    };

    loop {
        if let Err(e) = producer.step().await {
            error!("{}", e);
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }
}

impl Producer {
    async fn step(&mut self) -> Result<()> {
        if self.serv.skip_requested.swap(false, Ordering::Relaxed) {
            info!("Skipping current track");
            self.reader = None;
        }

        if self.serv.store.read().is_none() {
            if self.reader.is_none() {
                self.select_next().await?;
            }
            self.publish_initial();
            if self.serv.store.read().is_none() {
                // The chosen file held no frames at all, don't spin on a
                // directory full of duds
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        } else {
            self.publish_unit().await?;
        }

        self.pace().await;
        Ok(())
    }

    /// First publish ever: a large prefill window whose tail doubles as the
    /// first unit. Rates come from the first decoded frame, in the same pass.
    fn publish_initial(&mut self) {
        let reader = match self.reader.as_mut() {
            Some(v) => v,
            None => return
        };

        let mut unit      = Vec::new();
        let mut pacing_ms = 0u64;
        let mut ended     = false;

        for i in 0..INITIAL_FRAMES {
            match reader.next_frame() {
                Some(f) => {
                    if self.rates_pending {
                        self.rates_pending = false;
                        self.serv.store.update_rates(Some(f.sample_rate), f.bitrate_kbps);
                    }
                    if i >= INITIAL_FRAMES - UNIT_FRAMES {
                        unit.extend_from_slice(&f.data);
                        pacing_ms += f.duration_ms();
                    }
                    self.window.push(&f.data);
                },
                None => {
                    ended = true;
                    break;
                }
            }
        }

        if ended {
            self.reader = None;
        }
        if self.window.is_empty() {
            return;
        }

        let initial = self.window.bytes().to_vec();
        debug!("Published initial buffer of {} bytes, pacing {} ms", initial.len(), pacing_ms);
        self.serv.store.publish(BufferSnapshot {
            initial,
            unit,
            pacing_ms,
            order: 1
        });
    }

    /// Steady-state publish: read one unit worth of frames, rolling over to
    /// the next track (with the configured silence gap) whenever the current
    /// file runs dry.
    async fn publish_unit(&mut self) -> Result<()> {
        let mut unit      = Vec::new();
        let mut pacing_ms = 0u64;
        let mut retries   = 0usize;

        loop {
            let mut ended = self.reader.is_none();
            if let Some(reader) = self.reader.as_mut() {
                for _ in 0..UNIT_FRAMES {
                    match reader.next_frame() {
                        Some(f) => {
                            if self.rates_pending {
                                self.rates_pending = false;
                                self.serv.store.update_rates(Some(f.sample_rate), f.bitrate_kbps);
                            }
                            unit.extend_from_slice(&f.data);
                            pacing_ms += f.duration_ms();
                            self.window.push(&f.data);
                        },
                        None => {
                            ended = true;
                            break;
                        }
                    }
                }
            }
            if ended {
                self.reader = None;
            }

            if !unit.is_empty() {
                break;
            }

            // Nothing read at all: the track is over or was never open
            retries += 1;
            if retries > MAX_EMPTY_READS {
                return Err(anyhow::Error::msg("Failed to load next track after multiple retries"));
            }

            self.gap_pause().await;
            self.select_next().await?;
        }

        // The window already absorbed this unit, so `initial` always ends
        // with the bytes the unit carries and late joiners line up with the
        // continuous stream
        let order = self.serv.store.read().map(|s| s.order).unwrap_or(0) + 1;
        self.serv.store.publish(BufferSnapshot {
            initial: self.window.bytes().to_vec(),
            unit,
            pacing_ms,
            order
        });

        Ok(())
    }

    /// Pick the following track and open it. The playlist is rescanned each
    /// time so directory changes take effect without a restart. Override
    /// first, then the precomputed index, then the selection mode.
    async fn select_next(&mut self) -> Result<()> {
        for _ in 0..MAX_OPEN_RETRIES {
            let paths = self.serv.playlist.scan()?;

            let (index, upcoming) = {
                let mut sel = self.serv.selection.lock().expect("selection lock poisoned");

                let mut chosen = None;
                if let Some(id) = sel.next_override.take() {
                    match paths.iter().position(|p| playlist::track_id(p) == id) {
                        Some(i) => chosen = Some(i),
                        None => info!("Requested next track is gone from the playlist, ignoring")
                    }
                }

                let index = match chosen {
                    Some(v) => v,
                    None => match sel.cached_next.filter(|i| *i < paths.len()) {
                        Some(v) => v,
                        None => self.serv.playlist.next_index(sel.current_index, paths.len())
                    }
                };

                let upcoming = self.serv.playlist.next_index(Some(index), paths.len());
                sel.current_index = Some(index);
                sel.cached_next   = Some(upcoming);
                (index, upcoming)
            };

            let source    = paths[index].clone();
            let play_path = if self.serv.config.normalize {
                let resolved = self.serv.transcoder.resolve(&source).await;

                // Warm the cache for the predicted next track while this
                // one airs
                let transcoder = self.serv.transcoder.clone();
                let next_path  = paths[upcoming].clone();
                tokio::spawn(async move {
                    transcoder.prefetch(next_path).await;
                });

                resolved
            } else {
                source.clone()
            };

            match FrameReader::open(&play_path) {
                Ok(reader) => {
                    self.reader        = Some(reader);
                    self.rates_pending = true;
                },
                Err(e) => {
                    error!("Opening {} failed: {}", play_path.display(), e);
                    continue;
                }
            }

            let mut track = Track::from_path(&source);
            if let Ok(probe) = frame::inspect(&play_path) {
                if let Some(title) = probe.title {
                    track.title = title;
                }
                if let Some(artist) = probe.artist {
                    track.artist = artist;
                }
            }

            info!("Now playing: {} - {}", track.artist, track.title);
            self.serv.store.set_now_playing(NowPlaying::new(track));

            return Ok(());
        }

        Err(anyhow::Error::msg("No playable track found after repeated attempts"))
    }

    /// Inter-song silence, modeled as dead air rather than synthetic frames
    async fn gap_pause(&self) {
        let gap = self.serv.config.gap_ms;
        if gap > 0 {
            tokio::time::sleep(Duration::from_millis(gap)).await;
        }
    }

    /// Sleep for the real-time duration of the unit just published. A skip
    /// request cuts the sleep short so /skip lands within one cycle.
    async fn pace(&self) {
        let ms = self.serv.store.read().map(|s| s.pacing_ms).unwrap_or(0);
        if ms == 0 {
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(ms)) => (),
            _ = self.serv.skip_notify.notified() => ()
        }
    }
}
