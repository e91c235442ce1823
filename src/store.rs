use std::collections::VecDeque;
use std::sync::{Arc, RwLock};

use serde::Serialize;

use crate::playlist::Track;

/// One published generation of the rolling broadcast buffer. Snapshots are
/// immutable once published, the producer replaces the whole Arc.
pub struct BufferSnapshot {
    /// Rolling window of the most recent audio, handed to every new client
    /// so its decoder has something to chew on before the next unit lands
    pub initial: Vec<u8>,
    /// The newest increment, what already-connected clients receive
    pub unit: Vec<u8>,
    /// Real-time duration of `unit` in milliseconds, the pacing interval
    pub pacing_ms: u64,
    /// Strictly increasing publish counter, lets consumers spot new data
    /// without ever blocking the producer
    pub order: u64
}

/// The prefill window behind `BufferSnapshot::initial`, accounted in whole
/// frames. Once `capacity` frames are held, pushing k fresh frames evicts
/// exactly the k oldest, so under constant-bitrate input the byte length
/// stays put from one publish to the next. Below capacity nothing is ever
/// evicted: a first track shorter than the prefill leaves a small window
/// that grows back to full size as later units arrive.
pub struct RollingWindow {
    bytes: Vec<u8>,
    frame_sizes: VecDeque<usize>,
    capacity: usize
}

impl RollingWindow {
    pub fn new(capacity: usize) -> Self {
        RollingWindow {
            bytes: Vec::new(),
            frame_sizes: VecDeque::with_capacity(capacity + 1),
            capacity
        }
    }

    pub fn push(&mut self, frame: &[u8]) {
        self.bytes.extend_from_slice(frame);
        self.frame_sizes.push_back(frame.len());

        while self.frame_sizes.len() > self.capacity {
            if let Some(evicted) = self.frame_sizes.pop_front() {
                self.bytes.drain(..evicted);
            }
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

#[derive(Clone, Serialize)]
pub struct NowPlaying {
    pub track: Track,
    /// The string injected as StreamTitle, the track file name without .mp3
    pub stream_title: String
}

impl NowPlaying {
    pub fn new(track: Track) -> Self {
        let stream_title = track.filename.clone();
        NowPlaying { track, stream_title }
    }
}

/// Shared state between the producer and every client session. Written only
/// by the producer, read by everyone; both references are swapped whole so a
/// reader sees either the old or the new generation, never a torn mix. Locks
/// are held only for the pointer swap or clone.
#[derive(Default)]
pub struct BufferStore {
    snapshot: RwLock<Option<Arc<BufferSnapshot>>>,
    now_playing: RwLock<Option<Arc<NowPlaying>>>
}

impl BufferStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, snapshot: BufferSnapshot) {
        *self.snapshot.write().expect("snapshot lock poisoned") = Some(Arc::new(snapshot));
    }

    pub fn read(&self) -> Option<Arc<BufferSnapshot>> {
        self.snapshot.read().expect("snapshot lock poisoned").clone()
    }

    pub fn set_now_playing(&self, info: NowPlaying) {
        *self.now_playing.write().expect("now playing lock poisoned") = Some(Arc::new(info));
    }

    pub fn now_playing(&self) -> Option<Arc<NowPlaying>> {
        self.now_playing.read().expect("now playing lock poisoned").clone()
    }

    /// Fill in the rates decoded from the first frame of the current track
    pub fn update_rates(&self, sample_rate: Option<u32>, bitrate_kbps: Option<u32>) {
        let mut guard = self.now_playing.write().expect("now playing lock poisoned");
        if let Some(current) = guard.as_ref() {
            let mut updated = current.as_ref().clone();
            updated.track.sample_rate  = sample_rate.or(updated.track.sample_rate);
            updated.track.bitrate_kbps = bitrate_kbps.or(updated.track.bitrate_kbps);
            *guard = Some(Arc::new(updated));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn snapshot(initial: &[u8], unit: &[u8], order: u64) -> BufferSnapshot {
        BufferSnapshot {
            initial: initial.to_vec(),
            unit: unit.to_vec(),
            pacing_ms: 100,
            order
        }
    }

    #[test]
    fn window_fills_then_shifts_by_whole_frames() {
        let mut w = RollingWindow::new(3);
        w.push(b"aa");
        w.push(b"bb");
        w.push(b"cc");
        assert_eq!(w.bytes(), b"aabbcc");

        // at capacity the length holds steady and only the oldest frame goes
        w.push(b"dd");
        assert_eq!(w.bytes(), b"bbccdd");
        w.push(b"ee");
        assert_eq!(w.bytes(), b"ccddee");
        assert_eq!(w.bytes().len(), 6);
    }

    #[test]
    fn short_start_grows_back_to_the_full_prefill() {
        // A first track shorter than the prefill must not pin the window
        // small for the rest of the process lifetime
        let mut w = RollingWindow::new(4);
        w.push(b"11");
        assert_eq!(w.bytes(), b"11");

        w.push(b"22");
        w.push(b"33");
        assert_eq!(w.bytes(), b"112233");

        w.push(b"44");
        w.push(b"55");
        assert_eq!(w.bytes(), b"22334455");
        assert_eq!(w.bytes().len(), 8);
    }

    #[test]
    fn uneven_frames_evict_oldest_whole_frames() {
        let mut w = RollingWindow::new(2);
        w.push(b"abcdef");
        w.push(b"g");
        w.push(b"hi");
        assert_eq!(w.bytes(), b"ghi");
    }

    #[test]
    fn store_swaps_whole_snapshots() {
        let store = BufferStore::new();
        assert!(store.read().is_none());

        store.publish(snapshot(b"abcd", b"cd", 1));
        let one = store.read().unwrap();
        assert_eq!(one.order, 1);

        store.publish(snapshot(b"cdef", b"ef", 2));
        let two = store.read().unwrap();
        assert_eq!(two.order, 2);
        // the old Arc is still intact for any reader that grabbed it
        assert_eq!(one.order, 1);
        assert_eq!(one.initial, b"abcd");
    }

    #[test]
    fn update_rates_fills_track_fields() {
        let store = BufferStore::new();
        let track = crate::playlist::Track::from_path(Path::new("/m/song.mp3"));
        store.set_now_playing(NowPlaying::new(track));

        store.update_rates(Some(44100), Some(128));
        let info = store.now_playing().unwrap();
        assert_eq!(info.track.sample_rate, Some(44100));
        assert_eq!(info.track.bitrate_kbps, Some(128));
        assert_eq!(info.stream_title, "song");
    }
}
