pub use reqwest;
pub use serde_json;

use std::path::{Path, PathBuf};

use castradio::config::Settings;

/// Frame layout of the synthetic test tracks: MPEG-1 Layer III, 128 kbps at
/// 32000 Hz comes out to exactly 576 bytes per frame with no padding bit,
/// which keeps every offset in the assertions a round number.
pub const FRAME_LEN: usize = 576;
pub const FRAME_SAMPLE_RATE: u32 = 32000;
pub const FRAME_DURATION_MS: u64 = 36;

const FRAME_HEADER: [u8; 4] = [0xff, 0xfb, 0x98, 0xc0];

/// A valid CBR MP3 file of `frames` frames with silent (zeroed) payloads
pub fn cbr_mp3(frames: usize) -> Vec<u8> {
    let mut data = Vec::with_capacity(frames * FRAME_LEN);
    for _ in 0..frames {
        data.extend_from_slice(&FRAME_HEADER);
        data.extend_from_slice(&[0u8; FRAME_LEN - 4]);
    }
    data
}

pub fn write_cbr_mp3(path: &Path, frames: usize) {
    std::fs::write(path, cbr_mp3(frames)).expect("Failed to write test mp3");
}

/// Fresh music directory under the cargo tmp dir populated with the given
/// (file name, frame count) tracks
pub fn music_dir(base: &str, name: &str, tracks: &[(&str, usize)]) -> PathBuf {
    let dir = PathBuf::from(base).join(name);
    _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).expect("Failed to create music dir");
    for (file, frames) in tracks {
        write_cbr_mp3(&dir.join(file), *frames);
    }
    dir
}

/// Settings tuned for tests: loopback bind, short gap, everything else stock
pub fn test_settings(directory: &Path, port: u16) -> Settings {
    Settings {
        port,
        host: "127.0.0.1".to_owned(),
        directory: directory.to_owned(),
        gap_ms: 50,
        ..Settings::default()
    }
}

/// Run the whole server on its own runtime in a background thread. The
/// thread is detached; it dies with the test process.
pub fn spawn_server(settings: Settings) {
    std::thread::spawn(move || {
        let rt = tokio::runtime::Runtime::new().expect("Failed to build runtime");
        if let Err(e) = rt.block_on(castradio::server::listener(settings)) {
            eprintln!("server exited: {}", e);
        }
    });
}

pub fn get_json(url: &str) -> serde_json::Value {
    reqwest::blocking::get(url)
        .expect("request failed")
        .json()
        .expect("response was not json")
}
