use std::path::{Path, PathBuf};

use anyhow::Result;
use rand::Rng;
use serde::Serialize;
use sha1::{Digest, Sha1};

/// A single entry of the broadcast playlist. Tag fields are filled lazily:
/// `title`/`artist` come from ID3 when a track is selected or listed, the
/// rates only once the first frame of the track has been decoded.
#[derive(Clone, Serialize)]
pub struct Track {
    pub id: String,
    pub path: PathBuf,
    pub title: String,
    pub artist: String,
    /// File name without the .mp3 extension, used as the ICY stream title
    pub filename: String,
    pub sample_rate: Option<u32>,
    pub bitrate_kbps: Option<u32>
}

impl Track {
    pub fn from_path(path: &Path) -> Self {
        let filename = stem(path);
        Track {
            id: track_id(path),
            path: path.to_owned(),
            title: filename.clone(),
            artist: "Unknown".to_owned(),
            filename,
            sample_rate: None,
            bitrate_kbps: None
        }
    }
}

/// File name without a trailing .mp3, compared case insensitively
pub fn stem(path: &Path) -> String {
    let base = path.file_name()
        .map(|v| v.to_string_lossy().into_owned())
        .unwrap_or_default();
    match base.to_lowercase().strip_suffix(".mp3") {
        Some(_) => base[..base.len() - 4].to_owned(),
        None => base
    }
}

/// Stable identifier for a playlist entry, derived from nothing but its
/// absolute path so it survives restarts and rescans
pub fn track_id(path: &Path) -> String {
    let mut hasher = Sha1::new();
    hasher.update(path.to_string_lossy().as_bytes());
    hasher.finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

pub struct Playlist {
    directory: PathBuf,
    random: bool
}

impl Playlist {
    pub fn new(directory: PathBuf, random: bool) -> Self {
        Playlist { directory, random }
    }

    /// Walk the music directory and return every .mp3 file, sorted by full
    /// path. The walk is repeated on every selection so operators can drop
    /// files in or out at runtime without a restart.
    pub fn scan(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        walk(&self.directory, &mut files)?;
        files.sort();

        if files.is_empty() {
            return Err(anyhow::Error::msg(
                format!("no mp3 files found in {}", self.directory.display())
            ));
        }

        Ok(files)
    }

    pub fn find_by_id(&self, id: &str) -> Option<PathBuf> {
        self.scan()
            .ok()?
            .into_iter()
            .find(|p| track_id(p) == id)
    }

    /// Index of the track following `current` under the configured selection
    /// mode; `None` means nothing has played yet. Random mode draws uniformly
    /// and independently of `current`.
    pub fn next_index(&self, current: Option<usize>, len: usize) -> usize {
        if len == 0 {
            return 0;
        }
        if self.random {
            rand::thread_rng().gen_range(0..len)
        } else {
            match current {
                Some(current) => (current + 1) % len,
                None => 0
            }
        }
    }
}

fn walk(dir: &Path, files: &mut Vec<PathBuf>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path  = entry.path();
        if path.is_dir() {
            walk(&path, files)?;
        } else if path.file_name()
            .map(|n| n.to_string_lossy().to_lowercase().ends_with(".mp3"))
            .unwrap_or(false) {
            files.push(path);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tempdir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("castradio-playlist-{}", name));
        _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn scan_finds_sorted_mp3_only() {
        let dir = tempdir("scan");
        std::fs::write(dir.join("b.mp3"), b"x").unwrap();
        std::fs::write(dir.join("a.MP3"), b"x").unwrap();
        std::fs::write(dir.join("notes.txt"), b"x").unwrap();
        std::fs::create_dir_all(dir.join("sub")).unwrap();
        std::fs::write(dir.join("sub/c.mp3"), b"x").unwrap();

        let playlist = Playlist::new(dir.clone(), false);
        let files    = playlist.scan().unwrap();
        assert_eq!(files.len(), 3);
        assert_eq!(files[0].file_name().unwrap(), "a.MP3");
        assert_eq!(files[1].file_name().unwrap(), "b.mp3");
        assert_eq!(files[2].file_name().unwrap(), "c.mp3");
    }

    #[test]
    fn scan_empty_directory_is_an_error() {
        let dir = tempdir("empty");
        let playlist = Playlist::new(dir, false);
        assert!(playlist.scan().is_err());
    }

    #[test]
    fn sequential_next_starts_at_zero_and_wraps() {
        let playlist = Playlist::new(PathBuf::from("."), false);
        assert_eq!(playlist.next_index(None, 3), 0);
        assert_eq!(playlist.next_index(Some(0), 3), 1);
        assert_eq!(playlist.next_index(Some(2), 3), 0);
    }

    #[test]
    fn random_next_stays_in_bounds() {
        let playlist = Playlist::new(PathBuf::from("."), true);
        for _ in 0..100 {
            assert!(playlist.next_index(Some(0), 3) < 3);
        }
    }

    #[test]
    fn ids_are_stable_and_distinct() {
        let a = track_id(Path::new("/music/a.mp3"));
        let b = track_id(Path::new("/music/b.mp3"));
        assert_eq!(a, track_id(Path::new("/music/a.mp3")));
        assert_ne!(a, b);
        assert_eq!(a.len(), 40);
    }

    #[test]
    fn find_by_id_round_trips() {
        let dir = tempdir("find");
        std::fs::write(dir.join("a.mp3"), b"x").unwrap();
        let playlist = Playlist::new(dir.clone(), false);
        let path = playlist.scan().unwrap().remove(0);
        assert_eq!(playlist.find_by_id(&track_id(&path)), Some(path));
        assert_eq!(playlist.find_by_id("deadbeef"), None);
    }

    #[test]
    fn stem_strips_extension_case_insensitively() {
        assert_eq!(stem(Path::new("/m/Evening Drive.mp3")), "Evening Drive");
        assert_eq!(stem(Path::new("/m/LOUD.MP3")), "LOUD");
        assert_eq!(stem(Path::new("/m/no-extension")), "no-extension");
    }
}
