use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use hashbrown::HashSet;
use tokio::process::Command;
use tracing::{debug, error, info};

/// How often the sweeper wakes up to drop expired cache entries
const SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);
/// Upper bound on a single transcoder run, a wedged ffmpeg must not pin
/// the broadcast on one track forever
const TRANSCODE_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Normalizes tracks to one bitrate/sample rate through an external ffmpeg,
/// materializing results under the cache directory. Every failure mode falls
/// back to the original file, the broadcast never stalls on normalization.
pub struct Transcoder {
    enabled: bool,
    cache_dir: PathBuf,
    bitrate: String,
    sample_rate: String,
    ttl_minutes: u64,
    /// Sources with a build currently running, at most one builder each
    inflight: Mutex<HashSet<PathBuf>>
}

/// Releases the in-flight entry even when the build errors out
struct BuildTicket<'a> {
    transcoder: &'a Transcoder,
    source: PathBuf
}

impl Drop for BuildTicket<'_> {
    fn drop(&mut self) {
        self.transcoder.inflight
            .lock()
            .expect("inflight lock poisoned")
            .remove(&self.source);
    }
}

impl Transcoder {
    pub fn new(enabled: bool, cache_dir: PathBuf, bitrate: String,
               sample_rate: String, ttl_minutes: u64) -> Self {
        Transcoder {
            enabled,
            cache_dir,
            bitrate,
            sample_rate,
            ttl_minutes,
            inflight: Mutex::new(HashSet::new())
        }
    }

    pub fn cache_path(&self, source: &Path) -> PathBuf {
        match source.file_name() {
            Some(name) => self.cache_dir.join(name),
            None => self.cache_dir.join("unnamed.mp3")
        }
    }

    fn try_claim(&self, source: &Path) -> Option<BuildTicket<'_>> {
        let mut inflight = self.inflight.lock().expect("inflight lock poisoned");
        if !inflight.insert(source.to_owned()) {
            return None;
        }
        Some(BuildTicket { transcoder: self, source: source.to_owned() })
    }

    /// Resolve a source to the path the producer should actually open.
    /// Cache hits return immediately; a miss runs the transcoder. If another
    /// task is already building this source, or anything at all goes wrong,
    /// the original path is returned instead.
    pub async fn resolve(&self, source: &Path) -> PathBuf {
        if !self.enabled {
            return source.to_owned();
        }

        let cached = self.cache_path(source);
        if cached.is_file() {
            info!("Using cached version: {}", cached.display());
            return cached;
        }

        let ticket = match self.try_claim(source) {
            Some(v) => v,
            None => {
                debug!("Transcode of {} already in flight, airing the original", source.display());
                return source.to_owned();
            }
        };

        match self.build(source, &cached).await {
            Ok(()) => {
                drop(ticket);
                cached
            },
            Err(e) => {
                error!("Transcoding {} failed: {}", source.display(), e);
                source.to_owned()
            }
        }
    }

    /// Background warmup of the cache for an upcoming track, failures are
    /// silent aside from logging inside `resolve`
    pub async fn prefetch(&self, source: PathBuf) {
        if !self.enabled || self.cache_path(&source).is_file() {
            return;
        }
        let resolved = self.resolve(&source).await;
        if resolved != source {
            info!("Pre-transcoded (cache): {}", resolved.display());
        }
    }

    async fn build(&self, source: &Path, cached: &Path) -> Result<()> {
        std::fs::create_dir_all(&self.cache_dir)?;

        info!("Transcoding: {}", source.display());
        let mut child = Command::new("ffmpeg")
            .arg("-loglevel").arg("error")
            .arg("-i").arg(source)
            .arg("-b:a").arg(&self.bitrate)
            .arg("-ar").arg(&self.sample_rate)
            .arg("-y").arg(cached)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let status = tokio::time::timeout(TRANSCODE_TIMEOUT, child.wait()).await
            .map_err(|_| anyhow::Error::msg("transcoder timed out"))??;

        if !status.success() {
            // A half-written output must not be mistaken for a cache hit later
            _ = std::fs::remove_file(cached);
            return Err(anyhow::Error::msg(format!("transcoder exited with {}", status)));
        }

        info!("Transcoded successfully: {}", cached.display());
        Ok(())
    }

    /// Delete cache entries whose modification time is older than the TTL.
    /// A TTL of zero disables expiry.
    pub fn sweep(&self) -> Result<()> {
        if self.ttl_minutes == 0 || !self.cache_dir.is_dir() {
            return Ok(());
        }

        let ttl = Duration::from_secs(self.ttl_minutes * 60);
        let now = std::time::SystemTime::now();

        let mut deleted = 0usize;
        let mut freed   = 0u64;
        for entry in std::fs::read_dir(&self.cache_dir)? {
            let entry = entry?;
            let meta  = entry.metadata()?;
            if !meta.is_file() {
                continue;
            }
            let age = match meta.modified().ok().and_then(|m| now.duration_since(m).ok()) {
                Some(v) => v,
                None => continue
            };
            if age > ttl {
                match std::fs::remove_file(entry.path()) {
                    Ok(()) => {
                        deleted += 1;
                        freed   += meta.len();
                        info!("Deleted old cache file: {} (age: {}s)",
                              entry.path().display(), age.as_secs());
                    },
                    Err(e) => error!("Failed to delete cache file {}: {}", entry.path().display(), e)
                }
            }
        }

        if deleted > 0 {
            info!("Cache cleanup: deleted {} files, freed {:.2} MB",
                  deleted, freed as f64 / (1024.0 * 1024.0));
        }

        Ok(())
    }

    /// Periodic sweeping task; the first pass runs immediately on startup.
    /// Not spawned at all when the TTL is zero.
    pub fn start_sweeper(self: &Arc<Self>) {
        if self.ttl_minutes == 0 {
            info!("Cache cleanup disabled (cache_ttl_minutes = 0)");
            return;
        }

        info!("Cache cleanup routine started (TTL: {} minutes)", self.ttl_minutes);
        let transcoder = self.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                tick.tick().await;
                if let Err(e) = transcoder.sweep() {
                    error!("Cache cleanup failed: {}", e);
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    fn tempdir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("castradio-transcode-{}", name));
        _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn transcoder(cache_dir: PathBuf, ttl_minutes: u64) -> Transcoder {
        Transcoder::new(true, cache_dir, "128k".to_owned(), "44100".to_owned(), ttl_minutes)
    }

    fn age_file(path: &Path, minutes: u64) {
        let old = SystemTime::now() - Duration::from_secs(minutes * 60);
        let file = std::fs::File::options().append(true).open(path).unwrap();
        file.set_modified(old).unwrap();
    }

    #[test]
    fn cache_path_keeps_the_basename() {
        let t = transcoder(PathBuf::from("/tmp/cache"), 10);
        assert_eq!(t.cache_path(Path::new("/music/a.mp3")), PathBuf::from("/tmp/cache/a.mp3"));
    }

    #[tokio::test]
    async fn disabled_transcoder_is_identity() {
        let t = Transcoder::new(false, tempdir("disabled"), "128k".into(), "44100".into(), 10);
        let src = Path::new("/music/a.mp3");
        assert_eq!(t.resolve(src).await, src);
    }

    #[tokio::test]
    async fn cache_hit_short_circuits() {
        let dir = tempdir("hit");
        let t   = transcoder(dir.clone(), 10);
        std::fs::write(dir.join("a.mp3"), b"normalized").unwrap();
        assert_eq!(t.resolve(Path::new("/music/a.mp3")).await, dir.join("a.mp3"));
    }

    #[tokio::test]
    async fn failed_build_falls_back_to_the_source() {
        let dir = tempdir("fallback");
        let t   = transcoder(dir, 10);
        // The source does not exist, ffmpeg (if present at all) must fail
        let src = Path::new("/nonexistent/zz.mp3");
        assert_eq!(t.resolve(src).await, src);
    }

    #[tokio::test]
    async fn second_caller_is_not_a_second_builder() {
        let dir = tempdir("claim");
        let t   = transcoder(dir, 10);
        let src = Path::new("/music/a.mp3");
        let ticket = t.try_claim(src).unwrap();
        assert!(t.try_claim(src).is_none());
        // the claimed source falls back instead of double-building
        assert_eq!(t.resolve(src).await, src);
        drop(ticket);
        assert!(t.try_claim(src).is_some());
    }

    #[test]
    fn sweep_removes_only_expired_files() {
        let dir = tempdir("sweep");
        let t   = transcoder(dir.clone(), 5);
        std::fs::write(dir.join("old.mp3"), b"x").unwrap();
        std::fs::write(dir.join("fresh.mp3"), b"x").unwrap();
        age_file(&dir.join("old.mp3"), 10);

        t.sweep().unwrap();
        assert!(!dir.join("old.mp3").exists());
        assert!(dir.join("fresh.mp3").exists());
    }

    #[test]
    fn zero_ttl_disables_sweeping() {
        let dir = tempdir("sweep-off");
        let t   = transcoder(dir.clone(), 0);
        std::fs::write(dir.join("old.mp3"), b"x").unwrap();
        age_file(&dir.join("old.mp3"), 60);

        t.sweep().unwrap();
        assert!(dir.join("old.mp3").exists());
    }
}
