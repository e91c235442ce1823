use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::Result;
use serde_json::json;

use crate::{
    config::SERVER_ID,
    frame,
    playlist::{self, Track},
    request::ApiRequest,
    response,
    server::{ClientSession, Server},
    utils
};

/// How long /skip waits for the producer to move on before answering
const SKIP_SETTLE: Duration = Duration::from_millis(100);
const SKIP_SETTLE_ROUNDS: usize = 20;

fn now_playing_brief(serv: &Server) -> serde_json::Value {
    match serv.store.now_playing() {
        Some(info) => json!({
            "title": info.track.filename,
            "artist": info.track.artist,
            "bitrate": info.track.bitrate_kbps,
            "samplerate": info.track.sample_rate
        }),
        None => serde_json::Value::Null
    }
}

fn track_json(track: &Track) -> serde_json::Value {
    json!({
        "hash": track.id,
        "title": track.title,
        "artist": track.artist,
        "filename": track.filename,
        "bitrate": track.bitrate_kbps,
        "samplerate": track.sample_rate,
        "url": "/"
    })
}

/// Load a track record for an endpoint answer: ID3 fields with filename
/// fallbacks plus the first-frame rates
fn probe_track(path: &std::path::Path) -> Track {
    let mut track = Track::from_path(path);
    if let Ok(probe) = frame::inspect(path) {
        if let Some(title) = probe.title {
            track.title = title;
        }
        if let Some(artist) = probe.artist {
            track.artist = artist;
        }
        track.sample_rate  = probe.sample_rate;
        track.bitrate_kbps = probe.bitrate_kbps;
    }
    track
}

async fn server_info(session: &mut ClientSession) -> Result<()> {
    let serv = session.server.clone();

    let now_playing = match serv.store.now_playing() {
        Some(info) => track_json(&info.track),
        None => serde_json::Value::Null
    };

    let resp = json!({
        "name": serv.config.name,
        "version": env!("CARGO_PKG_VERSION"),
        "time": serv.stats.start_time_ms,
        "now_playing": now_playing
    });

    respond_json(session, &resp).await
}

/// Icecast-compatible statistics envelope, close enough for the dashboards
/// that only know how to scrape icecast
async fn icecast_stats(session: &mut ClientSession) -> Result<()> {
    let serv = session.server.clone();

    let (title, artist, bitrate, samplerate) = match serv.store.now_playing() {
        Some(info) => (
            info.track.filename.clone(),
            info.track.artist.clone(),
            info.track.bitrate_kbps,
            info.track.sample_rate
        ),
        None => (String::new(), String::new(), None, None)
    };

    let resp = json!({
        "icestats": {
            "source": {
                "title": title,
                "artist": artist,
                "name": serv.config.name,
                "description": serv.config.name,
                "genre": "Stream",
                "bitrate": bitrate,
                "samplerate": samplerate
            }
        }
    });

    respond_json(session, &resp).await
}

async fn stream_status(session: &mut ClientSession) -> Result<()> {
    let serv = session.server.clone();
    let resp = json!({
        "status": "playing",
        "now_playing": now_playing_brief(&serv)
    });

    respond_json(session, &resp).await
}

/// The track the producer will pick at the next transition: an operator
/// override when one is pending, the precomputed index otherwise
fn peek_next(serv: &Server) -> Option<Track> {
    let paths = serv.playlist.scan().ok()?;

    let path = {
        let mut sel = serv.selection.lock().expect("selection lock poisoned");

        let overridden = sel.next_override.as_ref()
            .and_then(|id| paths.iter().find(|p| &playlist::track_id(p) == id));

        match overridden {
            Some(p) => p.clone(),
            None => {
                let index = match sel.cached_next.filter(|i| *i < paths.len()) {
                    Some(v) => v,
                    None => {
                        let next = serv.playlist.next_index(sel.current_index, paths.len());
                        sel.cached_next = Some(next);
                        next
                    }
                };
                paths[index].clone()
            }
        }
    };

    // Probing does file IO, keep it out of the critical section above
    Some(probe_track(&path))
}

async fn next_song(session: &mut ClientSession) -> Result<()> {
    let serv = session.server.clone();
    let resp = match peek_next(&serv) {
        Some(track) => json!({
            "status": "success",
            "next_song": track_json(&track)
        }),
        None => json!({
            "status": "error",
            "message": "Could not determine next song"
        })
    };

    respond_json(session, &resp).await
}

async fn set_next_song(session: &mut ClientSession, req: &ApiRequest) -> Result<()> {
    let serv = session.server.clone();

    let hash = match utils::query_val("hash", &req.queries) {
        Some(v) => v.to_owned(),
        None => {
            let resp = json!({ "status": "error", "message": "hash parameter is required" });
            return respond_bad_request(session, &resp).await;
        }
    };

    let path = match serv.playlist.find_by_id(&hash) {
        Some(v) => v,
        None => {
            let resp = json!({ "status": "error", "message": "song hash not found" });
            return respond_bad_request(session, &resp).await;
        }
    };

    serv.selection.lock().expect("selection lock poisoned").next_override = Some(hash);

    // Have the normalized version ready by the time the track airs
    let transcoder = serv.transcoder.clone();
    let prefetch   = path.clone();
    tokio::spawn(async move {
        transcoder.prefetch(prefetch).await;
    });

    let track = probe_track(&path);
    let resp  = json!({
        "status": "success",
        "message": "next song set",
        "next_song": track_json(&track)
    });

    respond_json(session, &resp).await
}

async fn skip_song(session: &mut ClientSession) -> Result<()> {
    let serv = session.server.clone();

    let before = serv.store.now_playing().map(|v| v.track.id.clone());

    serv.skip_requested.store(true, Ordering::Relaxed);
    serv.skip_notify.notify_waiters();

    // Give the producer a moment to roll over so the answer shows the new
    // track rather than the one being abandoned
    for _ in 0..SKIP_SETTLE_ROUNDS {
        if serv.store.now_playing().map(|v| v.track.id.clone()) != before {
            break;
        }
        tokio::time::sleep(SKIP_SETTLE).await;
    }

    let resp = json!({
        "status": "skipped",
        "now_playing": now_playing_brief(&serv)
    });

    respond_json(session, &resp).await
}

async fn songs_list(session: &mut ClientSession) -> Result<()> {
    let serv = session.server.clone();

    let paths = match serv.playlist.scan() {
        Ok(v) => v,
        Err(_) => {
            let resp = json!({ "status": "error", "message": "Could not retrieve songs list" });
            return respond_json(session, &resp).await;
        }
    };

    let songs = paths.iter()
        .map(|path| {
            let track = probe_track(path);
            json!({
                "hash": track.id,
                "title": track.title,
                "artist": track.artist,
                "filename": track.filename
            })
        })
        .collect::<Vec<_>>();

    let resp = json!({
        "status": "success",
        "total": songs.len(),
        "songs": songs
    });

    respond_json(session, &resp).await
}

fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

async fn runtime_metrics(session: &mut ClientSession) -> Result<()> {
    let serv = session.server.clone();

    let bytes  = serv.stats.bytes_streamed.load(Ordering::Relaxed);
    let mbps   = serv.stats.bandwidth_mbps();
    let uptime = (chrono::Utc::now().timestamp_millis() - serv.stats.start_time_ms).max(0) / 1000;

    let resp = json!({
        "status": "success",
        "metrics": {
            "active_listeners": serv.stats.active_listeners.load(Ordering::Relaxed),
            "peak_listeners": serv.stats.peak_listeners.load(Ordering::Relaxed),
            "connections": serv.stats.connections.load(Ordering::Relaxed),
            "total_data_streamed": {
                "bytes": bytes,
                "human": format_bytes(bytes)
            },
            "stream_uptime": {
                "seconds": uptime,
                "formatted": format!("{:02}:{:02}:{:02}", uptime / 3600, (uptime % 3600) / 60, uptime % 60)
            },
            "bandwidth": {
                "current_mbps": format!("{:.2} Mbps", mbps),
                "raw_mbps": mbps
            }
        }
    });

    respond_json(session, &resp).await
}

async fn respond_json(session: &mut ClientSession, resp: &serde_json::Value) -> Result<()> {
    match serde_json::to_vec(resp) {
        Ok(v) => response::ok_200_json_body(&mut session.stream, SERVER_ID, &v).await,
        Err(_) => response::internal_error(&mut session.stream, SERVER_ID).await
    }
}

async fn respond_bad_request(session: &mut ClientSession, resp: &serde_json::Value) -> Result<()> {
    match serde_json::to_vec(resp) {
        Ok(v) => response::bad_request_json(&mut session.stream, SERVER_ID, &v).await,
        Err(_) => response::internal_error(&mut session.stream, SERVER_ID).await
    }
}

pub async fn handle_request(mut session: ClientSession, req: ApiRequest) -> Result<()> {
    match (req.method.as_str(), req.path.as_str()) {
        ("GET", "/info") => server_info(&mut session).await,
        ("GET", "/stats") => icecast_stats(&mut session).await,
        ("GET", "/status") => stream_status(&mut session).await,
        ("GET", "/next") => next_song(&mut session).await,
        ("POST", "/next/set") => set_next_song(&mut session, &req).await,
        ("GET", "/skip") => skip_song(&mut session).await,
        ("GET", "/songs") => songs_list(&mut session).await,
        ("GET", "/metrics") => runtime_metrics(&mut session).await,
        ("GET", "/favicon.ico") => response::no_content(&mut session.stream, SERVER_ID).await,
        _ => response::not_found(&mut session.stream, SERVER_ID).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_formatting_picks_the_right_unit() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.00 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.00 MB");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024), "3.00 GB");
    }
}
