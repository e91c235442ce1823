use std::time::Duration;

use test_utils::{get_json, music_dir, spawn_server, test_settings};

static TEST_DIR: &str = env!("CARGO_TARGET_TMPDIR");

const BASE: &str       = "127.0.0.1:9301";
const BASE_EMPTY: &str = "127.0.0.1:9303";

#[test]
fn control_endpoints_follow_the_broadcast() {
    let dir = music_dir(TEST_DIR, "api", &[("a.mp3", 700), ("b.mp3", 700)]);
    spawn_server(test_settings(&dir, 9301));

    // Give the producer time to publish the initial buffer
    std::thread::sleep(Duration::from_secs(2));

    let status = get_json(&format!("http://{}/status", BASE));
    assert_eq!(status["status"], "playing");
    assert_eq!(status["now_playing"]["title"], "a");
    assert_eq!(status["now_playing"]["samplerate"], 32000);
    assert_eq!(status["now_playing"]["bitrate"], 128);

    let info = get_json(&format!("http://{}/info", BASE));
    assert_eq!(info["name"], "CastRadio");
    assert_eq!(info["version"], env!("CARGO_PKG_VERSION"));
    assert!(info["time"].as_i64().unwrap() > 0);
    assert_eq!(info["now_playing"]["filename"], "a");

    let stats = get_json(&format!("http://{}/stats", BASE));
    assert_eq!(stats["icestats"]["source"]["genre"], "Stream");
    assert_eq!(stats["icestats"]["source"]["name"], "CastRadio");
    assert_eq!(stats["icestats"]["source"]["title"], "a");

    let songs = get_json(&format!("http://{}/songs", BASE));
    assert_eq!(songs["status"], "success");
    assert_eq!(songs["total"], 2);
    let hash_b = songs["songs"].as_array().unwrap()
        .iter()
        .find(|s| s["filename"] == "b")
        .map(|s| s["hash"].as_str().unwrap().to_owned())
        .unwrap();
    assert_eq!(hash_b.len(), 40);

    // a is on air, b is up next
    let next = get_json(&format!("http://{}/next", BASE));
    assert_eq!(next["status"], "success");
    assert_eq!(next["next_song"]["filename"], "b");

    let metrics = get_json(&format!("http://{}/metrics", BASE));
    assert_eq!(metrics["status"], "success");
    assert_eq!(metrics["metrics"]["active_listeners"], 0);
    assert!(metrics["metrics"]["stream_uptime"]["seconds"].as_i64().unwrap() >= 0);

    let client = test_utils::reqwest::blocking::Client::new();

    // Unknown hashes are refused outright
    let resp = client.post(format!("http://{}/next/set?hash=deadbeef", BASE))
        .send()
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);

    // Setting a known hash pins the next transition
    let resp = client.post(format!("http://{}/next/set?hash={}", BASE, hash_b))
        .send()
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    let body: test_utils::serde_json::Value = resp.json().unwrap();
    assert_eq!(body["status"], "success");
    assert_eq!(body["next_song"]["filename"], "b");

    let next = get_json(&format!("http://{}/next", BASE));
    assert_eq!(next["next_song"]["filename"], "b");

    // Skip consumes the override and answers with the new track
    let skipped = get_json(&format!("http://{}/skip", BASE));
    assert_eq!(skipped["status"], "skipped");
    assert_eq!(skipped["now_playing"]["title"], "b");

    let status = get_json(&format!("http://{}/status", BASE));
    assert_eq!(status["now_playing"]["title"], "b");

    // With b on air the round-robin points back at a
    let next = get_json(&format!("http://{}/next", BASE));
    assert_eq!(next["next_song"]["filename"], "a");

    let resp = test_utils::reqwest::blocking::get(format!("http://{}/nosuch", BASE)).unwrap();
    assert_eq!(resp.status().as_u16(), 404);
}

#[test]
fn empty_playlist_recovers_once_a_file_appears() {
    let dir = music_dir(TEST_DIR, "api-empty", &[]);
    spawn_server(test_settings(&dir, 9303));

    std::thread::sleep(Duration::from_millis(500));

    // Nothing to play yet: listeners are turned away
    let resp = test_utils::reqwest::blocking::get(format!("http://{}/", BASE_EMPTY)).unwrap();
    assert_eq!(resp.status().as_u16(), 503);

    // Drop a track in and wait out a producer retry cycle
    test_utils::write_cbr_mp3(&dir.join("late.mp3"), 700);
    std::thread::sleep(Duration::from_millis(2500));

    let status = get_json(&format!("http://{}/status", BASE_EMPTY));
    assert_eq!(status["now_playing"]["title"], "late");
}
