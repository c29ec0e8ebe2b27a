//! Integration tests for HLS playlist and segment delivery.

mod common;

use std::sync::Arc;
use std::time::Duration;

use anystream_core::{Error, MediaRefId};
use anystream_server::streaming::SessionState;
use common::{eventually, segment_bytes, FakeProber, FakeTranscoder, TestHarness};

#[tokio::test]
async fn playlist_starts_session_and_lists_every_segment() {
    let (h, addr) = TestHarness::with_server().await;
    let media_ref = h.add_movie("Heat", "Heat (1995).mkv");
    let state = h.state_for(media_ref.id);

    let resp = reqwest::get(TestHarness::playlist_url(addr, media_ref.id, &state.id))
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(
        resp.headers().get("content-type").unwrap().to_str().unwrap(),
        "application/vnd.apple.mpegurl"
    );
    let body = resp.text().await.unwrap();
    assert!(body.starts_with("#EXTM3U"));
    assert!(body.contains("#EXT-X-PLAYLIST-TYPE:VOD"));
    assert!(body.trim_end().ends_with("#EXT-X-ENDLIST"));
    // 3600s at 6s per segment.
    assert_eq!(body.matches("#EXTINF").count(), 600);
    assert!(body.contains(&format!("seg00000.ts?token={}", state.id)));

    assert_eq!(h.ctx.streams.session_count(), 1);
    assert_eq!(h.transcoder.starts(), 1);
}

#[tokio::test]
async fn playlist_reuses_live_session() {
    let (h, addr) = TestHarness::with_server().await;
    let media_ref = h.add_movie("Heat", "Heat (1995).mkv");
    let state = h.state_for(media_ref.id);
    let url = TestHarness::playlist_url(addr, media_ref.id, &state.id);

    for _ in 0..3 {
        assert_eq!(reqwest::get(&url).await.unwrap().status(), 200);
    }
    assert_eq!(h.ctx.streams.session_count(), 1);
    assert_eq!(h.transcoder.starts(), 1);
}

#[tokio::test]
async fn playlist_requires_token() {
    let (h, addr) = TestHarness::with_server().await;
    let media_ref = h.add_movie("Heat", "Heat (1995).mkv");

    let missing = reqwest::get(format!(
        "http://{addr}/stream/{}/hls/playlist.m3u8",
        media_ref.id
    ))
    .await
    .unwrap();
    assert_eq!(missing.status(), 401);

    let unknown = reqwest::get(TestHarness::playlist_url(
        addr,
        media_ref.id,
        &uuid_like_token(),
    ))
    .await
    .unwrap();
    assert_eq!(unknown.status(), 401);

    let malformed = reqwest::get(TestHarness::playlist_url(addr, media_ref.id, &"abc"))
        .await
        .unwrap();
    assert_eq!(malformed.status(), 401);
    assert_eq!(h.ctx.streams.session_count(), 0);
}

#[tokio::test]
async fn token_is_bound_to_its_media_ref() {
    let (h, addr) = TestHarness::with_server().await;
    let heat = h.add_movie("Heat", "Heat (1995).mkv");
    let alien = h.add_movie("Alien", "Alien (1979).mkv");
    let heat_state = h.state_for(heat.id);

    let resp = reqwest::get(TestHarness::playlist_url(addr, alien.id, &heat_state.id))
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
}

#[tokio::test]
async fn playlist_for_unknown_media_ref_is_404() {
    let (h, addr) = TestHarness::with_server().await;
    let media_ref = h.add_movie("Heat", "Heat (1995).mkv");
    let state = h.state_for(media_ref.id);

    let resp = reqwest::get(format!(
        "http://{addr}/stream/not-an-id/hls/playlist.m3u8?token={}",
        state.id
    ))
    .await
    .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn missing_source_file_is_404() {
    let (h, addr) = TestHarness::with_server().await;
    let media_ref = h.add_movie("Heat", "Heat (1995).mkv");
    let state = h.state_for(media_ref.id);
    std::fs::remove_file(media_ref.file_path().unwrap()).unwrap();

    let resp = reqwest::get(TestHarness::playlist_url(addr, media_ref.id, &state.id))
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    assert_eq!(h.ctx.streams.session_count(), 0);
}

#[tokio::test]
async fn segments_are_served_once_written() {
    let (h, addr) = TestHarness::with_server().await;
    let media_ref = h.add_movie("Heat", "Heat (1995).mkv");
    let state = h.state_for(media_ref.id);

    reqwest::get(TestHarness::playlist_url(addr, media_ref.id, &state.id))
        .await
        .unwrap();
    let session = h.ctx.streams.session(state.id).unwrap();
    eventually("session ready", || session.state() >= SessionState::Ready).await;

    let resp = reqwest::get(TestHarness::segment_url(
        addr,
        media_ref.id,
        "seg00001.ts",
        &state.id,
    ))
    .await
    .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(
        resp.headers().get("content-type").unwrap().to_str().unwrap(),
        "video/mp2t"
    );
    assert_eq!(resp.bytes().await.unwrap().as_ref(), segment_bytes(1).as_slice());

    // Past the end of what the encoder wrote.
    let resp = reqwest::get(TestHarness::segment_url(
        addr,
        media_ref.id,
        "seg00400.ts",
        &state.id,
    ))
    .await
    .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn segment_without_session_is_404() {
    let (h, addr) = TestHarness::with_server().await;
    let media_ref = h.add_movie("Heat", "Heat (1995).mkv");
    let state = h.state_for(media_ref.id);

    let resp = reqwest::get(TestHarness::segment_url(
        addr,
        media_ref.id,
        "seg00000.ts",
        &state.id,
    ))
    .await
    .unwrap();
    assert_eq!(resp.status(), 404);

    let resp = reqwest::get(format!(
        "http://{addr}/stream/{}/hls/seg00000.ts",
        media_ref.id
    ))
    .await
    .unwrap();
    assert_eq!(resp.status(), 401);
}

#[tokio::test]
async fn segment_lookup_rejects_traversal() {
    let h = TestHarness::new();
    let media_ref = h.add_movie("Heat", "Heat (1995).mkv");
    let state = h.state_for(media_ref.id);
    let token = state.id.to_string();
    h.ctx.streams.get_playlist(media_ref.id, &token).await.unwrap();

    // A file next to the session directory that traversal would reach.
    std::fs::write(h.data_dir.path().join("transcode").join("secret.txt"), b"x").unwrap();

    for name in [
        "../../etc/passwd",
        "../secret.txt",
        "..",
        "sub/seg00000.ts",
        "..\\secret.txt",
        ".complete",
        "",
    ] {
        assert!(
            h.ctx
                .streams
                .get_file_path_for_segment(&token, name)
                .await
                .is_none(),
            "{name:?} should be rejected"
        );
    }
}

#[tokio::test]
async fn concurrent_segment_reads_do_not_mutate_state() {
    let (h, addr) = TestHarness::with_server().await;
    let media_ref = h.add_movie("Heat", "Heat (1995).mkv");
    let state = h.state_for(media_ref.id);

    reqwest::get(TestHarness::playlist_url(addr, media_ref.id, &state.id))
        .await
        .unwrap();
    let session = h.ctx.streams.session(state.id).unwrap();
    // A finished encode leaves the session in its terminal state, still
    // serving segments.
    eventually("encode finished", || session.state() == SessionState::Stopped).await;
    assert!(h.session_dir(&state.id).join(".complete").exists());
    let before = session.info();

    let url = TestHarness::segment_url(addr, media_ref.id, "seg00000.ts", &state.id);
    let requests = (0..8).map(|_| {
        let url = url.clone();
        tokio::spawn(async move {
            let resp = reqwest::get(url).await.unwrap();
            (resp.status(), resp.bytes().await.unwrap())
        })
    });
    for result in futures::future::join_all(requests).await {
        let (status, body) = result.unwrap();
        assert_eq!(status, 200);
        assert_eq!(body.as_ref(), segment_bytes(0).as_slice());
    }

    assert_eq!(session.info(), before);
    assert_eq!(h.ctx.streams.session_count(), 1);
    assert_eq!(h.state_for(media_ref.id), state);
}

#[tokio::test]
async fn stop_with_delete_removes_output() {
    let (h, addr) = TestHarness::with_server().await;
    let media_ref = h.add_movie("Heat", "Heat (1995).mkv");
    let state = h.state_for(media_ref.id);

    reqwest::get(TestHarness::playlist_url(addr, media_ref.id, &state.id))
        .await
        .unwrap();
    let dir = h.session_dir(&state.id);
    eventually("output dir", || dir.exists()).await;

    let body: serde_json::Value = reqwest::get(format!(
        "http://{addr}/stream/stop/{}?delete=true",
        state.id
    ))
    .await
    .unwrap()
    .json()
    .await
    .unwrap();
    assert_eq!(body["stopped"], true);
    assert!(!dir.exists());
    assert_eq!(h.ctx.streams.session_count(), 0);

    // The state survives and authorizes a new session.
    let resp = reqwest::get(TestHarness::playlist_url(addr, media_ref.id, &state.id))
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(h.transcoder.starts(), 2);
}

#[tokio::test]
async fn stop_without_delete_keeps_output() {
    let (h, addr) = TestHarness::with_server().await;
    let media_ref = h.add_movie("Heat", "Heat (1995).mkv");
    let state = h.state_for(media_ref.id);

    reqwest::get(TestHarness::playlist_url(addr, media_ref.id, &state.id))
        .await
        .unwrap();
    let dir = h.session_dir(&state.id);
    eventually("first segment", || dir.join("seg00000.ts").exists()).await;

    let body: serde_json::Value =
        reqwest::get(format!("http://{addr}/stream/stop/{}", state.id))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
    assert_eq!(body["stopped"], true);
    assert!(dir.join("seg00000.ts").exists());

    // Segments are no longer served once the session is gone.
    let resp = reqwest::get(TestHarness::segment_url(
        addr,
        media_ref.id,
        "seg00000.ts",
        &state.id,
    ))
    .await
    .unwrap();
    assert_eq!(resp.status(), 404);

    let again: serde_json::Value =
        reqwest::get(format!("http://{addr}/stream/stop/{}", state.id))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
    assert_eq!(again["stopped"], false);
}

#[tokio::test]
async fn stop_cancels_running_encode() {
    let transcoder = FakeTranscoder {
        segments: 1000,
        segment_delay: Duration::from_millis(50),
        ..Default::default()
    };
    let h = TestHarness::build(Default::default(), FakeProber::default(), transcoder);
    let media_ref = h.add_movie("Heat", "Heat (1995).mkv");
    let state = h.state_for(media_ref.id);
    let token = state.id.to_string();

    h.ctx.streams.get_playlist(media_ref.id, &token).await.unwrap();
    let dir = h.session_dir(&state.id);
    eventually("first segment", || dir.join("seg00000.ts").exists()).await;

    assert!(h.ctx.streams.stop_session(&token, false).await);
    let written = std::fs::read_dir(&dir).unwrap().count();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(std::fs::read_dir(&dir).unwrap().count(), written);
    assert!(!dir.join(".complete").exists());
}

#[tokio::test]
async fn stop_during_encoder_start_leaves_no_output() {
    let transcoder = FakeTranscoder {
        start_delay: Duration::from_millis(300),
        ..Default::default()
    };
    let h = TestHarness::build(Default::default(), FakeProber::default(), transcoder);
    let media_ref = h.add_movie("Heat", "Heat (1995).mkv");
    let state = h.state_for(media_ref.id);
    let token = state.id.to_string();

    let streams = Arc::clone(&h.ctx.streams);
    let playlist_token = token.clone();
    let playlist =
        tokio::spawn(async move { streams.get_playlist(media_ref.id, &playlist_token).await });

    eventually("session in table", || h.ctx.streams.session_count() == 1).await;
    assert!(h.ctx.streams.stop_session(&token, true).await);

    let result = playlist.await.unwrap();
    assert!(matches!(result, Err(Error::Conflict(_))), "got {result:?}");

    let dir = h.session_dir(&state.id);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!dir.exists());
    assert_eq!(h.ctx.streams.session_count(), 0);
}

#[tokio::test]
async fn failed_encoder_surfaces_on_playlist() {
    let transcoder = FakeTranscoder {
        fail_start: true,
        ..Default::default()
    };
    let h = TestHarness::build(Default::default(), FakeProber::default(), transcoder);
    let (h, addr) = h.serve().await;
    let media_ref = h.add_movie("Heat", "Heat (1995).mkv");
    let state = h.state_for(media_ref.id);

    let resp = reqwest::get(TestHarness::playlist_url(addr, media_ref.id, &state.id))
        .await
        .unwrap();
    assert_eq!(resp.status(), 502);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["code"], "tool_error");

    let resp = reqwest::get(TestHarness::segment_url(
        addr,
        media_ref.id,
        "seg00000.ts",
        &state.id,
    ))
    .await
    .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn sessions_snapshot_lists_live_sessions() {
    let (h, addr) = TestHarness::with_server().await;
    let media_ref = h.add_movie("Heat", "Heat (1995).mkv");
    let state = h.state_for(media_ref.id);

    let empty: serde_json::Value = reqwest::get(format!("http://{addr}/stream"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(empty["transcode_sessions"], serde_json::json!({}));

    reqwest::get(TestHarness::playlist_url(addr, media_ref.id, &state.id))
        .await
        .unwrap();

    let snapshot: serde_json::Value = reqwest::get(format!("http://{addr}/stream"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let token = state.id.to_string();
    assert_eq!(
        snapshot["transcode_sessions"][&token]["media_ref_id"],
        media_ref.id.to_string()
    );
    assert_eq!(snapshot["playback_states"][0]["id"], token);
    assert_eq!(
        snapshot["media"][media_ref.content_id.to_string()]["title"],
        "Heat"
    );
    assert_eq!(
        snapshot["users"]["00000000-0000-0000-0000-000000000000"]["username"],
        "anonymous"
    );
}

#[tokio::test]
async fn idle_sessions_are_cleaned_up() {
    let mut config = anystream_core::config::Config::default();
    config.streaming.session_idle_timeout_secs = 0;
    let h = TestHarness::with_config(config);
    let media_ref = h.add_movie("Heat", "Heat (1995).mkv");
    let state = h.state_for(media_ref.id);
    h.ctx
        .streams
        .get_playlist(media_ref.id, &state.id.to_string())
        .await
        .unwrap();
    let dir = h.session_dir(&state.id);
    eventually("output dir", || dir.exists()).await;

    assert_eq!(h.ctx.streams.cleanup_idle_sessions().await, 1);
    assert_eq!(h.ctx.streams.session_count(), 0);
    assert!(!dir.exists());
}

fn uuid_like_token() -> String {
    MediaRefId::new().to_string()
}
