//! HLS segment-index playlist rendering.

use std::fmt::Write;

use anystream_av::segment_file_name;

/// Trailing slivers shorter than this are folded into the previous segment.
const MIN_TAIL_SECS: f64 = 0.001;

/// Render a VOD media playlist covering `runtime_secs` in segments of
/// `segment_secs`. Segment URIs are relative and carry `token` as a query
/// parameter so the player presents it on every fetch.
pub fn render_vod_playlist(runtime_secs: f64, segment_secs: u32, token: &str) -> String {
    let segment_secs = segment_secs.max(1);
    let seg = f64::from(segment_secs);
    let runtime = if runtime_secs.is_finite() { runtime_secs.max(0.0) } else { 0.0 };
    let count = segment_count(runtime, segment_secs);

    let mut out = String::with_capacity(64 + count as usize * 48);
    out.push_str("#EXTM3U\n");
    out.push_str("#EXT-X-VERSION:3\n");
    let _ = writeln!(out, "#EXT-X-TARGETDURATION:{segment_secs}");
    out.push_str("#EXT-X-MEDIA-SEQUENCE:0\n");
    out.push_str("#EXT-X-PLAYLIST-TYPE:VOD\n");

    for n in 0..count {
        let start = n as f64 * seg;
        let duration = if n + 1 == count {
            (runtime - start).max(MIN_TAIL_SECS).min(seg)
        } else {
            seg
        };
        let _ = writeln!(out, "#EXTINF:{duration:.6},");
        let _ = writeln!(out, "{}?token={token}", segment_file_name(n));
    }

    out.push_str("#EXT-X-ENDLIST\n");
    out
}

/// Number of segments needed for `runtime_secs`. Always at least one.
pub fn segment_count(runtime_secs: f64, segment_secs: u32) -> u64 {
    let seg = f64::from(segment_secs.max(1));
    (((runtime_secs - MIN_TAIL_SECS) / seg).ceil() as u64).max(1)
}

/// Parse the index out of a segment file name (`seg00012.ts` -> 12).
pub fn segment_index(name: &str) -> Option<u64> {
    name.strip_prefix("seg")?.strip_suffix(".ts")?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_multiple() {
        let playlist = render_vod_playlist(12.0, 6, "tok");
        assert_eq!(
            playlist,
            "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:6\n#EXT-X-MEDIA-SEQUENCE:0\n\
             #EXT-X-PLAYLIST-TYPE:VOD\n#EXTINF:6.000000,\nseg00000.ts?token=tok\n\
             #EXTINF:6.000000,\nseg00001.ts?token=tok\n#EXT-X-ENDLIST\n"
        );
    }

    #[test]
    fn short_tail_segment() {
        let playlist = render_vod_playlist(3600.5, 6, "t");
        assert_eq!(segment_count(3600.5, 6), 601);
        assert!(playlist.contains("#EXTINF:0.500000,\nseg00600.ts?token=t\n"));
        assert!(playlist.ends_with("#EXT-X-ENDLIST\n"));
    }

    #[test]
    fn every_uri_carries_token() {
        let playlist = render_vod_playlist(60.0, 6, "abc-123");
        let uris: Vec<&str> = playlist.lines().filter(|l| !l.starts_with('#')).collect();
        assert_eq!(uris.len(), 10);
        assert!(uris.iter().all(|u| u.ends_with("?token=abc-123")));
    }

    #[test]
    fn degenerate_runtime_still_has_one_segment() {
        assert_eq!(segment_count(0.0, 6), 1);
        let playlist = render_vod_playlist(f64::NAN, 0, "t");
        assert!(playlist.contains("#EXT-X-TARGETDURATION:1"));
        assert!(playlist.contains("seg00000.ts"));
    }

    #[test]
    fn parses_segment_index() {
        assert_eq!(segment_index("seg00012.ts"), Some(12));
        assert_eq!(segment_index("seg.ts"), None);
        assert_eq!(segment_index("init.mp4"), None);
    }
}
