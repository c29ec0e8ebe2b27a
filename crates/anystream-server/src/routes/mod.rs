//! Route handlers for the HTTP and WebSocket API.

pub mod events;
pub mod health;
pub mod import;
pub mod media;
pub mod state;
pub mod stream;
pub mod ws;

use anystream_core::{Error, MediaRefId};

/// Parse a media reference id from a path segment. Malformed ids cannot
/// name an existing reference, so they are reported as not found.
pub(crate) fn parse_media_ref_id(raw: &str) -> Result<MediaRefId, Error> {
    raw.parse().map_err(|_| Error::not_found("media_ref", raw))
}
