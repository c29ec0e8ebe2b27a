//! anystream-core: shared types, IDs, errors, configuration, and events.
//!
//! Every other anystream crate depends on this one. It carries the typed
//! identifiers, the unified error taxonomy, the media-domain value types
//! produced by probing, the JSON configuration, and the bounded event bus
//! used to announce session and import changes.

pub mod config;
pub mod error;
pub mod events;
pub mod ids;
pub mod media;

pub use error::{Error, Result};
pub use ids::*;
pub use media::*;
