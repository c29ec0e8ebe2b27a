//! Database query modules, one per table.

pub mod media;
pub mod media_refs;
pub mod playback_states;
pub mod users;

/// Build `?1, ?2, ...` for an `IN (...)` clause of `n` parameters.
pub(crate) fn placeholders(n: usize) -> String {
    (1..=n).map(|i| format!("?{i}")).collect::<Vec<_>>().join(", ")
}
