//! Server-Sent Events feed of the event bus.
//!
//! Replays recent events for late joiners, then follows the bus. A client
//! that falls behind loses the oldest events and keeps going.

use std::convert::Infallible;
use std::time::Duration;

use anystream_core::events::EventCategory;
use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;

use crate::context::AppContext;

/// Events replayed to a new subscriber.
const REPLAY: usize = 50;

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    /// Only forward events of this category.
    pub category: Option<EventCategory>,
}

/// GET /api/events
pub async fn events_handler(
    State(ctx): State<AppContext>,
    Query(params): Query<EventsQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let filter = params.category;
    let recent = ctx.event_bus.recent_events(REPLAY);
    let mut rx = ctx.event_bus.subscribe();
    let cancel = ctx.cancel.clone();

    let stream = async_stream::stream! {
        for event in recent.into_iter().rev() {
            if filter.map_or(true, |c| c == event.category) {
                if let Ok(data) = serde_json::to_string(&event) {
                    yield Ok(Event::default().data(data));
                }
            }
        }

        loop {
            let received = tokio::select! {
                received = rx.recv() => received,
                _ = cancel.cancelled() => break,
            };
            match received {
                Ok(event) => {
                    if filter.map_or(true, |c| c == event.category) {
                        if let Ok(data) = serde_json::to_string(&event) {
                            yield Ok(Event::default().data(data));
                        }
                    }
                }
                Err(RecvError::Lagged(n)) => {
                    tracing::debug!("SSE client lagged by {n} events");
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)).text("ping"))
}
