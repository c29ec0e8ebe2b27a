//! Application context shared by every handler through Axum state.

use std::sync::Arc;

use anystream_av::{Prober, ToolRegistry, Transcoder};
use anystream_core::config::Config;
use anystream_core::events::EventBus;
use anystream_db::pool::DbPool;
use tokio_util::sync::CancellationToken;

use crate::importer::MediaImporter;
use crate::streaming::StreamService;

#[derive(Clone)]
pub struct AppContext {
    pub db: DbPool,
    pub config: Arc<Config>,
    pub event_bus: Arc<EventBus>,
    pub tools: Arc<ToolRegistry>,
    pub prober: Arc<dyn Prober>,
    pub streams: Arc<StreamService>,
    pub importer: Arc<MediaImporter>,
    pub cancel: CancellationToken,
}

impl AppContext {
    /// Wire the services together. Background tasks stop when `cancel`
    /// fires.
    pub fn new(
        db: DbPool,
        config: Config,
        tools: Arc<ToolRegistry>,
        prober: Arc<dyn Prober>,
        transcoder: Arc<dyn Transcoder>,
        cancel: CancellationToken,
    ) -> Self {
        let config = Arc::new(config);
        let event_bus = Arc::new(EventBus::new(config.events.capacity));

        let streams = Arc::new(StreamService::new(
            db.clone(),
            config.streaming.clone(),
            transcoder,
            Arc::clone(&event_bus),
            cancel.child_token(),
        ));
        let importer = Arc::new(MediaImporter::new(
            db.clone(),
            Arc::clone(&prober),
            config.import.clone(),
            Arc::clone(&event_bus),
            cancel.child_token(),
        ));

        Self {
            db,
            config,
            event_bus,
            tools,
            prober,
            streams,
            importer,
            cancel,
        }
    }
}
