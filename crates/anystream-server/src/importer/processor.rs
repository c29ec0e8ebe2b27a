//! Import processors and their registry.

use std::path::PathBuf;
use std::sync::Arc;

use anystream_av::Prober;
use anystream_db::pool::DbPool;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::classifier::Classification;
use super::ImportResult;

/// A file the scanner has decided to hand to a processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportCandidate {
    pub path: PathBuf,
    pub classification: Classification,
}

/// Shared dependencies for processors.
#[derive(Clone)]
pub struct ImportContext {
    pub db: DbPool,
    pub prober: Arc<dyn Prober>,
    pub probe_concurrency: usize,
    pub cancel: CancellationToken,
}

/// Turns candidates of one kind into catalog records.
#[async_trait]
pub trait ImportProcessor: Send + Sync {
    fn name(&self) -> &'static str;

    fn can_process(&self, candidate: &ImportCandidate) -> bool;

    /// Import one candidate. Failures are reported in the result, never
    /// raised.
    async fn process(&self, ctx: &ImportContext, candidate: &ImportCandidate) -> ImportResult;

    /// Import a group of candidates from the same directory. Results come
    /// back in candidate order. Stops early, returning what it has, once
    /// the context is cancelled.
    async fn process_batch(
        &self,
        ctx: &ImportContext,
        candidates: &[ImportCandidate],
    ) -> Vec<ImportResult> {
        let mut results = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            if ctx.cancel.is_cancelled() {
                break;
            }
            results.push(self.process(ctx, candidate).await);
        }
        results
    }
}

/// Ordered set of processors. The first that accepts a candidate owns it.
#[derive(Default)]
pub struct ProcessorRegistry {
    processors: Vec<Arc<dyn ImportProcessor>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the movie and TV processors.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(super::movie::MovieProcessor));
        registry.register(Arc::new(super::tv::TvProcessor));
        registry
    }

    pub fn register(&mut self, processor: Arc<dyn ImportProcessor>) {
        self.processors.push(processor);
    }

    pub fn select(&self, candidate: &ImportCandidate) -> Option<Arc<dyn ImportProcessor>> {
        self.processors
            .iter()
            .find(|p| p.can_process(candidate))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }
}
