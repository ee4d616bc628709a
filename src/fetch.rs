//! Runs one search and fans its results out to message pipelines.

use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::error::WatchError;
use crate::events::MailEvent;
use crate::pipeline::{MessagePipeline, PipelineContext, PipelineOutcome};
use crate::transport::{FetchOptions, Transport};
use crate::types::MessageId;

/// Per-search tally, mostly for logging and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SearchReport {
    pub matched: usize,
    pub delivered: usize,
    pub failed: usize,
}

pub struct FetchCoordinator {
    transport: Arc<dyn Transport>,
    pipeline: Arc<PipelineContext>,
    criteria: Vec<String>,
    fetch_options: FetchOptions,
}

impl FetchCoordinator {
    pub fn new(
        transport: Arc<dyn Transport>,
        pipeline: Arc<PipelineContext>,
        criteria: Vec<String>,
        mark_seen: bool,
    ) -> Self {
        Self {
            transport,
            pipeline,
            criteria,
            fetch_options: FetchOptions { mark_seen },
        }
    }

    /// Search the open mailbox and process every match.
    ///
    /// Messages are fetched concurrently. A failure on one message is reported
    /// as an `error` event and never affects its siblings.
    pub async fn search(&self) -> SearchReport {
        let ids = match self.transport.search(&self.criteria).await {
            Ok(ids) => ids,
            Err(e) => {
                warn!("Search failed: {e}");
                self.pipeline
                    .events
                    .emit(MailEvent::error(WatchError::Search(e), None));
                return SearchReport::default();
            }
        };

        if ids.is_empty() {
            debug!(criteria = ?self.criteria, "Search matched no messages");
            return SearchReport::default();
        }

        let matched = ids.len();
        debug!(matched, "Search matched, fetching");
        let outcomes = join_all(ids.into_iter().map(|id| self.process(id))).await;

        let delivered = outcomes
            .iter()
            .filter(|o| **o == PipelineOutcome::Delivered)
            .count();
        let report = SearchReport {
            matched,
            delivered,
            failed: matched - delivered,
        };
        info!(
            matched = report.matched,
            delivered = report.delivered,
            failed = report.failed,
            "Search processed"
        );
        report
    }

    async fn process(&self, id: MessageId) -> PipelineOutcome {
        let message = match self.transport.fetch(id, self.fetch_options).await {
            Ok(message) => message,
            Err(source) => {
                warn!(uid = id, "Fetch failed: {source}");
                self.pipeline.events.emit(MailEvent::error(
                    WatchError::Fetch { uid: id, source },
                    None,
                ));
                return PipelineOutcome::Failed;
            }
        };

        debug!(uid = id, seq = message.seq, size = ?message.size, "Message fetched");
        MessagePipeline::new(message.seq, Arc::clone(&self.pipeline))
            .run(message.body)
            .await
    }
}
