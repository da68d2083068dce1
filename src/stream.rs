//! Streaming batch events.
//!
//! [`crate::progress::BatchProgressCallback`] suits callers that want to be
//! called back; callers that would rather pull events (a UI task, a
//! websocket forwarder) subscribe to the orchestrator and get a
//! [`BatchEventStream`]. Events arrive in the order the orchestrator produced
//! them, which is batch order since documents run one at a time.

use crate::batch::{BatchStatus, ItemId};
use crate::progress::{BatchProgress, ProgressEvent};
use serde::Serialize;
use std::pin::Pin;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::Stream;

/// Everything the orchestrator reports while preparing and running a batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BatchEvent {
    /// An item moved to a new lifecycle status.
    StatusChanged {
        id: ItemId,
        name: String,
        status: BatchStatus,
    },
    BatchStarted { total: usize },
    /// Progress inside the current document, with the refreshed aggregate.
    Progress {
        id: ItemId,
        event: ProgressEvent,
        batch: BatchProgress,
    },
    DocumentCompleted {
        id: ItemId,
        name: String,
        warning: Option<String>,
    },
    DocumentFailed {
        id: ItemId,
        name: String,
        error: String,
    },
    BatchCompleted { progress: BatchProgress },
}

/// A boxed stream of batch events.
pub type BatchEventStream = Pin<Box<dyn Stream<Item = BatchEvent> + Send>>;

/// Fan-out of batch events to any number of subscribers.
///
/// Subscribers whose stream was dropped are pruned on the next send.
#[derive(Debug, Default)]
pub(crate) struct EventHub {
    subscribers: Vec<mpsc::UnboundedSender<BatchEvent>>,
}

impl EventHub {
    pub(crate) fn subscribe(&mut self) -> BatchEventStream {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        Box::pin(UnboundedReceiverStream::new(rx))
    }

    pub(crate) fn emit(&mut self, event: BatchEvent) {
        if self.subscribers.is_empty() {
            return;
        }
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}
