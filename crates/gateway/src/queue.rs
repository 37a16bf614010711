//! Bounded work queue between the socket front-end and the dispatcher.

use crate::client::ClientState;
use crate::protocol::ClientRequest;
use metrics::gauge;
use std::sync::Arc;
use tokio::sync::mpsc;

/// One unit of dispatcher work.
pub type WorkItem = (Arc<ClientState>, ClientRequest);

/// Sending half handed to every socket task.
#[derive(Clone)]
pub struct WorkQueue {
    tx: mpsc::Sender<WorkItem>,
}

/// Build the queue; the receiver goes to the dispatcher.
pub fn work_queue(bound: usize) -> (WorkQueue, mpsc::Receiver<WorkItem>) {
    let (tx, rx) = mpsc::channel(bound);
    (WorkQueue { tx }, rx)
}

impl WorkQueue {
    /// Enqueue one parsed frame. Fails synchronously when the queue is
    /// full (or the dispatcher is gone) so the caller can answer with an
    /// error frame immediately.
    pub fn push(&self, item: WorkItem) -> Result<(), WorkItem> {
        match self.tx.try_send(item) {
            Ok(()) => {
                gauge!("gateway_queue_depth").set(self.len() as f64);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(item))
            | Err(mpsc::error::TrySendError::Closed(item)) => Err(item),
        }
    }

    /// Entries currently waiting.
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item() -> WorkItem {
        let (tx, _rx) = mpsc::unbounded_channel();
        let client = Arc::new(ClientState::new(tx, 100));
        let request: ClientRequest =
            serde_json::from_value(json!({ "id": 1, "method": "get_block", "params": [1] }))
                .unwrap();
        (client, request)
    }

    #[tokio::test]
    async fn overflow_is_rejected_synchronously() {
        let (queue, _rx) = work_queue(2);
        assert!(queue.push(item()).is_ok());
        assert!(queue.push(item()).is_ok());
        assert!(queue.push(item()).is_err());
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test]
    async fn length_tracks_consumption() {
        let (queue, mut rx) = work_queue(4);
        queue.push(item()).unwrap();
        queue.push(item()).unwrap();
        assert_eq!(queue.len(), 2);

        rx.recv().await.unwrap();
        assert_eq!(queue.len(), 1);
    }
}
