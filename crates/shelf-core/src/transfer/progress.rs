//! Byte-count progress for long transfers.
//!
//! A transfer runs on a background task and emits [`TransferProgress`] over a
//! bounded channel. The foreground drains the channel (rendering, logging or
//! ignoring each event); the channel closing marks the end of the stream, and
//! the task's result is then taken from its join handle. Progress never
//! carries the result.

use crate::config::TransferConfig;
use crate::error::{Result, ShelfError};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProgress {
    pub bytes_transferred: u64,
    /// Total bytes, when known up front.
    pub total_bytes: Option<u64>,
}

impl TransferProgress {
    /// Percentage complete (0-100), if the total is known.
    pub fn percent(&self) -> Option<f64> {
        self.total_bytes.map(|total| {
            if total == 0 {
                100.0
            } else {
                (self.bytes_transferred as f64 / total as f64) * 100.0
            }
        })
    }
}

pub type ProgressSender = mpsc::Sender<TransferProgress>;

/// Renders or discards progress for a labelled transfer (label = asset name).
pub type ProgressCallback = Arc<dyn Fn(&str, TransferProgress) + Send + Sync>;

pub fn progress_channel() -> (ProgressSender, mpsc::Receiver<TransferProgress>) {
    mpsc::channel(TransferConfig::PROGRESS_CHANNEL_CAPACITY)
}

/// Run `task` on a background task while forwarding its progress.
///
/// Returns only after the progress channel has closed and the task has
/// finished, so callers never proceed while the transfer is still writing.
pub async fn run_tracked<T, F, Fut>(
    label: &str,
    on_progress: Option<&ProgressCallback>,
    task: F,
) -> Result<T>
where
    F: FnOnce(ProgressSender) -> Fut,
    Fut: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    let (tx, mut rx) = progress_channel();
    let handle = tokio::spawn(task(tx));

    while let Some(progress) = rx.recv().await {
        if let Some(callback) = on_progress {
            callback(label, progress);
        }
    }

    handle
        .await
        .map_err(|e| ShelfError::Other(format!("Transfer task for '{}' failed: {}", label, e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_percent() {
        let progress = TransferProgress {
            bytes_transferred: 25,
            total_bytes: Some(100),
        };
        assert_eq!(progress.percent(), Some(25.0));

        let unknown = TransferProgress {
            bytes_transferred: 25,
            total_bytes: None,
        };
        assert_eq!(unknown.percent(), None);
    }

    #[tokio::test]
    async fn test_run_tracked_forwards_progress_then_result() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callback: ProgressCallback = Arc::new(move |label: &str, progress: TransferProgress| {
            sink.lock()
                .unwrap()
                .push((label.to_string(), progress.bytes_transferred));
        });

        let result = run_tracked("sicp.pdf", Some(&callback), |tx| async move {
            for step in 1..=3u64 {
                let _ = tx
                    .send(TransferProgress {
                        bytes_transferred: step * 10,
                        total_bytes: Some(30),
                    })
                    .await;
            }
            Ok(42)
        })
        .await
        .unwrap();

        assert_eq!(result, 42);
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[2], ("sicp.pdf".to_string(), 30));
    }

    #[tokio::test]
    async fn test_run_tracked_propagates_error() {
        let result: Result<()> =
            run_tracked("x", None, |_tx| async move { Err(ShelfError::Cancelled) }).await;
        assert!(matches!(result, Err(ShelfError::Cancelled)));
    }
}
