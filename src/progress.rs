use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

/// A status line pushed to progress listeners, sent over the wire as
/// `{"status": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub status: String,
}

#[derive(Debug, Clone)]
pub struct ProgressHub {
    tx: broadcast::Sender<Progress>,
}

impl Default for ProgressHub {
    fn default() -> Self {
        Self::new(64)
    }
}

impl ProgressHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Progress> {
        self.tx.subscribe()
    }

    pub fn listeners(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Fire and forget; having no listeners is normal.
    pub fn send(&self, status: impl Into<String>) {
        let status = status.into();
        debug!("progress: {}", status);
        let _ = self.tx.send(Progress { status });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_statuses_in_order() {
        let hub = ProgressHub::default();
        hub.send("dropped, nobody listening");
        let mut rx = hub.subscribe();
        assert_eq!(hub.listeners(), 1);
        hub.send("one");
        hub.send("two");
        assert_eq!(rx.recv().await.unwrap().status, "one");
        assert_eq!(rx.recv().await.unwrap().status, "two");
    }

    #[test]
    fn serialises_as_status_frame() {
        let frame = serde_json::to_string(&Progress {
            status: "Video generation complete!".into(),
        })
        .unwrap();
        assert_eq!(frame, r#"{"status":"Video generation complete!"}"#);
    }
}
