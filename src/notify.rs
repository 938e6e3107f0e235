use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::observability::{NOTIFICATIONS_DROPPED_TOTAL, NOTIFICATIONS_TOTAL};

/// One outbound message. The body is HTML.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub to: String,
    pub subject: String,
    pub html: String,
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("webhook request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("webhook answered {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Delivery collaborator. Failures are reported, never retried here.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, message: &Notification) -> Result<(), NotifyError>;
}

/// Posts `{to, subject, html}` to a mail-relay webhook, authenticating with a
/// `token` query parameter.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    token: String,
}

impl WebhookNotifier {
    pub fn new(url: String, token: String, timeout: Duration) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, url, token })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, message: &Notification) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(&self.url)
            .query(&[("token", self.token.as_str())])
            .json(message)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        // The relay answers 200 with {"ok": false} on some failures.
        let refused = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| v.get("ok").and_then(|ok| ok.as_bool()))
            == Some(false);
        if !status.is_success() || refused {
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

/// Used when no relay is configured: the message only reaches the log.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, message: &Notification) -> Result<(), NotifyError> {
        info!(to = %message.to, subject = %message.subject, "notification (log only)");
        Ok(())
    }
}

/// Producer side of the notification queue. Posting never waits: a full queue
/// drops the message.
#[derive(Clone)]
pub struct Outbox {
    tx: mpsc::Sender<Notification>,
}

impl Outbox {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Notification>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    pub fn post(&self, message: Notification) {
        match self.tx.try_send(message) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(m)) => {
                warn!(to = %m.to, subject = %m.subject, "outbox full, dropping notification");
                metrics::counter!(NOTIFICATIONS_DROPPED_TOTAL).increment(1);
            }
            Err(mpsc::error::TrySendError::Closed(m)) => {
                debug!(to = %m.to, "outbox closed, dropping notification");
                metrics::counter!(NOTIFICATIONS_DROPPED_TOTAL).increment(1);
            }
        }
    }
}

/// Drain the outbox into the notifier until every `Outbox` handle is gone.
pub async fn run_dispatcher(mut rx: mpsc::Receiver<Notification>, notifier: Arc<dyn Notifier>) {
    while let Some(message) = rx.recv().await {
        match notifier.notify(&message).await {
            Ok(()) => {
                debug!(to = %message.to, "notification delivered");
                metrics::counter!(NOTIFICATIONS_TOTAL, "outcome" => "delivered").increment(1);
            }
            Err(e) => {
                warn!(to = %message.to, subject = %message.subject, "notification failed: {e}");
                metrics::counter!(NOTIFICATIONS_TOTAL, "outcome" => "failed").increment(1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn message(to: &str) -> Notification {
        Notification {
            to: to.into(),
            subject: "hello".into(),
            html: "<p>hi</p>".into(),
        }
    }

    #[derive(Default)]
    struct Recording {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Notifier for Recording {
        async fn notify(&self, message: &Notification) -> Result<(), NotifyError> {
            self.seen.lock().unwrap().push(message.to.clone());
            if message.to.starts_with("bad") {
                return Err(NotifyError::Rejected {
                    status: 500,
                    body: "nope".into(),
                });
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn post_and_receive() {
        let (outbox, mut rx) = Outbox::channel(4);
        outbox.post(message("a@example.com"));
        assert_eq!(rx.recv().await.unwrap().to, "a@example.com");
    }

    #[tokio::test]
    async fn full_outbox_drops_without_blocking() {
        let (outbox, mut rx) = Outbox::channel(1);
        outbox.post(message("first@example.com"));
        outbox.post(message("second@example.com"));
        assert_eq!(rx.recv().await.unwrap().to, "first@example.com");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn closed_outbox_is_noop() {
        let (outbox, rx) = Outbox::channel(1);
        drop(rx);
        outbox.post(message("a@example.com"));
    }

    #[tokio::test]
    async fn dispatcher_keeps_going_after_failure() {
        let (outbox, rx) = Outbox::channel(8);
        let recording = Arc::new(Recording::default());
        outbox.post(message("bad@example.com"));
        outbox.post(message("good@example.com"));
        drop(outbox);

        run_dispatcher(rx, recording.clone()).await;
        assert_eq!(
            *recording.seen.lock().unwrap(),
            vec!["bad@example.com".to_string(), "good@example.com".to_string()]
        );
    }
}
