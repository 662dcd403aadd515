//! Message composition and delivery seams.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::error::{NewsletterError, NewsletterResult};
use crate::models::{Campaign, QueueItem};

/// Email content ready for sending.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub to_email: String,
    pub subject: String,
    pub html_body: String,
    pub text_body: String,
    pub headers: Vec<(String, String)>,
}

impl OutgoingEmail {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Represents a sent email with provider-specific message ID.
#[derive(Debug, Clone)]
pub struct SentEmail {
    pub message_id: Option<String>,
    /// Whether the transport accepted the message for delivery.
    pub accepted: bool,
}

/// Resolves a queue row into a concrete message.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageRenderer: Send + Sync {
    async fn render(&self, item: &QueueItem, campaign: &Campaign)
    -> NewsletterResult<OutgoingEmail>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, site_id: i64, email: &OutgoingEmail) -> NewsletterResult<SentEmail>;

    /// Transport name for logging.
    fn name(&self) -> &'static str;
}

/// Renderer that uses the campaign subject for a minimal body.
#[derive(Debug, Default, Clone, Copy)]
pub struct BasicRenderer;

#[async_trait]
impl MessageRenderer for BasicRenderer {
    async fn render(
        &self,
        item: &QueueItem,
        campaign: &Campaign,
    ) -> NewsletterResult<OutgoingEmail> {
        if item.address.trim().is_empty() {
            return Err(NewsletterError::Render(format!(
                "queue row {} has no address",
                item.id
            )));
        }
        Ok(OutgoingEmail {
            to_email: item.address.clone(),
            subject: campaign.subject.clone(),
            html_body: format!("<p>{}</p>", campaign.subject),
            text_body: campaign.subject.clone(),
            headers: vec![
                ("X-Campaign-Id".to_string(), campaign.id.to_string()),
                ("X-Queue-Guid".to_string(), item.guid.to_string()),
            ],
        })
    }
}

/// Transport that keeps every accepted message in memory.
///
/// Addresses registered with [`RecordingTransport::fail_address`] are
/// refused until [`RecordingTransport::recover_address`] is called.
#[derive(Debug, Default, Clone)]
pub struct RecordingTransport {
    sent: Arc<Mutex<Vec<OutgoingEmail>>>,
    failing: Arc<Mutex<HashSet<String>>>,
    delay: Option<Duration>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait this long on every send.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub async fn fail_address(&self, address: &str) {
        self.failing.lock().await.insert(address.to_lowercase());
    }

    pub async fn recover_address(&self, address: &str) {
        self.failing.lock().await.remove(&address.to_lowercase());
    }

    pub async fn sent(&self) -> Vec<OutgoingEmail> {
        self.sent.lock().await.clone()
    }

    pub async fn sent_addresses(&self) -> Vec<String> {
        self.sent
            .lock()
            .await
            .iter()
            .map(|e| e.to_email.clone())
            .collect()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(&self, _site_id: i64, email: &OutgoingEmail) -> NewsletterResult<SentEmail> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.lock().await.contains(&email.to_email.to_lowercase()) {
            return Err(NewsletterError::Transport(format!(
                "mailbox unavailable: {}",
                email.to_email
            )));
        }

        let mut sent = self.sent.lock().await;
        sent.push(email.clone());
        Ok(SentEmail {
            message_id: Some(format!("recorded-{}", sent.len())),
            accepted: true,
        })
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn item(address: &str) -> QueueItem {
        QueueItem {
            id: 1,
            guid: Uuid::new_v4(),
            campaign_id: 5,
            subscriber_id: None,
            contact_id: None,
            site_id: 1,
            address: address.to_string(),
            sending: true,
            last_error: None,
            last_attempt: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_basic_renderer_tags_campaign() {
        let campaign = Campaign::newsletter(5, 1, 1).with_subject("Spring issue");
        let row = item("reader@example.com");

        let email = BasicRenderer.render(&row, &campaign).await.unwrap();
        assert_eq!(email.to_email, "reader@example.com");
        assert_eq!(email.subject, "Spring issue");
        assert_eq!(email.header("x-campaign-id"), Some("5"));
        let guid = row.guid.to_string();
        assert_eq!(email.header("X-Queue-Guid"), Some(guid.as_str()));
    }

    #[tokio::test]
    async fn test_recording_transport_fails_registered_addresses() {
        let transport = RecordingTransport::new();
        transport.fail_address("Bad@example.com").await;

        let bad = OutgoingEmail {
            to_email: "bad@example.com".to_string(),
            ..Default::default()
        };
        assert!(transport.send(1, &bad).await.is_err());

        transport.recover_address("bad@example.com").await;
        let sent = transport.send(1, &bad).await.unwrap();
        assert!(sent.accepted);
        assert_eq!(transport.sent_addresses().await, vec!["bad@example.com"]);
    }
}
