//! Message enrichment collaborator: smart replies, intent tags, and
//! importance flags produced out-of-band after a message is stored.

use std::time::Duration;

use async_trait::async_trait;

use pulse_types::models::{Enrichment, IntentTag};

/// Analyzer the pipeline hands message text to, fire-and-forget. Errors and
/// timeouts leave the message unannotated; they never surface to senders.
#[async_trait]
pub trait Enricher: Send + Sync {
    async fn analyze(&self, text: &str) -> anyhow::Result<Enrichment>;
}

/// Remote analyzer spoken to over HTTP. Expects the endpoint to accept
/// `{"text": ...}` and answer with any subset of the enrichment fields.
pub struct HttpEnricher {
    client: reqwest::Client,
    url: String,
}

impl HttpEnricher {
    pub fn new(url: String, timeout_ms: u64) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl Enricher for HttpEnricher {
    async fn analyze(&self, text: &str) -> anyhow::Result<Enrichment> {
        let response = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({ "text": text }))
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json::<Enrichment>().await?)
    }
}

const IMPORTANT_KEYWORDS: [&str; 7] = [
    "important",
    "urgent",
    "asap",
    "deadline",
    "meeting",
    "reminder",
    "don't forget",
];

/// Local fallback used when no enrichment endpoint is configured: keyword
/// scan for importance plus canned reply suggestions.
pub struct KeywordEnricher;

#[async_trait]
impl Enricher for KeywordEnricher {
    async fn analyze(&self, text: &str) -> anyhow::Result<Enrichment> {
        let lower = text.to_lowercase();
        let is_important = IMPORTANT_KEYWORDS.iter().any(|k| lower.contains(k));

        Ok(Enrichment {
            smart_replies: Some(vec![
                "Sounds good!".to_string(),
                "Thanks!".to_string(),
                "Got it".to_string(),
            ]),
            intent: Some(IntentTag::Casual),
            is_important: Some(is_important),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn keyword_scan_flags_urgent_text() {
        let result = KeywordEnricher
            .analyze("URGENT: the deadline moved to Friday")
            .await
            .unwrap();
        assert_eq!(result.is_important, Some(true));
    }

    #[tokio::test]
    async fn keyword_scan_passes_casual_text() {
        let result = KeywordEnricher.analyze("see you at the park").await.unwrap();
        assert_eq!(result.is_important, Some(false));
        assert_eq!(result.intent, Some(IntentTag::Casual));
        assert_eq!(result.smart_replies.as_ref().map(Vec::len), Some(3));
    }
}
