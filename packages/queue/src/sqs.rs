//! Amazon SQS backend.

use std::time::Duration;

use aws_config::{BehaviorVersion, Region};
use aws_sdk_sqs::Client;
use aws_sdk_sqs::error::DisplayErrorContext;
use aws_sdk_sqs::types::MessageSystemAttributeName;

use crate::{BoxFuture, DeadLetter, QueueError, ReceivedMessage, WorkQueue, non_empty};

/// SQS caps long polling at 20 seconds.
const MAX_WAIT_SECS: u64 = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqsConfig {
    pub queue_url: String,
    pub dead_letter_queue_url: Option<String>,
    pub region: String,
    /// Override for SQS-compatible endpoints such as LocalStack.
    pub endpoint: Option<String>,
}

impl SqsConfig {
    /// Build a config from environment variables.
    ///
    /// - `QUEUE_URL` (required)
    /// - `DEAD_LETTER_QUEUE_URL` (optional)
    /// - `AWS_REGION` (default: `ap-northeast-2`)
    /// - `SQS_ENDPOINT` (optional)
    pub fn from_env() -> Result<Self, QueueError> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self, QueueError> {
        let get = |name: &str| var(name).and_then(non_empty);
        let queue_url = get("QUEUE_URL")
            .ok_or_else(|| QueueError::InvalidConfig("QUEUE_URL is required".into()))?;

        Ok(Self {
            queue_url,
            dead_letter_queue_url: get("DEAD_LETTER_QUEUE_URL"),
            region: get("AWS_REGION").unwrap_or_else(|| "ap-northeast-2".to_string()),
            endpoint: get("SQS_ENDPOINT"),
        })
    }
}

/// Work queue backed by SQS.
#[derive(Debug, Clone)]
pub struct SqsQueue {
    client: Client,
    queue_url: String,
    dead_letter_queue_url: Option<String>,
}

impl SqsQueue {
    /// Connect using the ambient AWS credential chain.
    pub async fn connect(cfg: SqsConfig) -> Self {
        let shared = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(cfg.region.clone()))
            .load()
            .await;

        let mut builder = aws_sdk_sqs::config::Builder::from(&shared);
        if let Some(endpoint) = cfg.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        tracing::info!("Connected to SQS queue: {}", cfg.queue_url);
        Self {
            client: Client::from_conf(builder.build()),
            queue_url: cfg.queue_url,
            dead_letter_queue_url: cfg.dead_letter_queue_url,
        }
    }

    pub async fn from_env() -> Result<Self, QueueError> {
        Ok(Self::connect(SqsConfig::from_env()?).await)
    }
}

fn backend<E: std::error::Error>(err: E) -> QueueError {
    QueueError::Backend(DisplayErrorContext(&err).to_string())
}

impl WorkQueue for SqsQueue {
    fn receive(&self, wait: Duration) -> BoxFuture<'_, Result<Option<ReceivedMessage>, QueueError>> {
        Box::pin(async move {
            let wait_secs = wait.as_secs().min(MAX_WAIT_SECS) as i32;
            let output = self
                .client
                .receive_message()
                .queue_url(&self.queue_url)
                .max_number_of_messages(1)
                .wait_time_seconds(wait_secs)
                .message_system_attribute_names(MessageSystemAttributeName::ApproximateReceiveCount)
                .send()
                .await
                .map_err(backend)?;

            let Some(message) = output.messages().first() else {
                return Ok(None);
            };

            let message_id = message.message_id().unwrap_or_default().to_string();
            let receipt_handle = message
                .receipt_handle()
                .ok_or_else(|| QueueError::MissingReceipt(message_id.clone()))?
                .to_string();
            let receive_count = message
                .attributes()
                .and_then(|attrs| attrs.get(&MessageSystemAttributeName::ApproximateReceiveCount))
                .and_then(|count| count.parse().ok())
                .unwrap_or(1);

            Ok(Some(ReceivedMessage {
                message_id,
                receipt_handle,
                body: message.body().unwrap_or_default().to_string(),
                receive_count,
            }))
        })
    }

    fn delete<'a>(&'a self, message: &'a ReceivedMessage) -> BoxFuture<'a, Result<(), QueueError>> {
        Box::pin(async move {
            self.client
                .delete_message()
                .queue_url(&self.queue_url)
                .receipt_handle(&message.receipt_handle)
                .send()
                .await
                .map_err(backend)?;
            Ok(())
        })
    }

    fn dead_letter<'a>(
        &'a self,
        message: &'a ReceivedMessage,
    ) -> BoxFuture<'a, Result<DeadLetter, QueueError>> {
        Box::pin(async move {
            let Some(dead_letter_url) = self.dead_letter_queue_url.as_deref() else {
                return Ok(DeadLetter::NotConfigured);
            };
            self.client
                .send_message()
                .queue_url(dead_letter_url)
                .message_body(&message.body)
                .send()
                .await
                .map_err(backend)?;
            Ok(DeadLetter::Forwarded)
        })
    }
}
