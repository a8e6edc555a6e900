//! Job status callbacks to the control plane.

use font_core::JobStatus;
use serde::Serialize;
use storage::BoxFuture;
use thiserror::Error;

use crate::config::StatusConfig;

#[derive(Debug, Error)]
pub enum StatusError {
    #[error("invalid status url: {0}")]
    Url(#[from] url::ParseError),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("status callback rejected with {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// What the control plane answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusAck {
    pub status: u16,
    pub body: String,
}

#[derive(Debug, Serialize)]
struct StatusBody {
    status: JobStatus,
}

/// Announces job status transitions. One call per announcement, never retried.
pub trait StatusReporter: Send + Sync + 'static {
    fn report<'a>(
        &'a self,
        font_id: &'a str,
        status: JobStatus,
    ) -> BoxFuture<'a, Result<StatusAck, StatusError>>;
}

#[derive(Debug, Clone)]
pub struct HttpStatusReporter {
    client: reqwest::Client,
    config: StatusConfig,
}

impl HttpStatusReporter {
    pub fn new(config: StatusConfig) -> Result<Self, StatusError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;
        Ok(Self { client, config })
    }

    async fn send(&self, font_id: &str, status: JobStatus) -> Result<StatusAck, StatusError> {
        let url = self.config.url_for(font_id)?;
        let mut request = self
            .client
            .request(self.config.method.clone(), url)
            .json(&StatusBody { status });
        if let Some(token) = &self.config.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let code = response.status();
        let body = response.text().await.unwrap_or_default();
        if !code.is_success() {
            return Err(StatusError::Rejected {
                status: code.as_u16(),
                body,
            });
        }
        Ok(StatusAck {
            status: code.as_u16(),
            body,
        })
    }
}

impl StatusReporter for HttpStatusReporter {
    fn report<'a>(
        &'a self,
        font_id: &'a str,
        status: JobStatus,
    ) -> BoxFuture<'a, Result<StatusAck, StatusError>> {
        Box::pin(self.send(font_id, status))
    }
}
