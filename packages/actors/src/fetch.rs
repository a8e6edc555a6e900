//! Input template download.

use std::path::PathBuf;
use std::time::Duration;

use bytes::Bytes;
use font_core::{JobLayout, JobMessage};
use imagesize::{ImageSize, ImageType};
use storage::{BoxFuture, Storage, StorageError};
use thiserror::Error;
use url::Url;

const ALLOWED_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("template {0} must be a .jpg, .jpeg or .png file")]
    UnsupportedExtension(String),

    #[error("unsupported template location {0}")]
    UnsupportedLocation(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("template download returned {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("template is not a valid image: {0}")]
    InvalidImage(String),

    #[error("failed to write template: {0}")]
    Io(#[from] std::io::Error),
}

/// Source of job input templates.
pub trait TemplateSource: Send + Sync + 'static {
    /// Store the template named by `message` inside the job's template
    /// directory and return the local path.
    fn fetch<'a>(
        &'a self,
        message: &'a JobMessage,
        layout: &'a JobLayout,
    ) -> BoxFuture<'a, Result<PathBuf, FetchError>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Location {
    Http(Url),
    Key(String),
}

impl Location {
    fn parse(template_url: &str) -> Result<Self, FetchError> {
        match Url::parse(template_url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(Location::Http(url)),
            Ok(_) => Err(FetchError::UnsupportedLocation(template_url.to_string())),
            Err(_) => Ok(Location::Key(template_url.trim_start_matches('/').to_string())),
        }
    }

    /// Lower-cased extension of the last path segment.
    fn extension(&self) -> Option<String> {
        let path = match self {
            Location::Http(url) => url.path(),
            Location::Key(key) => key.as_str(),
        };
        let file = path.rsplit('/').next()?;
        let (_, ext) = file.rsplit_once('.')?;
        Some(ext.to_ascii_lowercase())
    }
}

/// Fetches templates over HTTP(S) or from object storage.
#[derive(Debug, Clone)]
pub struct TemplateFetcher {
    client: reqwest::Client,
    storage: Storage,
}

impl TemplateFetcher {
    /// `storage` resolves template locations that are plain object keys.
    pub fn new(storage: Storage, timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, storage })
    }

    async fn download(&self, location: &Location) -> Result<Bytes, FetchError> {
        match location {
            Location::Http(url) => {
                let response = self.client.get(url.clone()).send().await?;
                let status = response.status();
                if !status.is_success() {
                    return Err(FetchError::Status {
                        url: url.to_string(),
                        status: status.as_u16(),
                    });
                }
                Ok(response.bytes().await?)
            }
            Location::Key(key) => Ok(self.storage.get_bytes(key).await?),
        }
    }

    async fn fetch_into(
        &self,
        message: &JobMessage,
        layout: &JobLayout,
    ) -> Result<PathBuf, FetchError> {
        let location = Location::parse(&message.template_url)?;
        let extension = location
            .extension()
            .filter(|ext| ALLOWED_EXTENSIONS.contains(&ext.as_str()))
            .ok_or_else(|| FetchError::UnsupportedExtension(message.template_url.clone()))?;

        let bytes = self.download(&location).await?;
        let size = verify_image(&bytes, &extension)?;

        let target = layout.template_path(&message.member_id, &extension);
        tokio::fs::create_dir_all(layout.template_dir()).await?;
        let partial = target.with_extension(format!("{extension}.part"));
        tokio::fs::write(&partial, &bytes).await?;
        tokio::fs::rename(&partial, &target).await?;

        tracing::debug!(
            template = %message.template_url,
            width = size.width,
            height = size.height,
            "Template saved to {}",
            target.display()
        );
        Ok(target)
    }
}

impl TemplateSource for TemplateFetcher {
    fn fetch<'a>(
        &'a self,
        message: &'a JobMessage,
        layout: &'a JobLayout,
    ) -> BoxFuture<'a, Result<PathBuf, FetchError>> {
        Box::pin(self.fetch_into(message, layout))
    }
}

/// The bytes must be a complete JPEG or PNG image matching the file extension.
///
/// Completeness is structural: the container must reach its end marker.
/// Pixel data is not decoded.
fn verify_image(bytes: &[u8], extension: &str) -> Result<ImageSize, FetchError> {
    let kind = imagesize::image_type(bytes).map_err(|e| FetchError::InvalidImage(e.to_string()))?;
    let matches = match kind {
        ImageType::Jpeg => extension != "png",
        ImageType::Png => extension == "png",
        _ => false,
    };
    if !matches {
        return Err(FetchError::InvalidImage(format!(
            "{kind:?} data in a .{extension} template"
        )));
    }
    let size = imagesize::blob_size(bytes).map_err(|e| FetchError::InvalidImage(e.to_string()))?;
    if !has_end_marker(bytes, &kind) {
        return Err(FetchError::InvalidImage(format!("truncated {kind:?} data")));
    }
    Ok(size)
}

/// PNG: the chunk chain reaches `IEND`. JPEG: the stream ends with EOI.
fn has_end_marker(bytes: &[u8], kind: &ImageType) -> bool {
    match kind {
        ImageType::Png => {
            let mut offset = 8;
            // length, type, data, crc
            while let Some(header) = bytes.get(offset..offset + 8) {
                let len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
                let Some(next) = offset.checked_add(12 + len) else {
                    return false;
                };
                if next > bytes.len() {
                    return false;
                }
                if &header[4..8] == b"IEND" {
                    return true;
                }
                offset = next;
            }
            false
        }
        ImageType::Jpeg => {
            let end = bytes.iter().rposition(|b| *b != 0).map_or(0, |i| i + 1);
            bytes[..end].ends_with(&[0xFF, 0xD9])
        }
        _ => false,
    }
}
