//! External HTML to PDF rendering.

use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::multipart::{Form, Part};
use thiserror::Error;
use tracing::debug;

use crate::config::RendererConfig;

const CONVERT_HTML_PATH: &str = "/forms/chromium/convert/html";

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("renderer client error: {0}")]
    Client(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("renderer error (status {status}): {message}")]
    Status { status: u16, message: String },

    #[error("renderer returned an empty document")]
    EmptyDocument,
}

impl From<reqwest::Error> for RenderError {
    fn from(err: reqwest::Error) -> Self {
        RenderError::Network(err.to_string())
    }
}

/// Converts an HTML document into the final artifact bytes.
pub trait DocumentRenderer: Send + Sync {
    fn render_html(&self, html: &str) -> Result<Vec<u8>, RenderError>;
}

impl<R> DocumentRenderer for std::sync::Arc<R>
where
    R: DocumentRenderer + ?Sized,
{
    fn render_html(&self, html: &str) -> Result<Vec<u8>, RenderError> {
        (**self).render_html(html)
    }
}

/// Gotenberg Chromium HTML conversion client.
///
/// Blocking; never call it from inside an async task.
#[derive(Debug, Clone)]
pub struct GotenbergRenderer {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl GotenbergRenderer {
    pub fn new(config: &RendererConfig) -> Result<Self, RenderError> {
        Self::with_timeout(&config.base_url, config.timeout)
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self, RenderError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RenderError::Client(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn endpoint(&self) -> String {
        format!("{}{CONVERT_HTML_PATH}", self.base_url)
    }
}

impl DocumentRenderer for GotenbergRenderer {
    fn render_html(&self, html: &str) -> Result<Vec<u8>, RenderError> {
        let part = Part::text(html.to_string())
            .file_name("index.html")
            .mime_str("text/html")
            .map_err(|e| RenderError::Client(e.to_string()))?;
        let form = Form::new().part("files", part);

        let resp = self.client.post(self.endpoint()).multipart(form).send()?;

        let status = resp.status();
        if status != StatusCode::OK {
            let message = resp.text().unwrap_or_default();
            return Err(RenderError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let bytes = resp.bytes()?;
        if bytes.is_empty() {
            return Err(RenderError::EmptyDocument);
        }
        debug!(bytes = bytes.len(), "document rendered");
        Ok(bytes.to_vec())
    }
}
