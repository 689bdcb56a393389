use async_trait::async_trait;
use reqwest::Client;
use reqwest::multipart::{Form, Part};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::InpaintConfig;
use crate::error::{CleanserError, Result};

/// Status codes that prove an inpainting server is listening on the endpoint
const REACHABLE_STATUSES: [u16; 4] = [200, 400, 405, 422];

/// Client for the external inpainting service
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait InpaintClient: Send + Sync {
    /// Submit one frame with the repair mask, returns the repaired image bytes
    async fn inpaint(&self, image: Vec<u8>, mask: Arc<Vec<u8>>) -> Result<Vec<u8>>;

    async fn check_availability(&self) -> Result<()>;
}

/// Multipart HTTP client: `image` and `mask` PNG fields, repaired image as the response body
pub struct HttpInpaintClient {
    client: Client,
    endpoint: String,
    timeout_secs: u64,
}

impl HttpInpaintClient {
    pub fn new(config: &InpaintConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .user_agent(concat!("vidcleanser/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            timeout_secs: config.timeout_secs,
        })
    }

    fn png_part(bytes: Vec<u8>, file_name: &'static str) -> Result<Part> {
        Ok(Part::bytes(bytes).file_name(file_name).mime_str("image/png")?)
    }

    fn request_error(&self, e: reqwest::Error) -> CleanserError {
        if e.is_timeout() {
            CleanserError::Inpaint(format!("Request timed out after {}s", self.timeout_secs))
        } else {
            CleanserError::Inpaint(format!("Request to {} failed: {}", self.endpoint, e))
        }
    }
}

#[async_trait]
impl InpaintClient for HttpInpaintClient {
    async fn inpaint(&self, image: Vec<u8>, mask: Arc<Vec<u8>>) -> Result<Vec<u8>> {
        let form = Form::new()
            .part("image", Self::png_part(image, "frame.png")?)
            .part("mask", Self::png_part(mask.as_ref().clone(), "mask.png")?);

        let response = self.client
            .post(&self.endpoint)
            .multipart(form)
            .send()
            .await
            .map_err(|e| self.request_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let excerpt: String = body.chars().take(200).collect();
            return Err(CleanserError::Inpaint(format!(
                "Service returned {}: {}",
                status,
                excerpt.trim()
            )));
        }

        let body = response.bytes().await.map_err(|e| self.request_error(e))?;
        if image::guess_format(&body).is_err() {
            return Err(CleanserError::Inpaint(format!(
                "Service returned {} bytes that are not an image",
                body.len()
            )));
        }

        debug!("Inpaint response: {} bytes", body.len());
        Ok(body.to_vec())
    }

    async fn check_availability(&self) -> Result<()> {
        let response = self.client
            .post(&self.endpoint)
            .send()
            .await
            .map_err(|e| CleanserError::Inpaint(format!(
                "Inpaint service not reachable at {}: {}",
                self.endpoint, e
            )))?;

        let status = response.status().as_u16();
        if REACHABLE_STATUSES.contains(&status) {
            info!("Inpaint service reachable at {} (HTTP {})", self.endpoint, status);
            Ok(())
        } else {
            Err(CleanserError::Inpaint(format!(
                "Inpaint service at {} answered HTTP {}",
                self.endpoint, status
            )))
        }
    }
}
