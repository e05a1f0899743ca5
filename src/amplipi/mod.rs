//! AmpliPi REST client
//!
//! Thin typed client for the controller's HTTP API. Everything above this
//! layer talks to the [`AmpliPiApi`] trait so tests can substitute a
//! recording fake or an in-process mock server.

mod error;
pub mod models;

pub use error::ApiError;
pub use models::*;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Request timeout for every controller call.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Operations consumed from the controller.
#[async_trait]
pub trait AmpliPiApi: Send + Sync {
    /// Full status: sources, zones, groups and streams in one round-trip.
    async fn get_status(&self) -> Result<Status, ApiError>;

    async fn set_zone(&self, zone_id: u32, update: &ZoneUpdate) -> Result<(), ApiError>;

    /// Apply one update to many zones and groups in a single call.
    async fn set_zones(&self, update: &MultiZoneUpdate) -> Result<(), ApiError>;

    async fn set_source(&self, source_id: u32, update: &SourceUpdate) -> Result<(), ApiError>;

    async fn set_group(&self, group_id: u32, update: &GroupUpdate) -> Result<(), ApiError>;

    async fn stream_command(&self, stream_id: u32, command: StreamCommand)
        -> Result<(), ApiError>;

    async fn announce(&self, announcement: &Announcement) -> Result<(), ApiError>;
}

/// Shared handle to a controller client.
pub type SharedApi = Arc<dyn AmpliPiApi>;

/// reqwest-backed [`AmpliPiApi`].
#[derive(Clone)]
pub struct AmpliPiClient {
    client: Client,
    base_url: Url,
}

impl AmpliPiClient {
    /// `base_url` is the API root, e.g. `http://amplipi.local/api`.
    pub fn new(base_url: &str) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Self::with_client(client, base_url)
    }

    pub fn with_client(client: Client, base_url: &str) -> Result<Self, ApiError> {
        let trimmed = base_url.trim_end_matches('/');
        // Keep a trailing slash so Url::join appends instead of replacing the last segment
        let base_url = Url::parse(&format!("{}/", trimmed))?;
        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str().trim_end_matches('/')
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        Ok(self.base_url.join(path)?)
    }

    async fn send(&self, request: RequestBuilder) -> Result<String, ApiError> {
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(body)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let url = self.endpoint(path)?;
        debug!(%url, "AmpliPi GET");
        let body = self.send(self.client.get(url)).await?;
        serde_json::from_str(&body).map_err(|e| ApiError::Decode {
            message: e.to_string(),
            body,
        })
    }

    async fn patch<B: serde::Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<(), ApiError> {
        let url = self.endpoint(path)?;
        debug!(%url, body = ?serde_json::to_value(body).ok(), "AmpliPi PATCH");
        self.send(self.client.patch(url).json(body)).await?;
        Ok(())
    }

    async fn post<B: serde::Serialize + ?Sized>(
        &self,
        path: &str,
        body: Option<&B>,
    ) -> Result<(), ApiError> {
        let url = self.endpoint(path)?;
        debug!(%url, "AmpliPi POST");
        let mut request = self.client.post(url);
        if let Some(body) = body {
            request = request.json(body);
        }
        self.send(request).await?;
        Ok(())
    }
}

#[async_trait]
impl AmpliPiApi for AmpliPiClient {
    async fn get_status(&self) -> Result<Status, ApiError> {
        self.get_json("").await
    }

    async fn set_zone(&self, zone_id: u32, update: &ZoneUpdate) -> Result<(), ApiError> {
        self.patch(&format!("zones/{}", zone_id), update).await
    }

    async fn set_zones(&self, update: &MultiZoneUpdate) -> Result<(), ApiError> {
        self.patch("zones", update).await
    }

    async fn set_source(&self, source_id: u32, update: &SourceUpdate) -> Result<(), ApiError> {
        self.patch(&format!("sources/{}", source_id), update).await
    }

    async fn set_group(&self, group_id: u32, update: &GroupUpdate) -> Result<(), ApiError> {
        self.patch(&format!("groups/{}", group_id), update).await
    }

    async fn stream_command(
        &self,
        stream_id: u32,
        command: StreamCommand,
    ) -> Result<(), ApiError> {
        self.post::<()>(
            &format!("streams/{}/{}", stream_id, command.as_path()),
            None,
        )
        .await
    }

    async fn announce(&self, announcement: &Announcement) -> Result<(), ApiError> {
        self.post("announce", Some(announcement)).await
    }
}
