use async_trait::async_trait;
use portrait_contracts::credential::{Credential, TransportKind};
use tracing::debug;

use super::http::{self, GenerateContentBody};
use super::{ContentRequest, GenerateContentResponse, ImageTransport};
use crate::error::StudioError;

/// REST call authorized with an API key in the `key` query parameter.
#[derive(Debug, Clone)]
pub struct DirectTransport {
    endpoint: String,
    http: reqwest::Client,
}

impl DirectTransport {
    pub fn new(endpoint: impl Into<String>, http: reqwest::Client) -> Self {
        Self {
            endpoint: endpoint.into(),
            http,
        }
    }
}

#[async_trait]
impl ImageTransport for DirectTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Direct
    }

    async fn generate_content(
        &self,
        credential: &Credential,
        request: &ContentRequest,
    ) -> Result<GenerateContentResponse, StudioError> {
        debug!(
            endpoint = %self.endpoint,
            parts = request.parts.len(),
            aspect_ratio = request.aspect_ratio.as_deref().unwrap_or("default"),
            "sending direct generateContent"
        );
        let body = GenerateContentBody::new(request, true);
        let builder = self
            .http
            .post(&self.endpoint)
            .query(&[("key", credential.expose())]);
        http::send(builder, &body).await
    }
}
