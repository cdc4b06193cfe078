use async_trait::async_trait;
use portrait_contracts::credential::{Credential, TransportKind};
use tracing::debug;

use super::http::{self, GenerateContentBody};
use super::{ContentRequest, GenerateContentResponse, ImageTransport};
use crate::error::StudioError;

/// REST call authorized with an OAuth-style access token.
///
/// The body carries only temperature and seed in `generationConfig`; the
/// aspect ratio is left to the service default on this path.
#[derive(Debug, Clone)]
pub struct BearerTransport {
    endpoint: String,
    http: reqwest::Client,
}

impl BearerTransport {
    pub fn new(endpoint: impl Into<String>, http: reqwest::Client) -> Self {
        Self {
            endpoint: endpoint.into(),
            http,
        }
    }
}

#[async_trait]
impl ImageTransport for BearerTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Bearer
    }

    async fn generate_content(
        &self,
        credential: &Credential,
        request: &ContentRequest,
    ) -> Result<GenerateContentResponse, StudioError> {
        debug!(
            endpoint = %self.endpoint,
            parts = request.parts.len(),
            "sending bearer generateContent"
        );
        let body = GenerateContentBody::new(request, false);
        let builder = self
            .http
            .post(&self.endpoint)
            .bearer_auth(credential.expose());
        http::send(builder, &body).await
    }
}

#[cfg(test)]
mod tests {
    use portrait_contracts::credential::Credential;
    use serde_json::json;

    use super::BearerTransport;
    use crate::error::StudioError;
    use crate::transport::http::test_server::{request_body, serve_once};
    use crate::transport::{ContentRequest, ImageTransport, Part};

    fn request() -> ContentRequest {
        ContentRequest {
            parts: vec![Part::text("portrait")],
            temperature: 0.8,
            seed: Some(7),
            aspect_ratio: Some("1:1".to_string()),
        }
    }

    #[tokio::test]
    async fn sends_token_in_authorization_header() -> anyhow::Result<()> {
        let (base, server) = serve_once(
            200,
            r#"{"candidates":[{"content":{"parts":[{"inlineData":{"mimeType":"image/png","data":"QUJD"}}]}}]}"#,
        )
        .await;
        let transport = BearerTransport::new(
            format!("{base}/models/m:generateContent"),
            reqwest::Client::new(),
        );
        let response = transport
            .generate_content(&Credential::new("ya29.token"), &request())
            .await?;
        assert_eq!(response.first_inline_image().expect("image").data, "QUJD");

        let raw = server.await?;
        let lowered = raw.to_ascii_lowercase();
        assert!(raw.starts_with("POST /models/m:generateContent HTTP/1.1"));
        assert!(lowered.contains("authorization: bearer ya29.token"));
        assert!(lowered.contains("content-type: application/json"));
        assert_eq!(
            request_body(&raw),
            json!({
                "contents": [{"parts": [{"text": "portrait"}]}],
                "generationConfig": {"temperature": 0.8, "seed": 7}
            })
        );
        Ok(())
    }

    #[tokio::test]
    async fn non_success_status_keeps_body_text() -> anyhow::Result<()> {
        let (base, server) =
            serve_once(429, r#"{"error":{"status":"RESOURCE_EXHAUSTED"}}"#).await;
        let transport = BearerTransport::new(base, reqwest::Client::new());
        let err = transport
            .generate_content(&Credential::new("ya29.token"), &request())
            .await
            .unwrap_err();
        server.await?;
        match &err {
            StudioError::Transport { status, body } => {
                assert_eq!(*status, 429);
                assert!(body.contains("RESOURCE_EXHAUSTED"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.is_rate_limited());
        Ok(())
    }

    #[tokio::test]
    async fn malformed_json_is_an_invalid_response() -> anyhow::Result<()> {
        let (base, server) = serve_once(200, "not json").await;
        let transport = BearerTransport::new(base, reqwest::Client::new());
        let err = transport
            .generate_content(&Credential::new("ya29.token"), &request())
            .await
            .unwrap_err();
        server.await?;
        assert!(matches!(err, StudioError::InvalidResponse(_)));
        Ok(())
    }
}
