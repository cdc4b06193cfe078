//! The two ways of reaching the image service.
//!
//! Which one a request takes is decided by the credential's shape alone
//! ([`classify_credential`](portrait_contracts::credential::classify_credential));
//! callers never pick a transport from request content.

mod bearer;
mod direct;
mod http;

use std::sync::Arc;

use async_trait::async_trait;
use portrait_contracts::credential::{Credential, TransportKind};
use portrait_contracts::media::ImagePayload;
use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::error::StudioError;

pub use bearer::BearerTransport;
pub use direct::DirectTransport;

pub const SQUARE_ASPECT_RATIO: &str = "1:1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    #[serde(default, alias = "mime_type")]
    pub mime_type: String,
    #[serde(default)]
    pub data: String,
}

/// One request part: an inline image or a block of text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Part {
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
    Text {
        text: String,
    },
}

impl Part {
    pub fn image(payload: &ImagePayload) -> Self {
        Part::InlineData {
            inline_data: InlineData {
                mime_type: payload.mime_type.clone(),
                data: payload.data.clone(),
            },
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Part::Text { text: text.into() }
    }

    pub fn is_image(&self) -> bool {
        matches!(self, Part::InlineData { .. })
    }
}

/// Transport-neutral description of one `generateContent` call.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentRequest {
    pub parts: Vec<Part>,
    pub temperature: f64,
    pub seed: Option<i64>,
    pub aspect_ratio: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Option<Vec<Candidate>>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<CandidateContent>,
    #[serde(default, alias = "finish_reason")]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CandidateContent {
    #[serde(default)]
    pub parts: Vec<ResponsePart>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponsePart {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default, alias = "inline_data")]
    pub inline_data: Option<InlineData>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingImage {
    NoCandidates,
    NoImage,
}

impl GenerateContentResponse {
    /// First inline image of the first candidate.
    pub fn first_inline_image(&self) -> Result<&InlineData, MissingImage> {
        let first = self
            .candidates
            .as_deref()
            .and_then(<[Candidate]>::first)
            .ok_or(MissingImage::NoCandidates)?;
        first
            .content
            .as_ref()
            .into_iter()
            .flat_map(|content| content.parts.iter())
            .filter_map(|part| part.inline_data.as_ref())
            .find(|inline| !inline.data.is_empty())
            .ok_or(MissingImage::NoImage)
    }
}

#[async_trait]
pub trait ImageTransport: Send + Sync {
    fn kind(&self) -> TransportKind;

    async fn generate_content(
        &self,
        credential: &Credential,
        request: &ContentRequest,
    ) -> Result<GenerateContentResponse, StudioError>;
}

/// Both transports, with selection by credential shape.
#[derive(Clone)]
pub struct TransportSet {
    bearer: Arc<dyn ImageTransport>,
    direct: Arc<dyn ImageTransport>,
}

impl TransportSet {
    pub fn new(bearer: Arc<dyn ImageTransport>, direct: Arc<dyn ImageTransport>) -> Self {
        Self { bearer, direct }
    }

    /// HTTP transports sharing one client, bounded by the configured timeout.
    pub fn http(config: &EngineConfig) -> Result<Self, StudioError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        let endpoint = config.endpoint();
        Ok(Self::new(
            Arc::new(BearerTransport::new(endpoint.clone(), client.clone())),
            Arc::new(DirectTransport::new(endpoint, client)),
        ))
    }

    pub fn select(&self, credential: &Credential) -> &dyn ImageTransport {
        match credential.transport_kind() {
            TransportKind::Bearer => self.bearer.as_ref(),
            TransportKind::Direct => self.direct.as_ref(),
        }
    }

    pub fn direct(&self) -> &dyn ImageTransport {
        self.direct.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use portrait_contracts::credential::{Credential, TransportKind};
    use portrait_contracts::media::ImagePayload;
    use serde_json::json;

    use super::{GenerateContentResponse, MissingImage, Part, TransportSet};
    use crate::testing::ScriptedTransport;

    #[test]
    fn parts_serialize_to_wire_shape() -> anyhow::Result<()> {
        let image = Part::image(&ImagePayload::new("image/jpeg", "QUJD"));
        let text = Part::text("hello");
        assert_eq!(
            serde_json::to_value(&image)?,
            json!({"inlineData": {"mimeType": "image/jpeg", "data": "QUJD"}})
        );
        assert_eq!(serde_json::to_value(&text)?, json!({"text": "hello"}));
        assert!(image.is_image());
        assert!(!text.is_image());
        Ok(())
    }

    #[test]
    fn first_inline_image_skips_text_parts() -> anyhow::Result<()> {
        let response: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": {"parts": [
                    {"text": "here you go"},
                    {"inline_data": {"mime_type": "image/webp", "data": "AAAA"}}
                ]},
                "finishReason": "STOP"
            }]
        }))?;
        let image = response.first_inline_image().expect("image");
        assert_eq!(image.mime_type, "image/webp");
        assert_eq!(image.data, "AAAA");
        Ok(())
    }

    #[test]
    fn missing_candidates_and_images_are_distinguished() -> anyhow::Result<()> {
        let empty: GenerateContentResponse = serde_json::from_value(json!({}))?;
        assert_eq!(empty.first_inline_image(), Err(MissingImage::NoCandidates));

        let null: GenerateContentResponse = serde_json::from_value(json!({"candidates": null}))?;
        assert_eq!(null.first_inline_image(), Err(MissingImage::NoCandidates));

        let text_only: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{"content": {"parts": [{"text": "I can't do that"}]}}]
        }))?;
        assert_eq!(text_only.first_inline_image(), Err(MissingImage::NoImage));

        let no_content: GenerateContentResponse =
            serde_json::from_value(json!({"candidates": [{"finishReason": "SAFETY"}]}))?;
        assert_eq!(no_content.first_inline_image(), Err(MissingImage::NoImage));
        Ok(())
    }

    #[test]
    fn selection_follows_credential_shape() {
        let bearer = Arc::new(ScriptedTransport::new(TransportKind::Bearer));
        let direct = Arc::new(ScriptedTransport::new(TransportKind::Direct));
        let set = TransportSet::new(bearer, direct);

        assert_eq!(
            set.select(&Credential::new("ya29.short")).kind(),
            TransportKind::Bearer
        );
        assert_eq!(
            set.select(&Credential::new("x".repeat(151))).kind(),
            TransportKind::Bearer
        );
        assert_eq!(
            set.select(&Credential::new("x".repeat(150))).kind(),
            TransportKind::Direct
        );
        assert_eq!(set.direct().kind(), TransportKind::Direct);
    }
}
