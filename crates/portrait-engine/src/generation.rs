use portrait_contracts::credential::Credential;
use portrait_contracts::features::FeatureSet;
use portrait_contracts::media::ImagePayload;
use portrait_contracts::results::GeneratedResult;
use portrait_contracts::usage::{QuotaPolicy, UsageCounter};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::StudioError;
use crate::prompt;
use crate::retry::RetryPolicy;
use crate::transport::{
    ContentRequest, GenerateContentResponse, MissingImage, Part, TransportSet,
    SQUARE_ASPECT_RATIO,
};

pub const GENERATION_TEMPERATURE: f64 = 0.8;

/// Inputs of one first-generation request.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub base_image: ImagePayload,
    pub features: FeatureSet,
    pub seed: Option<i64>,
}

impl GenerationRequest {
    pub fn new(base_image: ImagePayload, features: FeatureSet) -> Self {
        Self {
            base_image,
            features,
            seed: None,
        }
    }

    pub fn with_seed(mut self, seed: i64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Exact instruction text this request sends.
    pub fn instruction(&self) -> String {
        prompt::compose(
            &self.features.semantic(),
            &self.features.technical(),
            self.features.effective_attire_reference().is_some(),
        )
    }

    /// Request parts in wire order: base photo, attire reference, instruction.
    pub fn parts(&self, instruction: &str) -> Vec<Part> {
        let mut parts = vec![Part::image(&self.base_image)];
        if let Some(reference) = self.features.effective_attire_reference() {
            parts.push(Part::image(reference));
        }
        parts.push(Part::text(instruction));
        parts
    }
}

/// Quota-gated first generation over whichever transport the credential picks.
///
/// One client covers both the single-credit trial flow and the full flow; the
/// difference is only the [`QuotaPolicy`].
#[derive(Clone)]
pub struct GenerationClient {
    transports: TransportSet,
    retry: RetryPolicy,
    quota: QuotaPolicy,
}

impl GenerationClient {
    pub fn new(transports: TransportSet, retry: RetryPolicy, quota: QuotaPolicy) -> Self {
        Self {
            transports,
            retry,
            quota,
        }
    }

    pub fn quota(&self) -> QuotaPolicy {
        self.quota
    }

    /// Runs one generation and bumps `usage` on success.
    ///
    /// The quota gate runs before anything else, so a spent quota never
    /// reaches the network. Nothing is counted when the call fails.
    pub async fn generate(
        &self,
        credential: Option<&Credential>,
        usage: &mut UsageCounter,
        request: &GenerationRequest,
        cancel: &CancellationToken,
    ) -> Result<GeneratedResult, StudioError> {
        let used = usage.count();
        if !self.quota.allows(used) {
            return Err(StudioError::QuotaExceeded {
                used,
                ceiling: self.quota.ceiling().unwrap_or(used),
            });
        }
        let credential = credential
            .filter(|credential| !credential.is_blank())
            .ok_or(StudioError::MissingCredential)?;

        let instruction = request.instruction();
        let content = ContentRequest {
            parts: request.parts(&instruction),
            temperature: GENERATION_TEMPERATURE,
            seed: request.seed,
            aspect_ratio: Some(SQUARE_ASPECT_RATIO.to_string()),
        };
        let transport = self.transports.select(credential);
        let content_ref = &content;
        info!(
            transport = transport.kind().as_str(),
            parts = content.parts.len(),
            prompt_fingerprint = %prompt::fingerprint(&instruction),
            seed = ?request.seed,
            "dispatching generation"
        );

        let response = self
            .retry
            .execute(cancel, move |attempt| {
                debug!(attempt = attempt + 1, "generation attempt");
                transport.generate_content(credential, content_ref)
            })
            .await?;
        let image = normalize_image(&response).map_err(|missing| match missing {
            MissingImage::NoCandidates => StudioError::NoCandidate,
            MissingImage::NoImage => StudioError::NoImageData,
        })?;
        let result = GeneratedResult::generation(image, instruction);

        match usage.increment() {
            Ok(count) => debug!(count, "usage counter advanced"),
            Err(err) => warn!(error = %format!("{err:#}"), "usage counter not persisted"),
        }
        info!(result_id = result.id(), mime_type = result.mime_type(), "generation succeeded");
        Ok(result)
    }
}

/// Captures the first inline image; a blank media type falls back to PNG.
pub(crate) fn normalize_image(
    response: &GenerateContentResponse,
) -> Result<ImagePayload, MissingImage> {
    let inline = response.first_inline_image()?;
    Ok(ImagePayload::new(
        inline.mime_type.clone(),
        inline.data.clone(),
    ))
}

/// Seed in the same range the studio UI rolls.
pub fn random_seed() -> i64 {
    (uuid::Uuid::new_v4().as_u128() % 10_000) as i64
}
