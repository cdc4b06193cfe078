use portrait_contracts::credential::{Credential, TransportKind};
use portrait_contracts::results::GeneratedResult;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::StudioError;
use crate::generation::normalize_image;
use crate::prompt;
use crate::retry::RetryPolicy;
use crate::transport::{ContentRequest, Part, TransportSet, SQUARE_ASPECT_RATIO};

pub const EDIT_TEMPERATURE: f64 = 0.4;

/// Single-image retouch of an earlier result.
///
/// Edits always go over the direct transport whatever the credential shape,
/// carry no seed, and never touch the usage counter.
#[derive(Clone)]
pub struct EditClient {
    transports: TransportSet,
    retry: RetryPolicy,
}

impl EditClient {
    pub fn new(transports: TransportSet, retry: RetryPolicy) -> Self {
        Self { transports, retry }
    }

    pub async fn edit(
        &self,
        credential: Option<&Credential>,
        base: &GeneratedResult,
        instruction: &str,
        cancel: &CancellationToken,
    ) -> Result<GeneratedResult, StudioError> {
        let credential = credential
            .filter(|credential| !credential.is_blank())
            .ok_or(StudioError::MissingCredential)?;
        if credential.transport_kind() == TransportKind::Bearer {
            warn!("edits use the direct transport; a delegated token may be rejected there");
        }

        let text = prompt::compose_edit(instruction);
        let content = ContentRequest {
            parts: vec![Part::image(base.image()), Part::text(text.as_str())],
            temperature: EDIT_TEMPERATURE,
            seed: None,
            aspect_ratio: Some(SQUARE_ASPECT_RATIO.to_string()),
        };
        let transport = self.transports.direct();
        let content_ref = &content;
        info!(
            base_id = base.id(),
            prompt_fingerprint = %prompt::fingerprint(&text),
            "dispatching edit"
        );

        let response = self
            .retry
            .execute(cancel, move |attempt| {
                debug!(attempt = attempt + 1, "edit attempt");
                transport.generate_content(credential, content_ref)
            })
            .await?;
        let image = normalize_image(&response).map_err(|_| StudioError::EditFailed)?;
        let result = GeneratedResult::edit(base.id(), image, text);
        info!(result_id = result.id(), base_id = base.id(), "edit succeeded");
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use portrait_contracts::credential::Credential;
    use portrait_contracts::media::ImagePayload;
    use portrait_contracts::results::{GeneratedResult, ResultKind};
    use tokio_util::sync::CancellationToken;

    use super::EditClient;
    use crate::error::StudioError;
    use crate::retry::RetryPolicy;
    use crate::testing::{scripted_set, text_only_response};
    use crate::transport::{GenerateContentResponse, Part};

    fn base() -> GeneratedResult {
        GeneratedResult::generation(ImagePayload::new("image/png", "T1JJRw=="), "original prompt")
    }

    #[tokio::test]
    async fn edit_sends_prior_image_then_retouch_text() -> anyhow::Result<()> {
        let (_, direct, set) = scripted_set();
        direct.push_image("image/jpeg", "RURJVA==");
        let client = EditClient::new(set, RetryPolicy::default());
        let base = base();

        let result = client
            .edit(
                Some(&Credential::new("AIzaKey")),
                &base,
                "make the tie burgundy",
                &CancellationToken::new(),
            )
            .await?;

        let sent = direct.last_request();
        assert_eq!(sent.parts.len(), 2);
        assert_eq!(sent.parts[0], Part::image(base.image()));
        assert_eq!(sent.parts[1], Part::text(result.instruction()));
        assert!(result.instruction().starts_with("RETOUCHING LAYER: make the tie burgundy."));
        assert_eq!(sent.temperature, 0.4);
        assert_eq!(sent.seed, None);
        assert_eq!(sent.aspect_ratio.as_deref(), Some("1:1"));
        assert_eq!(result.kind(), ResultKind::Edit);
        assert_eq!(result.derived_from(), Some(base.id()));
        assert_eq!(result.mime_type(), "image/jpeg");
        Ok(())
    }

    #[tokio::test]
    async fn delegated_token_still_uses_direct_transport() -> anyhow::Result<()> {
        let (bearer, direct, set) = scripted_set();
        direct.push_image("image/png", "RURJVA==");
        let client = EditClient::new(set, RetryPolicy::default());

        client
            .edit(
                Some(&Credential::new("ya29.delegated")),
                &base(),
                "soften the background",
                &CancellationToken::new(),
            )
            .await?;
        assert_eq!(bearer.calls(), 0);
        assert_eq!(direct.calls(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn missing_image_is_edit_failed_and_empty_candidates_too() {
        let (_, direct, set) = scripted_set();
        direct.push(Ok(text_only_response("cannot comply")));
        direct.push(Ok(GenerateContentResponse::default()));
        let client = EditClient::new(set, RetryPolicy::default());
        let credential = Credential::new("AIzaKey");
        let cancel = CancellationToken::new();

        for _ in 0..2 {
            let err = client
                .edit(Some(&credential), &base(), "brighter", &cancel)
                .await
                .unwrap_err();
            assert!(matches!(err, StudioError::EditFailed));
        }
        assert_eq!(direct.calls(), 2);
    }

    #[tokio::test]
    async fn missing_credential_makes_no_call() {
        let (bearer, direct, set) = scripted_set();
        let client = EditClient::new(set, RetryPolicy::default());
        let err = client
            .edit(None, &base(), "brighter", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StudioError::MissingCredential));
        assert_eq!(bearer.calls() + direct.calls(), 0);
    }

    #[tokio::test]
    async fn cancelled_edit_makes_no_call() {
        let (_, direct, set) = scripted_set();
        let client = EditClient::new(set, RetryPolicy::default());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = client
            .edit(Some(&Credential::new("AIzaKey")), &base(), "brighter", &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, StudioError::Cancelled));
        assert_eq!(direct.calls(), 0);
    }
}
