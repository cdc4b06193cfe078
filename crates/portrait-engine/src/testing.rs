use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use portrait_contracts::credential::{Credential, TransportKind};
use serde_json::json;

use crate::error::StudioError;
use crate::transport::{ContentRequest, GenerateContentResponse, ImageTransport, TransportSet};

/// Transport that replays queued outcomes and records what it was sent.
pub struct ScriptedTransport {
    kind: TransportKind,
    replies: Mutex<VecDeque<Result<GenerateContentResponse, StudioError>>>,
    sent: Mutex<Vec<(String, ContentRequest)>>,
}

impl ScriptedTransport {
    pub fn new(kind: TransportKind) -> Self {
        Self {
            kind,
            replies: Mutex::new(VecDeque::new()),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, reply: Result<GenerateContentResponse, StudioError>) {
        self.replies.lock().unwrap().push_back(reply);
    }

    pub fn push_image(&self, mime_type: &str, data: &str) {
        self.push(Ok(image_response(mime_type, data)));
    }

    pub fn push_rate_limited(&self) {
        self.push(Err(StudioError::Transport {
            status: 429,
            body: r#"{"error":{"status":"RESOURCE_EXHAUSTED"}}"#.to_string(),
        }));
    }

    pub fn calls(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn sent(&self) -> Vec<(String, ContentRequest)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn last_request(&self) -> ContentRequest {
        self.sent
            .lock()
            .unwrap()
            .last()
            .map(|(_, request)| request.clone())
            .expect("no request sent")
    }
}

#[async_trait]
impl ImageTransport for ScriptedTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    async fn generate_content(
        &self,
        credential: &Credential,
        request: &ContentRequest,
    ) -> Result<GenerateContentResponse, StudioError> {
        self.sent
            .lock()
            .unwrap()
            .push((credential.expose().to_string(), request.clone()));
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(StudioError::InvalidResponse("no scripted reply".to_string())))
    }
}

pub fn image_response(mime_type: &str, data: &str) -> GenerateContentResponse {
    serde_json::from_value(json!({
        "candidates": [{
            "content": {"parts": [{"inlineData": {"mimeType": mime_type, "data": data}}]}
        }]
    }))
    .expect("valid scripted response")
}

pub fn text_only_response(text: &str) -> GenerateContentResponse {
    serde_json::from_value(json!({
        "candidates": [{"content": {"parts": [{"text": text}]}}]
    }))
    .expect("valid scripted response")
}

/// A bearer and a direct scripted transport, plus the set wrapping both.
pub fn scripted_set() -> (Arc<ScriptedTransport>, Arc<ScriptedTransport>, TransportSet) {
    let bearer = Arc::new(ScriptedTransport::new(TransportKind::Bearer));
    let direct = Arc::new(ScriptedTransport::new(TransportKind::Direct));
    let set = TransportSet::new(bearer.clone(), direct.clone());
    (bearer, direct, set)
}
