use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::media::ImagePayload;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultKind {
    Generation,
    Edit,
}

/// One image produced by the service. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedResult {
    id: String,
    kind: ResultKind,
    image: ImagePayload,
    instruction: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    derived_from: Option<String>,
}

impl GeneratedResult {
    pub fn generation(image: ImagePayload, instruction: impl Into<String>) -> Self {
        Self {
            id: new_result_id(),
            kind: ResultKind::Generation,
            image,
            instruction: instruction.into(),
            derived_from: None,
        }
    }

    pub fn edit(
        base_id: impl Into<String>,
        image: ImagePayload,
        instruction: impl Into<String>,
    ) -> Self {
        Self {
            id: new_result_id(),
            kind: ResultKind::Edit,
            image,
            instruction: instruction.into(),
            derived_from: Some(base_id.into()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> ResultKind {
        self.kind
    }

    pub fn image(&self) -> &ImagePayload {
        &self.image
    }

    pub fn mime_type(&self) -> &str {
        &self.image.mime_type
    }

    /// Exact instruction text that produced this image.
    pub fn instruction(&self) -> &str {
        &self.instruction
    }

    /// Id of the result this one was edited from.
    pub fn derived_from(&self) -> Option<&str> {
        self.derived_from.as_deref()
    }
}

fn new_result_id() -> String {
    Uuid::new_v4().simple().to_string()
}
