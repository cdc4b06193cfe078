use portrait_contracts::credential::Credential;
use portrait_contracts::events::{EventKind, EventPayload, EventWriter};
use portrait_contracts::history::VersionHistory;
use portrait_contracts::results::GeneratedResult;
use portrait_contracts::studio::VersionRef;
use portrait_contracts::usage::{QuotaPolicy, UsageCounter};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::edit::EditClient;
use crate::error::StudioError;
use crate::generation::{GenerationClient, GenerationRequest};
use crate::prompt;
use crate::transport::TransportSet;

/// One editing session: the clients, the usage counter they share and the
/// version history the results land in.
///
/// Every mutating call takes `&mut self`, so a session never has two
/// requests in flight. History and usage change only after a request has
/// fully succeeded.
pub struct StudioSession {
    generator: GenerationClient,
    editor: EditClient,
    credential: Option<Credential>,
    usage: UsageCounter,
    history: Option<VersionHistory>,
    events: Option<EventWriter>,
}

impl StudioSession {
    pub fn new(
        generator: GenerationClient,
        editor: EditClient,
        credential: Option<Credential>,
        usage: UsageCounter,
    ) -> Self {
        Self {
            generator,
            editor,
            credential,
            usage,
            history: None,
            events: None,
        }
    }

    /// HTTP-backed session with the usage counter read from the configured path.
    pub fn from_config(
        config: &EngineConfig,
        credential: Option<Credential>,
    ) -> Result<Self, StudioError> {
        let transports = TransportSet::http(config)?;
        Ok(Self::new(
            GenerationClient::new(transports.clone(), config.retry, config.quota),
            EditClient::new(transports, config.retry),
            credential,
            UsageCounter::open(&config.usage_path),
        ))
    }

    /// Continues from a saved history; the next edit starts from its current version.
    pub fn with_history(mut self, history: VersionHistory) -> Self {
        self.history = Some(history);
        self
    }

    pub fn with_events(mut self, events: EventWriter) -> Self {
        self.events = Some(events);
        let quota = self.generator.quota();
        self.emit(
            EventKind::SessionStarted,
            json!({
                "usage_count": self.usage.count(),
                "quota_ceiling": quota.ceiling(),
                "versions": self.history.as_ref().map(VersionHistory::len).unwrap_or(0),
            }),
        );
        self
    }

    pub fn history(&self) -> Option<&VersionHistory> {
        self.history.as_ref()
    }

    pub fn into_history(self) -> Option<VersionHistory> {
        self.history
    }

    pub fn usage(&self) -> &UsageCounter {
        &self.usage
    }

    pub fn quota(&self) -> QuotaPolicy {
        self.generator.quota()
    }

    pub fn current(&self) -> Option<&GeneratedResult> {
        self.history.as_ref().map(VersionHistory::current_result)
    }

    /// First generation, or a fresh root version when the session already has one.
    pub async fn generate(
        &mut self,
        request: &GenerationRequest,
        cancel: &CancellationToken,
    ) -> Result<&GeneratedResult, StudioError> {
        self.emit(
            EventKind::GenerationStarted,
            json!({
                "transport": self.credential.as_ref().map(|c| c.transport_kind().as_str()),
                "usage_count": self.usage.count(),
                "seed": request.seed,
            }),
        );
        let outcome = self
            .generator
            .generate(self.credential.as_ref(), &mut self.usage, request, cancel)
            .await;
        let result = match outcome {
            Ok(result) => result,
            Err(err) => {
                self.emit_failure(EventKind::GenerationFailed, &err);
                return Err(err);
            }
        };
        let result_id = result.id().to_string();
        self.commit(result)?;
        info!(result_id = %result_id, versions = self.version_count(), "version appended");
        self.emit(
            EventKind::GenerationSucceeded,
            json!({
                "result_id": result_id,
                "position": self.position_of(&result_id),
                "prompt_fingerprint": prompt::fingerprint(self.current_instruction()),
                "usage_count": self.usage.count(),
            }),
        );
        self.current_or_empty()
    }

    /// Retouches the current version; the result is appended and becomes current.
    pub async fn edit(
        &mut self,
        instruction: &str,
        cancel: &CancellationToken,
    ) -> Result<&GeneratedResult, StudioError> {
        let base = self
            .history
            .as_ref()
            .ok_or(StudioError::EmptyHistory)?
            .current_result()
            .clone();
        self.emit(
            EventKind::EditStarted,
            json!({"base_id": base.id(), "instruction": instruction}),
        );
        let outcome = self
            .editor
            .edit(self.credential.as_ref(), &base, instruction, cancel)
            .await;
        let result = match outcome {
            Ok(result) => result,
            Err(err) => {
                self.emit_failure(EventKind::EditFailed, &err);
                return Err(err);
            }
        };
        let result_id = result.id().to_string();
        self.commit(result)?;
        self.emit(
            EventKind::EditSucceeded,
            json!({
                "result_id": result_id,
                "base_id": base.id(),
                "position": self.position_of(&result_id),
            }),
        );
        self.current_or_empty()
    }

    pub fn select(&mut self, id: &str) -> Result<&GeneratedResult, StudioError> {
        let history = self.history.as_mut().ok_or(StudioError::EmptyHistory)?;
        let selected = history
            .select_current(id)
            .map(|result| result.id().to_string())
            .ok_or_else(|| StudioError::UnknownVersion(id.to_string()))?;
        self.selected(selected)
    }

    pub fn select_position(&mut self, position: usize) -> Result<&GeneratedResult, StudioError> {
        let history = self.history.as_mut().ok_or(StudioError::EmptyHistory)?;
        let selected = history
            .select_position(position)
            .map(|result| result.id().to_string())
            .ok_or_else(|| StudioError::UnknownVersion(format!("#{position}")))?;
        self.selected(selected)
    }

    /// Selects by position, id or id prefix, as typed at the prompt.
    pub fn select_ref(&mut self, target: &VersionRef) -> Result<&GeneratedResult, StudioError> {
        let id = self
            .history
            .as_ref()
            .ok_or(StudioError::EmptyHistory)?
            .resolve(target)
            .map(|result| result.id().to_string())
            .ok_or_else(|| StudioError::UnknownVersion(describe_ref(target)))?;
        self.select(&id)
    }

    fn selected(&mut self, id: String) -> Result<&GeneratedResult, StudioError> {
        self.emit(
            EventKind::VersionSelected,
            json!({"result_id": id, "position": self.position_of(&id)}),
        );
        self.current_or_empty()
    }

    fn commit(&mut self, result: GeneratedResult) -> Result<(), StudioError> {
        match self.history.as_mut() {
            Some(history) => {
                history.append(result)?;
            }
            None => self.history = Some(VersionHistory::start(result)),
        }
        Ok(())
    }

    fn current_or_empty(&self) -> Result<&GeneratedResult, StudioError> {
        self.current().ok_or(StudioError::EmptyHistory)
    }

    fn current_instruction(&self) -> &str {
        self.current().map(GeneratedResult::instruction).unwrap_or("")
    }

    fn version_count(&self) -> usize {
        self.history.as_ref().map(VersionHistory::len).unwrap_or(0)
    }

    fn position_of(&self, id: &str) -> Option<usize> {
        self.history.as_ref().and_then(|history| history.position_of(id))
    }

    fn emit_failure(&self, kind: EventKind, err: &StudioError) {
        self.emit(
            kind,
            json!({"error_kind": err.kind(), "error": err.to_string()}),
        );
    }

    fn emit(&self, kind: EventKind, payload: Value) {
        let Some(events) = &self.events else {
            return;
        };
        if let Err(err) = events.emit(kind, map_object(payload)) {
            warn!(event = kind.as_str(), error = %format!("{err:#}"), "event not recorded");
        }
    }
}

fn describe_ref(target: &VersionRef) -> String {
    match target {
        VersionRef::Position(position) => format!("#{position}"),
        VersionRef::Id(id) => id.clone(),
    }
}

fn map_object(value: Value) -> EventPayload {
    match value {
        Value::Object(map) => map,
        _ => EventPayload::new(),
    }
}
