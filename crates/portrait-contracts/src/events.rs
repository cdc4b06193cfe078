use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

pub type EventPayload = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    SessionStarted,
    GenerationStarted,
    GenerationSucceeded,
    GenerationFailed,
    EditStarted,
    EditSucceeded,
    EditFailed,
    VersionSelected,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::SessionStarted => "session_started",
            EventKind::GenerationStarted => "generation_started",
            EventKind::GenerationSucceeded => "generation_succeeded",
            EventKind::GenerationFailed => "generation_failed",
            EventKind::EditStarted => "edit_started",
            EventKind::EditSucceeded => "edit_succeeded",
            EventKind::EditFailed => "edit_failed",
            EventKind::VersionSelected => "version_selected",
        }
    }
}

/// One line of `events.jsonl`. Envelope keys are written first and win over
/// payload keys of the same name.
#[derive(Serialize)]
struct EventRecord<'a> {
    #[serde(rename = "type")]
    kind: EventKind,
    session_id: &'a str,
    ts: String,
    #[serde(flatten)]
    payload: EventPayload,
}

/// Append-only audit trail for a studio session.
#[derive(Debug, Clone)]
pub struct EventWriter {
    path: Arc<PathBuf>,
    session_id: Arc<str>,
    append: Arc<Mutex<()>>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        let session_id: String = session_id.into();
        Self {
            path: Arc::new(path.into()),
            session_id: Arc::from(session_id),
            append: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Appends one event and returns the object that was written.
    pub fn emit(&self, kind: EventKind, mut payload: EventPayload) -> anyhow::Result<Value> {
        for reserved in ["type", "session_id", "ts"] {
            payload.remove(reserved);
        }
        let record = EventRecord {
            kind,
            session_id: &self.session_id,
            ts: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false),
            payload,
        };
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');

        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        let _held = self
            .append
            .lock()
            .map_err(|_| anyhow::anyhow!("event log lock poisoned"))?;
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path.as_path())
            .and_then(|mut file| file.write_all(&line))
            .with_context(|| format!("failed to append to {}", self.path.display()))?;

        Ok(serde_json::to_value(&record)?)
    }
}
