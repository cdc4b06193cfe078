mod project;

use std::fmt;

use anyhow::bail;
use chrono::{SecondsFormat, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use similar::TextDiff;
use uuid::Uuid;

use crate::results::GeneratedResult;
use crate::studio::VersionRef;

pub use project::StudioProject;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionEntry {
    pub result: GeneratedResult,
    pub parent_id: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateVersion(pub String);

impl fmt::Display for DuplicateVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "version '{}' already exists in this session", self.0)
    }
}

impl std::error::Error for DuplicateVersion {}

/// Ordered results of one editing session plus the "current" pointer.
///
/// Storage order is append order and never changes. Selecting an older version
/// only moves the pointer, so the next edit branches from it while its result
/// still lands at the end of the sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "HistorySnapshot", into = "HistorySnapshot")]
pub struct VersionHistory {
    session_id: String,
    entries: IndexMap<String, VersionEntry>,
    current: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct HistorySnapshot {
    session_id: String,
    current: String,
    versions: Vec<VersionEntry>,
}

impl VersionHistory {
    pub fn start(original: GeneratedResult) -> Self {
        let mut entries = IndexMap::new();
        let current = original.id().to_string();
        entries.insert(current.clone(), entry_for(original));
        Self {
            session_id: Uuid::new_v4().to_string(),
            entries,
            current,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn append(
        &mut self,
        result: GeneratedResult,
    ) -> Result<&GeneratedResult, DuplicateVersion> {
        let id = result.id().to_string();
        if self.entries.contains_key(&id) {
            return Err(DuplicateVersion(id));
        }
        self.entries.insert(id.clone(), entry_for(result));
        self.current = id;
        Ok(self.current_result())
    }

    pub fn select_current(&mut self, id: &str) -> Option<&GeneratedResult> {
        if !self.entries.contains_key(id) {
            return None;
        }
        self.current = id.to_string();
        Some(self.current_result())
    }

    /// Same as [`select_current`](Self::select_current) but by 1-based position.
    pub fn select_position(&mut self, position: usize) -> Option<&GeneratedResult> {
        let id = self
            .entries
            .get_index(position.checked_sub(1)?)
            .map(|(id, _)| id.clone())?;
        self.select_current(&id)
    }

    pub fn current_result(&self) -> &GeneratedResult {
        // `current` always names an entry; see `start`, `append`, `select_current`
        // and the snapshot validation.
        &self.entries[self.current.as_str()].result
    }

    pub fn current_id(&self) -> &str {
        &self.current
    }

    pub fn all_results(&self) -> Vec<&GeneratedResult> {
        self.entries.values().map(|entry| &entry.result).collect()
    }

    pub fn entries(&self) -> impl Iterator<Item = &VersionEntry> {
        self.entries.values()
    }

    pub fn get(&self, id: &str) -> Option<&GeneratedResult> {
        self.entries.get(id).map(|entry| &entry.result)
    }

    pub fn entry(&self, id: &str) -> Option<&VersionEntry> {
        self.entries.get(id)
    }

    /// 1-based append position, for "version N of M" displays.
    pub fn position_of(&self, id: &str) -> Option<usize> {
        self.entries.get_index_of(id).map(|index| index + 1)
    }

    /// Looks a version up by position, full id, or an unambiguous id prefix.
    ///
    /// A position past the end is retried as an id prefix, so an all-digit
    /// short id still resolves.
    pub fn resolve(&self, target: &VersionRef) -> Option<&GeneratedResult> {
        match target {
            VersionRef::Position(position) => position
                .checked_sub(1)
                .and_then(|index| self.entries.get_index(index))
                .map(|(_, entry)| &entry.result)
                .or_else(|| self.resolve_id(&position.to_string())),
            VersionRef::Id(id) => self.resolve_id(id),
        }
    }

    fn resolve_id(&self, id: &str) -> Option<&GeneratedResult> {
        if let Some(result) = self.get(id) {
            return Some(result);
        }
        if id.is_empty() {
            return None;
        }
        let mut matches = self
            .entries
            .iter()
            .filter(|(key, _)| key.starts_with(id));
        match (matches.next(), matches.next()) {
            (Some((_, entry)), None) => Some(&entry.result),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Ancestor chain of `id`, starting with `id` itself and ending at its root.
    pub fn lineage(&self, id: &str) -> Vec<&str> {
        let mut chain = Vec::new();
        let mut cursor = self.entries.get_key_value(id);
        while let Some((key, entry)) = cursor {
            if chain.contains(&key.as_str()) {
                break;
            }
            chain.push(key.as_str());
            cursor = entry
                .parent_id
                .as_deref()
                .and_then(|parent| self.entries.get_key_value(parent));
        }
        chain
    }

    pub fn prompt_diff(&self, from_id: &str, to_id: &str) -> Option<Vec<String>> {
        let from = self.get(from_id)?;
        let to = self.get(to_id)?;
        let diff = TextDiff::from_lines(from.instruction(), to.instruction());
        let rendered = diff
            .unified_diff()
            .header(&short_label(from_id), &short_label(to_id))
            .to_string();
        Some(rendered.lines().map(str::to_string).collect())
    }
}

impl TryFrom<HistorySnapshot> for VersionHistory {
    type Error = anyhow::Error;

    fn try_from(snapshot: HistorySnapshot) -> anyhow::Result<Self> {
        if snapshot.versions.is_empty() {
            bail!("version history is empty");
        }
        let mut entries = IndexMap::new();
        for entry in snapshot.versions {
            let id = entry.result.id().to_string();
            if entries.insert(id.clone(), entry).is_some() {
                bail!("duplicate version id '{id}' in history");
            }
        }
        if !entries.contains_key(&snapshot.current) {
            bail!(
                "current version '{}' is not part of the history",
                snapshot.current
            );
        }
        Ok(Self {
            session_id: snapshot.session_id,
            entries,
            current: snapshot.current,
        })
    }
}

impl From<VersionHistory> for HistorySnapshot {
    fn from(history: VersionHistory) -> Self {
        Self {
            session_id: history.session_id,
            current: history.current,
            versions: history.entries.into_values().collect(),
        }
    }
}

fn entry_for(result: GeneratedResult) -> VersionEntry {
    VersionEntry {
        parent_id: result.derived_from().map(str::to_string),
        result,
        created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false),
    }
}

fn short_label(id: &str) -> String {
    id.chars().take(8).collect()
}
