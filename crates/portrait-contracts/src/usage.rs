use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::store::write_json_atomic;

/// Storage key of the generation counter.
pub const USAGE_COUNT_KEY: &str = "free_usage_count";

/// How many successful generations a counter may reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum QuotaPolicy {
    Limited { ceiling: u64 },
    Unlimited,
}

impl QuotaPolicy {
    /// The single-credit trial flow.
    pub const TRIAL: QuotaPolicy = QuotaPolicy::Limited { ceiling: 1 };

    pub fn allows(self, used: u64) -> bool {
        match self {
            QuotaPolicy::Limited { ceiling } => used < ceiling,
            QuotaPolicy::Unlimited => true,
        }
    }

    pub fn ceiling(self) -> Option<u64> {
        match self {
            QuotaPolicy::Limited { ceiling } => Some(ceiling),
            QuotaPolicy::Unlimited => None,
        }
    }

    pub fn remaining(self, used: u64) -> Option<u64> {
        self.ceiling().map(|ceiling| ceiling.saturating_sub(used))
    }
}

/// Persisted count of successful generations.
///
/// Read once when the counter is opened and written straight after every
/// increment. Other keys in the same file are preserved.
#[derive(Debug, Clone)]
pub struct UsageCounter {
    path: Option<PathBuf>,
    count: u64,
}

impl UsageCounter {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let count = read_json_object(&path)
            .and_then(|payload| payload.get(USAGE_COUNT_KEY).and_then(parse_count))
            .unwrap_or(0);
        Self {
            path: Some(path),
            count,
        }
    }

    /// Counter that lives only as long as this value, for tests and one-off runs.
    pub fn in_memory(count: u64) -> Self {
        Self { path: None, count }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Bumps the in-memory count, then persists it.
    ///
    /// The in-memory count stays bumped even if the write fails.
    pub fn increment(&mut self) -> anyhow::Result<u64> {
        self.count = self.count.saturating_add(1);
        if let Some(path) = &self.path {
            let mut on_disk = read_json_object(path).unwrap_or_default();
            on_disk.insert(USAGE_COUNT_KEY.to_string(), Value::from(self.count));
            write_json_atomic(path, &on_disk)
                .with_context(|| format!("failed persisting usage count to {}", path.display()))?;
        }
        Ok(self.count)
    }
}

fn parse_count(value: &Value) -> Option<u64> {
    match value {
        Value::Number(number) => number.as_u64(),
        Value::String(text) => text.trim().parse::<u64>().ok(),
        _ => None,
    }
}

fn read_json_object(path: &Path) -> Option<Map<String, Value>> {
    let raw = std::fs::read_to_string(path).ok()?;
    let parsed: Value = serde_json::from_str(&raw).ok()?;
    parsed.as_object().cloned()
}
