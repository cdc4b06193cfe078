use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::VersionHistory;
use crate::store::write_json_atomic;
use crate::features::FeatureSet;
use crate::media::ImagePayload;

const PROJECT_SCHEMA_VERSION: u64 = 1;

/// A saved studio project: the source photo, the chosen features and every
/// version produced so far.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudioProject {
    #[serde(skip)]
    pub path: PathBuf,
    pub schema_version: u64,
    pub project_id: String,
    pub name: String,
    pub created_at: String,
    pub source_image: ImagePayload,
    pub features: FeatureSet,
    #[serde(default)]
    pub history: Option<VersionHistory>,
}

impl StudioProject {
    pub fn new(
        path: impl Into<PathBuf>,
        name: impl Into<String>,
        source_image: ImagePayload,
        features: FeatureSet,
    ) -> Self {
        Self {
            path: path.into(),
            schema_version: PROJECT_SCHEMA_VERSION,
            project_id: Uuid::new_v4().to_string(),
            name: name.into(),
            created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false),
            source_image,
            features,
            history: None,
        }
    }

    pub fn load(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("failed reading {}", path.display()))?;
        let mut project: StudioProject = serde_json::from_str(&raw)
            .with_context(|| format!("invalid project manifest {}", path.display()))?;
        if project.schema_version > PROJECT_SCHEMA_VERSION {
            bail!(
                "project manifest {} uses schema {} (supported: {})",
                path.display(),
                project.schema_version,
                PROJECT_SCHEMA_VERSION
            );
        }
        project.path = path;
        Ok(project)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        write_json_atomic(&self.path, self)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::StudioProject;
    use crate::features::FeatureSet;
    use crate::history::VersionHistory;
    use crate::media::ImagePayload;
    use crate::results::GeneratedResult;

    #[test]
    fn project_roundtrips_history_and_pointer() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        let path = tmp.path().join("nested").join("project.json");
        let mut project = StudioProject::new(
            &path,
            "Headshot",
            ImagePayload::from_bytes("image/jpeg", b"source"),
            FeatureSet::default(),
        );

        let original =
            GeneratedResult::generation(ImagePayload::new("image/png", "AAAA"), "prompt");
        let edit = GeneratedResult::edit(
            original.id(),
            ImagePayload::new("image/png", "BBBB"),
            "edit",
        );
        let mut history = VersionHistory::start(original.clone());
        history.append(edit.clone()).unwrap();
        history.select_current(original.id());
        project.history = Some(history);
        project.save()?;

        let loaded = StudioProject::load(&path)?;
        assert_eq!(loaded.path(), path.as_path());
        assert_eq!(loaded.name, "Headshot");
        assert_eq!(loaded.features, FeatureSet::default());
        let history = loaded.history.expect("history persisted");
        assert_eq!(history.len(), 2);
        assert_eq!(history.current_id(), original.id());
        assert_eq!(
            history.entry(edit.id()).and_then(|e| e.parent_id.as_deref()),
            Some(original.id())
        );
        Ok(())
    }

    #[test]
    fn newer_schema_is_rejected() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        let path = tmp.path().join("project.json");
        let mut project = StudioProject::new(
            &path,
            "Headshot",
            ImagePayload::new("image/png", "AAAA"),
            FeatureSet::default(),
        );
        project.schema_version = 99;
        project.save()?;
        let err = StudioProject::load(&path).unwrap_err();
        assert!(err.to_string().contains("schema 99"));
        Ok(())
    }

    #[test]
    fn missing_manifest_reports_path() {
        let err = StudioProject::load("/definitely/not/here/project.json").unwrap_err();
        assert!(format!("{err:#}").contains("/definitely/not/here/project.json"));
    }
}
