use std::io::Write;
use std::path::Path;

use anyhow::Context;
use serde::Serialize;
use tempfile::NamedTempFile;

/// Writes pretty JSON through a sibling temp file and renames it into place,
/// so readers see either the old document or the new one.
pub(crate) fn write_json_atomic<T>(path: &Path, payload: &T) -> anyhow::Result<()>
where
    T: Serialize + ?Sized,
{
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;

    let body = serde_json::to_vec_pretty(payload)?;
    let mut staged = NamedTempFile::new_in(dir)
        .with_context(|| format!("failed to stage a write in {}", dir.display()))?;
    staged.write_all(&body)?;
    staged.as_file().sync_all()?;
    staged
        .persist(path)
        .with_context(|| format!("failed writing {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::write_json_atomic;

    #[test]
    fn replaces_whole_document_and_leaves_no_staging_files() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("nested").join("state.json");
        write_json_atomic(&path, &json!({"count": 1, "note": "a much longer first document"}))?;
        write_json_atomic(&path, &json!({"count": 2}))?;

        let raw: Value = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
        assert_eq!(raw, json!({"count": 2}));
        let entries = std::fs::read_dir(path.parent().unwrap_or(temp.path()))?.count();
        assert_eq!(entries, 1);
        Ok(())
    }

    #[test]
    fn failed_write_keeps_previous_document() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("state.json");
        write_json_atomic(&path, &json!({"count": 3}))?;

        let blocked = temp.path().join("state.json").join("child.json");
        assert!(write_json_atomic(&blocked, &json!({"count": 4})).is_err());

        let raw: Value = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
        assert_eq!(raw, json!({"count": 3}));
        Ok(())
    }
}
