//! Local working area for per-unit and composite WAV files.
//!
//! Files are named `<job_id>_block<index>.wav` and `<job_id>_final.wav` so
//! the sweep can tell which job owns a file from its name alone.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use uuid::Uuid;

/// A file found in the working area.
#[derive(Debug, Clone)]
pub struct WorkspaceEntry {
    pub path: PathBuf,
    /// Owning job, if the name follows the naming scheme.
    pub job_id: Option<String>,
    pub modified: SystemTime,
}

#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn unit_path(&self, job_id: &str, index: usize) -> PathBuf {
        self.root.join(format!("{job_id}_block{index}.wav"))
    }

    pub fn composite_path(&self, job_id: &str) -> PathBuf {
        self.root.join(format!("{job_id}_final.wav"))
    }

    /// Write through a uniquely named temporary file and rename it into place,
    /// so a concurrent reader sees either the old file or the whole new one.
    pub async fn write(&self, path: &Path, bytes: &[u8]) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        let tmp = temp_path(path);
        tokio::fs::write(&tmp, bytes).await?;
        if let Err(e) = tokio::fs::rename(&tmp, path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e);
        }
        Ok(())
    }

    pub async fn read(&self, path: &Path) -> std::io::Result<Vec<u8>> {
        tokio::fs::read(path).await
    }

    /// Remove a file; a file that is already gone is not an error.
    pub async fn remove(&self, path: &Path) -> std::io::Result<()> {
        match tokio::fs::remove_file(path).await {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }

    /// Regular files currently in the working area. A missing root is empty.
    pub async fn entries(&self) -> std::io::Result<Vec<WorkspaceEntry>> {
        let mut dir = match tokio::fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut entries = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            entries.push(WorkspaceEntry {
                path: entry.path(),
                job_id: owner_of(&name),
                modified: metadata.modified()?,
            });
        }
        Ok(entries)
    }
}

/// Sibling of `path` named `<file name>.<uuid>.part`.
pub(crate) fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(format!(".{}.part", Uuid::new_v4().simple()));
    path.with_file_name(name)
}

/// `"<job>_block3.wav"` → `Some("<job>")`, also for the temporary
/// `"<job>_block3.wav.<uuid>.part"`. Job ids are uuids, which never contain
/// an underscore.
fn owner_of(file_name: &str) -> Option<String> {
    let file_name = match file_name.strip_suffix(".part") {
        Some(tmp) => tmp.rsplit_once('.')?.0,
        None => file_name,
    };
    let (job_id, rest) = file_name.split_once('_')?;
    let is_ours = rest == "final.wav"
        || rest
            .strip_prefix("block")
            .and_then(|r| r.strip_suffix(".wav"))
            .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()));
    (is_ours && !job_id.is_empty()).then(|| job_id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn naming_scheme() {
        let ws = Workspace::new("temp");
        assert_eq!(ws.unit_path("abc", 2), PathBuf::from("temp/abc_block2.wav"));
        assert_eq!(ws.composite_path("abc"), PathBuf::from("temp/abc_final.wav"));
    }

    #[test]
    fn owner_parsing() {
        assert_eq!(owner_of("abc_block12.wav").as_deref(), Some("abc"));
        assert_eq!(owner_of("abc_final.wav").as_deref(), Some("abc"));
        assert_eq!(owner_of("abc_blockx.wav"), None);
        assert_eq!(owner_of("notes.txt"), None);
        assert_eq!(owner_of("_final.wav"), None);
        assert_eq!(
            owner_of("abc_block0.wav.0f3e9a1c2b7d4e5f8a9b0c1d2e3f4a5b.part").as_deref(),
            Some("abc")
        );
        assert_eq!(owner_of("notes.part"), None);
    }

    #[test]
    fn temp_files_keep_the_owner_in_their_name() {
        let ws = Workspace::new("temp");
        let tmp = temp_path(&ws.unit_path("abc", 1));
        assert_eq!(tmp.parent(), Some(Path::new("temp")));
        let name = tmp.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("abc_block1.wav.") && name.ends_with(".part"), "{name}");
        assert_eq!(owner_of(name).as_deref(), Some("abc"));
    }

    #[tokio::test]
    async fn write_list_remove() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::new(dir.path().join("work"));
        assert!(ws.entries().await.unwrap().is_empty());

        let path = ws.unit_path("j1", 0);
        ws.write(&path, b"data").await.unwrap();
        assert_eq!(ws.read(&path).await.unwrap(), b"data");

        let entries = ws.entries().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].job_id.as_deref(), Some("j1"));

        ws.remove(&path).await.unwrap();
        ws.remove(&path).await.unwrap();
        assert!(ws.entries().await.unwrap().is_empty());
    }
}
