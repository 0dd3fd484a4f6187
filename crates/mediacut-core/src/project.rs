// crates/mediacut-core/src/project.rs
//
// Thin persistence layer: a named project directory holding one `<name>.mep`
// JSON file with a versioned header and an opaque content tree. The engine
// never interprets `proj_content` - tracks serialize themselves into it.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde_json::{json, Value};

use crate::error::{EngineError, EngineResult};

pub const VER_MAJOR: u8 = 1;
pub const VER_MINOR: u8 = 0;

/// Project file extension.
const PROJ_EXT: &str = "mep";

#[derive(Default)]
struct ProjectInner {
    opened:    bool,
    name:      String,
    dir:       PathBuf,
    file_path: PathBuf,
    version:   u32,
    content:   Value,
}

/// All operations serialize through one lock; using any operation on a
/// not-opened project returns `NotOpened`.
#[derive(Default)]
pub struct Project {
    inner: Mutex<ProjectInner>,
}

impl Project {
    pub fn new() -> Self {
        Self::default()
    }

    /// Where projects land when the caller does not pick a directory.
    pub fn default_project_base_dir() -> PathBuf {
        std::env::var_os("HOME")
            .map(|home| PathBuf::from(home).join("Videos").join("MediacutProject"))
            .unwrap_or_else(|| std::env::temp_dir().join("MediacutProject"))
    }

    /// Create a project directory under `base_dir` and claim `<name>.mep`.
    ///
    /// A currently-open project is saved first (same as the editor's
    /// switch-project flow); an existing directory fails with
    /// `AlreadyExists` so a project can never silently clobber another.
    pub fn create_new(&self, name: &str, base_dir: &Path) -> EngineResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.opened {
            Self::save_locked(&inner)?;
        }
        let proj_dir = base_dir.join(name);
        if proj_dir.exists() {
            return Err(EngineError::already_exists(format!(
                "project directory '{}'",
                proj_dir.display()
            )));
        }
        std::fs::create_dir_all(&proj_dir)?;
        inner.name = name.to_string();
        inner.file_path = proj_dir.join(format!("{name}.{PROJ_EXT}"));
        inner.dir = proj_dir;
        inner.version = ((VER_MAJOR as u32) << 24) | ((VER_MINOR as u32) << 16);
        inner.content = json!({});
        inner.opened = true;
        log::info!("created project '{name}' at '{}'", inner.dir.display());
        Ok(())
    }

    /// Load a project file. Files without a `mec_proj_version` header are
    /// legacy projects whose root *is* the content tree.
    pub fn load(&self, proj_file_path: &Path) -> EngineResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.opened {
            Self::save_locked(&inner)?;
        }
        if !proj_file_path.is_file() {
            return Err(EngineError::FileInvalid(format!(
                "'{}' is not a file",
                proj_file_path.display()
            )));
        }
        let text = std::fs::read_to_string(proj_file_path)?;
        let root: Value = serde_json::from_str(&text)
            .map_err(|e| EngineError::ParseFailed(format!("'{}': {e}", proj_file_path.display())))?;

        if let Some(version) = root.get("mec_proj_version").and_then(Value::as_u64) {
            inner.version = version as u32;
            inner.name = root
                .get("proj_name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            inner.content = root.get("proj_content").cloned().unwrap_or(Value::Null);
            inner.dir = proj_file_path.parent().map(Path::to_path_buf).unwrap_or_default();
        } else {
            // Legacy file: no header, the whole document is the content.
            inner.version = 0;
            inner.content = root;
            inner.name = proj_file_path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            inner.dir = proj_file_path.parent().map(Path::to_path_buf).unwrap_or_default();
        }
        inner.file_path = proj_file_path.to_path_buf();
        inner.opened = true;
        log::info!("loaded project '{}' from '{}'", inner.name, proj_file_path.display());
        Ok(())
    }

    pub fn save(&self) -> EngineResult<()> {
        let inner = self.inner.lock().unwrap();
        Self::save_locked(&inner)
    }

    fn save_locked(inner: &ProjectInner) -> EngineResult<()> {
        if !inner.opened {
            return Err(EngineError::NotOpened);
        }
        if !inner.content.is_object() {
            return Err(EngineError::TimelineInvalid(
                "project content is not a JSON object".into(),
            ));
        }
        let root = json!({
            "mec_proj_version": inner.version,
            "proj_name": inner.name,
            "proj_content": inner.content,
        });
        let text = serde_json::to_string_pretty(&root)
            .map_err(|e| EngineError::ParseFailed(e.to_string()))?;
        std::fs::write(&inner.file_path, text)?;
        Ok(())
    }

    /// Close the project, optionally saving first. Closing a closed project
    /// is a no-op.
    pub fn close(&self, save_before_close: bool) -> EngineResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.opened {
            return Ok(());
        }
        if save_before_close {
            Self::save_locked(&inner)?;
        }
        *inner = ProjectInner::default();
        Ok(())
    }

    pub fn is_opened(&self) -> bool {
        self.inner.lock().unwrap().opened
    }

    pub fn name(&self) -> EngineResult<String> {
        let inner = self.inner.lock().unwrap();
        if !inner.opened {
            return Err(EngineError::NotOpened);
        }
        Ok(inner.name.clone())
    }

    pub fn version(&self) -> EngineResult<(u8, u8)> {
        let inner = self.inner.lock().unwrap();
        if !inner.opened {
            return Err(EngineError::NotOpened);
        }
        Ok(((inner.version >> 24) as u8, (inner.version >> 16) as u8))
    }

    pub fn file_path(&self) -> EngineResult<PathBuf> {
        let inner = self.inner.lock().unwrap();
        if !inner.opened {
            return Err(EngineError::NotOpened);
        }
        Ok(inner.file_path.clone())
    }

    pub fn content(&self) -> EngineResult<Value> {
        let inner = self.inner.lock().unwrap();
        if !inner.opened {
            return Err(EngineError::NotOpened);
        }
        Ok(inner.content.clone())
    }

    pub fn set_content(&self, content: Value) -> EngineResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.opened {
            return Err(EngineError::NotOpened);
        }
        inner.content = content;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn scratch_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("mediacut-test-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn create_save_load_round_trip() {
        let base = scratch_dir();
        let proj = Project::new();
        proj.create_new("demo", &base).unwrap();
        proj.set_content(json!({ "tracks": [ { "id": 1 } ] })).unwrap();
        proj.save().unwrap();
        let path = proj.file_path().unwrap();
        proj.close(false).unwrap();
        assert!(!proj.is_opened());

        let again = Project::new();
        again.load(&path).unwrap();
        assert_eq!(again.name().unwrap(), "demo");
        assert_eq!(again.version().unwrap(), (VER_MAJOR, VER_MINOR));
        assert_eq!(again.content().unwrap()["tracks"][0]["id"], json!(1));
        std::fs::remove_dir_all(base).ok();
    }

    #[test]
    fn create_over_existing_directory_fails() {
        let base = scratch_dir();
        let proj = Project::new();
        proj.create_new("demo", &base).unwrap();
        proj.save().unwrap();
        proj.close(false).unwrap();

        let other = Project::new();
        assert!(matches!(
            other.create_new("demo", &base),
            Err(EngineError::AlreadyExists(_))
        ));
        std::fs::remove_dir_all(base).ok();
    }

    #[test]
    fn operations_on_closed_project_return_not_opened() {
        let proj = Project::new();
        assert!(matches!(proj.save(), Err(EngineError::NotOpened)));
        assert!(matches!(proj.content(), Err(EngineError::NotOpened)));
        assert!(matches!(proj.name(), Err(EngineError::NotOpened)));
        proj.close(false).unwrap(); // closing a closed project is fine
    }

    #[test]
    fn legacy_file_without_header_loads_root_as_content() {
        let base = scratch_dir();
        let path = base.join("old_project.mep");
        std::fs::write(&path, r#"{ "tracks": [] }"#).unwrap();
        let proj = Project::new();
        proj.load(&path).unwrap();
        assert_eq!(proj.name().unwrap(), "old_project");
        assert_eq!(proj.version().unwrap(), (0, 0));
        assert!(proj.content().unwrap().get("tracks").is_some());
        std::fs::remove_dir_all(base).ok();
    }

    #[test]
    fn non_object_content_fails_save_as_timeline_invalid() {
        let base = scratch_dir();
        let proj = Project::new();
        proj.create_new("bad", &base).unwrap();
        proj.set_content(json!(42)).unwrap();
        assert!(matches!(proj.save(), Err(EngineError::TimelineInvalid(_))));
        std::fs::remove_dir_all(base).ok();
    }
}
