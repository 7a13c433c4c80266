use anyhow::Context;
use chapterchat_core::auth::CredentialStore;
use chapterchat_core::types::Credential;
use std::path::{Path, PathBuf};

/// Keeps the signed-in credential in a JSON file next to the config.
///
/// Written through a temp file, which is created owner-only on unix.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn at_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> anyhow::Result<Option<Credential>> {
        let bytes = match std::fs::read(&self.path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(anyhow::Error::new(e))
                    .with_context(|| format!("read credential: {}", self.path.display()));
            }
        };

        match serde_json::from_slice::<Credential>(&bytes) {
            Ok(c) if !c.bearer_token.trim().is_empty() => Ok(Some(c)),
            Ok(_) => Ok(None),
            Err(e) => {
                // A corrupt file means signed out, not a startup failure.
                log::warn!("ignoring unreadable credential file {}: {e}", self.path.display());
                Ok(None)
            }
        }
    }

    fn save(&self, credential: &Credential) -> anyhow::Result<()> {
        let json = serde_json::to_vec(credential).context("encode credential JSON")?;
        crate::files::write_atomic(&self.path, &json)
    }

    fn clear(&self) -> anyhow::Result<()> {
        crate::files::remove_if_exists(&self.path)
    }
}
