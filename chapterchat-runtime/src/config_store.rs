use anyhow::Context;
use chapterchat_core::config::{BASE_URL_ENV, ClientConfig};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn at_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the stored config. A missing file yields the defaults.
    pub fn load(&self) -> anyhow::Result<ClientConfig> {
        let bytes = match std::fs::read(&self.path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("no config at {}; using defaults", self.path.display());
                return Ok(ClientConfig::default());
            }
            Err(e) => {
                return Err(anyhow::Error::new(e))
                    .with_context(|| format!("read config: {}", self.path.display()));
            }
        };
        let cfg: ClientConfig = serde_json::from_slice(&bytes).context("decode config JSON")?;
        cfg.validate().context("invalid config")?;
        Ok(cfg)
    }

    /// `load`, then apply `CHAPTERCHAT_BASE_URL` if it is set.
    pub fn load_with_env(&self) -> anyhow::Result<ClientConfig> {
        let cfg = self.load()?;
        let cfg = apply_env_override(cfg, std::env::var(BASE_URL_ENV).ok());
        cfg.validate().context("invalid config")?;
        Ok(cfg)
    }

    pub fn save(&self, cfg: &ClientConfig) -> anyhow::Result<()> {
        cfg.validate().context("refusing to save invalid config")?;
        let json = serde_json::to_vec_pretty(cfg).context("encode config JSON")?;
        crate::files::write_atomic(&self.path, &json)
    }
}

fn apply_env_override(cfg: ClientConfig, base_url: Option<String>) -> ClientConfig {
    match base_url.as_deref().map(str::trim) {
        Some(url) if !url.is_empty() => {
            log::info!("base URL overridden by {BASE_URL_ENV}");
            cfg.with_base_url(url)
        }
        _ => cfg,
    }
}
