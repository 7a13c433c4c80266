use anyhow::Context;
use std::io::Write;
use std::path::Path;

/// Writes `bytes` to `path` so readers see either the old file or the new one.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)
        .with_context(|| format!("create directory: {}", parent.display()))?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent)
        .with_context(|| format!("create temp file in {}", parent.display()))?;
    tmp.write_all(bytes).context("write temp file")?;
    tmp.as_file().sync_all().context("sync temp file")?;
    tmp.persist(path)
        .map_err(|e| e.error)
        .with_context(|| format!("replace file: {}", path.display()))?;
    Ok(())
}

/// Removes `path`; a file that is already gone is not an error.
pub fn remove_if_exists(path: &Path) -> anyhow::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(anyhow::Error::new(e)).with_context(|| format!("remove {}", path.display())),
    }
}
