use crate::core::config::AppConfig;
use anyhow::{Context, Result, ensure};
use std::path::{Path, PathBuf};
use tracing::info;

const EXAMPLE_CONFIG: &str = include_str!("../../docs/example_config.yaml");

/// Writes the commented example configuration, to `config_path` when given or the
/// platform config directory otherwise. Returns the written path.
pub fn setup(config_path: Option<&str>) -> Result<PathBuf> {
    let path = match config_path {
        Some(p) => PathBuf::from(p),
        None => AppConfig::default_config_path()?,
    };
    write_example(&path)?;
    println!("Wrote example configuration to {}", path.display());
    Ok(path)
}

fn write_example(path: &Path) -> Result<()> {
    ensure!(
        !path.exists(),
        "Refusing to overwrite existing configuration at {}",
        path.display()
    );
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Cannot create config directory {}", dir.display()))?;
    }
    std::fs::write(path, EXAMPLE_CONFIG)
        .with_context(|| format!("Cannot write configuration to {}", path.display()))?;
    info!(path = %path.display(), "Example configuration written");
    Ok(())
}
