use std::path::{Path, PathBuf};

use crate::error::AppError;

use super::types::ConfigFile;

/// Loads a `loadcore.toml`/`loadcore.json` config file from `path` if given,
/// else from the current directory if one of the default names exists.
/// Returns `Ok(None)` if no config file is in play — the daemon runs on
/// bootstrap defaults plus CLI flags.
///
/// # Errors
///
/// Returns an error if the named path (or a discovered default file)
/// cannot be read or fails to parse.
pub fn load_config(path: Option<&str>) -> Result<Option<ConfigFile>, AppError> {
    if let Some(path) = path {
        return Ok(Some(load_config_file(&PathBuf::from(path))?));
    }

    let toml_path = PathBuf::from("loadcore.toml");
    if toml_path.exists() {
        return Ok(Some(load_config_file(&toml_path)?));
    }

    let json_path = PathBuf::from("loadcore.json");
    if json_path.exists() {
        return Ok(Some(load_config_file(&json_path)?));
    }

    Ok(None)
}

fn load_config_file(path: &Path) -> Result<ConfigFile, AppError> {
    let content = std::fs::read_to_string(path)?;
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("toml") => Ok(toml::from_str(&content)?),
        Some("json" | "") | None => Ok(serde_json::from_str(&content)?),
        Some(_) => Ok(serde_json::from_str(&content)?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_toml_config() -> Result<(), String> {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .map_err(|e| e.to_string())?;
        writeln!(file, "port = 4123\nmax_in_flight = 64").map_err(|e| e.to_string())?;
        let path = file.path().to_str().ok_or("non-utf8 path")?.to_owned();

        let config = load_config(Some(&path)).map_err(|e| e.to_string())?.ok_or("expected a config")?;
        assert_eq!(config.port, Some(4123));
        assert_eq!(config.runtime.max_in_flight, Some(64));
        Ok(())
    }

    #[test]
    fn missing_default_files_yields_none() -> Result<(), String> {
        let dir = tempfile::tempdir().map_err(|e| e.to_string())?;
        let original = std::env::current_dir().map_err(|e| e.to_string())?;
        std::env::set_current_dir(dir.path()).map_err(|e| e.to_string())?;
        let result = load_config(None);
        std::env::set_current_dir(original).map_err(|e| e.to_string())?;
        assert!(matches!(result, Ok(None)));
        Ok(())
    }
}
