//! Code for loading program settings.
use crate::input::read_toml;
use anyhow::Result;
use serde::Deserialize;
use std::path::Path;

const SETTINGS_FILE_NAME: &str = "settings.toml";

/// Program settings from the optional `settings.toml` in the model directory
#[derive(Debug, Default, Deserialize, PartialEq)]
pub struct Settings {
    /// The program log level. The `GRIDMARKET_LOG_LEVEL` environment variable takes precedence.
    pub log_level: Option<String>,
    /// Whether to overwrite output files by default
    #[serde(default)]
    pub overwrite: bool,
    /// Whether to extract balance duals (prices) and write them out
    #[serde(default)]
    pub debug_model: bool,
}

impl Settings {
    /// Read the settings file from the model directory.
    ///
    /// If the file is not present, default values for settings will be used
    ///
    /// # Returns
    ///
    /// The program settings as a `Settings` struct or an error if the file is invalid
    pub fn from_path<P: AsRef<Path>>(model_dir: P) -> Result<Settings> {
        Self::load_from_file(&model_dir.as_ref().join(SETTINGS_FILE_NAME))
    }

    fn load_from_file(file_path: &Path) -> Result<Settings> {
        if !file_path.is_file() {
            return Ok(Settings::default());
        }

        read_toml(file_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_settings_from_path_no_file() {
        let dir = tempdir().unwrap();
        assert_eq!(Settings::from_path(dir.path()).unwrap(), Settings::default());
    }

    #[test]
    fn test_settings_from_path() {
        let dir = tempdir().unwrap();
        {
            let mut file = File::create(dir.path().join(SETTINGS_FILE_NAME)).unwrap();
            writeln!(file, "log_level = \"warn\"\noverwrite = true").unwrap();
        }

        assert_eq!(
            Settings::from_path(dir.path()).unwrap(),
            Settings {
                log_level: Some("warn".to_string()),
                overwrite: true,
                debug_model: false,
            }
        );
    }

    #[test]
    fn test_settings_invalid_field() {
        let dir = tempdir().unwrap();
        {
            let mut file = File::create(dir.path().join(SETTINGS_FILE_NAME)).unwrap();
            writeln!(file, "overwrite = \"sometimes\"").unwrap();
        }

        assert!(Settings::from_path(dir.path()).is_err());
    }
}
