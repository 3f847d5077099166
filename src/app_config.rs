//! JSON config file: run defaults plus the persisted subscription state.

use std::env;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use chapterdl_core::{
    CleanOptions, FetchOptions, OutputFormat, PipelineOptions, SubscriptionStore,
};

use crate::cli::{Cli, CliValueSources};

const CONFIG_DIR_NAME: &str = "chapterdl";
const CONFIG_FILE_NAME: &str = "config.json";
const MAX_TIMEOUT_MS: u64 = 600_000;

/// Errors raised while reading, validating or writing the config file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}'")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}'")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to write config file '{path}'")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config value for `{field}`: {value}. Expected range: {expected}")]
    Invalid {
        field: &'static str,
        value: u64,
        expected: &'static str,
    },
}

/// Settings stored in `config.json`. Every field is optional; missing
/// values fall back to the built-in defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_directory: Option<PathBuf>,
    /// Extra library roots scanned for the latest local chapter.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub read_directories: Vec<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_format: Option<OutputFormat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_concurrency: Option<u8>,
    /// Whole-archive request timeout in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_to_individual_pages: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fail_fast: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clean_credits: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clean_duplicates: Option<bool>,
    /// Image whose content marks a credits page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credits_sample: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rename_pages: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub only_node_dirs: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog_base_url: Option<String>,
    /// `subscriptions` and `cacheData`.
    #[serde(flatten)]
    pub state: SubscriptionStore,
}

impl FileConfig {
    /// Validates config values against runtime and CLI constraints.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first out-of-range field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_pool("concurrency", self.concurrency)?;
        validate_pool("pageConcurrency", self.page_concurrency)?;
        if let Some(timeout_ms) = self.timeout_ms
            && !(1..=MAX_TIMEOUT_MS).contains(&timeout_ms)
        {
            return Err(ConfigError::Invalid {
                field: "timeoutMs",
                value: timeout_ms,
                expected: "1..=600000",
            });
        }
        Ok(())
    }

    /// Folds values given on the command line into the file settings.
    pub fn apply_cli(&mut self, cli: &Cli, sources: CliValueSources) {
        if sources.output_dir
            && let Some(output_dir) = &cli.output_dir
        {
            self.output_directory = Some(output_dir.clone());
        }
        if sources.concurrency {
            self.concurrency = Some(cli.concurrency);
        }
    }

    /// Library root, `.` when unset.
    #[must_use]
    pub fn output_dir(&self) -> PathBuf {
        self.output_directory
            .clone()
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Output root followed by the extra read directories.
    #[must_use]
    pub fn library_folders(&self) -> Vec<PathBuf> {
        let mut folders = vec![self.output_dir()];
        folders.extend(self.read_directories.iter().cloned());
        folders
    }

    #[must_use]
    pub fn fetch_options(&self) -> FetchOptions {
        let defaults = FetchOptions::default();
        FetchOptions {
            concurrency: self
                .concurrency
                .map_or(defaults.concurrency, usize::from),
            page_concurrency: self
                .page_concurrency
                .map_or(defaults.page_concurrency, usize::from),
            output_format: self.output_format.unwrap_or(defaults.output_format),
            fallback_to_pages: self
                .fallback_to_individual_pages
                .unwrap_or(defaults.fallback_to_pages),
            fail_fast: self.fail_fast.unwrap_or(defaults.fail_fast),
            archive_timeout: self
                .timeout_ms
                .map_or(defaults.archive_timeout, Duration::from_millis),
            catalog_base_url: self
                .catalog_base_url
                .clone()
                .unwrap_or(defaults.catalog_base_url),
        }
    }

    #[must_use]
    pub fn clean_options(&self) -> CleanOptions {
        CleanOptions {
            remove_credits: self.clean_credits.unwrap_or(true),
            remove_duplicates: self.clean_duplicates.unwrap_or(true),
            ..CleanOptions::default()
        }
    }

    #[must_use]
    pub fn pipeline_options(&self) -> PipelineOptions {
        let defaults = PipelineOptions::default();
        PipelineOptions {
            clean: self.clean_credits.unwrap_or(defaults.clean)
                || self.clean_duplicates.unwrap_or(defaults.clean),
            rename_pages: self.rename_pages.unwrap_or(defaults.rename_pages),
        }
    }

    /// Writes the config as pretty JSON, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Write`] if the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let write_error = |source: std::io::Error| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(write_error)?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| write_error(std::io::Error::other(e)))?;
        fs::write(path, json + "\n").map_err(write_error)
    }
}

fn validate_pool(field: &'static str, value: Option<u8>) -> Result<(), ConfigError> {
    let Some(value) = value else {
        return Ok(());
    };
    if !(1..=100).contains(&value) {
        return Err(ConfigError::Invalid {
            field,
            value: u64::from(value),
            expected: "1..=100",
        });
    }
    Ok(())
}

/// Loads and validates the config at `path`. A missing file yields the defaults.
///
/// # Errors
///
/// Returns [`ConfigError`] when the file is unreadable, malformed or holds
/// out-of-range values.
pub fn load_config(path: &Path) -> Result<FileConfig, ConfigError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(FileConfig::default()),
        Err(source) => {
            return Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    let config: FileConfig = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    config.validate()?;
    Ok(config)
}

/// Resolves default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/chapterdl/config.json`
/// 2. `$HOME/.config/chapterdl/config.json`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    config_path_from(env_var_non_empty_os("XDG_CONFIG_HOME"), env_var_non_empty_os("HOME"))
}

fn config_path_from(xdg_config_home: Option<OsString>, home: Option<OsString>) -> Option<PathBuf> {
    let base = match xdg_config_home {
        Some(xdg) => PathBuf::from(xdg),
        None => PathBuf::from(home?).join(".config"),
    };
    Some(base.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}

fn env_var_non_empty_os(name: &str) -> Option<OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chapterdl_core::ChapterNumber;
    use clap::Parser;
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_config_path_prefers_xdg() {
        let path = config_path_from(Some("/xdg".into()), Some("/home/u".into())).unwrap();
        assert_eq!(path, PathBuf::from("/xdg/chapterdl/config.json"));

        let path = config_path_from(None, Some("/home/u".into())).unwrap();
        assert_eq!(path, PathBuf::from("/home/u/.config/chapterdl/config.json"));

        assert!(config_path_from(None, None).is_none());
    }

    #[test]
    fn test_load_config_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = load_config(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config, FileConfig::default());
        assert_eq!(config.output_dir(), PathBuf::from("."));
    }

    #[test]
    fn test_load_config_reads_camel_case_fields() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{
                "outputDirectory": "/library",
                "readDirectories": ["/old"],
                "outputFormat": "zip",
                "pageConcurrency": 3,
                "timeoutMs": 1500,
                "fallbackToIndividualPages": false,
                "subscriptions": [{"name": "Naruto", "url": "N/naruto_x"}],
                "cacheData": {"Naruto": 699}
            }"#,
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        let options = config.fetch_options();
        assert_eq!(options.output_format, OutputFormat::Zip);
        assert_eq!(options.page_concurrency, 3);
        assert_eq!(options.concurrency, 5);
        assert_eq!(options.archive_timeout, Duration::from_millis(1500));
        assert!(!options.fallback_to_pages);
        assert_eq!(
            config.library_folders(),
            vec![PathBuf::from("/library"), PathBuf::from("/old")]
        );
        assert!(config.state.is_subscribed("Naruto"));
        assert_eq!(
            config.state.cache_data.get("Naruto"),
            Some(&ChapterNumber::whole(699))
        );
    }

    #[test]
    fn test_load_config_rejects_out_of_range_concurrency() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"concurrency": 0}"#).unwrap();

        let err = load_config(&path).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "concurrency",
                ..
            }
        ));
        assert!(err.to_string().contains("1..=100"));
    }

    #[test]
    fn test_load_config_malformed_json_is_parse_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(load_config(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_save_then_load_keeps_subscriptions() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let mut config = FileConfig {
            concurrency: Some(8),
            ..FileConfig::default()
        };
        config
            .state
            .subscribe(&["Bleach".to_string()], Some("B/bleach"))
            .unwrap();

        config.save(&path).unwrap();
        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"concurrency\": 8"));
        assert!(!raw.contains("outputDirectory"));
        assert_eq!(load_config(&path).unwrap(), config);
    }

    #[test]
    fn test_apply_cli_only_overrides_commandline_values() {
        let cli = Cli::try_parse_from(["chapterdl", "-O", "/cli", "update"]).unwrap();
        let mut config = FileConfig {
            concurrency: Some(9),
            ..FileConfig::default()
        };

        config.apply_cli(
            &cli,
            CliValueSources {
                output_dir: true,
                concurrency: false,
            },
        );
        assert_eq!(config.output_dir(), PathBuf::from("/cli"));
        assert_eq!(config.concurrency, Some(9));
    }

    #[test]
    fn test_pipeline_options_disable_clean_only_when_both_off() {
        let config = FileConfig {
            clean_credits: Some(false),
            ..FileConfig::default()
        };
        assert!(config.pipeline_options().clean);
        assert!(!config.clean_options().remove_credits);

        let config = FileConfig {
            clean_credits: Some(false),
            clean_duplicates: Some(false),
            rename_pages: Some(false),
            ..FileConfig::default()
        };
        let options = config.pipeline_options();
        assert!(!options.clean);
        assert!(!options.rename_pages);
    }
}
