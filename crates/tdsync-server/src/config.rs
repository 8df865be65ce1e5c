//! Server configuration.
//!
//! Settings come from three places, in rising precedence: a `config.json`
//! file, `--name=value` command-line flags, and (for credentials only, as
//! a fallback) the `TD_USERNAME` / `TD_PASSWORD` environment variables.

use clap::Parser;
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use thiserror::Error;

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 7000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("storage path is required (--path or config.json)")]
    MissingPath,

    #[error("storage path {0} is not a directory")]
    NotADirectory(PathBuf),

    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Command-line flags. Flags that are absent defer to the config file.
#[derive(Parser, Debug, Default)]
#[command(name = "tdsync")]
#[command(author, version, about = "WebDAV-flavored userscript sync server", long_about = None)]
pub struct CliArgs {
    /// Config file to read (default: ./config.json when present)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Directory tree to serve
    #[arg(long)]
    pub path: Option<PathBuf>,

    /// Interface to bind
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(long)]
    pub port: Option<u16>,

    /// Basic-auth username
    #[arg(long)]
    pub username: Option<String>,

    /// Basic-auth password
    #[arg(long)]
    pub password: Option<String>,

    /// Bump `*.meta.json` siblings when a `*.user.js` change is delivered
    #[arg(long)]
    pub meta_touch: bool,

    /// Verbose request logging
    #[arg(long)]
    pub debug: bool,

    /// Command to spawn for the EDITOR verb
    #[arg(long)]
    pub open_in_editor: Option<String>,

    /// Suppress the startup warning when no credentials are configured
    #[arg(long)]
    pub no_auth_warning: bool,
}

/// `config.json` shape. All fields optional; kebab-case keys.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct FileConfig {
    pub path: Option<PathBuf>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub meta_touch: Option<bool>,
    pub debug: Option<bool>,
    pub open_in_editor: Option<String>,
    pub no_auth_warning: Option<bool>,
}

/// Fully resolved configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub path: PathBuf,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub meta_touch: bool,
    pub debug: bool,
    pub open_in_editor: Option<String>,
    pub no_auth_warning: bool,
}

impl Config {
    /// Merge CLI flags over the config file, then fill credentials from
    /// the environment if both left them unset.
    pub fn resolve(cli: CliArgs) -> Result<Self, ConfigError> {
        let file = load_file(&cli)?;
        Self::merge(cli, file, std::env::var("TD_USERNAME").ok(), std::env::var("TD_PASSWORD").ok())
    }

    fn merge(
        cli: CliArgs,
        file: FileConfig,
        env_username: Option<String>,
        env_password: Option<String>,
    ) -> Result<Self, ConfigError> {
        let path = cli.path.or(file.path).ok_or(ConfigError::MissingPath)?;
        if !path.is_dir() {
            return Err(ConfigError::NotADirectory(path));
        }

        let username = cli.username.or(file.username).or(env_username);
        let password = cli.password.or(file.password).or(env_password);

        Ok(Self {
            path,
            host: cli
                .host
                .or(file.host)
                .unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: cli.port.or(file.port).unwrap_or(DEFAULT_PORT),
            username,
            password,
            meta_touch: cli.meta_touch || file.meta_touch.unwrap_or(false),
            debug: cli.debug || file.debug.unwrap_or(false),
            open_in_editor: cli.open_in_editor.or(file.open_in_editor),
            no_auth_warning: cli.no_auth_warning || file.no_auth_warning.unwrap_or(false),
        })
    }

    /// Whether Basic auth is enforced.
    pub fn auth_required(&self) -> bool {
        self.username.is_some() || self.password.is_some()
    }
}

fn load_file(cli: &CliArgs) -> Result<FileConfig, ConfigError> {
    let path = match &cli.config {
        Some(path) => path.clone(),
        None => {
            let default = PathBuf::from("config.json");
            if !default.exists() {
                return Ok(FileConfig::default());
            }
            default
        }
    };
    let text = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
        path: path.clone(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| ConfigError::Parse { path, source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn storage() -> TempDir {
        TempDir::new().unwrap()
    }

    #[test]
    fn defaults_apply() {
        let dir = storage();
        let cli = CliArgs {
            path: Some(dir.path().to_path_buf()),
            ..CliArgs::default()
        };
        let config = Config::merge(cli, FileConfig::default(), None, None).unwrap();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 7000);
        assert!(!config.meta_touch);
        assert!(!config.auth_required());
    }

    #[test]
    fn cli_wins_over_file() {
        let dir = storage();
        let file = FileConfig {
            path: Some(PathBuf::from("/elsewhere")),
            port: Some(8000),
            username: Some("file-user".into()),
            ..FileConfig::default()
        };
        let cli = CliArgs {
            path: Some(dir.path().to_path_buf()),
            port: Some(9000),
            username: Some("cli-user".into()),
            ..CliArgs::default()
        };
        let config = Config::merge(cli, file, None, None).unwrap();
        assert_eq!(config.path, dir.path());
        assert_eq!(config.port, 9000);
        assert_eq!(config.username.as_deref(), Some("cli-user"));
    }

    #[test]
    fn env_fills_missing_credentials() {
        let dir = storage();
        let cli = CliArgs {
            path: Some(dir.path().to_path_buf()),
            ..CliArgs::default()
        };
        let config = Config::merge(
            cli,
            FileConfig::default(),
            Some("env-user".into()),
            Some("env-pass".into()),
        )
        .unwrap();
        assert_eq!(config.username.as_deref(), Some("env-user"));
        assert_eq!(config.password.as_deref(), Some("env-pass"));
        assert!(config.auth_required());
    }

    #[test]
    fn env_does_not_override_file() {
        let dir = storage();
        let file = FileConfig {
            path: Some(dir.path().to_path_buf()),
            username: Some("file-user".into()),
            ..FileConfig::default()
        };
        let config =
            Config::merge(CliArgs::default(), file, Some("env-user".into()), None).unwrap();
        assert_eq!(config.username.as_deref(), Some("file-user"));
    }

    #[test]
    fn missing_path_is_an_error() {
        let err = Config::merge(CliArgs::default(), FileConfig::default(), None, None);
        assert!(matches!(err, Err(ConfigError::MissingPath)));
    }

    #[test]
    fn kebab_case_file_keys_parse() {
        let parsed: FileConfig = serde_json::from_str(
            r#"{"path": "/tmp", "meta-touch": true, "open-in-editor": "code --wait", "no-auth-warning": true}"#,
        )
        .unwrap();
        assert_eq!(parsed.meta_touch, Some(true));
        assert_eq!(parsed.open_in_editor.as_deref(), Some("code --wait"));
        assert_eq!(parsed.no_auth_warning, Some(true));
    }
}
