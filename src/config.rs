use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use std::{env, fs, path::Path, str::FromStr};

/// Centralized application configuration.
/// Merged from defaults, an optional JSON config file, environment
/// variables, and CLI arguments — in that order of precedence.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub base_url: String,
    pub upload_dir: String,
    pub static_dir: Option<String>,
    pub max_file_size_mb: u64,
    pub file_ttl_minutes: i64,
    pub default_download_limit: u32,
    pub sweep_interval_secs: u64,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Ephemeral file-relay service")]
pub struct Args {
    /// Path to a JSON config file (overrides FILE_RELAY_CONFIG)
    #[arg(long)]
    pub config: Option<String>,

    /// Host to bind to (overrides FILE_RELAY_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides FILE_RELAY_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Public base URL used in download links (overrides FILE_RELAY_BASE_URL)
    #[arg(long)]
    pub base_url: Option<String>,

    /// Directory where uploaded files are stored (overrides FILE_RELAY_UPLOAD_DIR)
    #[arg(long)]
    pub upload_dir: Option<String>,

    /// Directory of static assets to serve (overrides FILE_RELAY_STATIC_DIR)
    #[arg(long)]
    pub static_dir: Option<String>,

    /// Maximum accepted file size in MB (overrides FILE_RELAY_MAX_FILE_SIZE_MB)
    #[arg(long)]
    pub max_file_size_mb: Option<u64>,

    /// Minutes before an uploaded file expires (overrides FILE_RELAY_FILE_TTL_MINUTES)
    #[arg(long)]
    pub file_ttl_minutes: Option<i64>,

    /// Downloads allowed per file, 0 = unlimited (overrides FILE_RELAY_DOWNLOAD_LIMIT)
    #[arg(long)]
    pub download_limit: Option<u32>,

    /// Seconds between expiry sweeps (overrides FILE_RELAY_SWEEP_INTERVAL_SECS)
    #[arg(long)]
    pub sweep_interval_secs: Option<u64>,
}

/// Shape of the optional JSON config file. Every key is optional; missing
/// keys fall through to the defaults.
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    host: Option<String>,
    port: Option<u16>,
    base_url: Option<String>,
    upload_dir: Option<String>,
    static_dir: Option<String>,
    max_file_size_mb: Option<u64>,
    file_ttl_minutes: Option<i64>,
    default_download_limit: Option<u32>,
    sweep_interval_secs: Option<u64>,
}

const DEFAULT_CONFIG_PATH: &str = "config.json";

impl AppConfig {
    /// Parse the config file, environment variables, and CLI args.
    pub fn load() -> Result<Self> {
        let args = Args::parse();
        Self::from_sources(args)
    }

    fn from_sources(args: Args) -> Result<Self> {
        let config_path = args
            .config
            .clone()
            .or(env::var("FILE_RELAY_CONFIG").ok())
            .unwrap_or_else(|| DEFAULT_CONFIG_PATH.into());
        let file = load_file_config(&config_path)?;

        let cfg = Self {
            host: args
                .host
                .or(parse_env("FILE_RELAY_HOST")?)
                .or(file.host)
                .unwrap_or_else(|| "0.0.0.0".into()),
            port: args
                .port
                .or(parse_env("FILE_RELAY_PORT")?)
                .or(file.port)
                .unwrap_or(8080),
            base_url: args
                .base_url
                .or(parse_env("FILE_RELAY_BASE_URL")?)
                .or(file.base_url)
                .unwrap_or_else(|| "http://localhost:8080".into()),
            upload_dir: args
                .upload_dir
                .or(parse_env("FILE_RELAY_UPLOAD_DIR")?)
                .or(file.upload_dir)
                .unwrap_or_else(|| "./uploads".into()),
            static_dir: args
                .static_dir
                .or(parse_env("FILE_RELAY_STATIC_DIR")?)
                .or(file.static_dir)
                .or_else(|| Some("./dist".into())),
            max_file_size_mb: args
                .max_file_size_mb
                .or(parse_env("FILE_RELAY_MAX_FILE_SIZE_MB")?)
                .or(file.max_file_size_mb)
                .unwrap_or(100),
            file_ttl_minutes: args
                .file_ttl_minutes
                .or(parse_env("FILE_RELAY_FILE_TTL_MINUTES")?)
                .or(file.file_ttl_minutes)
                .unwrap_or(60),
            default_download_limit: args
                .download_limit
                .or(parse_env("FILE_RELAY_DOWNLOAD_LIMIT")?)
                .or(file.default_download_limit)
                .unwrap_or(5),
            sweep_interval_secs: args
                .sweep_interval_secs
                .or(parse_env("FILE_RELAY_SWEEP_INTERVAL_SECS")?)
                .or(file.sweep_interval_secs)
                .unwrap_or(300),
        };

        Ok(cfg)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb * 1024 * 1024
    }
}

/// Read and parse the JSON config file. A missing file is not an error — the
/// defaults apply — but an unreadable or malformed one is.
fn load_file_config(path: &str) -> Result<FileConfig> {
    if !Path::new(path).exists() {
        tracing::info!("config file {} not found, using defaults", path);
        return Ok(FileConfig::default());
    }
    let raw = fs::read_to_string(path).with_context(|| format!("reading config file {}", path))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing config file {}", path))
}

/// Read and parse one environment variable, absent if unset.
fn parse_env<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => {
            let parsed = value
                .parse::<T>()
                .with_context(|| format!("parsing {} value `{}`", name, value))?;
            Ok(Some(parsed))
        }
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err).context(format!("reading {}", name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_args() -> Args {
        Args {
            config: None,
            host: None,
            port: None,
            base_url: None,
            upload_dir: None,
            static_dir: None,
            max_file_size_mb: None,
            file_ttl_minutes: None,
            download_limit: None,
            sweep_interval_secs: None,
        }
    }

    #[test]
    fn defaults_apply_without_file_or_env() {
        let args = Args {
            // Point at a path that certainly does not exist so a stray
            // config.json in the working directory cannot leak in.
            config: Some("/nonexistent/file-relay-test.json".into()),
            ..no_args()
        };
        let cfg = AppConfig::from_sources(args).unwrap();
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.max_file_size_mb, 100);
        assert_eq!(cfg.file_ttl_minutes, 60);
        assert_eq!(cfg.default_download_limit, 5);
        assert_eq!(cfg.sweep_interval_secs, 300);
        assert_eq!(cfg.addr(), "0.0.0.0:8080");
        assert_eq!(cfg.max_file_size_bytes(), 100 * 1024 * 1024);
    }

    #[test]
    fn cli_args_override_file_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{ "port": 9000, "default_download_limit": 1, "upload_dir": "/tmp/from-file" }"#,
        )
        .unwrap();

        let args = Args {
            config: Some(path.to_string_lossy().into_owned()),
            port: Some(9100),
            ..no_args()
        };
        let cfg = AppConfig::from_sources(args).unwrap();
        assert_eq!(cfg.port, 9100);
        assert_eq!(cfg.default_download_limit, 1);
        assert_eq!(cfg.upload_dir, "/tmp/from-file");
    }

    #[test]
    fn malformed_config_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();

        let args = Args {
            config: Some(path.to_string_lossy().into_owned()),
            ..no_args()
        };
        assert!(AppConfig::from_sources(args).is_err());
    }
}
