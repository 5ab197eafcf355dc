use crate::ledger::RetryPolicy;
use rollcall_core::{EngineConfig, Metric};
use serde::Deserialize;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Optional TOML overlay named by `ROLLCALL_CONFIG`.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    #[serde(default)]
    engine: EngineConfig,
}

/// Paths and matching parameters shared by the daemon and the CLI.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root for everything below unless overridden.
    pub data_dir: PathBuf,
    /// `<identity>/*.json` embedding files used for training.
    pub samples_dir: PathBuf,
    /// One `YYYY-MM-DD.json` file per day.
    pub attendance_dir: PathBuf,
    pub gallery_path: PathBuf,
    pub engine: EngineConfig,
    /// Backoff for the per-date attendance lock.
    pub lock_retry: RetryPolicy,
}

impl Config {
    /// Load configuration from `ROLLCALL_*` environment variables with defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let data_dir = lookup("ROLLCALL_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                lookup("XDG_DATA_HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| {
                        let home = lookup("HOME").unwrap_or_else(|| "/tmp".to_string());
                        PathBuf::from(home).join(".local/share")
                    })
                    .join("rollcall")
            });

        let mut engine = match lookup("ROLLCALL_CONFIG") {
            Some(path) => read_file_config(PathBuf::from(path))?.engine,
            None => EngineConfig::default(),
        };
        if let Some(threshold) = parse_var(&lookup, "ROLLCALL_THRESHOLD")? {
            engine.threshold = threshold;
        }
        if let Some(dim) = parse_var(&lookup, "ROLLCALL_VECTOR_DIM")? {
            engine.vector_dim = dim;
        }
        if let Some(metric) = parse_var::<Metric, _>(&lookup, "ROLLCALL_METRIC")? {
            engine.metric = metric;
        }
        validate_engine(&engine)?;

        let mut lock_retry = RetryPolicy::default();
        if let Some(attempts) = parse_var(&lookup, "ROLLCALL_LOCK_RETRIES")? {
            lock_retry.attempts = attempts;
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "ROLLCALL_LOCK_BACKOFF_MS")? {
            lock_retry.base_delay = Duration::from_millis(ms);
        }

        Ok(Self {
            samples_dir: path_var(&lookup, "ROLLCALL_SAMPLES_DIR")
                .unwrap_or_else(|| data_dir.join("samples")),
            attendance_dir: path_var(&lookup, "ROLLCALL_ATTENDANCE_DIR")
                .unwrap_or_else(|| data_dir.join("attendance")),
            gallery_path: path_var(&lookup, "ROLLCALL_GALLERY_PATH")
                .unwrap_or_else(|| data_dir.join("gallery.json")),
            data_dir,
            engine,
            lock_retry,
        })
    }
}

fn read_file_config(path: PathBuf) -> Result<FileConfig, ConfigError> {
    let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
        path: path.clone(),
        source,
    })?;
    toml::from_str(&text).map_err(|source| ConfigError::Parse { path, source })
}

fn validate_engine(engine: &EngineConfig) -> Result<(), ConfigError> {
    if !(engine.threshold.is_finite() && engine.threshold > 0.0) {
        return Err(ConfigError::Invalid {
            key: "threshold",
            value: engine.threshold.to_string(),
            reason: "must be a positive finite distance".into(),
        });
    }
    if engine.vector_dim == 0 {
        return Err(ConfigError::Invalid {
            key: "vector_dim",
            value: "0".into(),
            reason: "must be at least 1".into(),
        });
    }
    Ok(())
}

fn path_var<F>(lookup: &F, key: &str) -> Option<PathBuf>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key).map(PathBuf::from)
}

/// Parse `key` if set. Unparseable values are reported, never defaulted.
pub fn parse_var<T, F>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    raw.trim()
        .parse()
        .map(Some)
        .map_err(|e: T::Err| ConfigError::Invalid {
            key,
            value: raw.clone(),
            reason: e.to_string(),
        })
}
