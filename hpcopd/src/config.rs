// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use anyhow::{Context, Result};
use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
};

const APP_DIR_NAME: &str = "hpcopd";
const CONFIG_FILE_NAME: &str = "hpcopd.toml";
const CONFIG_ENV_VAR: &str = "HPCOP_CONFIG_PATH";
const DATABASE_FILE_NAME: &str = "hpcopd.sqlite";
const STORAGE_DIR_NAME: &str = "projects";
const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;
const DEFAULT_REMOTE_CALL_TIMEOUT_SECS: u64 = 60;
const DEFAULT_MAX_PARALLEL_POLLS: usize = 4;
const DEFAULT_REGISTRY_URL: &str =
    "https://hbp-unic.fz-juelich.de:7112/HBP/rest/registries/default_registry";
const DEFAULT_COMPUTE_SITE: &str = "DAINT-CSCS";
const DEFAULT_ACCESS_TOKEN_ENV: &str = "HPCOP_ACCESS_TOKEN";
const DEFAULT_DISK_QUOTA_BYTES: i64 = 5 * 1024 * 1024 * 1024;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    database_path: Option<String>,
    storage_root: Option<String>,
    poll_interval_secs: Option<u64>,
    remote_call_timeout_secs: Option<u64>,
    max_parallel_polls: Option<usize>,
    registry_url: Option<String>,
    compute_site: Option<String>,
    access_token_env: Option<String>,
    disk_quota_bytes: Option<i64>,
    verbose: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: PathBuf,
    /// Root under which each project's result folder lives.
    pub storage_root: PathBuf,
    pub poll_interval_secs: u64,
    pub remote_call_timeout_secs: u64,
    pub max_parallel_polls: usize,
    pub registry_url: String,
    pub compute_site: String,
    /// Name of the environment variable holding the access token.
    pub access_token_env: String,
    pub disk_quota_bytes: i64,
    pub verbose: bool,
    #[allow(dead_code)]
    pub config_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    Override,
    Env,
    ConfigFile,
    Default,
}

impl ConfigSource {
    pub fn as_str(self) -> &'static str {
        match self {
            ConfigSource::Override => "override",
            ConfigSource::Env => "env",
            ConfigSource::ConfigFile => "config",
            ConfigSource::Default => "default",
        }
    }
}

#[derive(Debug)]
pub struct ConfigValue<T> {
    pub value: T,
    pub source: ConfigSource,
}

#[derive(Debug)]
pub struct ConfigReport {
    pub config_path: Option<PathBuf>,
    pub config_path_source: Option<ConfigSource>,
    pub config_file_present: bool,
    pub database_path: ConfigValue<PathBuf>,
    pub storage_root: ConfigValue<PathBuf>,
    pub poll_interval_secs: ConfigValue<u64>,
    pub remote_call_timeout_secs: ConfigValue<u64>,
    pub max_parallel_polls: ConfigValue<usize>,
    pub registry_url: ConfigValue<String>,
    pub compute_site: ConfigValue<String>,
    pub access_token_env: ConfigValue<String>,
    pub disk_quota_bytes: ConfigValue<i64>,
    pub verbose: ConfigValue<bool>,
}

#[derive(Debug)]
pub struct LoadResult {
    pub config: Config,
    pub report: ConfigReport,
}

#[derive(Debug, Default)]
pub struct Overrides {
    pub database_path: Option<PathBuf>,
    pub storage_root: Option<PathBuf>,
    pub poll_interval_secs: Option<u64>,
    pub compute_site: Option<String>,
    pub verbose: Option<bool>,
}

#[allow(dead_code)]
pub fn load(config_path_override: Option<PathBuf>, overrides: Overrides) -> Result<Config> {
    Ok(load_with_report(config_path_override, overrides)?.config)
}

pub fn load_with_report(
    config_path_override: Option<PathBuf>,
    overrides: Overrides,
) -> Result<LoadResult> {
    let (config_path, config_path_source, required) = match config_path_override {
        Some(path) => (Some(expand_path(path)), Some(ConfigSource::Override), true),
        None => match config_path_from_env()? {
            Some(path) => (Some(expand_path(path)), Some(ConfigSource::Env), true),
            None => match default_config_path().ok() {
                Some(path) => (Some(path), Some(ConfigSource::Default), false),
                None => (None, None, false),
            },
        },
    };
    let config_file_present = config_path
        .as_deref()
        .map(|path| path.exists())
        .unwrap_or(false);

    let file_config = match config_path.as_deref() {
        Some(path) => read_config_file(path, required)?,
        None => FileConfig::default(),
    };
    let config_dir = config_path.as_deref().and_then(|path| path.parent());

    let database_path = match overrides.database_path {
        Some(path) => value(expand_path(path), ConfigSource::Override),
        None => match file_config.database_path {
            Some(raw) => value(resolve_path(&raw, config_dir), ConfigSource::ConfigFile),
            None => value(
                default_database_path().with_context(|| {
                    "failed to resolve default database path; specify --database-path or set database_path in the config file"
                })?,
                ConfigSource::Default,
            ),
        },
    };

    let storage_root = match overrides.storage_root {
        Some(path) => value(expand_path(path), ConfigSource::Override),
        None => match file_config.storage_root {
            Some(raw) => value(resolve_path(&raw, config_dir), ConfigSource::ConfigFile),
            None => value(
                default_storage_root().with_context(|| {
                    "failed to resolve default storage root; specify --storage-root or set storage_root in the config file"
                })?,
                ConfigSource::Default,
            ),
        },
    };

    let poll_interval_secs = pick(
        overrides.poll_interval_secs,
        file_config.poll_interval_secs,
        DEFAULT_POLL_INTERVAL_SECS,
    );
    if poll_interval_secs.value == 0 {
        anyhow::bail!("poll_interval_secs must be greater than 0");
    }
    let remote_call_timeout_secs = pick(
        None,
        file_config.remote_call_timeout_secs,
        DEFAULT_REMOTE_CALL_TIMEOUT_SECS,
    );
    if remote_call_timeout_secs.value == 0 {
        anyhow::bail!("remote_call_timeout_secs must be greater than 0");
    }
    let max_parallel_polls = pick(
        None,
        file_config.max_parallel_polls,
        DEFAULT_MAX_PARALLEL_POLLS,
    );
    if max_parallel_polls.value == 0 {
        anyhow::bail!("max_parallel_polls must be greater than 0");
    }
    let disk_quota_bytes = pick(
        None,
        file_config.disk_quota_bytes,
        DEFAULT_DISK_QUOTA_BYTES,
    );
    if disk_quota_bytes.value < 0 {
        anyhow::bail!("disk_quota_bytes must not be negative");
    }

    let registry_url = pick(
        None,
        file_config.registry_url,
        DEFAULT_REGISTRY_URL.to_string(),
    );
    let compute_site = pick(
        overrides.compute_site,
        file_config.compute_site,
        DEFAULT_COMPUTE_SITE.to_string(),
    );
    if compute_site.value.trim().is_empty() {
        anyhow::bail!("compute_site must not be empty");
    }
    let access_token_env = pick(
        None,
        file_config.access_token_env,
        DEFAULT_ACCESS_TOKEN_ENV.to_string(),
    );
    if access_token_env.value.trim().is_empty() {
        anyhow::bail!("access_token_env must not be empty");
    }
    let verbose = pick(overrides.verbose, file_config.verbose, false);

    let config = Config {
        database_path: database_path.value.clone(),
        storage_root: storage_root.value.clone(),
        poll_interval_secs: poll_interval_secs.value,
        remote_call_timeout_secs: remote_call_timeout_secs.value,
        max_parallel_polls: max_parallel_polls.value,
        registry_url: registry_url.value.clone(),
        compute_site: compute_site.value.clone(),
        access_token_env: access_token_env.value.clone(),
        disk_quota_bytes: disk_quota_bytes.value,
        verbose: verbose.value,
        config_path: config_path.clone(),
    };

    let report = ConfigReport {
        config_path,
        config_path_source,
        config_file_present,
        database_path,
        storage_root,
        poll_interval_secs,
        remote_call_timeout_secs,
        max_parallel_polls,
        registry_url,
        compute_site,
        access_token_env,
        disk_quota_bytes,
        verbose,
    };

    Ok(LoadResult { config, report })
}

pub fn ensure_database_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create database directory {}", parent.display()))?;
    }
    Ok(())
}

fn value<T>(value: T, source: ConfigSource) -> ConfigValue<T> {
    ConfigValue { value, source }
}

fn pick<T>(override_value: Option<T>, file_value: Option<T>, default: T) -> ConfigValue<T> {
    match (override_value, file_value) {
        (Some(v), _) => value(v, ConfigSource::Override),
        (None, Some(v)) => value(v, ConfigSource::ConfigFile),
        (None, None) => value(default, ConfigSource::Default),
    }
}

fn read_config_file(path: &Path, required: bool) -> Result<FileConfig> {
    if !path.exists() {
        if required {
            anyhow::bail!("config file not found at {}", path.display());
        }
        return Ok(FileConfig::default());
    }

    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    toml::from_str(&contents)
        .with_context(|| format!("failed to parse config file {}", path.display()))
}

fn resolve_path(raw: &str, base_dir: Option<&Path>) -> PathBuf {
    let expanded = shellexpand::tilde(raw);
    let path = PathBuf::from(expanded.as_ref());
    if path.is_absolute() {
        return path;
    }
    match base_dir {
        Some(dir) => dir.join(path),
        None => path,
    }
}

fn expand_path(path: PathBuf) -> PathBuf {
    let path_string = path.to_string_lossy().to_string();
    let expanded = shellexpand::tilde(&path_string);
    PathBuf::from(expanded.as_ref())
}

fn config_path_from_env() -> Result<Option<PathBuf>> {
    match std::env::var_os(CONFIG_ENV_VAR) {
        Some(value) => {
            if value.is_empty() {
                anyhow::bail!("{CONFIG_ENV_VAR} is set but empty");
            }
            Ok(Some(PathBuf::from(value)))
        }
        None => Ok(None),
    }
}

fn default_config_path() -> Result<PathBuf> {
    Ok(default_config_dir()?.join(CONFIG_FILE_NAME))
}

fn default_database_path() -> Result<PathBuf> {
    Ok(default_data_dir()?.join(DATABASE_FILE_NAME))
}

fn default_storage_root() -> Result<PathBuf> {
    Ok(default_data_dir()?.join(STORAGE_DIR_NAME))
}

fn default_config_dir() -> Result<PathBuf> {
    let base = dirs::config_dir().context("failed to resolve config directory")?;
    Ok(base.join(APP_DIR_NAME))
}

fn default_data_dir() -> Result<PathBuf> {
    let base = dirs::data_dir().context("failed to resolve data directory")?;
    Ok(base.join(APP_DIR_NAME))
}
