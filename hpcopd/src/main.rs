// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use hpcopd::adapters;
use hpcopd::app::types::{Credentials, OperationFilter};
use hpcopd::app::usecases::{Settings, UseCases};
use hpcopd::{config, logging};

fn log_config_report(report: &config::ConfigReport) {
    match (&report.config_path, report.config_path_source) {
        (Some(path), Some(source)) => tracing::info!(
            path = %path.display(),
            source = source.as_str(),
            present = report.config_file_present,
            "config path"
        ),
        (Some(path), None) => tracing::info!(
            path = %path.display(),
            present = report.config_file_present,
            "config path"
        ),
        (None, _) => tracing::info!("config path: (none)"),
    }
    macro_rules! report {
        ($field:ident, display) => {
            tracing::info!(
                value = %report.$field.value.display(),
                source = report.$field.source.as_str(),
                key = stringify!($field),
                "config value"
            )
        };
        ($field:ident) => {
            tracing::info!(
                value = %report.$field.value,
                source = report.$field.source.as_str(),
                key = stringify!($field),
                "config value"
            )
        };
    }
    report!(database_path, display);
    report!(storage_root, display);
    report!(poll_interval_secs);
    report!(remote_call_timeout_secs);
    report!(max_parallel_polls);
    report!(registry_url);
    report!(compute_site);
    report!(access_token_env);
    report!(disk_quota_bytes);
    report!(verbose);
}

fn read_credentials(var: &str) -> Option<Credentials> {
    std::env::var(var)
        .ok()
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
        .map(Credentials::new)
}

async fn reconcile_once(usecases: &UseCases, token_env: &str) {
    let Some(credentials) = read_credentials(token_env) else {
        tracing::warn!(env = token_env, "no access token set, skipping pass");
        return;
    };
    match usecases
        .check_operations(&OperationFilter::default(), &credentials)
        .await
    {
        Ok(summary) if summary.checked > 0 => tracing::info!(
            checked = summary.checked,
            started = summary.started,
            finished = summary.finished,
            failed = summary.failed,
            deferred = summary.deferred,
            "reconciliation pass done"
        ),
        Ok(_) => tracing::debug!("nothing to reconcile"),
        Err(err) => tracing::warn!(error = %err, "reconciliation pass failed"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let parsed = adapters::cli::parse_opts();
    let opts = parsed.opts;
    let config::LoadResult { config, report } = config::load_with_report(
        opts.config,
        config::Overrides {
            database_path: opts.database_path,
            storage_root: opts.storage_root,
            poll_interval_secs: opts.poll_interval_secs,
            compute_site: opts.compute_site,
            verbose: parsed.verbose_override,
        },
    )?;
    logging::init(config.verbose);
    log_config_report(&report);
    config::ensure_database_dir(&config.database_path)?;

    let db = adapters::db::OperationStore::open(&config.database_path)
        .await
        .with_context(|| format!("opening {}", config.database_path.display()))?;
    let store = Arc::new(adapters::db::SqliteStoreAdapter::new(db));
    let call_timeout = Duration::from_secs(config.remote_call_timeout_secs);
    let gateway = adapters::unicore::UnicoreGateway::new(
        config.registry_url.clone(),
        config.compute_site.clone(),
        call_timeout,
    )
    .context("building the remote gateway")?;

    let usecases = UseCases::new(
        store.clone(),
        store,
        Arc::new(gateway),
        Arc::new(adapters::fs::LocalFilesystem::new()),
        Arc::new(adapters::storage::LocalProjectStorage::new(
            config.storage_root.clone(),
        )),
        Arc::new(adapters::time::SystemClock::new()),
        Arc::new(adapters::telemetry::TracingTelemetry::new()),
        Settings {
            disk_quota_bytes: config.disk_quota_bytes,
            max_parallel_polls: config.max_parallel_polls,
            remote_call_timeout: call_timeout,
        },
    );

    let interval = Duration::from_secs(config.poll_interval_secs);
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    tracing::info!(site = %config.compute_site, ?interval, "hpcopd running");
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = ticker.tick() => reconcile_once(&usecases, &config.access_token_env).await,
            _ = &mut shutdown => {
                tracing::info!("shutting down");
                break;
            }
        }
    }
    Ok(())
}
