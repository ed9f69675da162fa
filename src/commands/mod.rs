pub mod convert;
pub mod embed;
pub mod encode;
pub mod eval;
pub mod index;
pub mod search;
pub mod status;

use std::path::PathBuf;

use anyhow::{Context, Result, bail};

use crate::backend::{BackendConfig, BackendKind, PostgresTarget};
use crate::cli::{BackendArgs, FlockArgs, OllamaArgs};
use crate::embedding::{FlockManager, OllamaClient, OllamaConfig, SecretParams};
use crate::util::ensure_directory;

pub(crate) fn default_db_path(cache_root: &std::path::Path, kind: BackendKind) -> PathBuf {
    match kind {
        BackendKind::Sqlite => cache_root.join("quackir.sqlite"),
        BackendKind::Duckdb | BackendKind::Postgres => cache_root.join("quackir.duckdb"),
    }
}

pub(crate) fn backend_config(args: &BackendArgs) -> Result<BackendConfig> {
    let db_path = args
        .db_path
        .clone()
        .unwrap_or_else(|| default_db_path(&args.cache_root, args.backend));

    if args.backend != BackendKind::Postgres {
        if let Some(parent) = db_path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            ensure_directory(parent)?;
        }
    }

    let postgres = if args.pg_textsearch {
        if args.backend != BackendKind::Postgres {
            bail!("--pg-textsearch only applies to --backend postgres");
        }
        let dsn = args
            .pg_dsn
            .clone()
            .filter(|value| !value.trim().is_empty())
            .context("--pg-textsearch needs a connection string (--pg-dsn or TIMESCALE_SERVICE_URL)")?;
        PostgresTarget::Dsn(dsn)
    } else {
        PostgresTarget::Local {
            dbname: args.pg_dbname.clone(),
            user: args.pg_user.clone(),
        }
    };

    Ok(BackendConfig {
        kind: args.backend,
        db_path,
        postgres,
        use_pg_textsearch: args.pg_textsearch,
    })
}

pub(crate) fn ollama_client(args: &OllamaArgs, model: &str) -> Result<OllamaClient> {
    let mut config = OllamaConfig::new(args.ollama_host.clone(), model);
    config.batch_size = args.embed_batch_size;
    config.max_retries = args.embed_max_retries;
    config.timeout_secs = args.embed_timeout_secs;
    OllamaClient::new(config)
}

pub(crate) fn flock_manager(connection: ::duckdb::Connection, args: &FlockArgs) -> Result<FlockManager> {
    let provider_model = args
        .flock_provider_model
        .as_deref()
        .filter(|value| !value.trim().is_empty())
        .context("--flock-provider-model is required to register the flock model")?;

    let params = SecretParams {
        api_url: Some(args.flock_api_url.clone()),
        api_key: args.flock_api_key.clone(),
        resource_name: args.flock_resource_name.clone(),
        api_version: args.flock_api_version.clone(),
    };
    let mut manager = FlockManager::new(connection, args.flock_provider, &params)?;
    manager.create_model(
        &args.flock_model_alias,
        provider_model,
        &args.flock_model_provider,
        &args.flock_model_options,
        true,
    )?;
    Ok(manager)
}
