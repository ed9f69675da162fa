use std::time::Instant;

use anyhow::{Context, Result, bail};
use tracing::info;

use crate::analysis::validate_identifier;
use crate::backend::{BackendKind, DuckDbBackend, Indexer, TableCatalog};
use crate::cli::EmbedArgs;
use crate::commands::{default_db_path, flock_manager};
use crate::model::IndexType;

pub fn run(args: EmbedArgs) -> Result<()> {
    let started = Instant::now();
    let table = validate_identifier(&args.table)?;
    let db_path = args
        .db_path
        .clone()
        .unwrap_or_else(|| default_db_path(&args.cache_root, BackendKind::Duckdb));

    let mut backend = DuckDbBackend::open(&db_path)?;
    if args.append {
        if backend.get_index_type(table)? != IndexType::Dense {
            bail!("--append needs an existing dense table; {table} is sparse");
        }
        let existing_dim = backend.embedding_dim(table)?;
        if existing_dim != args.embedding_dim {
            bail!(
                "table {table} holds {existing_dim}-dimensional embeddings, not {}",
                args.embedding_dim
            );
        }
    } else {
        backend.init_table(table, IndexType::Dense, args.embedding_dim)?;
    }
    let rows_before = backend.get_num_rows(table)?;

    let connection = backend
        .connection()
        .try_clone()
        .context("failed to open a second duckdb handle for flock")?;
    let manager = flock_manager(connection, &args.flock)?;

    info!(
        db = %db_path.display(),
        table,
        input = %args.input.display(),
        model = %args.flock.flock_model_alias,
        "embedding corpus through flock"
    );
    let inserted = manager.create_embedding(
        table,
        &args.input,
        &args.id_column,
        &args.contents_column,
        args.embedding_dim,
    )?;
    let rows_total = backend.get_num_rows(table)?;

    info!(
        table,
        inserted,
        rows_before,
        rows_total,
        duration_ms = started.elapsed().as_millis() as u64,
        "flock embedding completed"
    );
    Ok(())
}
