use std::time::Instant;

use anyhow::{Result, bail};
use chrono::Utc;
use tracing::{info, warn};

use crate::backend::{self, Indexer, TableCatalog};
use crate::cli::IndexArgs;
use crate::commands::backend_config;
use crate::model::{FtsParams, IndexRunManifest, IndexType, VectorIndexParams};
use crate::util::{ensure_directory, now_utc_string, sha256_file, utc_compact_string, write_json_pretty};

pub fn run(args: IndexArgs) -> Result<()> {
    check_flags(&args)?;

    let started_ts = Utc::now();
    let started_at = now_utc_string();
    let started = Instant::now();
    let run_id = format!("index-{}", utc_compact_string(started_ts));

    let config = backend_config(&args.backend)?;
    let manifest_dir = args.backend.cache_root.join("manifests");
    ensure_directory(&manifest_dir)?;
    let manifest_path = args.manifest_path.clone().unwrap_or_else(|| {
        manifest_dir.join(format!(
            "index_{}_{}.json",
            args.table,
            utc_compact_string(started_ts)
        ))
    });

    info!(
        run_id = %run_id,
        backend = config.kind.as_str(),
        table = %args.table,
        index_type = args.index_type.as_str(),
        input = %args.input.display(),
        "starting index"
    );

    let source_sha256 = sha256_file(&args.input)?;
    let mut backend = backend::open(&config)?;

    backend.init_table(&args.table, args.index_type, args.embedding_dim)?;
    let rows_loaded =
        backend.load_table(&args.table, &args.input, args.index_type, args.pretokenized)?;
    let rows_total = backend.get_num_rows(&args.table)?;

    let fts = if args.fts {
        let defaults = config.kind.default_fts_params();
        let params = FtsParams {
            k1: args.k1.unwrap_or(defaults.k1),
            b: args.b.unwrap_or(defaults.b),
            text_config: args.text_config.clone(),
        };
        backend.fts_index(&args.table, &params)?;
        Some(params)
    } else {
        None
    };

    let vector_index = if args.vector_index {
        let params = VectorIndexParams {
            using: args.vector_using.clone(),
            opclass: args.vector_opclass.clone(),
            ..VectorIndexParams::default()
        };
        Some(backend.vector_index(&args.table, &params)?)
    } else {
        None
    };

    let manifest = IndexRunManifest {
        manifest_version: 1,
        run_id: run_id.clone(),
        started_at,
        finished_at: now_utc_string(),
        backend: config.kind.as_str().to_string(),
        table_name: args.table.clone(),
        index_type: args.index_type,
        source_path: args.input.display().to_string(),
        source_sha256,
        pretokenized: args.pretokenized,
        embedding_dim: (args.index_type == IndexType::Dense).then_some(args.embedding_dim),
        rows_loaded,
        rows_total,
        fts,
        vector_index,
        duration_ms: started.elapsed().as_millis(),
    };
    write_json_pretty(&manifest_path, &manifest)?;

    info!(
        run_id = %run_id,
        table = %args.table,
        rows_loaded,
        rows_total,
        manifest = %manifest_path.display(),
        "index completed"
    );
    Ok(())
}

fn check_flags(args: &IndexArgs) -> Result<()> {
    match args.index_type {
        IndexType::Sparse => {
            if args.vector_index {
                bail!("--vector-index needs --index-type dense");
            }
            if !args.fts && (args.k1.is_some() || args.b.is_some()) {
                warn!("--k1/--b are only used with --fts");
            }
        }
        IndexType::Dense => {
            if args.fts {
                bail!("--fts needs --index-type sparse");
            }
            if args.embedding_dim == 0 {
                bail!("--embedding-dim must be positive for dense tables");
            }
            if args.pretokenized {
                warn!("--pretokenized has no effect on dense tables");
            }
        }
    }
    Ok(())
}
