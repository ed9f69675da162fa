use std::collections::HashMap;
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use tracing::{info, warn};

use crate::backend::{
    self, Backend, BackendKind, DuckDbBackend, SearchMethod, SearchRequest, Searcher,
    TableCatalog,
};
use crate::cli::SearchArgs;
use crate::commands::{backend_config, flock_manager, ollama_client};
use crate::corpus::{read_query_embeddings, read_topics};
use crate::embedding::{FlockManager, OllamaClient};
use crate::model::{Hit, IndexType, RrfParams, SearchRunManifest, Topic};
use crate::trec::write_run;
use crate::util::{create_output_file, ensure_directory, now_utc_string, utc_compact_string, write_json_pretty};

const QUERY_PROGRESS_EVERY: usize = 100;

enum QueryEncoder {
    Disabled,
    Precomputed(HashMap<String, Vec<f64>>),
    Ollama(OllamaClient),
    Flock {
        manager: FlockManager,
        dense_table: String,
        embedding_dim: usize,
    },
}

impl QueryEncoder {
    fn embed(&self, qid: &str, text: &str) -> Result<Vec<f64>> {
        match self {
            Self::Disabled => bail!(
                "dense and rrf search need --query-embeddings, --embed-model or --flock"
            ),
            Self::Precomputed(vectors) => vectors
                .get(qid)
                .cloned()
                .with_context(|| format!("no precomputed embedding for query {qid}")),
            Self::Ollama(client) => client.embed_one(text),
            Self::Flock {
                manager,
                embedding_dim,
                ..
            } => manager.embed_query(text, *embedding_dim),
        }
    }
}

struct QueryPlan<'a> {
    method: SearchMethod,
    tables: &'a [String],
    top_n: usize,
    rrf: RrfParams,
}

pub fn run(args: SearchArgs) -> Result<()> {
    let config = backend_config(&args.backend)?;
    let (mut backend, encoder) = if args.flock {
        open_with_flock(&args, &config.db_path, config.kind)?
    } else {
        let backend = backend::open(&config)?;
        let encoder = plain_encoder(&args)?;
        (backend, encoder)
    };

    let plan = QueryPlan {
        method: args.method,
        tables: &args.tables,
        top_n: args.top_n,
        rrf: RrfParams {
            k: args.rrf_k,
            weight_keyword: args.weight_keyword,
            weight_semantic: args.weight_semantic,
        },
    };

    if let Some(query) = args.query.as_deref() {
        let stdout = io::stdout();
        let mut out = stdout.lock();
        write_query(
            backend.as_mut(),
            &encoder,
            &plan,
            &Topic {
                qid: args.qid.clone(),
                text: query.to_string(),
            },
            &args.run_tag,
            &mut out,
        )?;
        out.flush().context("failed to flush stdout")?;
        return Ok(());
    }

    let topics_path = args
        .topics
        .clone()
        .context("either --query or --topics is required")?;
    run_topics(&args, backend.as_mut(), &encoder, &plan, topics_path)
}

fn run_topics(
    args: &SearchArgs,
    backend: &mut dyn Backend,
    encoder: &QueryEncoder,
    plan: &QueryPlan<'_>,
    topics_path: PathBuf,
) -> Result<()> {
    let started_ts = Utc::now();
    let started = Instant::now();
    let run_id = format!("search-{}", utc_compact_string(started_ts));
    let topics = read_topics(&topics_path)?;

    let run_path = args.output.clone().unwrap_or_else(|| {
        args.backend.cache_root.join("runs").join(format!(
            "run.{}.{}.{}.txt",
            backend.kind().as_str(),
            plan.method.as_str(),
            plan.tables.join("+")
        ))
    });
    let manifest_dir = args.backend.cache_root.join("manifests");
    ensure_directory(&manifest_dir)?;
    let manifest_path = args.manifest_path.clone().unwrap_or_else(|| {
        manifest_dir.join(format!("search_{}.json", utc_compact_string(started_ts)))
    });

    info!(
        run_id = %run_id,
        backend = backend.kind().as_str(),
        method = plan.method.as_str(),
        topics = topics.len(),
        output = %run_path.display(),
        "starting batch search"
    );

    let mut writer = create_output_file(&run_path)?;
    let lines_written = write_topics(backend, encoder, plan, &topics, &args.run_tag, &mut writer)?;
    writer
        .flush()
        .with_context(|| format!("failed to flush {}", run_path.display()))?;

    let manifest = SearchRunManifest {
        manifest_version: 1,
        run_id: run_id.clone(),
        generated_at: now_utc_string(),
        backend: backend.kind().as_str().to_string(),
        method: plan.method.as_str().to_string(),
        tables: plan.tables.to_vec(),
        topics_path: topics_path.display().to_string(),
        run_path: run_path.display().to_string(),
        run_tag: args.run_tag.clone(),
        top_n: plan.top_n,
        rrf: (plan.method == SearchMethod::Rrf).then_some(plan.rrf),
        queries: topics.len(),
        lines_written,
        duration_ms: started.elapsed().as_millis(),
    };
    write_json_pretty(&manifest_path, &manifest)?;

    info!(
        run_id = %run_id,
        queries = topics.len(),
        lines_written,
        manifest = %manifest_path.display(),
        "batch search completed"
    );
    Ok(())
}

fn write_topics<W: Write>(
    backend: &mut dyn Backend,
    encoder: &QueryEncoder,
    plan: &QueryPlan<'_>,
    topics: &[Topic],
    tag: &str,
    writer: &mut W,
) -> Result<usize> {
    let mut lines_written = 0;
    for (index, topic) in topics.iter().enumerate() {
        lines_written += write_query(backend, encoder, plan, topic, tag, writer)?;
        if (index + 1) % QUERY_PROGRESS_EVERY == 0 {
            info!(searched = index + 1, total = topics.len(), "search progress");
        }
    }
    Ok(lines_written)
}

fn write_query<W: Write>(
    backend: &mut dyn Backend,
    encoder: &QueryEncoder,
    plan: &QueryPlan<'_>,
    topic: &Topic,
    tag: &str,
    writer: &mut W,
) -> Result<usize> {
    let hits = search_one(backend, encoder, plan, topic)
        .with_context(|| format!("search failed for query {}", topic.qid))?;
    write_run(writer, &topic.qid, &hits, tag)
}

fn search_one(
    backend: &mut dyn Backend,
    encoder: &QueryEncoder,
    plan: &QueryPlan<'_>,
    topic: &Topic,
) -> Result<Vec<Hit>> {
    if let QueryEncoder::Flock {
        manager,
        dense_table,
        embedding_dim,
    } = encoder
    {
        if plan.method == SearchMethod::Dense {
            return manager.search_embedding(&topic.text, dense_table, plan.top_n.max(1), *embedding_dim);
        }
    }

    let embedding = if plan.method.needs_embedding() {
        Some(encoder.embed(&topic.qid, &topic.text)?)
    } else {
        None
    };

    backend.search(&SearchRequest {
        method: plan.method,
        query_text: Some(&topic.text),
        query_embedding: embedding.as_deref(),
        top_n: plan.top_n,
        tables: plan.tables,
        rrf: plan.rrf,
    })
}

fn plain_encoder(args: &SearchArgs) -> Result<QueryEncoder> {
    if !args.method.needs_embedding() {
        if args.query_embeddings.is_some() || args.embed_model.is_some() {
            warn!(method = args.method.as_str(), "query embedding options are ignored");
        }
        return Ok(QueryEncoder::Disabled);
    }

    if let Some(path) = args.query_embeddings.as_deref() {
        let vectors = read_query_embeddings(path)?;
        info!(path = %path.display(), queries = vectors.len(), "loaded query embeddings");
        return Ok(QueryEncoder::Precomputed(vectors));
    }
    if let Some(model) = args.embed_model.as_deref() {
        return Ok(QueryEncoder::Ollama(ollama_client(&args.ollama, model)?));
    }
    bail!(
        "{} search needs --query-embeddings, --embed-model or --flock",
        args.method.as_str()
    )
}

fn open_with_flock(
    args: &SearchArgs,
    db_path: &std::path::Path,
    kind: BackendKind,
) -> Result<(Box<dyn Backend>, QueryEncoder)> {
    if kind != BackendKind::Duckdb {
        bail!("--flock needs --backend duckdb");
    }
    if !args.method.needs_embedding() {
        bail!("--flock applies to dense and rrf search");
    }

    let mut duckdb_backend = DuckDbBackend::open(db_path)?;
    let mut dense_table = None;
    for table in &args.tables {
        if duckdb_backend.get_index_type(table)? == IndexType::Dense {
            dense_table = Some(table.clone());
            break;
        }
    }
    let dense_table = dense_table.context("--flock search needs a dense table")?;
    let embedding_dim = duckdb_backend.embedding_dim(&dense_table)?;

    let connection = duckdb_backend
        .connection()
        .try_clone()
        .context("failed to open a second duckdb handle for flock")?;
    let manager = flock_manager(connection, &args.flock_args)?;

    Ok((
        Box::new(duckdb_backend),
        QueryEncoder::Flock {
            manager,
            dense_table,
            embedding_dim,
        },
    ))
}
