use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::backend::{self, TableCatalog};
use crate::cli::StatusArgs;
use crate::commands::backend_config;
use crate::model::IndexRunManifest;

pub fn run(args: StatusArgs) -> Result<()> {
    let config = backend_config(&args.backend)?;
    let manifest_dir = args.backend.cache_root.join("manifests");

    info!(
        cache_root = %args.backend.cache_root.display(),
        backend = config.kind.as_str(),
        "status requested"
    );

    let mut backend = backend::open(&config)?;
    let tables = backend.list_tables()?;
    if tables.is_empty() {
        warn!(backend = config.kind.as_str(), "no tables found");
    }
    for table in &tables {
        match backend.get_index_type(table) {
            Ok(index_type) => {
                let rows = backend.get_num_rows(table)?;
                info!(table = %table, index_type = index_type.as_str(), rows, "table status");
            }
            Err(_) => info!(table = %table, "table has neither contents nor embedding column"),
        }
    }

    if manifest_dir.exists() {
        let latest = latest_index_manifests(&manifest_dir, config.kind.as_str())?;
        for table in &tables {
            match latest.get(table) {
                Some(manifest) => info!(
                    table = %table,
                    run_id = %manifest.run_id,
                    finished_at = %manifest.finished_at,
                    source = %manifest.source_path,
                    source_sha256 = %manifest.source_sha256,
                    rows_loaded = manifest.rows_loaded,
                    fts = manifest.fts.is_some(),
                    vector_index = %manifest.vector_index.clone().unwrap_or_default(),
                    "latest index manifest"
                ),
                None => warn!(table = %table, "index manifest missing"),
            }
        }
    } else {
        warn!(path = %manifest_dir.display(), "manifest directory missing");
    }

    Ok(())
}

fn latest_index_manifests(
    manifest_dir: &Path,
    backend: &str,
) -> Result<BTreeMap<String, IndexRunManifest>> {
    let mut latest = BTreeMap::<String, IndexRunManifest>::new();
    let entries = fs::read_dir(manifest_dir)
        .with_context(|| format!("failed to list {}", manifest_dir.display()))?;

    for entry in entries {
        let path = entry
            .with_context(|| format!("failed to list {}", manifest_dir.display()))?
            .path();
        let is_index_manifest = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with("index_") && name.ends_with(".json"));
        if !is_index_manifest {
            continue;
        }

        let raw = fs::read(&path).with_context(|| format!("failed to read {}", path.display()))?;
        let manifest: IndexRunManifest = match serde_json::from_slice(&raw) {
            Ok(manifest) => manifest,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "skipping unreadable manifest");
                continue;
            }
        };
        if manifest.backend != backend {
            continue;
        }

        let newer = latest
            .get(&manifest.table_name)
            .is_none_or(|current| current.finished_at < manifest.finished_at);
        if newer {
            latest.insert(manifest.table_name.clone(), manifest);
        }
    }
    Ok(latest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::IndexType;
    use crate::util::write_json_pretty;

    fn manifest(table: &str, backend: &str, finished_at: &str) -> IndexRunManifest {
        IndexRunManifest {
            manifest_version: 1,
            run_id: format!("index-{finished_at}"),
            started_at: finished_at.to_string(),
            finished_at: finished_at.to_string(),
            backend: backend.to_string(),
            table_name: table.to_string(),
            index_type: IndexType::Sparse,
            source_path: "corpus.jsonl".to_string(),
            source_sha256: "00".to_string(),
            pretokenized: false,
            embedding_dim: None,
            rows_loaded: 3,
            rows_total: 3,
            fts: None,
            vector_index: None,
            duration_ms: 1,
        }
    }

    #[test]
    fn newest_manifest_per_table_wins_for_the_requested_backend() {
        let dir = tempfile::tempdir().expect("temp dir");
        let root = dir.path();
        write_json_pretty(
            &root.join("index_corpus_1.json"),
            &manifest("corpus", "duckdb", "2026-01-01T00:00:00Z"),
        )
        .expect("write");
        write_json_pretty(
            &root.join("index_corpus_2.json"),
            &manifest("corpus", "duckdb", "2026-02-01T00:00:00Z"),
        )
        .expect("write");
        write_json_pretty(
            &root.join("index_corpus_3.json"),
            &manifest("corpus", "sqlite", "2026-03-01T00:00:00Z"),
        )
        .expect("write");
        fs::write(root.join("index_broken.json"), "{").expect("write");
        fs::write(root.join("search_1.json"), "{}").expect("write");

        let latest = latest_index_manifests(root, "duckdb").expect("scan");
        assert_eq!(latest.len(), 1);
        assert_eq!(latest["corpus"].finished_at, "2026-02-01T00:00:00Z");
    }
}
