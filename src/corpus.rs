use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use crate::model::{Document, EmbeddingRecord, Topic};
use crate::semantic::parse_vector_text;
use crate::util::{file_extension, for_each_line, sql_string_literal};

#[derive(Debug, Deserialize)]
struct EmbeddingLine {
    #[serde(alias = "qid", alias = "_id")]
    id: String,
    vector: Vec<f64>,
}

pub fn read_documents(path: &Path) -> Result<Vec<Document>> {
    match file_extension(path).as_deref() {
        Some("jsonl") => read_documents_jsonl(path),
        Some("tsv") => read_documents_tsv(path),
        Some("parquet") => read_documents_parquet(path),
        _ => bail!(
            "unsupported corpus file type (use .jsonl, .tsv or .parquet): {}",
            path.display()
        ),
    }
}

pub fn read_embeddings(path: &Path) -> Result<Vec<EmbeddingRecord>> {
    match file_extension(path).as_deref() {
        Some("jsonl") => read_embeddings_jsonl(path),
        Some("parquet") => read_embeddings_parquet(path),
        _ => bail!(
            "unsupported embeddings file type (use .jsonl or .parquet): {}",
            path.display()
        ),
    }
}

fn read_documents_jsonl(path: &Path) -> Result<Vec<Document>> {
    let mut documents = Vec::new();
    for_each_line(path, |_, line| {
        let document: Document =
            serde_json::from_str(line).context("expected a JSON object with id and contents")?;
        documents.push(document);
        Ok(())
    })?;
    Ok(documents)
}

fn read_documents_tsv(path: &Path) -> Result<Vec<Document>> {
    let mut documents = Vec::new();
    for_each_line(path, |_, line| {
        let (id, contents) = line
            .split_once('\t')
            .context("expected a tab between id and contents")?;
        documents.push(Document {
            id: id.to_string(),
            contents: contents.to_string(),
        });
        Ok(())
    })?;
    Ok(documents)
}

fn read_documents_parquet(path: &Path) -> Result<Vec<Document>> {
    let sql = format!(
        "SELECT CAST(id AS VARCHAR), CAST(contents AS VARCHAR) FROM read_parquet({})",
        sql_string_literal(&path.display().to_string())
    );
    read_parquet_pairs(path, &sql)?
        .into_iter()
        .map(|(id, contents)| Ok(Document { id, contents }))
        .collect()
}

fn read_embeddings_jsonl(path: &Path) -> Result<Vec<EmbeddingRecord>> {
    let mut records = Vec::new();
    for_each_line(path, |_, line| {
        let parsed: EmbeddingLine =
            serde_json::from_str(line).context("expected a JSON object with id and vector")?;
        records.push(EmbeddingRecord {
            id: parsed.id,
            vector: parsed.vector,
        });
        Ok(())
    })?;
    Ok(records)
}

fn read_embeddings_parquet(path: &Path) -> Result<Vec<EmbeddingRecord>> {
    let sql = format!(
        "SELECT CAST(id AS VARCHAR), CAST(vector AS VARCHAR) FROM read_parquet({})",
        sql_string_literal(&path.display().to_string())
    );
    read_parquet_pairs(path, &sql)?
        .into_iter()
        .map(|(id, raw_vector)| {
            let vector = parse_vector_text(&raw_vector)
                .with_context(|| format!("invalid vector for '{id}' in {}", path.display()))?;
            Ok(EmbeddingRecord { id, vector })
        })
        .collect()
}

fn read_parquet_pairs(path: &Path, sql: &str) -> Result<Vec<(String, String)>> {
    let connection = duckdb::Connection::open_in_memory()
        .context("failed to open in-memory duckdb for parquet reading")?;
    let mut statement = connection
        .prepare(sql)
        .with_context(|| format!("failed to prepare parquet scan of {}", path.display()))?;
    let rows = statement.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;

    let mut out = Vec::new();
    for row in rows {
        out.push(row.with_context(|| format!("failed to read row from {}", path.display()))?);
    }
    Ok(out)
}

pub fn read_topics(path: &Path) -> Result<Vec<Topic>> {
    let mut topics = Vec::new();
    for_each_line(path, |_, line| {
        let (qid, text) = line
            .split_once('\t')
            .context("expected a tab between query id and query text")?;
        topics.push(Topic {
            qid: qid.trim().to_string(),
            text: text.trim().to_string(),
        });
        Ok(())
    })?;
    Ok(topics)
}

pub fn read_query_embeddings(path: &Path) -> Result<HashMap<String, Vec<f64>>> {
    let records = read_embeddings(path)?;
    let mut out = HashMap::with_capacity(records.len());
    for record in records {
        out.insert(record.id, record.vector);
    }
    Ok(out)
}
