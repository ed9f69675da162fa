use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::info;

use crate::analysis::{tokenize, validate_identifier};
use crate::corpus::{read_documents, read_embeddings};
use crate::fusion::fuse_rrf;
use crate::model::{
    Document, EmbeddingRecord, FtsParams, Hit, IndexType, RankedList, RrfParams, VectorIndexParams,
};

mod duckdb;
mod postgres;
mod sqlite;

pub use self::duckdb::DuckDbBackend;
pub use self::postgres::PostgresBackend;
pub use self::sqlite::SqliteBackend;

const LOAD_PROGRESS_EVERY: usize = 10_000;

#[derive(Copy, Clone, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum BackendKind {
    Duckdb,
    Sqlite,
    Postgres,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Duckdb => "duckdb",
            Self::Sqlite => "sqlite",
            Self::Postgres => "postgres",
        }
    }

    pub fn default_fts_params(self) -> FtsParams {
        match self {
            Self::Duckdb | Self::Sqlite => FtsParams::default(),
            Self::Postgres => FtsParams {
                k1: 1.5,
                b: 0.8,
                ..FtsParams::default()
            },
        }
    }
}

#[derive(Debug, Clone)]
pub enum PostgresTarget {
    Dsn(String),
    Local { dbname: String, user: String },
}

#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub kind: BackendKind,
    pub db_path: PathBuf,
    pub postgres: PostgresTarget,
    pub use_pg_textsearch: bool,
}

pub trait Backend: Indexer + Searcher {
    fn kind(&self) -> BackendKind;
}

pub fn open(config: &BackendConfig) -> Result<Box<dyn Backend>> {
    let backend: Box<dyn Backend> = match config.kind {
        BackendKind::Duckdb => Box::new(DuckDbBackend::open(&config.db_path)?),
        BackendKind::Sqlite => Box::new(SqliteBackend::open(&config.db_path)?),
        BackendKind::Postgres => Box::new(PostgresBackend::connect(
            &config.postgres,
            config.use_pg_textsearch,
        )?),
    };
    info!(backend = config.kind.as_str(), "backend connection opened");
    Ok(backend)
}

pub fn bm25_index_name(table_name: &str) -> String {
    format!("{table_name}_bm25_idx")
}

pub fn embedding_index_name(table_name: &str) -> String {
    format!("{table_name}_embedding_idx")
}

pub trait TableCatalog {
    fn columns(&mut self, table_name: &str) -> Result<Vec<String>>;

    fn list_tables(&mut self) -> Result<Vec<String>>;

    fn get_num_rows(&mut self, table_name: &str) -> Result<usize>;

    fn get_index_type(&mut self, table_name: &str) -> Result<IndexType> {
        let columns = self.columns(table_name)?;
        IndexType::from_columns(&columns).with_context(|| {
            format!(
                "unknown index type for table {table_name}; ensure it has either an 'embedding' column or a 'contents' column"
            )
        })
    }
}

pub trait Indexer: TableCatalog {
    fn init_table(
        &mut self,
        table_name: &str,
        index_type: IndexType,
        embedding_dim: usize,
    ) -> Result<()>;

    fn insert_documents(&mut self, table_name: &str, documents: &[Document]) -> Result<usize>;

    fn insert_embeddings(&mut self, table_name: &str, records: &[EmbeddingRecord])
    -> Result<usize>;

    fn analyzes_text(&self) -> bool {
        false
    }

    fn load_table(
        &mut self,
        table_name: &str,
        file_path: &Path,
        index_type: IndexType,
        pretokenized: bool,
    ) -> Result<usize> {
        validate_identifier(table_name)?;
        let loaded = match index_type {
            IndexType::Sparse => {
                let mut documents = read_documents(file_path)?;
                if !pretokenized && !self.analyzes_text() {
                    for (index, document) in documents.iter_mut().enumerate() {
                        document.contents = tokenize(&document.contents);
                        if (index + 1) % LOAD_PROGRESS_EVERY == 0 {
                            info!(table = table_name, analyzed = index + 1, "analyzing corpus");
                        }
                    }
                }
                self.insert_documents(table_name, &documents)?
            }
            IndexType::Dense => {
                let records = read_embeddings(file_path)?;
                self.insert_embeddings(table_name, &records)?
            }
        };

        info!(
            table = table_name,
            index_type = index_type.as_str(),
            rows = loaded,
            path = %file_path.display(),
            "table loaded"
        );
        Ok(loaded)
    }

    fn fts_index(&mut self, table_name: &str, params: &FtsParams) -> Result<()>;

    fn vector_index(&mut self, table_name: &str, params: &VectorIndexParams) -> Result<String>;
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum SearchMethod {
    Fts,
    Dense,
    Rrf,
}

impl SearchMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fts => "fts",
            Self::Dense => "dense",
            Self::Rrf => "rrf",
        }
    }

    pub fn needs_embedding(self) -> bool {
        matches!(self, Self::Dense | Self::Rrf)
    }
}

#[derive(Debug, Clone)]
pub struct SearchRequest<'a> {
    pub method: SearchMethod,
    pub query_text: Option<&'a str>,
    pub query_embedding: Option<&'a [f64]>,
    pub top_n: usize,
    pub tables: &'a [String],
    pub rrf: RrfParams,
}

pub trait Searcher: TableCatalog {
    fn fts_search(&mut self, query: &str, top_n: usize, table_name: &str) -> Result<RankedList>;

    fn embedding_search(
        &mut self,
        query_embedding: &[f64],
        top_n: usize,
        table_name: &str,
    ) -> Result<RankedList>;

    fn rrf_search(
        &mut self,
        query: &str,
        query_embedding: &[f64],
        top_n: usize,
        table_names: (&str, &str),
        params: &RrfParams,
    ) -> Result<Vec<Hit>> {
        let (sparse_table, dense_table) = self.resolve_hybrid_tables(table_names)?;
        let keyword = self.fts_search(query, top_n, sparse_table)?.into_descending();
        let semantic = self
            .embedding_search(query_embedding, top_n, dense_table)?
            .into_descending();
        Ok(fuse_rrf(&keyword, &semantic, params, top_n))
    }

    fn resolve_hybrid_tables<'t>(
        &mut self,
        (first, second): (&'t str, &'t str),
    ) -> Result<(&'t str, &'t str)> {
        match (self.get_index_type(first)?, self.get_index_type(second)?) {
            (IndexType::Sparse, IndexType::Dense) => Ok((first, second)),
            (IndexType::Dense, IndexType::Sparse) => Ok((second, first)),
            (left, right) => bail!(
                "hybrid search needs one sparse and one dense table; {first} is {left}, {second} is {right}"
            ),
        }
    }

    fn search(&mut self, request: &SearchRequest<'_>) -> Result<Vec<Hit>> {
        let top_n = request.top_n.max(1);

        match request.method {
            SearchMethod::Fts => Ok(self
                .fts_search(request_query(request)?, top_n, request_table(request, 0)?)?
                .into_descending()),
            SearchMethod::Dense => Ok(self
                .embedding_search(request_embedding(request)?, top_n, request_table(request, 0)?)?
                .into_descending()),
            SearchMethod::Rrf => self.rrf_search(
                request_query(request)?,
                request_embedding(request)?,
                top_n,
                (request_table(request, 0)?, request_table(request, 1)?),
                &request.rrf,
            ),
        }
    }
}

fn request_table<'a>(request: &SearchRequest<'a>, index: usize) -> Result<&'a str> {
    let name = request
        .tables
        .get(index)
        .map(String::as_str)
        .with_context(|| {
            format!(
                "{} search needs at least {} table name(s)",
                request.method.as_str(),
                index + 1
            )
        })?;
    validate_identifier(name)
}

fn request_query<'a>(request: &SearchRequest<'a>) -> Result<&'a str> {
    request
        .query_text
        .filter(|value| !value.trim().is_empty())
        .context("search needs a non-empty query string")
}

fn request_embedding<'a>(request: &SearchRequest<'a>) -> Result<&'a [f64]> {
    request
        .query_embedding
        .filter(|value| !value.is_empty())
        .context("search needs a query embedding")
}

#[cfg(test)]
mod tests;
