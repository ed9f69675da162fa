use std::path::Path;

use ::duckdb::{Connection, Params, params};
use anyhow::{Context, Result, bail};
use tracing::info;

use super::{Backend, BackendKind, Indexer, Searcher, TableCatalog};
use crate::analysis::{tokenize, validate_identifier};
use crate::model::{
    Document, EmbeddingRecord, FtsParams, Hit, IndexType, RankedList, VectorIndexParams,
};
use crate::semantic::{ensure_dimension, format_vector_literal};
use crate::util::{ensure_directory, sql_string_literal};

const META_TABLE: &str = "quackir_meta";

pub struct DuckDbBackend {
    connection: Connection,
    fts_loaded: bool,
}

impl DuckDbBackend {
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            ensure_directory(parent)?;
        }
        let connection = Connection::open(db_path)
            .with_context(|| format!("failed to open duckdb database {}", db_path.display()))?;
        Self::from_connection(connection)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let connection =
            Connection::open_in_memory().context("failed to open in-memory duckdb database")?;
        Self::from_connection(connection)
    }

    fn from_connection(connection: Connection) -> Result<Self> {
        connection
            .execute_batch(&format!(
                "
                CREATE TABLE IF NOT EXISTS {META_TABLE} (
                  table_name VARCHAR NOT NULL,
                  key VARCHAR NOT NULL,
                  value VARCHAR NOT NULL,
                  PRIMARY KEY (table_name, key)
                );
                "
            ))
            .context("failed to initialize duckdb metadata table")?;
        Ok(Self {
            connection,
            fts_loaded: false,
        })
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    fn load_fts_extension(&mut self) -> Result<()> {
        if !self.fts_loaded {
            self.connection
                .execute_batch("INSTALL fts; LOAD fts;")
                .context("failed to install/load the duckdb fts extension")?;
            self.fts_loaded = true;
        }
        Ok(())
    }

    fn set_meta(&self, table_name: &str, key: &str, value: &str) -> Result<()> {
        self.connection.execute(
            &format!("INSERT OR REPLACE INTO {META_TABLE} (table_name, key, value) VALUES (?, ?, ?)"),
            params![table_name, key, value],
        )?;
        Ok(())
    }

    fn meta(&self, table_name: &str, key: &str) -> Result<Option<String>> {
        let mut statement = self.connection.prepare(&format!(
            "SELECT value FROM {META_TABLE} WHERE table_name = ? AND key = ?"
        ))?;
        let mut rows = statement.query(params![table_name, key])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get::<_, String>(0)?)),
            None => Ok(None),
        }
    }

    fn bm25_params(&self, table_name: &str) -> Result<(f64, f64)> {
        let defaults = FtsParams::default();
        let k1 = match self.meta(table_name, "k1")? {
            Some(raw) => raw
                .parse::<f64>()
                .with_context(|| format!("invalid stored k1 '{raw}' for {table_name}"))?,
            None => defaults.k1,
        };
        let b = match self.meta(table_name, "b")? {
            Some(raw) => raw
                .parse::<f64>()
                .with_context(|| format!("invalid stored b '{raw}' for {table_name}"))?,
            None => defaults.b,
        };
        Ok((k1, b))
    }

    fn has_fts_index(&self, table_name: &str) -> Result<bool> {
        let count = self
            .connection
            .query_row(
                "SELECT COUNT(*) FROM information_schema.schemata WHERE schema_name = ?",
                params![fts_schema(table_name)],
                |row| row.get::<_, i64>(0),
            )
            .with_context(|| format!("failed to look up the fts index of {table_name}"))?;
        Ok(count > 0)
    }

    pub fn embedding_dim(&self, table_name: &str) -> Result<usize> {
        let mut statement = self.connection.prepare(
            "
            SELECT data_type
            FROM information_schema.columns
            WHERE table_schema = 'main' AND table_name = ? AND column_name = 'embedding'
            ",
        )?;
        let mut rows = statement.query(params![table_name])?;
        let Some(row) = rows.next()? else {
            bail!("table {table_name} has no embedding column");
        };
        let data_type = row.get::<_, String>(0)?;
        parse_array_dim(&data_type)
            .with_context(|| format!("unexpected embedding column type '{data_type}' in {table_name}"))
    }
}

pub(super) fn parse_array_dim(data_type: &str) -> Option<usize> {
    let open = data_type.rfind('[')?;
    let close = data_type.rfind(']')?;
    if close <= open + 1 {
        return None;
    }
    data_type[open + 1..close].trim().parse::<usize>().ok()
}

fn fts_schema(table_name: &str) -> String {
    format!("fts_main_{table_name}")
}

pub(super) fn create_fts_index_sql(table_name: &str) -> String {
    format!(
        "PRAGMA create_fts_index('{table_name}', 'id', 'contents', stemmer = 'none', stopwords = 'none', ignore = '\\s+', strip_accents = 0, lower = 0, overwrite = 1)"
    )
}

pub(super) fn match_bm25_sql(table_name: &str, query: &str, k1: f64, b: f64, top_n: usize) -> String {
    format!(
        "
        SELECT id, score
        FROM (
          SELECT id, fts_main_{table_name}.match_bm25(id, {query}, k := {k1}, b := {b}) AS score
          FROM \"{table_name}\"
        ) ranked
        WHERE score IS NOT NULL
        ORDER BY score DESC, id ASC
        LIMIT {top_n}
        ",
        query = sql_string_literal(query),
    )
}

pub(super) fn cosine_search_sql(table_name: &str, embedding_dim: usize, top_n: usize) -> String {
    format!(
        "
        SELECT id, CAST(array_cosine_similarity(embedding, CAST(CAST(? AS VARCHAR) AS DOUBLE[{embedding_dim}])) AS DOUBLE) AS score
        FROM \"{table_name}\"
        ORDER BY score DESC, id ASC
        LIMIT {top_n}
        "
    )
}

fn collect_hits<P: Params>(
    connection: &Connection,
    sql: &str,
    params: P,
    table_name: &str,
) -> Result<Vec<Hit>> {
    let mut statement = connection
        .prepare(sql)
        .with_context(|| format!("failed to prepare search over {table_name}"))?;
    let rows = statement.query_map(params, |row| {
        Ok(Hit::new(row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
    })?;

    let mut hits = Vec::new();
    for row in rows {
        hits.push(row.with_context(|| format!("failed to read hit from {table_name}"))?);
    }
    Ok(hits)
}

impl TableCatalog for DuckDbBackend {
    fn columns(&mut self, table_name: &str) -> Result<Vec<String>> {
        let mut statement = self.connection.prepare(
            "
            SELECT column_name
            FROM information_schema.columns
            WHERE table_schema = 'main' AND table_name = ?
            ORDER BY ordinal_position
            ",
        )?;
        let rows = statement.query_map(params![table_name], |row| row.get::<_, String>(0))?;

        let mut columns = Vec::new();
        for row in rows {
            columns.push(row?);
        }
        Ok(columns)
    }

    fn list_tables(&mut self) -> Result<Vec<String>> {
        let mut statement = self.connection.prepare(&format!(
            "
            SELECT table_name
            FROM information_schema.tables
            WHERE table_schema = 'main' AND table_name <> '{META_TABLE}'
            ORDER BY table_name
            "
        ))?;
        let rows = statement.query_map([], |row| row.get::<_, String>(0))?;

        let mut tables = Vec::new();
        for row in rows {
            tables.push(row?);
        }
        Ok(tables)
    }

    fn get_num_rows(&mut self, table_name: &str) -> Result<usize> {
        let table_name = validate_identifier(table_name)?;
        let count = self
            .connection
            .query_row(&format!("SELECT COUNT(*) FROM \"{table_name}\""), [], |row| {
                row.get::<_, i64>(0)
            })
            .with_context(|| format!("failed to count rows in {table_name}"))?;
        Ok(count as usize)
    }
}

impl Indexer for DuckDbBackend {
    fn init_table(
        &mut self,
        table_name: &str,
        index_type: IndexType,
        embedding_dim: usize,
    ) -> Result<()> {
        let table_name = validate_identifier(table_name)?;
        let create = match index_type {
            IndexType::Sparse => {
                format!("CREATE TABLE \"{table_name}\" (id VARCHAR PRIMARY KEY, contents VARCHAR)")
            }
            IndexType::Dense => {
                if embedding_dim == 0 {
                    bail!("embedding dimension must be positive for dense table {table_name}");
                }
                format!(
                    "CREATE TABLE \"{table_name}\" (id VARCHAR PRIMARY KEY, embedding DOUBLE[{embedding_dim}])"
                )
            }
        };

        self.connection
            .execute_batch(&format!(
                "
                DROP SCHEMA IF EXISTS {fts_schema} CASCADE;
                DROP TABLE IF EXISTS \"{table_name}\";
                {create};
                DELETE FROM {META_TABLE} WHERE table_name = {name};
                ",
                name = sql_string_literal(table_name),
                fts_schema = fts_schema(table_name),
            ))
            .with_context(|| format!("failed to create table {table_name}"))?;

        info!(
            table = table_name,
            index_type = index_type.as_str(),
            embedding_dim,
            "duckdb table initialized"
        );
        Ok(())
    }

    fn insert_documents(&mut self, table_name: &str, documents: &[Document]) -> Result<usize> {
        let table_name = validate_identifier(table_name)?;
        let mut appender = self
            .connection
            .appender(table_name)
            .with_context(|| format!("failed to open appender for {table_name}"))?;
        for document in documents {
            appender
                .append_row(params![document.id, document.contents])
                .with_context(|| {
                    format!("failed to append document '{}' to {table_name}", document.id)
                })?;
        }
        appender
            .flush()
            .with_context(|| format!("failed to flush rows into {table_name}"))?;
        Ok(documents.len())
    }

    fn insert_embeddings(
        &mut self,
        table_name: &str,
        records: &[EmbeddingRecord],
    ) -> Result<usize> {
        let table_name = validate_identifier(table_name)?;
        let expected_dim = self.embedding_dim(table_name)?;

        let transaction = self.connection.transaction()?;
        {
            let mut statement = transaction.prepare(&format!(
                "INSERT INTO \"{table_name}\" (id, embedding) VALUES (?, CAST(CAST(? AS VARCHAR) AS DOUBLE[{expected_dim}]))"
            ))?;
            for record in records {
                ensure_dimension(&record.id, &record.vector, expected_dim)?;
                statement
                    .execute(params![record.id, format_vector_literal(&record.vector)])
                    .with_context(|| {
                        format!("failed to insert embedding '{}' into {table_name}", record.id)
                    })?;
            }
        }
        transaction.commit()?;
        Ok(records.len())
    }

    fn fts_index(&mut self, table_name: &str, params: &FtsParams) -> Result<()> {
        let table_name = validate_identifier(table_name)?;
        if self.get_index_type(table_name)? != IndexType::Sparse {
            bail!("full-text index needs a sparse table; {table_name} has no contents column");
        }
        self.load_fts_extension()?;

        self.connection
            .execute_batch(&create_fts_index_sql(table_name))
            .with_context(|| format!("failed to build fts index for {table_name}"))?;
        self.set_meta(table_name, "k1", &params.k1.to_string())?;
        self.set_meta(table_name, "b", &params.b.to_string())?;

        info!(table = table_name, k1 = params.k1, b = params.b, "fts index built");
        Ok(())
    }

    fn vector_index(&mut self, table_name: &str, _params: &VectorIndexParams) -> Result<String> {
        bail!(
            "vector indexing is not supported on the duckdb backend; embedding search on {table_name} scans the table"
        )
    }
}

impl Searcher for DuckDbBackend {
    fn fts_search(&mut self, query: &str, top_n: usize, table_name: &str) -> Result<RankedList> {
        let table_name = validate_identifier(table_name)?;
        let analyzed = tokenize(query);
        if !self.has_fts_index(table_name)? {
            bail!("table {table_name} has no full-text index; run the fts index step first");
        }
        if analyzed.is_empty() {
            return Ok(RankedList::higher_is_better(Vec::new()));
        }
        self.load_fts_extension()?;

        let (k1, b) = self.bm25_params(table_name)?;
        let sql = match_bm25_sql(table_name, &analyzed, k1, b, top_n);
        let hits = collect_hits(&self.connection, &sql, [], table_name)?;
        Ok(RankedList::higher_is_better(hits))
    }

    fn embedding_search(
        &mut self,
        query_embedding: &[f64],
        top_n: usize,
        table_name: &str,
    ) -> Result<RankedList> {
        let table_name = validate_identifier(table_name)?;
        let expected_dim = self.embedding_dim(table_name)?;
        ensure_dimension("query", query_embedding, expected_dim)?;

        let sql = cosine_search_sql(table_name, expected_dim, top_n);
        let literal = format_vector_literal(query_embedding);
        let hits = collect_hits(&self.connection, &sql, params![literal], table_name)?;
        Ok(RankedList::higher_is_better(hits))
    }
}

impl Backend for DuckDbBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Duckdb
    }
}
