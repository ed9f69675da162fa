use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result, bail};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info};

use super::{Backend, BackendKind, Indexer, Searcher, TableCatalog};
use crate::analysis::{fts5_match_query, validate_identifier};
use crate::model::{
    Document, EmbeddingRecord, FtsParams, Hit, IndexType, RankedList, VectorIndexParams,
    sort_hits,
};
use crate::semantic::{
    cosine_similarity, decode_embedding_blob, encode_embedding_blob, ensure_dimension,
};
use crate::util::ensure_directory;

const META_TABLE: &str = "quackir_meta";
const EMBEDDING_DIM_KEY: &str = "embedding_dim";

pub struct SqliteBackend {
    connection: Connection,
}

impl SqliteBackend {
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            ensure_directory(parent)?;
        }

        let connection = Connection::open(db_path)
            .with_context(|| format!("failed to open sqlite database {}", db_path.display()))?;
        connection
            .pragma_update(None, "journal_mode", "WAL")
            .context("failed to set journal_mode=WAL")?;
        connection
            .pragma_update(None, "synchronous", "NORMAL")
            .context("failed to set synchronous=NORMAL")?;

        Self::from_connection(connection)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let connection =
            Connection::open_in_memory().context("failed to open in-memory sqlite database")?;
        Self::from_connection(connection)
    }

    fn from_connection(connection: Connection) -> Result<Self> {
        connection
            .execute_batch(&format!(
                "
                CREATE TABLE IF NOT EXISTS {META_TABLE} (
                  table_name TEXT NOT NULL,
                  key TEXT NOT NULL,
                  value TEXT NOT NULL,
                  PRIMARY KEY (table_name, key)
                );
                "
            ))
            .context("failed to initialize sqlite metadata table")?;
        Ok(Self { connection })
    }

    #[cfg(test)]
    pub(super) fn connection(&self) -> &Connection {
        &self.connection
    }

    fn set_meta(&self, table_name: &str, key: &str, value: &str) -> Result<()> {
        self.connection.execute(
            &format!(
                "INSERT INTO {META_TABLE}(table_name, key, value) VALUES(?1, ?2, ?3)
                 ON CONFLICT(table_name, key) DO UPDATE SET value=excluded.value"
            ),
            params![table_name, key, value],
        )?;
        Ok(())
    }

    fn clear_meta(&self, table_name: &str) -> Result<()> {
        self.connection.execute(
            &format!("DELETE FROM {META_TABLE} WHERE table_name = ?1"),
            [table_name],
        )?;
        Ok(())
    }

    fn meta(&self, table_name: &str, key: &str) -> Result<Option<String>> {
        let value = self
            .connection
            .query_row(
                &format!("SELECT value FROM {META_TABLE} WHERE table_name = ?1 AND key = ?2"),
                params![table_name, key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    fn embedding_dim(&self, table_name: &str) -> Result<usize> {
        let raw = self
            .meta(table_name, EMBEDDING_DIM_KEY)?
            .with_context(|| format!("no embedding dimension recorded for table {table_name}"))?;
        raw.parse::<usize>()
            .with_context(|| format!("invalid embedding dimension '{raw}' for table {table_name}"))
    }

    fn has_table(&self, name: &str) -> Result<bool> {
        let found = self
            .connection
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE name = ?1 LIMIT 1",
                [name],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        Ok(found.is_some())
    }
}

fn fts_table_name(table_name: &str) -> String {
    format!("{table_name}_fts")
}

impl TableCatalog for SqliteBackend {
    fn columns(&mut self, table_name: &str) -> Result<Vec<String>> {
        let mut statement = self
            .connection
            .prepare("SELECT name FROM pragma_table_info(?1) ORDER BY cid")
            .with_context(|| format!("failed to inspect schema for table {table_name}"))?;
        let rows = statement.query_map([table_name], |row| row.get::<_, String>(0))?;

        let mut columns = Vec::new();
        for row in rows {
            columns.push(row?);
        }
        Ok(columns)
    }

    fn list_tables(&mut self) -> Result<Vec<String>> {
        let mut statement = self.connection.prepare(
            "
            SELECT name, COALESCE(sql, '')
            FROM sqlite_master
            WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
            ORDER BY name ASC
            ",
        )?;
        let rows = statement.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut all = Vec::<(String, String)>::new();
        for row in rows {
            all.push(row?);
        }

        let virtual_tables = all
            .iter()
            .filter(|(_, sql)| sql.to_ascii_uppercase().starts_with("CREATE VIRTUAL TABLE"))
            .map(|(name, _)| format!("{name}_"))
            .collect::<HashSet<String>>();

        Ok(all
            .into_iter()
            .map(|(name, _)| name)
            .filter(|name| name != META_TABLE)
            .filter(|name| {
                let candidate = format!("{name}_");
                !virtual_tables.iter().any(|prefix| candidate.starts_with(prefix.as_str()))
            })
            .collect())
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

impl Indexer for SqliteBackend {
    fn init_table(
        &mut self,
        table_name: &str,
        index_type: IndexType,
        embedding_dim: usize,
    ) -> Result<()> {
        let table_name = validate_identifier(table_name)?;
        let fts_table = fts_table_name(table_name);

        let create = match index_type {
            IndexType::Sparse => {
                format!("CREATE TABLE \"{table_name}\" (id TEXT PRIMARY KEY, contents TEXT)")
            }
            IndexType::Dense => {
                if embedding_dim == 0 {
                    bail!("embedding dimension must be positive for dense table {table_name}");
                }
                format!("CREATE TABLE \"{table_name}\" (id TEXT PRIMARY KEY, embedding BLOB NOT NULL)")
            }
        };

        self.connection
            .execute_batch(&format!(
                "
                DROP TABLE IF EXISTS \"{fts_table}\";
                DROP TABLE IF EXISTS \"{table_name}\";
                {create};
                "
            ))
            .with_context(|| format!("failed to create table {table_name}"))?;

        self.clear_meta(table_name)?;
        if index_type == IndexType::Dense {
            self.set_meta(table_name, EMBEDDING_DIM_KEY, &embedding_dim.to_string())?;
        }

        info!(
            table = table_name,
            index_type = index_type.as_str(),
            embedding_dim,
            "sqlite table initialized"
        );
        Ok(())
    }

    fn insert_documents(&mut self, table_name: &str, documents: &[Document]) -> Result<usize> {
        let table_name = validate_identifier(table_name)?;
        let transaction = self.connection.transaction()?;
        {
            let mut statement = transaction.prepare(&format!(
                "INSERT INTO \"{table_name}\" (id, contents) VALUES (?1, ?2)"
            ))?;
            for document in documents {
                statement
                    .execute(params![document.id, document.contents])
                    .with_context(|| {
                        format!("failed to insert document '{}' into {table_name}", document.id)
                    })?;
            }
        }
        transaction.commit()?;
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
                "INSERT INTO \"{table_name}\" (id, embedding) VALUES (?1, ?2)"
            ))?;
            for record in records {
                ensure_dimension(&record.id, &record.vector, expected_dim)?;
                statement
                    .execute(params![record.id, encode_embedding_blob(&record.vector)])
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
        let fts_table = fts_table_name(table_name);

        self.connection
            .execute_batch(&format!(
                "
                DROP TABLE IF EXISTS \"{fts_table}\";
                CREATE VIRTUAL TABLE \"{fts_table}\"
                USING fts5(contents, content='{table_name}', content_rowid='rowid', tokenize='unicode61 remove_diacritics 0');
                INSERT INTO \"{fts_table}\"(\"{fts_table}\") VALUES('rebuild');
                "
            ))
            .with_context(|| format!("failed to build FTS5 index for {table_name}"))?;

        debug!(
            table = table_name,
            k1 = params.k1,
            b = params.b,
            "sqlite fts5 ignores k1/b"
        );
        info!(table = table_name, fts_table = %fts_table, "fts index built");
        Ok(())
    }

    fn vector_index(&mut self, table_name: &str, _params: &VectorIndexParams) -> Result<String> {
        bail!(
            "vector indexing is not supported on the sqlite backend; embedding search on {table_name} scans the table"
        )
    }
}

impl Searcher for SqliteBackend {
    fn fts_search(&mut self, query: &str, top_n: usize, table_name: &str) -> Result<RankedList> {
        let table_name = validate_identifier(table_name)?;
        let fts_table = fts_table_name(table_name);
        if !self.has_table(&fts_table)? {
            bail!("table {table_name} has no full-text index; run fts_index first");
        }

        let match_query = fts5_match_query(query);
        if match_query.is_empty() {
            return Ok(RankedList::lower_is_better(Vec::new()));
        }

        let mut statement = self.connection.prepare(&format!(
            "
            SELECT t.id, bm25(\"{fts_table}\") AS score
            FROM \"{fts_table}\"
            JOIN \"{table_name}\" t ON t.rowid = \"{fts_table}\".rowid
            WHERE \"{fts_table}\" MATCH ?1
            ORDER BY score ASC, t.id ASC
            LIMIT ?2
            "
        ))?;
        let rows = statement.query_map(params![match_query, top_n as i64], |row| {
            Ok(Hit::new(row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
        })?;

        let mut hits = Vec::new();
        for row in rows {
            hits.push(row.with_context(|| format!("failed to read fts hit from {table_name}"))?);
        }
        Ok(RankedList::lower_is_better(hits))
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

        let mut statement = self
            .connection
            .prepare(&format!("SELECT id, embedding FROM \"{table_name}\""))?;
        let mut rows = statement.query([])?;

        let mut hits = Vec::new();
        while let Some(row) = rows.next()? {
            let id = row.get::<_, String>(0)?;
            let blob = row.get::<_, Vec<u8>>(1)?;
            let Some(vector) = decode_embedding_blob(&blob, expected_dim) else {
                bail!("stored embedding for '{id}' in {table_name} has the wrong size");
            };
            hits.push(Hit::new(id, cosine_similarity(query_embedding, &vector)));
        }

        sort_hits(&mut hits);
        hits.truncate(top_n);
        Ok(RankedList::higher_is_better(hits))
    }
}

impl Backend for SqliteBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Sqlite
    }
}
