use std::io::Write;

use ::postgres::{Client, Config, NoTls, Row};
use anyhow::{Context, Result, bail};
use tracing::info;

use super::{
    Backend, BackendKind, Indexer, PostgresTarget, Searcher, TableCatalog, bm25_index_name,
    embedding_index_name,
};
use crate::analysis::{clean_tsquery, tokenize, validate_identifier};
use crate::model::{
    Document, EmbeddingRecord, FtsParams, Hit, IndexType, RankedList, VectorIndexParams,
};
use crate::semantic::{ensure_dimension, format_vector_literal};
use crate::util::sql_string_literal;

pub struct PostgresBackend {
    client: Client,
    use_pg_textsearch: bool,
}

impl PostgresBackend {
    pub fn connect(target: &PostgresTarget, use_pg_textsearch: bool) -> Result<Self> {
        let mut client = match target {
            PostgresTarget::Dsn(dsn) => {
                Client::connect(dsn, NoTls).context("failed to connect to postgres service url")?
            }
            PostgresTarget::Local { dbname, user } => Config::new()
                .host("localhost")
                .dbname(dbname)
                .user(user)
                .connect(NoTls)
                .with_context(|| format!("failed to connect to postgres database {dbname} as {user}"))?,
        };

        if use_pg_textsearch {
            client
                .batch_execute("CREATE EXTENSION IF NOT EXISTS pg_textsearch;")
                .context("failed to enable the pg_textsearch extension")?;
        }

        Ok(Self {
            client,
            use_pg_textsearch,
        })
    }

    fn embedding_dim(&mut self, table_name: &str) -> Result<usize> {
        let row = self
            .client
            .query_opt(
                "
                SELECT a.atttypmod
                FROM pg_attribute a
                JOIN pg_class c ON c.oid = a.attrelid
                WHERE c.relname = $1 AND a.attname = 'embedding' AND NOT a.attisdropped
                LIMIT 1
                ",
                &[&table_name],
            )
            .with_context(|| format!("failed to read embedding dimension of {table_name}"))?;
        let Some(row) = row else {
            bail!("table {table_name} has no embedding column");
        };
        let typmod = row.try_get::<_, i32>(0)?;
        if typmod <= 0 {
            bail!("embedding column of {table_name} has no fixed dimension");
        }
        Ok(typmod as usize)
    }
}

pub(super) fn replace_nul(text: &str) -> String {
    text.replace('\0', "\u{FFFD}")
}

pub(super) fn csv_embedding_row(id: &str, vector: &[f64]) -> String {
    format!(
        "\"{}\",\"{}\"\n",
        replace_nul(id).replace('"', "\"\""),
        format_vector_literal(vector)
    )
}

pub(super) fn bm25_create_index_sql(table_name: &str, params: &FtsParams) -> String {
    format!(
        "CREATE INDEX \"{index}\" ON \"{table_name}\" USING bm25(contents) WITH (text_config={config}, k1={k1}, b={b})",
        index = bm25_index_name(table_name),
        config = sql_string_literal(&params.text_config),
        k1 = params.k1,
        b = params.b,
    )
}

pub(super) fn bm25_search_sql(table_name: &str, query: &str) -> String {
    format!(
        "
        SELECT id, (contents <@> to_bm25query({query}, {index}))::float8 AS score
        FROM \"{table_name}\"
        ORDER BY score ASC
        LIMIT $1
        ",
        query = sql_string_literal(&replace_nul(query)),
        index = sql_string_literal(&bm25_index_name(table_name)),
    )
}

pub(super) fn vector_search_sql(table_name: &str) -> String {
    format!(
        "
        SELECT id, (1 - (embedding <=> $1::text::vector))::float8 AS score
        FROM \"{table_name}\"
        ORDER BY embedding <=> $1::text::vector
        LIMIT $2
        "
    )
}

fn rows_to_hits(rows: &[Row]) -> Result<Vec<Hit>> {
    rows.iter()
        .map(|row| Ok(Hit::new(row.try_get::<_, String>(0)?, row.try_get::<_, f64>(1)?)))
        .collect()
}

pub(super) fn gin_index_name(table_name: &str) -> String {
    format!("{table_name}_contents_gin")
}

pub(super) fn vector_create_index_sql(table_name: &str, params: &VectorIndexParams) -> Result<String> {
    let using = validate_identifier(&params.using)?;
    let opclass = validate_identifier(&params.opclass)?;
    let column = validate_identifier(&params.column)?;
    Ok(format!(
        "CREATE INDEX \"{index}\" ON \"{table_name}\" USING {using} ({column} {opclass})",
        index = embedding_index_name(table_name),
    ))
}

impl TableCatalog for PostgresBackend {
    fn columns(&mut self, table_name: &str) -> Result<Vec<String>> {
        let rows = self
            .client
            .query(
                "
                SELECT column_name::text
                FROM information_schema.columns
                WHERE table_schema = current_schema() AND table_name = $1
                ORDER BY ordinal_position
                ",
                &[&table_name],
            )
            .with_context(|| format!("failed to inspect schema for table {table_name}"))?;
        rows.iter()
            .map(|row| Ok(row.try_get::<_, String>(0)?))
            .collect()
    }

    fn list_tables(&mut self) -> Result<Vec<String>> {
        let rows = self.client.query(
            "
            SELECT table_name::text
            FROM information_schema.tables
            WHERE table_schema = current_schema() AND table_type = 'BASE TABLE'
            ORDER BY table_name
            ",
            &[],
        )?;
        rows.iter()
            .map(|row| Ok(row.try_get::<_, String>(0)?))
            .collect()
    }

    fn get_num_rows(&mut self, table_name: &str) -> Result<usize> {
        let table_name = validate_identifier(table_name)?;
        let row = self
            .client
            .query_one(format!("SELECT COUNT(*) FROM \"{table_name}\"").as_str(), &[])
            .with_context(|| format!("failed to count rows in {table_name}"))?;
        Ok(row.try_get::<_, i64>(0)? as usize)
    }
}

impl Indexer for PostgresBackend {
    fn init_table(
        &mut self,
        table_name: &str,
        index_type: IndexType,
        embedding_dim: usize,
    ) -> Result<()> {
        let table_name = validate_identifier(table_name)?;
        let create = match index_type {
            IndexType::Sparse => {
                format!("CREATE TABLE \"{table_name}\" (id TEXT PRIMARY KEY, contents TEXT)")
            }
            IndexType::Dense => {
                if embedding_dim == 0 {
                    bail!("embedding dimension must be positive for dense table {table_name}");
                }
                format!(
                    "CREATE TABLE \"{table_name}\" (id TEXT PRIMARY KEY, embedding vector({embedding_dim}))"
                )
            }
        };

        self.client
            .batch_execute(&format!(
                "DROP TABLE IF EXISTS \"{table_name}\"; {create};"
            ))
            .with_context(|| format!("failed to create table {table_name}"))?;

        info!(
            table = table_name,
            index_type = index_type.as_str(),
            embedding_dim,
            "postgres table initialized"
        );
        Ok(())
    }

    fn analyzes_text(&self) -> bool {
        self.use_pg_textsearch
    }

    fn insert_documents(&mut self, table_name: &str, documents: &[Document]) -> Result<usize> {
        let table_name = validate_identifier(table_name)?;
        let mut transaction = self.client.transaction()?;
        let statement = transaction.prepare(&format!(
            "INSERT INTO \"{table_name}\" (id, contents) VALUES ($1, $2)"
        ))?;
        for document in documents {
            let id = replace_nul(&document.id);
            let contents = replace_nul(&document.contents);
            transaction
                .execute(&statement, &[&id, &contents])
                .with_context(|| {
                    format!("failed to insert document '{}' into {table_name}", document.id)
                })?;
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
        for record in records {
            ensure_dimension(&record.id, &record.vector, expected_dim)?;
        }

        let mut transaction = self.client.transaction()?;
        {
            let mut writer = transaction
                .copy_in(
                    format!("COPY \"{table_name}\" (id, embedding) FROM STDIN WITH CSV").as_str(),
                )
                .with_context(|| format!("failed to start COPY into {table_name}"))?;
            for record in records {
                writer
                    .write_all(csv_embedding_row(&record.id, &record.vector).as_bytes())
                    .with_context(|| format!("failed to stream embedding '{}'", record.id))?;
            }
            writer
                .finish()
                .with_context(|| format!("failed to finish COPY into {table_name}"))?;
        }
        transaction.commit()?;
        Ok(records.len())
    }

    fn fts_index(&mut self, table_name: &str, params: &FtsParams) -> Result<()> {
        let table_name = validate_identifier(table_name)?;
        if self.use_pg_textsearch {
            let index_name = bm25_index_name(table_name);
            self.client
                .batch_execute(&format!(
                    "DROP INDEX IF EXISTS \"{index_name}\"; {};",
                    bm25_create_index_sql(table_name, params)
                ))
                .with_context(|| format!("failed to build bm25 index {index_name}"))?;
            info!(
                table = table_name,
                index = %index_name,
                text_config = %params.text_config,
                k1 = params.k1,
                b = params.b,
                "pg_textsearch index built"
            );
        } else {
            let index_name = gin_index_name(table_name);
            self.client
                .batch_execute(&format!(
                    "
                    DROP INDEX IF EXISTS \"{index_name}\";
                    CREATE INDEX \"{index_name}\" ON \"{table_name}\"
                    USING gin(to_tsvector('simple', contents));
                    "
                ))
                .with_context(|| format!("failed to build gin index {index_name}"))?;
            info!(table = table_name, index = %index_name, "gin tsvector index built");
        }
        Ok(())
    }

    fn vector_index(&mut self, table_name: &str, params: &VectorIndexParams) -> Result<String> {
        let table_name = validate_identifier(table_name)?;
        let index_name = embedding_index_name(table_name);
        let create = vector_create_index_sql(table_name, params)?;
        self.client
            .batch_execute(&format!("DROP INDEX IF EXISTS \"{index_name}\"; {create};"))
            .with_context(|| format!("failed to build vector index {index_name}"))?;

        info!(
            table = table_name,
            index = %index_name,
            using = %params.using,
            opclass = %params.opclass,
            "vector index built"
        );
        Ok(index_name)
    }
}

impl Searcher for PostgresBackend {
    fn fts_search(&mut self, query: &str, top_n: usize, table_name: &str) -> Result<RankedList> {
        let table_name = validate_identifier(table_name)?;
        let limit = top_n as i64;

        if self.use_pg_textsearch {
            let sql = bm25_search_sql(table_name, query);
            let rows = self
                .client
                .query(sql.as_str(), &[&limit])
                .with_context(|| format!("bm25 search over {table_name} failed"))?;
            return Ok(RankedList::lower_is_better(rows_to_hits(&rows)?).with_docid_ties());
        }

        let ts_query = clean_tsquery(&tokenize(query));
        if ts_query.is_empty() {
            return Ok(RankedList::higher_is_better(Vec::new()));
        }
        let rows = self
            .client
            .query(
                format!(
                    "
                    SELECT id, ts_rank(to_tsvector('simple', contents), to_tsquery('simple', $1))::float8 AS score
                    FROM \"{table_name}\"
                    WHERE to_tsvector('simple', contents) @@ to_tsquery('simple', $1)
                    ORDER BY score DESC, id ASC
                    LIMIT $2
                    "
                )
                .as_str(),
                &[&ts_query, &limit],
            )
            .with_context(|| format!("ts_rank search over {table_name} failed"))?;
        Ok(RankedList::higher_is_better(rows_to_hits(&rows)?))
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

        let vector = format_vector_literal(query_embedding);
        let rows = self
            .client
            .query(
                vector_search_sql(table_name).as_str(),
                &[&vector, &(top_n as i64)],
            )
            .with_context(|| format!("vector search over {table_name} failed"))?;
        Ok(RankedList::higher_is_better(rows_to_hits(&rows)?).with_docid_ties())
    }
}

impl Backend for PostgresBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Postgres
    }
}
