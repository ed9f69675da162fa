use std::io::Write;

use super::duckdb::{cosine_search_sql, create_fts_index_sql, match_bm25_sql, parse_array_dim};
use super::postgres::{
    bm25_create_index_sql, bm25_search_sql, csv_embedding_row, replace_nul, vector_create_index_sql,
    vector_search_sql,
};
use super::*;

fn corpus_file(body: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".jsonl")
        .tempfile()
        .expect("temp file should open");
    file.write_all(body.as_bytes())
        .expect("temp file should accept writes");
    file
}

const CORPUS: &str = concat!(
    "{\"id\": \"MED-1\", \"contents\": \"Abdominal aortic aneurysms and smoking\"}\n",
    "{\"id\": \"MED-2\", \"contents\": \"Statin use in breast cancer survivors\"}\n",
    "{\"id\": \"MED-3\", \"contents\": \"Aortic stiffness in athletes\"}\n",
);

const EMBEDDINGS: &str = concat!(
    "{\"id\": \"MED-1\", \"vector\": [1.0, 0.0, 0.0]}\n",
    "{\"id\": \"MED-2\", \"vector\": [0.0, 1.0, 0.0]}\n",
    "{\"id\": \"MED-3\", \"vector\": [0.7, 0.7, 0.0]}\n",
);

fn sqlite_with_tables() -> SqliteBackend {
    let mut backend = SqliteBackend::open_in_memory().expect("sqlite should open");
    let corpus = corpus_file(CORPUS);
    let embeddings = corpus_file(EMBEDDINGS);

    backend
        .init_table("corpus", IndexType::Sparse, 0)
        .expect("sparse table");
    backend
        .load_table("corpus", corpus.path(), IndexType::Sparse, false)
        .expect("sparse load");
    backend
        .fts_index("corpus", &FtsParams::default())
        .expect("fts index");

    backend
        .init_table("dense", IndexType::Dense, 3)
        .expect("dense table");
    backend
        .load_table("dense", embeddings.path(), IndexType::Dense, false)
        .expect("dense load");
    backend
}

#[test]
fn sqlite_catalog_reports_tables_kinds_and_counts() {
    let mut backend = sqlite_with_tables();

    assert_eq!(
        backend.list_tables().expect("tables"),
        vec!["corpus".to_string(), "dense".to_string()]
    );
    assert_eq!(backend.get_index_type("corpus").expect("kind"), IndexType::Sparse);
    assert_eq!(backend.get_index_type("dense").expect("kind"), IndexType::Dense);
    assert_eq!(backend.get_num_rows("corpus").expect("count"), 3);
    assert!(backend.get_index_type("missing").is_err());
}

#[test]
fn sqlite_sparse_rows_are_stored_analyzed() {
    let backend = sqlite_with_tables();
    let contents = backend
        .connection()
        .query_row("SELECT contents FROM corpus WHERE id = 'MED-1'", [], |row| {
            row.get::<_, String>(0)
        })
        .expect("row");
    assert_eq!(contents, "abdomin aortic aneurysm smoke");
}

#[test]
fn sqlite_fts_search_ranks_matching_documents_higher_is_better() {
    let mut backend = sqlite_with_tables();
    let tables = vec!["corpus".to_string()];
    let hits = backend
        .search(&SearchRequest {
            method: SearchMethod::Fts,
            query_text: Some("How to Help Prevent Abdominal Aortic Aneurysms"),
            query_embedding: None,
            top_n: 10,
            tables: &tables,
            rrf: RrfParams::default(),
        })
        .expect("fts search");

    let ids = hits.iter().map(|hit| hit.docid.as_str()).collect::<Vec<_>>();
    assert_eq!(ids, vec!["MED-1", "MED-3"]);
    assert!(hits[0].score > hits[1].score);
    assert!(hits[1].score > 0.0);
}

#[test]
fn sqlite_fts_search_of_stopwords_only_is_empty() {
    let mut backend = sqlite_with_tables();
    let list = backend.fts_search("the and of", 5, "corpus").expect("search");
    assert!(list.hits.is_empty());
}

#[test]
fn sqlite_dense_search_orders_by_cosine() {
    let mut backend = sqlite_with_tables();
    let list = backend
        .embedding_search(&[1.0, 0.1, 0.0], 2, "dense")
        .expect("dense search");

    assert_eq!(list.order, crate::model::ScoreOrder::HigherIsBetter);
    assert_eq!(list.hits.len(), 2);
    assert_eq!(list.hits[0].docid, "MED-1");
    assert_eq!(list.hits[1].docid, "MED-3");
}

#[test]
fn sqlite_dense_dimension_mismatch_is_rejected() {
    let mut backend = sqlite_with_tables();
    assert!(backend.embedding_search(&[1.0, 0.0], 2, "dense").is_err());

    let bad = corpus_file("{\"id\": \"MED-9\", \"vector\": [1.0, 0.0]}\n");
    assert!(
        backend
            .load_table("dense", bad.path(), IndexType::Dense, false)
            .is_err()
    );
}

#[test]
fn rrf_search_resolves_table_roles_in_either_order() {
    let mut backend = sqlite_with_tables();
    let tables = vec!["dense".to_string(), "corpus".to_string()];
    let hits = backend
        .search(&SearchRequest {
            method: SearchMethod::Rrf,
            query_text: Some("aortic aneurysm"),
            query_embedding: Some(&[1.0, 0.0, 0.0][..]),
            top_n: 3,
            tables: &tables,
            rrf: RrfParams::default(),
        })
        .expect("rrf search");

    assert_eq!(hits[0].docid, "MED-1");
    assert!((hits[0].score - 2.0 / 61.0).abs() < 1e-12);
    assert_eq!(hits.len(), 3);
}

#[test]
fn rrf_search_rejects_two_sparse_tables() {
    let mut backend = sqlite_with_tables();
    let err = backend
        .rrf_search("aortic", &[1.0, 0.0, 0.0], 3, ("corpus", "corpus"), &RrfParams::default())
        .expect_err("both tables are sparse");
    assert!(err.to_string().contains("one sparse and one dense"));
}

#[test]
fn search_requires_query_inputs_and_table_names() {
    let mut backend = sqlite_with_tables();
    let tables = vec!["dense".to_string()];
    let missing_embedding = SearchRequest {
        method: SearchMethod::Dense,
        query_text: Some("aortic"),
        query_embedding: None,
        top_n: 3,
        tables: &tables,
        rrf: RrfParams::default(),
    };
    assert!(backend.search(&missing_embedding).is_err());

    let no_tables: Vec<String> = Vec::new();
    let missing_table = SearchRequest {
        method: SearchMethod::Fts,
        query_text: Some("aortic"),
        query_embedding: None,
        top_n: 3,
        tables: &no_tables,
        rrf: RrfParams::default(),
    };
    assert!(backend.search(&missing_table).is_err());

    let injected = vec!["corpus; DROP TABLE corpus".to_string()];
    let bad_name = SearchRequest {
        method: SearchMethod::Fts,
        query_text: Some("aortic"),
        query_embedding: None,
        top_n: 3,
        tables: &injected,
        rrf: RrfParams::default(),
    };
    assert!(backend.search(&bad_name).is_err());
}

#[test]
fn sqlite_reinit_drops_previous_rows_and_fts_table() {
    let mut backend = sqlite_with_tables();
    backend
        .init_table("corpus", IndexType::Sparse, 0)
        .expect("reinit");
    assert_eq!(backend.get_num_rows("corpus").expect("count"), 0);
    assert!(backend.fts_search("aortic", 5, "corpus").is_err());
}

#[test]
fn sqlite_vector_index_is_unsupported() {
    let mut backend = sqlite_with_tables();
    assert!(
        backend
            .vector_index("dense", &VectorIndexParams::default())
            .is_err()
    );
}

#[test]
fn duckdb_dense_tables_round_trip_and_rank_by_cosine() {
    let mut backend = DuckDbBackend::open_in_memory().expect("duckdb should open");
    let embeddings = corpus_file(EMBEDDINGS);

    backend
        .init_table("dense", IndexType::Dense, 3)
        .expect("dense table");
    assert_eq!(backend.embedding_dim("dense").expect("dim"), 3);
    let loaded = backend
        .load_table("dense", embeddings.path(), IndexType::Dense, false)
        .expect("dense load");
    assert_eq!(loaded, 3);

    assert_eq!(backend.list_tables().expect("tables"), vec!["dense".to_string()]);
    assert_eq!(backend.get_index_type("dense").expect("kind"), IndexType::Dense);

    let list = backend
        .embedding_search(&[0.0, 1.0, 0.0], 2, "dense")
        .expect("dense search");
    assert_eq!(list.hits[0].docid, "MED-2");
    assert!((list.hits[0].score - 1.0).abs() < 1e-9);
    assert_eq!(list.hits[1].docid, "MED-3");
}

#[test]
fn duckdb_sparse_load_uses_the_analyzer() {
    let mut backend = DuckDbBackend::open_in_memory().expect("duckdb should open");
    let corpus = corpus_file(CORPUS);
    backend
        .init_table("corpus", IndexType::Sparse, 0)
        .expect("sparse table");
    backend
        .load_table("corpus", corpus.path(), IndexType::Sparse, false)
        .expect("sparse load");

    assert_eq!(backend.get_num_rows("corpus").expect("count"), 3);
    let contents = backend
        .connection()
        .query_row("SELECT contents FROM corpus WHERE id = 'MED-2'", [], |row| {
            row.get::<_, String>(0)
        })
        .expect("row");
    assert_eq!(contents, "statin us breast cancer survivor");
}

#[test]
fn duckdb_sql_builders_quote_and_size_vectors() {
    assert_eq!(parse_array_dim("DOUBLE[768]"), Some(768));
    assert_eq!(parse_array_dim("DOUBLE[]"), None);
    assert_eq!(parse_array_dim("VARCHAR"), None);

    let fts = create_fts_index_sql("corpus");
    assert!(fts.contains("stemmer = 'none'"));
    assert!(fts.contains("overwrite = 1"));

    let bm25 = match_bm25_sql("corpus", "patient's aortic", 0.9, 0.4, 5);
    assert!(bm25.contains("fts_main_corpus.match_bm25(id, 'patient''s aortic', k := 0.9, b := 0.4)"));
    assert!(bm25.contains("LIMIT 5"));

    let dense = cosine_search_sql("dense", 2, 10);
    assert!(dense.contains("CAST(CAST(? AS VARCHAR) AS DOUBLE[2])"));
    assert!(dense.contains("LIMIT 10"));
}

#[test]
fn duckdb_keeps_small_magnitude_embeddings() {
    let mut backend = DuckDbBackend::open_in_memory().expect("duckdb should open");
    backend
        .init_table("dense", IndexType::Dense, 2)
        .expect("dense table");
    let records = vec![
        EmbeddingRecord {
            id: "tiny".to_string(),
            vector: vec![3e-9, 4e-9],
        },
        EmbeddingRecord {
            id: "axis".to_string(),
            vector: vec![1.0, 0.0],
        },
    ];
    assert_eq!(backend.insert_embeddings("dense", &records).expect("insert"), 2);

    let (first, second) = backend
        .connection()
        .query_row(
            "SELECT embedding[1], embedding[2] FROM dense WHERE id = 'tiny'",
            [],
            |row| Ok((row.get::<_, f64>(0)?, row.get::<_, f64>(1)?)),
        )
        .expect("row");
    assert_eq!((first, second), (3e-9, 4e-9));

    let list = backend
        .embedding_search(&[3.0, 4.0], 2, "dense")
        .expect("dense search");
    assert_eq!(list.hits[0].docid, "tiny");
    assert!((list.hits[0].score - 1.0).abs() < 1e-9);
    assert!((list.hits[1].score - 0.6).abs() < 1e-9);

    let tiny_query = backend
        .embedding_search(&[4e-9, -3e-9], 1, "dense")
        .expect("dense search");
    assert_eq!(tiny_query.hits[0].docid, "axis");
    assert!((tiny_query.hits[0].score - 0.8).abs() < 1e-9);
}

#[test]
fn duckdb_reinit_drops_a_stale_fts_index() {
    let mut backend = DuckDbBackend::open_in_memory().expect("duckdb should open");
    let corpus = corpus_file(CORPUS);
    backend
        .init_table("corpus", IndexType::Sparse, 0)
        .expect("sparse table");
    backend
        .load_table("corpus", corpus.path(), IndexType::Sparse, false)
        .expect("sparse load");
    assert!(backend.fts_search("aortic", 5, "corpus").is_err());

    backend
        .connection()
        .execute_batch("CREATE SCHEMA fts_main_corpus; CREATE TABLE fts_main_corpus.docs (docid VARCHAR);")
        .expect("stale fts schema");
    backend
        .init_table("corpus", IndexType::Sparse, 0)
        .expect("reinit");

    let schemas = backend
        .connection()
        .query_row(
            "SELECT COUNT(*) FROM information_schema.schemata WHERE schema_name = 'fts_main_corpus'",
            [],
            |row| row.get::<_, i64>(0),
        )
        .expect("schema count");
    assert_eq!(schemas, 0);
    assert_eq!(backend.get_num_rows("corpus").expect("count"), 0);
    let err = backend
        .fts_search("aortic", 5, "corpus")
        .expect_err("no fts index after reinit");
    assert!(err.to_string().contains("no full-text index"));
}

#[test]
fn postgres_searches_order_by_the_indexed_operator_alone() {
    let bm25 = bm25_search_sql("corpus", "statin's use");
    assert!(bm25.contains("to_bm25query('statin''s use', 'corpus_bm25_idx')"));
    assert!(bm25.contains("ORDER BY score ASC\n"));
    assert!(!bm25.contains("id ASC"));

    let dense = vector_search_sql("dense");
    assert!(dense.contains("ORDER BY embedding <=> $1::text::vector\n"));
    assert!(!dense.contains("id ASC"));
}

#[test]
fn postgres_helpers_escape_and_name_indexes() {
    assert_eq!(replace_nul("a\0b"), "a\u{FFFD}b");
    assert_eq!(
        csv_embedding_row("MED-\"1\"", &[0.5, 1.0]),
        "\"MED-\"\"1\"\"\",\"[0.5, 1.0]\"\n"
    );

    let params = BackendKind::Postgres.default_fts_params();
    assert_eq!(
        bm25_create_index_sql("corpus", &params),
        "CREATE INDEX \"corpus_bm25_idx\" ON \"corpus\" USING bm25(contents) WITH (text_config='english', k1=1.5, b=0.8)"
    );
    assert_eq!(
        vector_create_index_sql("dense", &VectorIndexParams::default()).expect("sql"),
        "CREATE INDEX \"dense_embedding_idx\" ON \"dense\" USING hnsw (embedding vector_cosine_ops)"
    );

    let hostile = VectorIndexParams {
        using: "hnsw; DROP TABLE x".to_string(),
        ..VectorIndexParams::default()
    };
    assert!(vector_create_index_sql("dense", &hostile).is_err());
}
