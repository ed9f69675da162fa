use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub contents: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub id: String,
    pub vector: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topic {
    pub qid: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Hit {
    pub docid: String,
    pub score: f64,
}

impl Hit {
    pub fn new(docid: impl Into<String>, score: f64) -> Self {
        Self {
            docid: docid.into(),
            score,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ScoreOrder {
    HigherIsBetter,
    LowerIsBetter,
}

#[derive(Debug, Clone)]
pub struct RankedList {
    pub hits: Vec<Hit>,
    pub order: ScoreOrder,
}

impl RankedList {
    pub fn higher_is_better(hits: Vec<Hit>) -> Self {
        Self {
            hits,
            order: ScoreOrder::HigherIsBetter,
        }
    }

    pub fn lower_is_better(hits: Vec<Hit>) -> Self {
        Self {
            hits,
            order: ScoreOrder::LowerIsBetter,
        }
    }

    pub fn with_docid_ties(mut self) -> Self {
        let order = self.order;
        self.hits.sort_by(|left, right| {
            let by_score = match order {
                ScoreOrder::HigherIsBetter => right.score.partial_cmp(&left.score),
                ScoreOrder::LowerIsBetter => left.score.partial_cmp(&right.score),
            };
            by_score
                .unwrap_or(Ordering::Equal)
                .then_with(|| left.docid.cmp(&right.docid))
        });
        self
    }

    pub fn into_descending(self) -> Vec<Hit> {
        match self.order {
            ScoreOrder::HigherIsBetter => self.hits,
            ScoreOrder::LowerIsBetter => self
                .hits
                .into_iter()
                .map(|hit| Hit {
                    score: -hit.score,
                    docid: hit.docid,
                })
                .collect(),
        }
    }
}

pub fn sort_hits(hits: &mut [Hit]) {
    hits.sort_by(|left, right| {
        right
            .score
            .partial_cmp(&left.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| left.docid.cmp(&right.docid))
    });
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum IndexType {
    Sparse,
    Dense,
}

impl IndexType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sparse => "sparse",
            Self::Dense => "dense",
        }
    }

    pub fn from_columns<S: AsRef<str>>(columns: &[S]) -> Option<Self> {
        if columns.iter().any(|column| column.as_ref() == "contents") {
            Some(Self::Sparse)
        } else if columns.iter().any(|column| column.as_ref() == "embedding") {
            Some(Self::Dense)
        } else {
            None
        }
    }
}

impl fmt::Display for IndexType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FtsParams {
    pub k1: f64,
    pub b: f64,
    pub text_config: String,
}

impl Default for FtsParams {
    fn default() -> Self {
        Self {
            k1: 0.9,
            b: 0.4,
            text_config: "english".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct VectorIndexParams {
    pub using: String,
    pub opclass: String,
    pub column: String,
}

impl Default for VectorIndexParams {
    fn default() -> Self {
        Self {
            using: "hnsw".to_string(),
            opclass: "vector_cosine_ops".to_string(),
            column: "embedding".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct RrfParams {
    pub k: u32,
    pub weight_keyword: f64,
    pub weight_semantic: f64,
}

impl Default for RrfParams {
    fn default() -> Self {
        Self {
            k: 60,
            weight_keyword: 1.0,
            weight_semantic: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexRunManifest {
    pub manifest_version: u32,
    pub run_id: String,
    pub started_at: String,
    pub finished_at: String,
    pub backend: String,
    pub table_name: String,
    pub index_type: IndexType,
    pub source_path: String,
    pub source_sha256: String,
    pub pretokenized: bool,
    pub embedding_dim: Option<usize>,
    pub rows_loaded: usize,
    pub rows_total: usize,
    pub fts: Option<FtsParams>,
    pub vector_index: Option<String>,
    pub duration_ms: u128,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchRunManifest {
    pub manifest_version: u32,
    pub run_id: String,
    pub generated_at: String,
    pub backend: String,
    pub method: String,
    pub tables: Vec<String>,
    pub topics_path: String,
    pub run_path: String,
    pub run_tag: String,
    pub top_n: usize,
    pub rrf: Option<RrfParams>,
    pub queries: usize,
    pub lines_written: usize,
    pub duration_ms: u128,
}
