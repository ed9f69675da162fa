use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::backend::{BackendKind, SearchMethod};
use crate::embedding::{DEFAULT_OLLAMA_HOST, SecretProvider};
use crate::model::IndexType;
use crate::semantic::DEFAULT_EMBEDDING_DIM;

#[derive(Parser, Debug)]
#[command(
    name = "quackir",
    version,
    about = "Reproducible IR inside DuckDB, SQLite and Postgres"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    ConvertCorpus(ConvertCorpusArgs),
    ConvertQueries(ConvertQueriesArgs),
    ConvertQrels(ConvertQrelsArgs),
    Encode(EncodeArgs),
    Index(IndexArgs),
    Embed(EmbedArgs),
    Search(SearchArgs),
    Eval(EvalArgs),
    Status(StatusArgs),
}

#[derive(Args, Debug, Clone)]
pub struct BackendArgs {
    #[arg(long, value_enum, default_value_t = BackendKind::Duckdb)]
    pub backend: BackendKind,

    #[arg(long, default_value = ".cache/quackir")]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub db_path: Option<PathBuf>,

    #[arg(long, env = "TIMESCALE_SERVICE_URL", hide_env_values = true)]
    pub pg_dsn: Option<String>,

    #[arg(long, default_value = "quackir")]
    pub pg_dbname: String,

    #[arg(long, default_value = "postgres")]
    pub pg_user: String,

    #[arg(long, default_value_t = false)]
    pub pg_textsearch: bool,
}

#[derive(Args, Debug, Clone)]
pub struct OllamaArgs {
    #[arg(long, env = "OLLAMA_HOST", default_value = DEFAULT_OLLAMA_HOST)]
    pub ollama_host: String,

    #[arg(long, default_value_t = 32)]
    pub embed_batch_size: usize,

    #[arg(long, default_value_t = 5)]
    pub embed_max_retries: u32,

    #[arg(long, default_value_t = 300)]
    pub embed_timeout_secs: u64,
}

#[derive(Args, Debug, Clone)]
pub struct FlockArgs {
    #[arg(long, value_enum, default_value_t = SecretProvider::Ollama)]
    pub flock_provider: SecretProvider,

    #[arg(long, default_value = "127.0.0.1:11434")]
    pub flock_api_url: String,

    #[arg(long)]
    pub flock_api_key: Option<String>,

    #[arg(long)]
    pub flock_resource_name: Option<String>,

    #[arg(long)]
    pub flock_api_version: Option<String>,

    #[arg(long, default_value = "quackir-embedder")]
    pub flock_model_alias: String,

    #[arg(long)]
    pub flock_provider_model: Option<String>,

    #[arg(long, default_value = "ollama")]
    pub flock_model_provider: String,

    #[arg(long, default_value = "{}")]
    pub flock_model_options: String,
}

#[derive(Args, Debug, Clone)]
pub struct ConvertCorpusArgs {
    #[arg(long)]
    pub input: PathBuf,

    #[arg(long)]
    pub output: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct ConvertQueriesArgs {
    #[arg(long)]
    pub input: PathBuf,

    #[arg(long)]
    pub output: PathBuf,

    #[arg(long)]
    pub qrels: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct ConvertQrelsArgs {
    #[arg(long)]
    pub input: PathBuf,

    #[arg(long)]
    pub output: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct EncodeArgs {
    #[arg(long)]
    pub input: PathBuf,

    #[arg(long)]
    pub output: PathBuf,

    #[arg(long)]
    pub model: String,

    #[command(flatten)]
    pub ollama: OllamaArgs,
}

#[derive(Args, Debug, Clone)]
pub struct IndexArgs {
    #[command(flatten)]
    pub backend: BackendArgs,

    #[arg(long)]
    pub table: String,

    #[arg(long)]
    pub input: PathBuf,

    #[arg(long, value_enum, default_value_t = IndexType::Sparse)]
    pub index_type: IndexType,

    #[arg(long, default_value_t = DEFAULT_EMBEDDING_DIM)]
    pub embedding_dim: usize,

    #[arg(long, default_value_t = false)]
    pub pretokenized: bool,

    #[arg(long, default_value_t = false)]
    pub fts: bool,

    #[arg(long, default_value_t = false)]
    pub vector_index: bool,

    #[arg(long)]
    pub k1: Option<f64>,

    #[arg(long)]
    pub b: Option<f64>,

    #[arg(long, default_value = "english")]
    pub text_config: String,

    #[arg(long, default_value = "hnsw")]
    pub vector_using: String,

    #[arg(long, default_value = "vector_cosine_ops")]
    pub vector_opclass: String,

    #[arg(long)]
    pub manifest_path: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct EmbedArgs {
    #[arg(long, default_value = ".cache/quackir")]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub db_path: Option<PathBuf>,

    #[arg(long)]
    pub table: String,

    #[arg(long)]
    pub input: PathBuf,

    #[arg(long, default_value = "id")]
    pub id_column: String,

    #[arg(long, default_value = "contents")]
    pub contents_column: String,

    #[arg(long, default_value_t = DEFAULT_EMBEDDING_DIM)]
    pub embedding_dim: usize,

    #[arg(long, default_value_t = false)]
    pub append: bool,

    #[command(flatten)]
    pub flock: FlockArgs,
}

#[derive(Args, Debug, Clone)]
pub struct SearchArgs {
    #[command(flatten)]
    pub backend: BackendArgs,

    #[arg(long, value_enum, default_value_t = SearchMethod::Fts)]
    pub method: SearchMethod,

    #[arg(long = "table", required = true)]
    pub tables: Vec<String>,

    #[arg(long, conflicts_with = "topics")]
    pub query: Option<String>,

    #[arg(long, required_unless_present = "query")]
    pub topics: Option<PathBuf>,

    #[arg(long, default_value = "q1")]
    pub qid: String,

    #[arg(long)]
    pub output: Option<PathBuf>,

    #[arg(long, default_value = "quackir")]
    pub run_tag: String,

    #[arg(long, default_value_t = 1000)]
    pub top_n: usize,

    #[arg(long, default_value_t = 60)]
    pub rrf_k: u32,

    #[arg(long, default_value_t = 1.0)]
    pub weight_keyword: f64,

    #[arg(long, default_value_t = 1.0)]
    pub weight_semantic: f64,

    #[arg(long)]
    pub query_embeddings: Option<PathBuf>,

    #[arg(long, conflicts_with = "query_embeddings")]
    pub embed_model: Option<String>,

    #[command(flatten)]
    pub ollama: OllamaArgs,

    #[arg(long, default_value_t = false, conflicts_with_all = ["query_embeddings", "embed_model"])]
    pub flock: bool,

    #[command(flatten)]
    pub flock_args: FlockArgs,

    #[arg(long)]
    pub manifest_path: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct EvalArgs {
    #[arg(long)]
    pub qrels: PathBuf,

    #[arg(long)]
    pub run: PathBuf,

    #[arg(long = "metric", value_delimiter = ',', default_values = ["ndcg@10", "recall@100", "map"])]
    pub metrics: Vec<String>,

    #[arg(long, default_value_t = false)]
    pub complete: bool,

    #[arg(long, default_value_t = false)]
    pub per_query: bool,

    #[arg(long)]
    pub json_output: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[command(flatten)]
    pub backend: BackendArgs,
}
