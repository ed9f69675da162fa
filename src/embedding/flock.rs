use std::path::Path;

use ::duckdb::{Connection, params};
use anyhow::{Context, Result, bail};
use tracing::info;

use crate::analysis::validate_identifier;
use crate::model::Hit;
use crate::semantic::parse_vector_text;
use crate::util::{file_extension, sql_string_literal};

#[derive(Copy, Clone, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum SecretProvider {
    Ollama,
    Openai,
    Azure,
}

impl SecretProvider {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ollama => "OLLAMA",
            Self::Openai => "OPENAI",
            Self::Azure => "AZURE",
        }
    }

    pub fn secret_name(self) -> String {
        format!("__default_{}", self.as_str().to_ascii_lowercase())
    }
}

#[derive(Debug, Clone, Default)]
pub struct SecretParams {
    pub api_url: Option<String>,
    pub api_key: Option<String>,
    pub resource_name: Option<String>,
    pub api_version: Option<String>,
}

pub fn secret_fields(
    provider: SecretProvider,
    params: &SecretParams,
) -> Result<Vec<(&'static str, String)>> {
    fn required(value: &Option<String>, provider: SecretProvider, field: &str) -> Result<String> {
        match value.as_deref().map(str::trim) {
            Some(value) if !value.is_empty() => Ok(value.to_string()),
            _ => bail!("{field} is required for {} secrets", provider.as_str()),
        }
    }

    let mut fields = vec![("TYPE", provider.as_str().to_string())];
    match provider {
        SecretProvider::Ollama => {
            fields.push(("API_URL", required(&params.api_url, provider, "api_url")?));
        }
        SecretProvider::Openai => {
            fields.push(("API_KEY", required(&params.api_key, provider, "api_key")?));
        }
        SecretProvider::Azure => {
            fields.push(("API_KEY", required(&params.api_key, provider, "api_key")?));
            fields.push((
                "RESOURCE_NAME",
                required(&params.resource_name, provider, "resource_name")?,
            ));
            fields.push((
                "API_VERSION",
                required(&params.api_version, provider, "api_version")?,
            ));
        }
    }
    Ok(fields)
}

pub fn create_secret_sql(secret_name: &str, fields: &[(&'static str, String)]) -> String {
    let body = fields
        .iter()
        .map(|(key, value)| format!("{key} {}", sql_string_literal(value)))
        .collect::<Vec<String>>()
        .join(", ");
    format!("CREATE SECRET \"{secret_name}\" ({body})")
}

pub fn create_model_sql(alias: &str, provider_model: &str, provider: &str, options_json: &str) -> String {
    format!(
        "CREATE MODEL({}, {}, {}, {})",
        sql_string_literal(alias),
        sql_string_literal(provider_model),
        sql_string_literal(provider),
        if options_json.trim().is_empty() { "{}" } else { options_json.trim() },
    )
}

fn model_config(alias: &str, secret_name: &str) -> String {
    format!(
        "{{'model_name': {}, 'secret': {}}}",
        sql_string_literal(alias),
        sql_string_literal(secret_name)
    )
}

pub fn create_embedding_sql(
    dest_table: &str,
    file_path: &Path,
    id_column: &str,
    contents_column: &str,
    embedding_dim: usize,
    alias: &str,
    secret_name: &str,
) -> Result<String> {
    let dest_table = validate_identifier(dest_table)?;
    let id_column = validate_identifier(id_column)?;
    let contents_column = validate_identifier(contents_column)?;
    let source = sql_string_literal(&file_path.display().to_string());
    let reader = match file_extension(file_path).as_deref() {
        Some("jsonl") => format!("read_json_auto({source})"),
        Some("parquet") => format!("read_parquet({source})"),
        _ => bail!(
            "unsupported file type for flock embedding (use .jsonl or .parquet): {}",
            file_path.display()
        ),
    };

    Ok(format!(
        "
        INSERT INTO \"{dest_table}\"
        SELECT
          id,
          CAST(
            llm_embedding({model}, {{'context_columns': [{{'data': {contents_column}}}]}})
            AS DOUBLE[{embedding_dim}]
          ) AS embedding
        FROM (SELECT CAST({id_column} AS VARCHAR) AS id, {contents_column} FROM {reader})
        ",
        model = model_config(alias, secret_name),
    ))
}

pub fn embed_query_sql(embedding_dim: usize, alias: &str, secret_name: &str) -> String {
    format!(
        "SELECT CAST(CAST(llm_embedding({model}, {{'context_columns': [{{'data': ?}}]}}) AS DOUBLE[{embedding_dim}]) AS VARCHAR)",
        model = model_config(alias, secret_name),
    )
}

pub fn search_embedding_sql(
    table_name: &str,
    top_n: usize,
    embedding_dim: usize,
    alias: &str,
    secret_name: &str,
) -> Result<String> {
    let table_name = validate_identifier(table_name)?;
    Ok(format!(
        "
        WITH q AS (
          SELECT CAST(
            llm_embedding({model}, {{'context_columns': [{{'data': ?}}]}})
            AS DOUBLE[{embedding_dim}]
          ) AS embedding
        )
        SELECT t.id, CAST(array_cosine_similarity(t.embedding, q.embedding) AS DOUBLE) AS score
        FROM \"{table_name}\" AS t, q
        ORDER BY score DESC, t.id ASC
        LIMIT {top_n}
        ",
        model = model_config(alias, secret_name),
    ))
}

fn is_duplicate_model_error(message: &str) -> bool {
    message.contains("Duplicate key") || message.contains("already exists")
}

pub struct FlockManager {
    connection: Connection,
    secret_name: String,
    model_alias: Option<String>,
}

impl FlockManager {
    pub fn new(
        connection: Connection,
        provider: SecretProvider,
        params: &SecretParams,
    ) -> Result<Self> {
        let fields = secret_fields(provider, params)?;
        let secret_name = provider.secret_name();

        connection
            .execute_batch("INSTALL flock FROM community; LOAD flock;")
            .context("failed to install/load the flock extension")?;
        connection
            .execute_batch(&format!(
                "DROP SECRET IF EXISTS \"{secret_name}\"; {};",
                create_secret_sql(&secret_name, &fields)
            ))
            .with_context(|| format!("failed to register flock secret {secret_name}"))?;

        info!(provider = provider.as_str(), secret = %secret_name, "flock ready");
        Ok(Self {
            connection,
            secret_name,
            model_alias: None,
        })
    }

    pub fn create_model(
        &mut self,
        alias: &str,
        provider_model: &str,
        provider: &str,
        options_json: &str,
        skip_if_exists: bool,
    ) -> Result<()> {
        self.model_alias = Some(alias.to_string());
        let sql = create_model_sql(alias, provider_model, provider, options_json);

        match self.connection.execute_batch(&sql) {
            Ok(()) => {
                info!(alias, provider_model, provider, "flock model created");
                Ok(())
            }
            Err(err) if skip_if_exists && is_duplicate_model_error(&err.to_string()) => {
                info!(alias, "flock model already registered");
                Ok(())
            }
            Err(err) => Err(err).with_context(|| format!("failed to create flock model {alias}")),
        }
    }

    fn alias(&self) -> Result<&str> {
        self.model_alias
            .as_deref()
            .context("no flock model selected; call create_model first")
    }

    pub fn create_embedding(
        &self,
        dest_table: &str,
        file_path: &Path,
        id_column: &str,
        contents_column: &str,
        embedding_dim: usize,
    ) -> Result<usize> {
        let sql = create_embedding_sql(
            dest_table,
            file_path,
            id_column,
            contents_column,
            embedding_dim,
            self.alias()?,
            &self.secret_name,
        )?;
        let inserted = self
            .connection
            .execute(&sql, [])
            .with_context(|| format!("flock embedding of {} failed", file_path.display()))?;

        info!(table = dest_table, rows = inserted, "flock embeddings inserted");
        Ok(inserted)
    }

    pub fn embed_query(&self, query_text: &str, embedding_dim: usize) -> Result<Vec<f64>> {
        let sql = embed_query_sql(embedding_dim, self.alias()?, &self.secret_name);
        let raw = self
            .connection
            .query_row(&sql, params![query_text], |row| row.get::<_, String>(0))
            .context("flock query embedding failed")?;
        parse_vector_text(&raw).context("flock returned an unreadable vector")
    }

    pub fn search_embedding(
        &self,
        query_text: &str,
        table_name: &str,
        top_n: usize,
        embedding_dim: usize,
    ) -> Result<Vec<Hit>> {
        let sql = search_embedding_sql(
            table_name,
            top_n,
            embedding_dim,
            self.alias()?,
            &self.secret_name,
        )?;
        let mut statement = self.connection.prepare(&sql)?;
        let rows = statement.query_map(params![query_text], |row| {
            Ok(Hit::new(row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
        })?;

        let mut hits = Vec::new();
        for row in rows {
            hits.push(row.with_context(|| format!("failed to read flock hit from {table_name}"))?);
        }
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn secret_names_follow_provider() {
        assert_eq!(SecretProvider::Ollama.secret_name(), "__default_ollama");
        assert_eq!(SecretProvider::Azure.secret_name(), "__default_azure");
    }

    #[test]
    fn required_secret_parameters_are_checked_per_provider() {
        let ollama = SecretParams {
            api_url: Some("127.0.0.1:11434".to_string()),
            ..SecretParams::default()
        };
        let fields = secret_fields(SecretProvider::Ollama, &ollama).expect("ollama secret");
        assert_eq!(
            create_secret_sql("__default_ollama", &fields),
            "CREATE SECRET \"__default_ollama\" (TYPE 'OLLAMA', API_URL '127.0.0.1:11434')"
        );

        assert!(secret_fields(SecretProvider::Openai, &ollama).is_err());

        let partial_azure = SecretParams {
            api_key: Some("key".to_string()),
            resource_name: Some("res".to_string()),
            ..SecretParams::default()
        };
        let err = secret_fields(SecretProvider::Azure, &partial_azure).expect_err("no api_version");
        assert!(err.to_string().contains("api_version"));
    }

    #[test]
    fn embedding_sql_picks_reader_by_extension() {
        let jsonl = create_embedding_sql(
            "dense",
            &PathBuf::from("corpus/nfcorpus.jsonl"),
            "id",
            "contents",
            768,
            "embedder",
            "__default_ollama",
        )
        .expect("jsonl sql");
        assert!(jsonl.contains("read_json_auto('corpus/nfcorpus.jsonl')"));
        assert!(jsonl.contains("AS DOUBLE[768]"));
        assert!(jsonl.contains("{'model_name': 'embedder', 'secret': '__default_ollama'}"));

        let parquet = create_embedding_sql(
            "dense",
            &PathBuf::from("corpus.parquet"),
            "id",
            "contents",
            384,
            "embedder",
            "__default_ollama",
        )
        .expect("parquet sql");
        assert!(parquet.contains("read_parquet('corpus.parquet')"));

        assert!(
            create_embedding_sql(
                "dense",
                &PathBuf::from("corpus.tsv"),
                "id",
                "contents",
                768,
                "embedder",
                "__default_ollama"
            )
            .is_err()
        );
    }

    #[test]
    fn model_sql_defaults_empty_options() {
        assert_eq!(
            create_model_sql("embedder", "nomic-embed-text", "ollama", ""),
            "CREATE MODEL('embedder', 'nomic-embed-text', 'ollama', {})"
        );
        assert!(is_duplicate_model_error("Catalog Error: Model already exists"));
        assert!(!is_duplicate_model_error("Binder Error"));
    }

    #[test]
    fn search_sql_binds_the_query_text() {
        let sql = search_embedding_sql("dense", 10, 768, "embedder", "__default_ollama")
            .expect("search sql");
        assert!(sql.contains("{'data': ?}"));
        assert!(sql.contains("LIMIT 10"));
        assert!(search_embedding_sql("dense;", 10, 768, "embedder", "s").is_err());

        let embed = embed_query_sql(384, "embedder", "__default_ollama");
        assert!(embed.contains("AS DOUBLE[384]) AS VARCHAR)"));
    }
}
