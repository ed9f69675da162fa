use std::io::Write;
use std::time::Instant;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use crate::cli::EncodeArgs;
use crate::commands::ollama_client;
use crate::corpus::read_documents;
use crate::util::create_output_file;

#[derive(Serialize)]
struct EncodedDocument<'a> {
    id: &'a str,
    contents: &'a str,
    vector: &'a [f64],
}

pub fn run(args: EncodeArgs) -> Result<()> {
    let started = Instant::now();
    let client = ollama_client(&args.ollama, &args.model)?;
    let documents = read_documents(&args.input)?;

    info!(
        input = %args.input.display(),
        documents = documents.len(),
        model = client.model(),
        endpoint = client.endpoint(),
        "encoding corpus"
    );

    let texts = documents
        .iter()
        .map(|document| document.contents.clone())
        .collect::<Vec<String>>();
    let vectors = client.embed(&texts)?;

    let mut writer = create_output_file(&args.output)?;
    for (document, vector) in documents.iter().zip(&vectors) {
        let record = EncodedDocument {
            id: &document.id,
            contents: &document.contents,
            vector,
        };
        serde_json::to_writer(&mut writer, &record)
            .with_context(|| format!("failed to serialize embedding for {}", document.id))?;
        writer.write_all(b"\n")?;
    }
    writer
        .flush()
        .with_context(|| format!("failed to flush {}", args.output.display()))?;

    info!(
        output = %args.output.display(),
        vectors = vectors.len(),
        dim = vectors.first().map(Vec::len).unwrap_or(0),
        duration_ms = started.elapsed().as_millis() as u64,
        "corpus encoded"
    );
    Ok(())
}
