use std::collections::HashSet;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::info;

use crate::model::Document;
use crate::trec::read_qrels;
use crate::util::{create_output_file, for_each_line};

#[derive(Debug, Deserialize)]
struct BeirDocument {
    #[serde(rename = "_id")]
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct BeirQuery {
    #[serde(rename = "_id")]
    id: String,
    text: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConvertSummary {
    pub read: usize,
    pub written: usize,
}

pub fn single_line(text: &str) -> String {
    text.split(['\t', '\n', '\r'])
        .filter(|part| !part.is_empty())
        .collect::<Vec<&str>>()
        .join(" ")
}

fn document_contents(title: &str, text: &str) -> String {
    format!("{} {}", title.trim(), text.trim()).trim().to_string()
}

pub fn convert_corpus(input: &Path, output: &Path) -> Result<ConvertSummary> {
    let mut writer = create_output_file(output)?;
    let mut summary = ConvertSummary::default();

    for_each_line(input, |_, line| {
        let beir: BeirDocument =
            serde_json::from_str(line).context("expected a BEIR corpus object with _id")?;
        summary.read += 1;

        let document = Document {
            id: beir.id,
            contents: document_contents(&beir.title, &beir.text),
        };
        serde_json::to_writer(&mut writer, &document)?;
        writer.write_all(b"\n")?;
        summary.written += 1;
        Ok(())
    })?;
    writer
        .flush()
        .with_context(|| format!("failed to flush {}", output.display()))?;

    info!(
        input = %input.display(),
        output = %output.display(),
        documents = summary.written,
        "corpus converted"
    );
    Ok(summary)
}

pub fn convert_queries(input: &Path, output: &Path, qrels: Option<&Path>) -> Result<ConvertSummary> {
    let judged = match qrels {
        Some(path) => Some(read_qrels(path)?.into_keys().collect::<HashSet<String>>()),
        None => None,
    };

    let mut writer = create_output_file(output)?;
    let mut summary = ConvertSummary::default();

    for_each_line(input, |_, line| {
        let query: BeirQuery =
            serde_json::from_str(line).context("expected a BEIR query object with _id and text")?;
        summary.read += 1;

        if judged.as_ref().is_some_and(|judged| !judged.contains(&query.id)) {
            return Ok(());
        }
        writeln!(writer, "{}\t{}", single_line(&query.id), single_line(&query.text))?;
        summary.written += 1;
        Ok(())
    })?;
    writer
        .flush()
        .with_context(|| format!("failed to flush {}", output.display()))?;

    info!(
        input = %input.display(),
        output = %output.display(),
        read = summary.read,
        written = summary.written,
        "queries converted"
    );
    Ok(summary)
}

pub fn convert_qrels(input: &Path, output: &Path) -> Result<ConvertSummary> {
    let qrels = read_qrels(input)?;
    let mut rows = qrels
        .iter()
        .flat_map(|(qid, judgments)| {
            judgments
                .iter()
                .map(move |(docid, relevance)| (qid.as_str(), docid.as_str(), *relevance))
        })
        .collect::<Vec<(&str, &str, i32)>>();
    rows.sort();

    let mut writer = create_output_file(output)?;
    for (qid, docid, relevance) in &rows {
        writeln!(writer, "{qid} 0 {docid} {relevance}")?;
    }
    writer
        .flush()
        .with_context(|| format!("failed to flush {}", output.display()))?;

    info!(
        input = %input.display(),
        output = %output.display(),
        queries = qrels.len(),
        judgments = rows.len(),
        "qrels converted"
    );
    Ok(ConvertSummary {
        read: rows.len(),
        written: rows.len(),
    })
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn corpus_joins_title_and_text() {
        let dir = tempfile::tempdir().expect("temp dir");
        let input = dir.path().join("corpus.jsonl");
        let output = dir.path().join("out/corpus.jsonl");
        fs::write(
            &input,
            concat!(
                "{\"_id\": \"MED-10\", \"title\": \"Statin Use\", \"text\": \"Recent studies.\", \"metadata\": {}}\n",
                "{\"_id\": \"MED-11\", \"title\": \"\", \"text\": \" Only text \"}\n",
            ),
        )
        .expect("write input");

        let summary = convert_corpus(&input, &output).expect("convert");
        assert_eq!(summary.written, 2);

        let written = fs::read_to_string(&output).expect("read output");
        let lines = written.lines().collect::<Vec<&str>>();
        let first: Document = serde_json::from_str(lines[0]).expect("json");
        let second: Document = serde_json::from_str(lines[1]).expect("json");
        assert_eq!(first.contents, "Statin Use Recent studies.");
        assert_eq!(second.contents, "Only text");
    }

    #[test]
    fn queries_are_filtered_by_qrels_and_flattened() {
        let dir = tempfile::tempdir().expect("temp dir");
        let queries = dir.path().join("queries.jsonl");
        let qrels = dir.path().join("test.tsv");
        let output = dir.path().join("topics.tsv");
        fs::write(
            &queries,
            concat!(
                "{\"_id\": \"PLAIN-3074\", \"text\": \"How to Help\\tPrevent\\nAneurysms\"}\n",
                "{\"_id\": \"PLAIN-9999\", \"text\": \"unjudged\"}\n",
            ),
        )
        .expect("write queries");
        fs::write(&qrels, "query-id\tcorpus-id\tscore\nPLAIN-3074\tMED-4555\t2\n")
            .expect("write qrels");

        let summary = convert_queries(&queries, &output, Some(&qrels)).expect("convert");
        assert_eq!(summary, ConvertSummary { read: 2, written: 1 });
        assert_eq!(
            fs::read_to_string(&output).expect("read output"),
            "PLAIN-3074\tHow to Help Prevent Aneurysms\n"
        );
    }

    #[test]
    fn beir_qrels_become_trec_lines() {
        let dir = tempfile::tempdir().expect("temp dir");
        let input = dir.path().join("test.tsv");
        let output = dir.path().join("qrels.txt");
        fs::write(
            &input,
            "query-id\tcorpus-id\tscore\nPLAIN-2\tMED-9\t1\nPLAIN-1\tMED-3\t2\n",
        )
        .expect("write qrels");

        convert_qrels(&input, &output).expect("convert");
        assert_eq!(
            fs::read_to_string(&output).expect("read output"),
            "PLAIN-1 0 MED-3 2\nPLAIN-2 0 MED-9 1\n"
        );
    }
}
