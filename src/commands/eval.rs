use std::io::{self, Write};

use anyhow::{Context, Result, bail};
use serde::Serialize;
use tracing::info;

use crate::cli::EvalArgs;
use crate::eval::{Metric, MetricSummary, evaluate};
use crate::trec::{read_qrels, read_run};
use crate::util::write_json_pretty;

#[derive(Debug, Serialize)]
struct EvalReport<'a> {
    qrels_path: String,
    run_path: String,
    complete: bool,
    metrics: &'a [MetricSummary],
}

pub fn run(args: EvalArgs) -> Result<()> {
    let metrics = parse_metrics(&args.metrics)?;
    let qrels = read_qrels(&args.qrels)?;
    let run = read_run(&args.run)?;

    info!(
        qrels = %args.qrels.display(),
        run = %args.run.display(),
        judged_queries = qrels.len(),
        run_lines = run.len(),
        "evaluating run"
    );

    let summaries = evaluate(&qrels, &run, &metrics, args.complete);

    let stdout = io::stdout();
    let mut out = stdout.lock();
    write_table(&mut out, &summaries, args.per_query)?;
    out.flush().context("failed to flush stdout")?;

    if let Some(path) = args.json_output.as_deref() {
        let report = EvalReport {
            qrels_path: args.qrels.display().to_string(),
            run_path: args.run.display().to_string(),
            complete: args.complete,
            metrics: &summaries,
        };
        write_json_pretty(path, &report)?;
        info!(path = %path.display(), "wrote evaluation report");
    }
    Ok(())
}

fn parse_metrics(raw: &[String]) -> Result<Vec<Metric>> {
    let metrics = raw
        .iter()
        .filter(|value| !value.trim().is_empty())
        .map(|value| value.parse::<Metric>())
        .collect::<Result<Vec<Metric>>>()?;
    if metrics.is_empty() {
        bail!("at least one --metric is required");
    }
    Ok(metrics)
}

fn write_table<W: Write>(writer: &mut W, summaries: &[MetricSummary], per_query: bool) -> Result<()> {
    for summary in summaries {
        if per_query {
            for (qid, value) in &summary.per_query {
                writeln!(writer, "{}\t{qid}\t{value:.4}", summary.metric)?;
            }
        }
        writeln!(writer, "{}\tall\t{:.4}", summary.metric, summary.value)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_prints_four_decimals_and_optional_per_query_rows() {
        let summaries = vec![MetricSummary {
            metric: "ndcg_cut_10".to_string(),
            queries: 2,
            value: 0.32061,
            per_query: vec![("PLAIN-1".to_string(), 0.5), ("PLAIN-2".to_string(), 0.14122)],
        }];

        let mut compact = Vec::new();
        write_table(&mut compact, &summaries, false).expect("table");
        assert_eq!(String::from_utf8(compact).expect("utf8"), "ndcg_cut_10\tall\t0.3206\n");

        let mut detailed = Vec::new();
        write_table(&mut detailed, &summaries, true).expect("table");
        assert_eq!(
            String::from_utf8(detailed).expect("utf8"),
            "ndcg_cut_10\tPLAIN-1\t0.5000\nndcg_cut_10\tPLAIN-2\t0.1412\nndcg_cut_10\tall\t0.3206\n"
        );
    }

    #[test]
    fn metric_lists_must_parse_and_be_non_empty() {
        let parsed = parse_metrics(&["ndcg@10".to_string(), "map".to_string()]).expect("metrics");
        assert_eq!(parsed, vec![Metric::NdcgCut(10), Metric::Map]);
        assert!(parse_metrics(&[" ".to_string()]).is_err());
        assert!(parse_metrics(&["mrr".to_string()]).is_err());
    }
}
