use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use anyhow::{Context, Result, bail};
use serde::Serialize;

use crate::trec::{Qrels, RunEntry};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Metric {
    NdcgCut(usize),
    Recall(usize),
    Precision(usize),
    Map,
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NdcgCut(k) => write!(f, "ndcg_cut_{k}"),
            Self::Recall(k) => write!(f, "recall_{k}"),
            Self::Precision(k) => write!(f, "P_{k}"),
            Self::Map => f.write_str("map"),
        }
    }
}

impl FromStr for Metric {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        let normalized = raw.trim().to_ascii_lowercase();
        if normalized == "map" {
            return Ok(Self::Map);
        }

        let Some(split_at) = normalized.rfind(['@', '.', '_']) else {
            bail!("unknown metric '{raw}'");
        };
        let (name, cutoff) = normalized.split_at(split_at);
        let cutoff = cutoff[1..]
            .parse::<usize>()
            .with_context(|| format!("invalid cutoff in metric '{raw}'"))?;
        if cutoff == 0 {
            bail!("metric cutoff must be positive: '{raw}'");
        }

        match name {
            "ndcg" | "ndcg_cut" => Ok(Self::NdcgCut(cutoff)),
            "recall" => Ok(Self::Recall(cutoff)),
            "p" | "precision" => Ok(Self::Precision(cutoff)),
            _ => bail!("unknown metric '{raw}'"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricSummary {
    pub metric: String,
    pub queries: usize,
    pub value: f64,
    #[serde(skip)]
    pub per_query: Vec<(String, f64)>,
}

pub fn evaluate(
    qrels: &Qrels,
    run: &[RunEntry],
    metrics: &[Metric],
    complete: bool,
) -> Vec<MetricSummary> {
    let rankings = rank_run(run);

    let mut qids = qrels
        .keys()
        .filter(|qid| complete || rankings.contains_key(*qid))
        .cloned()
        .collect::<Vec<String>>();
    qids.sort();

    let empty = Vec::new();
    metrics
        .iter()
        .map(|metric| {
            let per_query = qids
                .iter()
                .map(|qid| {
                    let ranking = rankings.get(qid).unwrap_or(&empty);
                    let judgments = &qrels[qid];
                    (qid.clone(), score_query(*metric, ranking, judgments))
                })
                .collect::<Vec<(String, f64)>>();

            let value = if per_query.is_empty() {
                0.0
            } else {
                per_query.iter().map(|(_, value)| value).sum::<f64>() / per_query.len() as f64
            };

            MetricSummary {
                metric: metric.to_string(),
                queries: per_query.len(),
                value,
                per_query,
            }
        })
        .collect()
}

fn rank_run(run: &[RunEntry]) -> HashMap<String, Vec<String>> {
    let mut grouped = HashMap::<String, Vec<&RunEntry>>::new();
    for entry in run {
        grouped.entry(entry.qid.clone()).or_default().push(entry);
    }

    grouped
        .into_iter()
        .map(|(qid, mut entries)| {
            // rank column is ignored; ties go to the larger docid
            entries.sort_by(|left, right| {
                right
                    .score
                    .partial_cmp(&left.score)
                    .unwrap_or(Ordering::Equal)
                    .then_with(|| right.docid.cmp(&left.docid))
            });
            let docids = entries
                .into_iter()
                .map(|entry| entry.docid.clone())
                .collect::<Vec<String>>();
            (qid, docids)
        })
        .collect()
}

fn score_query(metric: Metric, ranking: &[String], judgments: &HashMap<String, i32>) -> f64 {
    let relevance = |docid: &String| judgments.get(docid).copied().unwrap_or(0);
    let num_relevant = judgments.values().filter(|value| **value > 0).count();

    match metric {
        Metric::NdcgCut(k) => {
            let dcg = ranking
                .iter()
                .take(k)
                .enumerate()
                .map(|(index, docid)| gain(relevance(docid)) / discount(index))
                .sum::<f64>();

            let mut ideal = judgments
                .values()
                .copied()
                .filter(|value| *value > 0)
                .collect::<Vec<i32>>();
            ideal.sort_unstable_by(|left, right| right.cmp(left));
            let idcg = ideal
                .into_iter()
                .take(k)
                .enumerate()
                .map(|(index, value)| gain(value) / discount(index))
                .sum::<f64>();

            if idcg > 0.0 { dcg / idcg } else { 0.0 }
        }
        Metric::Recall(k) => {
            if num_relevant == 0 {
                return 0.0;
            }
            let hits = ranking
                .iter()
                .take(k)
                .filter(|docid| relevance(*docid) > 0)
                .count();
            hits as f64 / num_relevant as f64
        }
        Metric::Precision(k) => {
            let hits = ranking
                .iter()
                .take(k)
                .filter(|docid| relevance(*docid) > 0)
                .count();
            hits as f64 / k as f64
        }
        Metric::Map => {
            if num_relevant == 0 {
                return 0.0;
            }
            let mut found = 0usize;
            let mut precision_sum = 0.0;
            for (index, docid) in ranking.iter().enumerate() {
                if relevance(docid) > 0 {
                    found += 1;
                    precision_sum += found as f64 / (index + 1) as f64;
                }
            }
            precision_sum / num_relevant as f64
        }
    }
}

fn gain(relevance: i32) -> f64 {
    f64::from(relevance.max(0))
}

fn discount(index: usize) -> f64 {
    (index as f64 + 2.0).log2()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(qid: &str, docid: &str, score: f64) -> RunEntry {
        RunEntry {
            qid: qid.to_string(),
            docid: docid.to_string(),
            rank: 0,
            score,
            tag: "t".to_string(),
        }
    }

    fn qrels(rows: &[(&str, &str, i32)]) -> Qrels {
        let mut out = Qrels::new();
        for (qid, docid, rel) in rows {
            out.entry(qid.to_string())
                .or_default()
                .insert(docid.to_string(), *rel);
        }
        out
    }

    #[test]
    fn metric_names_parse_in_common_spellings() {
        assert_eq!("ndcg@10".parse::<Metric>().expect("metric"), Metric::NdcgCut(10));
        assert_eq!("ndcg_cut.10".parse::<Metric>().expect("metric"), Metric::NdcgCut(10));
        assert_eq!("ndcg_cut_20".parse::<Metric>().expect("metric"), Metric::NdcgCut(20));
        assert_eq!("recall@100".parse::<Metric>().expect("metric"), Metric::Recall(100));
        assert_eq!("P.10".parse::<Metric>().expect("metric"), Metric::Precision(10));
        assert_eq!("MAP".parse::<Metric>().expect("metric"), Metric::Map);
        assert!("bleu@4".parse::<Metric>().is_err());
        assert!("ndcg@0".parse::<Metric>().is_err());
    }

    #[test]
    fn graded_ndcg_matches_hand_computation() {
        let judgments = qrels(&[("q1", "d1", 2), ("q1", "d2", 1), ("q1", "d9", 0)]);
        let run = vec![entry("q1", "d2", 3.0), entry("q1", "d9", 2.0), entry("q1", "d1", 1.0)];

        let summary = evaluate(&judgments, &run, &[Metric::NdcgCut(10)], false);
        let dcg = 1.0 / 2f64.log2() + 2.0 / 4f64.log2();
        let idcg = 2.0 / 2f64.log2() + 1.0 / 3f64.log2();
        assert!((summary[0].value - dcg / idcg).abs() < 1e-12);
    }

    #[test]
    fn ties_are_broken_by_descending_docid() {
        let judgments = qrels(&[("q1", "a", 1)]);
        let run = vec![entry("q1", "a", 1.0), entry("q1", "b", 1.0)];

        let summary = evaluate(&judgments, &run, &[Metric::Precision(1)], false);
        assert_eq!(summary[0].value, 0.0);
    }

    #[test]
    fn complete_mode_counts_missing_queries_as_zero() {
        let judgments = qrels(&[("q1", "d1", 1), ("q2", "d2", 1)]);
        let run = vec![entry("q1", "d1", 1.0)];

        let partial = evaluate(&judgments, &run, &[Metric::Recall(10), Metric::Map], false);
        assert_eq!(partial[0].queries, 1);
        assert_eq!(partial[0].value, 1.0);
        assert_eq!(partial[1].value, 1.0);

        let complete = evaluate(&judgments, &run, &[Metric::Recall(10)], true);
        assert_eq!(complete[0].queries, 2);
        assert_eq!(complete[0].value, 0.5);
    }

    #[test]
    fn average_precision_uses_all_relevant_documents() {
        let judgments = qrels(&[("q1", "d1", 1), ("q1", "d3", 1), ("q1", "d4", 1)]);
        let run = vec![entry("q1", "d1", 3.0), entry("q1", "d2", 2.0), entry("q1", "d3", 1.0)];

        let summary = evaluate(&judgments, &run, &[Metric::Map], false);
        let expected = (1.0 + 2.0 / 3.0) / 3.0;
        assert!((summary[0].value - expected).abs() < 1e-12);
    }
}
