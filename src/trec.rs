use std::collections::HashMap;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result, bail};

use crate::model::Hit;
use crate::util::for_each_line;

pub type Qrels = HashMap<String, HashMap<String, i32>>;

#[derive(Debug, Clone, PartialEq)]
pub struct RunEntry {
    pub qid: String,
    pub docid: String,
    pub rank: usize,
    pub score: f64,
    pub tag: String,
}

pub fn format_run_line(qid: &str, hit: &Hit, rank: usize, tag: &str) -> String {
    format!("{qid} Q0 {} {rank} {:.6} {tag}", hit.docid, hit.score)
}

pub fn write_run<W: Write>(writer: &mut W, qid: &str, hits: &[Hit], tag: &str) -> Result<usize> {
    for (index, hit) in hits.iter().enumerate() {
        writeln!(writer, "{}", format_run_line(qid, hit, index + 1, tag))
            .with_context(|| format!("failed to write run line for query {qid}"))?;
    }
    Ok(hits.len())
}

pub fn parse_run_line(line: &str) -> Result<RunEntry> {
    let fields = line.split_whitespace().collect::<Vec<&str>>();
    let [qid, q0, docid, rank, score, tag] = fields.as_slice() else {
        bail!("expected 6 fields in run line, found {}", fields.len());
    };
    if *q0 != "Q0" {
        bail!("expected literal Q0 in second field, found '{q0}'");
    }

    Ok(RunEntry {
        qid: qid.to_string(),
        docid: docid.to_string(),
        rank: rank
            .parse::<usize>()
            .with_context(|| format!("invalid rank '{rank}'"))?,
        score: score
            .parse::<f64>()
            .with_context(|| format!("invalid score '{score}'"))?,
        tag: tag.to_string(),
    })
}

pub fn read_run(path: &Path) -> Result<Vec<RunEntry>> {
    let mut entries = Vec::new();
    for_each_line(path, |_, line| {
        entries.push(parse_run_line(line)?);
        Ok(())
    })?;
    Ok(entries)
}

pub fn read_qrels(path: &Path) -> Result<Qrels> {
    let mut qrels = Qrels::new();
    for_each_line(path, |line_number, line| {
        let fields = line.split_whitespace().collect::<Vec<&str>>();
        let (qid, docid, relevance) = match fields.as_slice() {
            [qid, _, docid, relevance] => (*qid, *docid, *relevance),
            [qid, docid, relevance] => {
                if line_number == 1 && relevance.parse::<i32>().is_err() {
                    return Ok(());
                }
                (*qid, *docid, *relevance)
            }
            _ => bail!("expected 3 or 4 fields in qrels line, found {}", fields.len()),
        };

        let relevance = relevance
            .parse::<i32>()
            .with_context(|| format!("invalid relevance '{relevance}'"))?;
        qrels
            .entry(qid.to_string())
            .or_default()
            .insert(docid.to_string(), relevance);
        Ok(())
    })?;
    Ok(qrels)
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use super::*;

    #[test]
    fn run_lines_use_six_decimals_and_one_based_ranks() {
        let hits = vec![Hit::new("MED-4555", 9.790146), Hit::new("MED-4423", 6.976107)];
        let mut out = Vec::new();
        let written = write_run(&mut out, "PLAIN-3074", &hits, "bm25").expect("run should write");

        assert_eq!(written, 2);
        assert_eq!(
            String::from_utf8(out).expect("utf8"),
            "PLAIN-3074 Q0 MED-4555 1 9.790146 bm25\nPLAIN-3074 Q0 MED-4423 2 6.976107 bm25\n"
        );
    }

    #[test]
    fn written_lines_parse_back_within_six_decimals() {
        let hit = Hit::new("MED-3180", 5.932_539_42);
        let entry = parse_run_line(&format_run_line("PLAIN-3074", &hit, 3, "dense"))
            .expect("line should parse");

        assert_eq!(entry.qid, "PLAIN-3074");
        assert_eq!(entry.docid, "MED-3180");
        assert_eq!(entry.rank, 3);
        assert!((entry.score - hit.score).abs() < 1e-6);
        assert_eq!(entry.tag, "dense");
    }

    #[test]
    fn negative_scores_survive_the_round_trip() {
        let hit = Hit::new("MED-1", -0.000_000_4);
        let entry = parse_run_line(&format_run_line("q", &hit, 1, "t")).expect("line should parse");
        assert!((entry.score - hit.score).abs() < 1e-6);
    }

    #[test]
    fn parse_run_line_rejects_malformed_lines() {
        assert!(parse_run_line("q Q0 d 1 1.0").is_err());
        assert!(parse_run_line("q Q1 d 1 1.0 tag").is_err());
        assert!(parse_run_line("q Q0 d one 1.0 tag").is_err());
    }

    #[test]
    fn qrels_accept_trec_and_beir_layouts() {
        let mut trec = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(trec, "PLAIN-3 0 MED-1 2\nPLAIN-3 0 MED-2 0").expect("write");
        let parsed = read_qrels(trec.path()).expect("trec qrels");
        assert_eq!(parsed["PLAIN-3"]["MED-1"], 2);
        assert_eq!(parsed["PLAIN-3"]["MED-2"], 0);

        let mut beir = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(beir, "query-id\tcorpus-id\tscore\nPLAIN-3\tMED-7\t1").expect("write");
        let parsed = read_qrels(beir.path()).expect("beir qrels");
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed["PLAIN-3"]["MED-7"], 1);
    }
}
