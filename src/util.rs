use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

pub fn now_utc_string() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn utc_compact_string(ts: DateTime<Utc>) -> String {
    ts.format("%Y%m%dT%H%M%SZ").to_string()
}

pub fn ensure_directory(path: &Path) -> Result<()> {
    fs::create_dir_all(path)
        .with_context(|| format!("failed to create directory: {}", path.display()))
}

pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)
        .with_context(|| format!("failed to open file for hashing: {}", path.display()))?;

    let mut hasher = Sha256::new();
    let mut buf = [0_u8; 8192];

    loop {
        let count = file
            .read(&mut buf)
            .with_context(|| format!("failed to read file for hashing: {}", path.display()))?;
        if count == 0 {
            break;
        }
        hasher.update(&buf[..count]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

pub fn write_json_pretty<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut file = create_output_file(path)?;

    serde_json::to_writer_pretty(&mut file, value)
        .with_context(|| format!("failed to serialize json: {}", path.display()))?;
    file.write_all(b"\n")
        .with_context(|| format!("failed to finalize json file: {}", path.display()))?;
    file.flush()
        .with_context(|| format!("failed to write json file: {}", path.display()))?;

    Ok(())
}

pub fn create_output_file(path: &Path) -> Result<BufWriter<File>> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            ensure_directory(parent)?;
        }
    }

    let file = File::create(path)
        .with_context(|| format!("failed to create file: {}", path.display()))?;
    Ok(BufWriter::new(file))
}

pub fn open_buffered(path: &Path) -> Result<BufReader<File>> {
    let file =
        File::open(path).with_context(|| format!("failed to open file: {}", path.display()))?;
    Ok(BufReader::new(file))
}

pub fn for_each_line<F>(path: &Path, mut visit: F) -> Result<()>
where
    F: FnMut(usize, &str) -> Result<()>,
{
    let reader = open_buffered(path)?;
    for (index, line) in reader.lines().enumerate() {
        let line_number = index + 1;
        let line = line.with_context(|| {
            format!("failed to read line {line_number} of {}", path.display())
        })?;
        if line.trim().is_empty() {
            continue;
        }
        visit(line_number, &line)
            .with_context(|| format!("{}:{line_number}", path.display()))?;
    }
    Ok(())
}

pub fn sql_string_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

pub fn file_extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn for_each_line_skips_blank_lines_and_numbers_from_one() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file should open");
        writeln!(file, "first\n\nthird").expect("temp file should accept writes");

        let mut seen = Vec::new();
        for_each_line(file.path(), |number, line| {
            seen.push((number, line.to_string()));
            Ok(())
        })
        .expect("lines should be readable");

        assert_eq!(seen, vec![(1, "first".to_string()), (3, "third".to_string())]);
    }

    #[test]
    fn for_each_line_reports_line_number_on_failure() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file should open");
        writeln!(file, "ok\nbad").expect("temp file should accept writes");

        let err = for_each_line(file.path(), |_, line| {
            if line == "bad" {
                anyhow::bail!("bad line");
            }
            Ok(())
        })
        .expect_err("second line should fail");

        assert!(format!("{err:#}").contains(":2"));
    }

    #[test]
    fn sql_string_literal_escapes_quotes() {
        assert_eq!(sql_string_literal("it's.parquet"), "'it''s.parquet'");
    }

    #[test]
    fn file_extension_is_lowercased() {
        assert_eq!(
            file_extension(Path::new("corpus.JSONL")).as_deref(),
            Some("jsonl")
        );
        assert_eq!(file_extension(Path::new("corpus")), None);
    }
}
