use anyhow::{Context, Result, bail};

pub const DEFAULT_EMBEDDING_DIM: usize = 768;

pub fn cosine_similarity(left: &[f64], right: &[f64]) -> f64 {
    if left.len() != right.len() || left.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0_f64;
    let mut left_norm = 0.0_f64;
    let mut right_norm = 0.0_f64;
    for (left_value, right_value) in left.iter().zip(right.iter()) {
        dot += left_value * right_value;
        left_norm += left_value * left_value;
        right_norm += right_value * right_value;
    }

    if left_norm <= 0.0 || right_norm <= 0.0 {
        return 0.0;
    }

    dot / (left_norm.sqrt() * right_norm.sqrt())
}

pub fn encode_embedding_blob(values: &[f64]) -> Vec<u8> {
    let mut out = Vec::<u8>::with_capacity(values.len() * 4);
    for value in values {
        out.extend_from_slice(&(*value as f32).to_le_bytes());
    }
    out
}

pub fn decode_embedding_blob(blob: &[u8], expected_dim: usize) -> Option<Vec<f64>> {
    if expected_dim == 0 || blob.len() != expected_dim.saturating_mul(4) {
        return None;
    }

    let mut out = Vec::<f64>::with_capacity(expected_dim);
    for chunk in blob.chunks_exact(4) {
        out.push(f64::from(f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]])));
    }

    Some(out)
}

pub fn format_vector_literal(values: &[f64]) -> String {
    let body = values
        .iter()
        .map(|value| format!("{value:?}"))
        .collect::<Vec<String>>()
        .join(", ");
    format!("[{body}]")
}

pub fn parse_vector_text(raw: &str) -> Result<Vec<f64>> {
    let trimmed = raw.trim();
    let Some(body) = trimmed
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
    else {
        bail!("vector text must be enclosed in brackets: {trimmed}");
    };

    if body.trim().is_empty() {
        return Ok(Vec::new());
    }

    body.split(',')
        .map(|value| {
            value
                .trim()
                .parse::<f64>()
                .with_context(|| format!("invalid vector component: {}", value.trim()))
        })
        .collect()
}

pub fn ensure_dimension(id: &str, values: &[f64], expected_dim: usize) -> Result<()> {
    if values.len() != expected_dim {
        bail!(
            "embedding for '{id}' has {} dimensions, table expects {expected_dim}",
            values.len()
        );
    }
    Ok(())
}
