mod porter;

use std::collections::HashSet;
use std::sync::LazyLock;

use anyhow::{Result, bail};
use regex::Regex;

use self::porter::PorterStemmer;

const ENGLISH_STOPWORDS: [&str; 33] = [
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "if", "in", "into", "is", "it",
    "no", "not", "of", "on", "or", "such", "that", "the", "their", "then", "there", "these",
    "they", "this", "to", "was", "will", "with",
];

static STOPWORDS: LazyLock<HashSet<&'static str>> =
    LazyLock::new(|| ENGLISH_STOPWORDS.into_iter().collect());

static NON_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w\s]").expect("static regex should compile"));

static IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("static regex should compile")
});

pub fn tokenize(text: &str) -> String {
    analyze(text).join(" ")
}

pub fn analyze(text: &str) -> Vec<String> {
    let mut stemmer = PorterStemmer::new();
    text.split(|character: char| !(character.is_alphanumeric() || is_apostrophe(character)))
        .map(strip_possessive)
        .map(|token| {
            token
                .chars()
                .filter(|character| !is_apostrophe(*character))
                .flat_map(char::to_lowercase)
                .collect::<String>()
        })
        .filter(|token| !token.is_empty() && !STOPWORDS.contains(token.as_str()))
        .map(|token| stemmer.stem(&token))
        .collect()
}

fn is_apostrophe(character: char) -> bool {
    matches!(character, '\'' | '\u{2019}')
}

fn strip_possessive(token: &str) -> &str {
    for suffix in ["'s", "'S", "\u{2019}s", "\u{2019}S"] {
        if let Some(stripped) = token.strip_suffix(suffix) {
            return stripped;
        }
    }
    token
}

pub fn clean_tsquery(query: &str) -> String {
    NON_WORD
        .replace_all(query, " ")
        .split_whitespace()
        .collect::<Vec<&str>>()
        .join(" | ")
}

pub fn fts5_match_query(query: &str) -> String {
    analyze(query)
        .into_iter()
        .map(|token| format!("\"{}\"", token.replace('"', "")))
        .collect::<Vec<String>>()
        .join(" OR ")
}

pub fn validate_identifier(name: &str) -> Result<&str> {
    if !IDENTIFIER.is_match(name) {
        bail!("invalid table or index name '{name}': expected [A-Za-z_][A-Za-z0-9_]*");
    }
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_lowercases_drops_stopwords_and_stems() {
        assert_eq!(
            tokenize("How to Help Prevent Abdominal Aortic Aneurysms"),
            "how help prevent abdomin aortic aneurysm"
        );
    }

    #[test]
    fn tokenize_strips_possessives_and_punctuation() {
        assert_eq!(tokenize("The patient's (acute) pain!"), "patient acut pain");
        assert_eq!(tokenize("   "), "");
    }

    #[test]
    fn tokenize_uses_classic_porter_stems() {
        assert_eq!(tokenize("Dying under the skies, generously"), "dy under ski gener");
        assert_eq!(tokenize("Statin use in breast cancer survivors"), "statin us breast cancer survivor");
    }

    #[test]
    fn clean_tsquery_builds_or_query() {
        assert_eq!(clean_tsquery("vitamin-D, and  statins?"), "vitamin | D | and | statins");
        assert_eq!(clean_tsquery("!!!"), "");
    }

    #[test]
    fn fts5_match_query_quotes_each_token() {
        assert_eq!(fts5_match_query("Breast \"cancer\" cells"), "\"breast\" OR \"cancer\" OR \"cell\"");
        assert_eq!(fts5_match_query("the of"), "");
    }

    #[test]
    fn validate_identifier_rejects_sql() {
        assert!(validate_identifier("corpus_sparse").is_ok());
        assert!(validate_identifier("corpus; drop table x").is_err());
        assert!(validate_identifier("1corpus").is_err());
    }
}
