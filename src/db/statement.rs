//! Statement introspection used when recording query metrics.

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum QueryType {
    Select,
    Insert,
    Update,
    Delete,
    Begin,
    Commit,
    Rollback,
    Other,
}

impl QueryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryType::Select => "SELECT",
            QueryType::Insert => "INSERT",
            QueryType::Update => "UPDATE",
            QueryType::Delete => "DELETE",
            QueryType::Begin => "BEGIN",
            QueryType::Commit => "COMMIT",
            QueryType::Rollback => "ROLLBACK",
            QueryType::Other => "OTHER",
        }
    }

    /// Classify a statement by its leading keyword.
    pub fn from_sql(sql: &str) -> Self {
        let mut words = sql.split_whitespace();
        let first = words.next().unwrap_or("").trim_end_matches(';').to_ascii_uppercase();
        match first.as_str() {
            "SELECT" => QueryType::Select,
            "INSERT" => QueryType::Insert,
            "UPDATE" => QueryType::Update,
            "DELETE" => QueryType::Delete,
            "BEGIN" => QueryType::Begin,
            "START" => match words.next().map(|w| w.to_ascii_uppercase()) {
                Some(ref w) if w.starts_with("TRANSACTION") => QueryType::Begin,
                _ => QueryType::Other,
            },
            "COMMIT" | "END" => QueryType::Commit,
            "ROLLBACK" | "ABORT" => QueryType::Rollback,
            _ => QueryType::Other,
        }
    }

    pub fn opens_transaction(&self) -> bool {
        matches!(self, QueryType::Begin)
    }

    pub fn closes_transaction(&self) -> bool {
        matches!(self, QueryType::Commit | QueryType::Rollback)
    }
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn table_patterns() -> &'static [(QueryType, Regex); 4] {
    static PATTERNS: OnceLock<[(QueryType, Regex); 4]> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let compile = |pattern: &str| Regex::new(pattern).expect("static table pattern compiles");
        [
            (QueryType::Select, compile(r#"(?i)\bFROM\s+"?([A-Za-z_][\w.]*)"?"#)),
            (QueryType::Insert, compile(r#"(?i)\bINSERT\s+INTO\s+"?([A-Za-z_][\w.]*)"?"#)),
            (QueryType::Update, compile(r#"(?i)^\s*UPDATE\s+"?([A-Za-z_][\w.]*)"?"#)),
            (QueryType::Delete, compile(r#"(?i)\bDELETE\s+FROM\s+"?([A-Za-z_][\w.]*)"?"#)),
        ]
    })
}

/// Best-effort primary table of a DML statement.
pub fn table_name(sql: &str, query_type: QueryType) -> Option<String> {
    table_patterns()
        .iter()
        .find(|(kind, _)| *kind == query_type)
        .and_then(|(_, re)| re.captures(sql))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Fingerprint of a statement, stable across whitespace and keyword case.
pub fn query_hash(sql: &str) -> String {
    let normalized = sql
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    let digest = Sha256::digest(normalized.as_bytes());
    hex::encode(&digest[..8])
}
