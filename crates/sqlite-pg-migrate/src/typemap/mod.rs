//! Type mapping from SQLite declared types to PostgreSQL.
//!
//! SQLite accepts any text as a column type and only derives an affinity from
//! it, so mapping is substring based over the upper-cased declared type,
//! checked in a fixed priority order:
//!
//! | tokens                 | target      |
//! |------------------------|-------------|
//! | `INT`                  | `INTEGER`   |
//! | `CHAR`, `TEXT`, `CLOB` | `TEXT`      |
//! | `REAL`, `FLOA`, `DOUB` | `FLOAT`     |
//! | `BLOB`                 | `BYTEA`     |
//! | `BOOL`                 | `BOOLEAN`   |
//! | `DATE`, `TIME`         | `TIMESTAMP` |
//! | anything else          | `TEXT`      |
//!
//! This is a best-effort approximation: length, precision and scale are not
//! preserved, and token order decides ambiguous names (`POINT` contains `INT`).
//! Every input maps to some target type; there is no error path.

use serde::{Deserialize, Serialize};

use crate::core::schema::ColumnSpec;

/// The fixed target type vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TargetType {
    Integer,
    Text,
    Float,
    Bytea,
    Boolean,
    Timestamp,
}

impl TargetType {
    /// PostgreSQL spelling of the type.
    pub fn as_sql(&self) -> &'static str {
        match self {
            TargetType::Integer => "INTEGER",
            TargetType::Text => "TEXT",
            TargetType::Float => "FLOAT",
            TargetType::Bytea => "BYTEA",
            TargetType::Boolean => "BOOLEAN",
            TargetType::Timestamp => "TIMESTAMP",
        }
    }
}

impl std::fmt::Display for TargetType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// Result of mapping one declared type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeMapping {
    pub target_type: TargetType,
    /// Whether the mapping discards information (suffix or unknown type).
    pub is_lossy: bool,
    pub warning: Option<String>,
}

impl TypeMapping {
    /// Create a lossless type mapping.
    pub fn lossless(target_type: TargetType) -> Self {
        Self {
            target_type,
            is_lossy: false,
            warning: None,
        }
    }

    /// Create a lossy type mapping with a warning.
    pub fn lossy(target_type: TargetType, warning: impl Into<String>) -> Self {
        Self {
            target_type,
            is_lossy: true,
            warning: Some(warning.into()),
        }
    }
}

/// Token table in priority order. First match wins.
const RULES: &[(&[&str], TargetType)] = &[
    (&["INT"], TargetType::Integer),
    (&["CHAR", "TEXT", "CLOB"], TargetType::Text),
    (&["REAL", "FLOA", "DOUB"], TargetType::Float),
    (&["BLOB"], TargetType::Bytea),
    (&["BOOL"], TargetType::Boolean),
    (&["DATE", "TIME"], TargetType::Timestamp),
];

fn match_rule(declared: &str) -> Option<TargetType> {
    let upper = declared.to_uppercase();
    RULES
        .iter()
        .find(|(tokens, _)| tokens.iter().any(|t| upper.contains(t)))
        .map(|(_, ty)| *ty)
}

/// Map a declared source type to a target type.
pub fn map_type(declared: &str) -> TargetType {
    match_rule(declared).unwrap_or(TargetType::Text)
}

/// Map a declared source type, reporting what the mapping loses.
pub fn map_type_detailed(declared: &str) -> TypeMapping {
    match match_rule(declared) {
        Some(ty) if declared.contains('(') => TypeMapping::lossy(
            ty,
            format!("{} mapped to {}; size/precision suffix dropped", declared, ty),
        ),
        Some(ty) => TypeMapping::lossless(ty),
        None if declared.trim().is_empty() => {
            TypeMapping::lossy(TargetType::Text, "no declared type, defaulting to TEXT")
        }
        None => TypeMapping::lossy(
            TargetType::Text,
            format!("unrecognized type {:?}, defaulting to TEXT", declared),
        ),
    }
}

/// Map a source column.
pub fn map_column(col: &ColumnSpec) -> TypeMapping {
    map_type_detailed(&col.data_type)
}
