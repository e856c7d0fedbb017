//! SQL value types moved between the source and the target.
//!
//! SQLite stores every value in one of five storage classes, whatever the
//! declared column type says, so the transfer representation mirrors those
//! classes rather than the declared types.

use serde::{Serialize, Serializer};

/// A single value read from the source.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// SQL NULL.
    Null,

    /// 64-bit signed integer (INTEGER storage class).
    I64(i64),

    /// 64-bit floating point (REAL storage class).
    F64(f64),

    /// Text data (TEXT storage class).
    Text(String),

    /// Binary data (BLOB storage class).
    Bytes(Vec<u8>),
}

/// One row, in the column order of its table schema.
pub type Row = Vec<SqlValue>;

impl SqlValue {
    /// Check if this value is NULL.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Check if this value is the empty string.
    #[must_use]
    pub fn is_empty_text(&self) -> bool {
        matches!(self, SqlValue::Text(s) if s.is_empty())
    }

    /// Render the value as text for a `::text::<type>` cast on the target.
    ///
    /// Blobs render as PostgreSQL hex escape (`\x0102`), which is what
    /// `bytea` and `text` both accept. Returns `None` for NULL.
    pub fn to_text(&self) -> Option<String> {
        match self {
            SqlValue::Null => None,
            SqlValue::I64(v) => Some(v.to_string()),
            SqlValue::F64(v) => Some(format_float(*v)),
            SqlValue::Text(s) => Some(s.clone()),
            SqlValue::Bytes(b) => Some(format!("\\x{}", hex::encode(b))),
        }
    }

    /// Render the value as raw bytes for a `bytea` parameter.
    ///
    /// Non-blob values bind their text form as bytes.
    pub fn to_bytes(&self) -> Option<Vec<u8>> {
        match self {
            SqlValue::Null => None,
            SqlValue::Bytes(b) => Some(b.clone()),
            SqlValue::Text(s) => Some(s.as_bytes().to_vec()),
            other => other.to_text().map(String::into_bytes),
        }
    }

    /// Short name of the storage class, for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            SqlValue::Null => "null",
            SqlValue::I64(_) => "integer",
            SqlValue::F64(_) => "real",
            SqlValue::Text(_) => "text",
            SqlValue::Bytes(_) => "blob",
        }
    }
}

/// PostgreSQL spells non-finite floats differently from Rust.
fn format_float(v: f64) -> String {
    if v.is_nan() {
        "NaN".to_string()
    } else if v == f64::INFINITY {
        "Infinity".to_string()
    } else if v == f64::NEG_INFINITY {
        "-Infinity".to_string()
    } else {
        v.to_string()
    }
}

/// Convert empty-string fields to NULL.
///
/// Only used on the per-row fallback path; bulk batches insert values as read.
pub fn coerce_empty_to_null(row: &[SqlValue]) -> Row {
    row.iter()
        .map(|v| {
            if v.is_empty_text() {
                SqlValue::Null
            } else {
                v.clone()
            }
        })
        .collect()
}

impl std::fmt::Display for SqlValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlValue::Null => f.write_str("NULL"),
            SqlValue::I64(v) => write!(f, "{}", v),
            SqlValue::F64(v) => write!(f, "{}", v),
            SqlValue::Text(s) => write!(f, "{:?}", s),
            SqlValue::Bytes(b) => write!(f, "x'{}'", hex::encode(b)),
        }
    }
}

// Reported as plain JSON scalars; blobs as hex strings.
impl Serialize for SqlValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            SqlValue::Null => serializer.serialize_none(),
            SqlValue::I64(v) => serializer.serialize_i64(*v),
            SqlValue::F64(v) => serializer.serialize_f64(*v),
            SqlValue::Text(s) => serializer.serialize_str(s),
            SqlValue::Bytes(b) => serializer.serialize_str(&hex::encode(b)),
        }
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::I64(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::F64(v)
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(v: Vec<u8>) -> Self {
        SqlValue::Bytes(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(SqlValue::Null, Into::into)
    }
}

/// A batch of rows for streaming transfer.
///
/// Produced by the source reader and consumed in order by the transfer
/// engine through a bounded channel.
#[derive(Debug, Clone)]
pub struct Batch {
    /// Rows in this batch.
    pub rows: Vec<Row>,

    /// 1-based position of the first row within the table's read order.
    pub first_row: u64,
}

impl Batch {
    /// Create a new batch.
    pub fn new(rows: Vec<Row>, first_row: u64) -> Self {
        Self { rows, first_row }
    }

    /// 1-based position of the last row, or `first_row - 1` when empty.
    pub fn last_row(&self) -> u64 {
        (self.first_row + self.rows.len() as u64).saturating_sub(1)
    }

    /// Get the number of rows in this batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Check if the batch is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
