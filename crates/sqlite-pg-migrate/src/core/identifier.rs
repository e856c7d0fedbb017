//! Identifier sanitizing, validation and quoting.
//!
//! Target table names are produced by [`sanitize`]: lower-cased, with every
//! character outside `[a-z0-9_]` stripped. Column names are carried verbatim
//! and always emitted quoted, so both engines see the same spelling.
//!
//! SQL identifiers cannot be bound as statement parameters, so every
//! identifier that ends up in generated SQL goes through [`quote_ident`].

use sha2::{Digest, Sha256};

use crate::error::{MigrateError, Result};

/// Maximum identifier length accepted before quoting.
const MAX_IDENTIFIER_LENGTH: usize = 128;

/// PostgreSQL silently truncates identifiers longer than this many bytes.
pub const PG_MAX_IDENTIFIER_BYTES: usize = 63;

/// Turn a raw source identifier into a target-safe one.
///
/// Lower-cases the input and keeps only ASCII letters, digits and `_`.
/// Pure and idempotent: `sanitize(sanitize(x)) == sanitize(x)`.
///
/// Distinct inputs may map to the same output (`"Order Items"` and
/// `"order_items"` do not, but `"OrderItems"` and `"order-items"` both
/// become `"orderitems"`); see [`crate::core::SchemaModel::identifier_collisions`].
pub fn sanitize(raw: &str) -> String {
    raw.chars()
        .flat_map(char::to_lowercase)
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect()
}

/// Validate an identifier before it is placed into SQL.
///
/// Rejects empty identifiers, identifiers containing null bytes and
/// identifiers longer than 128 bytes.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(MigrateError::Config(
            "Identifier cannot be empty".to_string(),
        ));
    }

    if name.contains('\0') {
        return Err(MigrateError::Config(format!(
            "SECURITY: Identifier contains null byte (possible injection attempt): {:?}",
            name
        )));
    }

    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(MigrateError::Config(format!(
            "SECURITY: Identifier exceeds maximum length of {} bytes (got {} bytes): {:?}",
            MAX_IDENTIFIER_LENGTH,
            name.len(),
            name
        )));
    }

    Ok(())
}

/// Quote an identifier with double quotes.
///
/// Both SQLite and PostgreSQL use standard double-quote quoting, with
/// embedded quotes doubled.
pub fn quote_ident(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("\"{}\"", name.replace('"', "\"\"")))
}

/// Qualify a table name with a schema.
pub fn qualify(schema: &str, table: &str) -> Result<String> {
    Ok(format!("{}.{}", quote_ident(schema)?, quote_ident(table)?))
}

/// Quote and comma-join a list of column names.
pub fn quote_list(names: &[String]) -> Result<String> {
    let quoted = names
        .iter()
        .map(|n| quote_ident(n))
        .collect::<Result<Vec<_>>>()?;
    Ok(quoted.join(", "))
}

/// Hex digits of the name digest appended to truncated names.
const TRUNCATION_HASH_LEN: usize = 8;

/// Fit a generated name into the PostgreSQL identifier limit.
///
/// Longer names keep a prefix (cut on a UTF-8 boundary) followed by `_` and
/// the first hex digits of the SHA-256 of the full name, so names that only
/// differ past the limit stay distinct.
pub fn truncate_identifier(mut name: String) -> String {
    if name.len() <= PG_MAX_IDENTIFIER_BYTES {
        return name;
    }

    let digest = hex::encode(Sha256::digest(name.as_bytes()));
    let mut end = PG_MAX_IDENTIFIER_BYTES - TRUNCATION_HASH_LEN - 1;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    name.truncate(end);
    name.push('_');
    name.push_str(&digest[..TRUNCATION_HASH_LEN]);
    name
}
