//! Boundary coercion for fields the client does not fully control.
//!
//! Stored rows and form payloads send some scalar fields as either strings or
//! numbers (`"5"` vs `5`). These helpers collapse both into one canonical
//! `Option<String>` so downstream code only ever sees trimmed text or `None`.

use serde::{Deserialize, Deserializer};

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrNumber {
    Str(String),
    Int(i64),
    Float(f64),
}

/// Deserialize a string, integer, float or null into a trimmed `Option<String>`.
/// Blank strings become `None`.
pub fn opt_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<StringOrNumber>::deserialize(deserializer)?;
    Ok(value.and_then(|v| match v {
        StringOrNumber::Str(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        StringOrNumber::Int(n) => Some(n.to_string()),
        StringOrNumber::Float(f) if f.fract() == 0.0 => Some((f as i64).to_string()),
        StringOrNumber::Float(f) => Some(f.to_string()),
    }))
}
