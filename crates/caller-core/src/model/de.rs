// ── Lenient field decoding ──
//
// The triage backend is inconsistent about identifier types: the same
// field arrives as `7`, `"7"` or `null` depending on the endpoint. These
// helpers normalize at the serde boundary so the model stays strongly
// typed.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Any scalar as a string; `null` becomes empty.
pub(crate) fn string_or_number<'de, D>(d: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(opt_string_or_number(d)?.unwrap_or_default())
}

/// Any scalar as a string; `null` and `""` become `None`.
pub(crate) fn opt_string_or_number<'de, D>(d: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(d)?;
    let text = match value {
        Value::Null => return Ok(None),
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => {
            return Err(serde::de::Error::custom(format!(
                "expected string or number, got {other}"
            )));
        }
    };
    Ok(if text.is_empty() { None } else { Some(text) })
}

/// Integer from a number or numeric string; `null` becomes 0.
pub(crate) fn lenient_i64<'de, D>(d: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(opt_lenient_i64(d)?.unwrap_or_default())
}

/// Integer from a number or numeric string; `null` and `""` become `None`.
pub(crate) fn opt_lenient_i64<'de, D>(d: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(d)? {
        Value::Null => Ok(None),
        Value::Number(n) => n
            .as_i64()
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("{n} is not an integer"))),
        Value::String(s) if s.trim().is_empty() => Ok(None),
        Value::String(s) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("{s:?} is not an integer"))),
        other => Err(serde::de::Error::custom(format!(
            "expected integer, got {other}"
        ))),
    }
}

/// `null` decodes to `T::default()`.
pub(crate) fn null_default<'de, D, T>(d: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(d)?.unwrap_or_default())
}
