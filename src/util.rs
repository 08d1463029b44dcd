use anyhow::{Context, Result};
use serde_json::Value;
use std::env;
use std::path::{Path, PathBuf};

pub fn display_path(path: &Path, base: Option<&Path>) -> String {
    if let Some(base) = base {
        if let Ok(relative) = path.strip_prefix(base) {
            return relative.display().to_string();
        }
    }
    path.display().to_string()
}

pub fn truncate_string(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let mut truncated = String::new();
    for ch in text.chars() {
        if truncated.len() + ch.len_utf8() > max_bytes {
            break;
        }
        truncated.push(ch);
    }
    truncated
}

/// Upper-cased env token for a step id: every non-alphanumeric char becomes `_`.
pub fn env_token(step_id: &str) -> String {
    step_id
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() {
                ch.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// String form used when comparing template-rendered values against
/// declared ones: strings compare by content, everything else by JSON text.
pub fn coerce_to_string(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Equality on coerced strings. Booleans ignore ASCII case on either side,
/// so `true` matches a declared `"True"`.
pub fn coerced_eq(actual: &Value, expected: &Value) -> bool {
    coerced_texts_match(actual, expected, false)
}

/// [`coerced_eq`] with surrounding whitespace ignored.
pub fn coerced_eq_trimmed(actual: &Value, expected: &Value) -> bool {
    coerced_texts_match(actual, expected, true)
}

fn coerced_texts_match(actual: &Value, expected: &Value, trim: bool) -> bool {
    let actual_text = coerce_to_string(actual);
    let expected_text = coerce_to_string(expected);
    let (left, right) = if trim {
        (actual_text.trim(), expected_text.trim())
    } else {
        (actual_text.as_str(), expected_text.as_str())
    };
    if actual.is_boolean() || expected.is_boolean() {
        left.eq_ignore_ascii_case(right)
    } else {
        left == right
    }
}

/// Resolve a user-supplied path against the cwd first, then `fallback_root`.
///
/// Returns `None` when neither candidate exists.
pub fn resolve_existing(raw: &Path, fallback_root: Option<&Path>) -> Option<PathBuf> {
    if raw.is_absolute() {
        return raw.exists().then(|| raw.to_path_buf());
    }
    if raw.exists() {
        return env::current_dir()
            .ok()
            .map(|cwd| cwd.join(raw))
            .or_else(|| Some(raw.to_path_buf()));
    }
    let candidate = fallback_root?.join(raw);
    candidate.exists().then_some(candidate)
}

pub fn write_json_pretty<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    let bytes = serde_json::to_vec_pretty(value).context("serialize JSON")?;
    std::fs::write(path, bytes).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}
