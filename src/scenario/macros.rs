//! Relative date placeholders in scenario text.
//!
//! `${DATE:+N}` / `${DATE:-N}` expand to now ± N days (`%Y-%m-%d %H:%M:%S`),
//! `${TODAY}` to the current date (`%Y-%m-%d`).
use chrono::{Duration, NaiveDateTime};
use regex::{Captures, Regex};
use serde_json::Value;
use std::sync::OnceLock;

const DATE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const DATE_FORMAT: &str = "%Y-%m-%d";
const TODAY_MACRO: &str = "${TODAY}";

fn date_macro_regex() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\$\{DATE:([+-]\d+)\}").expect("valid date macro regex"))
}

/// Resolve placeholders in every string nested inside `value`.
///
/// Mapping keys are left untouched; only values are rewritten.
pub fn resolve_date_macros(value: Value, now: NaiveDateTime) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, item)| (key, resolve_date_macros(item, now)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| resolve_date_macros(item, now))
                .collect(),
        ),
        Value::String(text) => Value::String(replace_in_text(&text, now)),
        other => other,
    }
}

fn replace_in_text(text: &str, now: NaiveDateTime) -> String {
    let replaced = date_macro_regex().replace_all(text, |caps: &Captures| {
        offset_date(&caps[1], now).unwrap_or_else(|| caps[0].to_string())
    });
    if replaced.contains(TODAY_MACRO) {
        let today = now.format(DATE_FORMAT).to_string();
        return replaced.replace(TODAY_MACRO, &today);
    }
    replaced.into_owned()
}

// Out-of-range offsets leave the placeholder as written.
fn offset_date(raw_offset: &str, now: NaiveDateTime) -> Option<String> {
    let days: i64 = raw_offset.parse().ok()?;
    let delta = Duration::try_days(days)?;
    let shifted = now.checked_add_signed(delta)?;
    Some(shifted.format(DATE_TIME_FORMAT).to_string())
}
