//! Response validation: raw capability text → typed [`PageExtraction`].
//!
//! This is the only place that looks at untyped JSON. Vision models answer
//! in a loosely-typed shape: numbers arrive as `"1,024"`, `12.0` or `null`,
//! keys drift between `pending_1_year` and `above_1_year`, and the whole
//! payload is sometimes wrapped in a Markdown fence despite the prompt.
//! Everything downstream sees only named fields with zero-defaulted counts.
//!
//! Two outcomes only:
//! - `Ok(PageExtraction)` — possibly with zero entries, possibly with rows
//!   that lack a crime head (those are the aggregator's soft losses).
//! - `Err(CapabilityError::Malformed)` — nothing usable; the invoker retries.

use crate::error::CapabilityError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use tracing::warn;

/// One page's worth of validated capability output.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageExtraction {
    pub rows: Vec<RawRow>,
    pub conviction: Option<RawConviction>,
}

/// One element of the statistics list, before aggregation.
#[derive(Debug, Clone, PartialEq)]
pub enum RawRow {
    /// An object; counts are already zero-defaulted.
    Entry(RawEntry),
    /// A list element that was not an object (string, number, …).
    NotAnObject,
}

/// A statistic entry with every numeric field coerced.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawEntry {
    #[serde(
        default,
        deserialize_with = "lenient_text",
        alias = "crime",
        alias = "head",
        alias = "name",
        alias = "crime_head_name"
    )]
    pub crime_head: Option<String>,

    #[serde(default, deserialize_with = "lenient_text")]
    pub category: Option<String>,

    #[serde(
        default,
        deserialize_with = "lenient_count",
        alias = "reg",
        alias = "registered_cases"
    )]
    pub registered: u64,

    #[serde(
        default,
        deserialize_with = "lenient_count",
        alias = "det",
        alias = "detected_cases"
    )]
    pub detected: u64,

    #[serde(
        default,
        deserialize_with = "lenient_count",
        alias = "month_0_3",
        alias = "pending_0_3_months"
    )]
    pub pending_0_3: u64,

    #[serde(
        default,
        deserialize_with = "lenient_count",
        alias = "month_3_6",
        alias = "pending_3_6_months"
    )]
    pub pending_3_6: u64,

    #[serde(
        default,
        deserialize_with = "lenient_count",
        alias = "month_6_12",
        alias = "pending_6_12_months"
    )]
    pub pending_6_12: u64,

    #[serde(
        default,
        deserialize_with = "lenient_count",
        alias = "above_1_year",
        alias = "pending_above_1_year",
        alias = "pending_over_1_year"
    )]
    pub pending_1_year: u64,
}

impl RawEntry {
    pub fn pending(&self) -> [u64; 4] {
        [
            self.pending_0_3,
            self.pending_3_6,
            self.pending_6_12,
            self.pending_1_year,
        ]
    }
}

/// The optional per-page conviction block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RawConviction {
    #[serde(
        default,
        deserialize_with = "lenient_count",
        alias = "cases_decided",
        alias = "total_decided"
    )]
    pub decided: u64,

    #[serde(default, deserialize_with = "lenient_count", alias = "conviction")]
    pub convicted: u64,

    #[serde(default, deserialize_with = "lenient_count", alias = "acquittal")]
    pub acquitted: u64,
}

/// Top-level object shape. Unknown keys are ignored.
#[derive(Debug, Default, Deserialize)]
struct Envelope {
    #[serde(
        default,
        alias = "rows",
        alias = "crime_stats",
        alias = "statistics"
    )]
    crime_statistics: Option<Vec<Value>>,

    #[serde(
        default,
        alias = "conviction",
        alias = "convictions",
        alias = "conviction_statistics"
    )]
    conviction_stats: Option<Value>,
}

/// Parse and coerce one capability response.
pub fn parse_response(text: &str) -> Result<PageExtraction, CapabilityError> {
    let value = parse_json_payload(text)?;

    match value {
        Value::Array(items) => Ok(PageExtraction {
            rows: rows_from(items),
            conviction: None,
        }),
        Value::Object(mut map) => {
            keep_one_per_field(&mut map, ENVELOPE_KEYS);
            let empty = map.is_empty();
            let envelope: Envelope =
                serde_json::from_value(Value::Object(map)).map_err(|e| {
                    CapabilityError::Malformed {
                        detail: format!("unexpected top-level shape: {e}"),
                    }
                })?;

            if envelope.crime_statistics.is_none() && envelope.conviction_stats.is_none() && !empty
            {
                return Err(CapabilityError::Malformed {
                    detail: "response has neither crime_statistics nor conviction_stats".into(),
                });
            }

            Ok(PageExtraction {
                rows: rows_from(envelope.crime_statistics.unwrap_or_default()),
                conviction: envelope.conviction_stats.and_then(conviction_from),
            })
        }
        other => Err(CapabilityError::Malformed {
            detail: format!("expected a JSON object or array, got {}", type_name(&other)),
        }),
    }
}

// ── Payload recovery ─────────────────────────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^```[A-Za-z]*[ \t]*\n(.*?)\n?```\s*$").expect("fence regex is valid")
});

/// Remove a Markdown fence wrapping the whole response, if any.
pub fn strip_code_fences(input: &str) -> &str {
    let trimmed = input.trim();
    match RE_OUTER_FENCES.captures(trimmed) {
        Some(caps) => caps.get(1).map_or(trimmed, |m| m.as_str().trim()),
        None => trimmed,
    }
}

fn parse_json_payload(text: &str) -> Result<Value, CapabilityError> {
    let body = strip_code_fences(text);
    if body.is_empty() {
        return Err(CapabilityError::Malformed {
            detail: "empty response".into(),
        });
    }

    match serde_json::from_str::<Value>(body) {
        Ok(v) => Ok(v),
        Err(first) => {
            // Models occasionally add a sentence before or after the JSON.
            let start = body.find(['{', '[']);
            let end = body.rfind(['}', ']']);
            if let (Some(s), Some(e)) = (start, end) {
                if s < e {
                    if let Ok(v) = serde_json::from_str::<Value>(&body[s..=e]) {
                        return Ok(v);
                    }
                }
            }
            Err(CapabilityError::Malformed {
                detail: format!("JSON parsing failed: {first}"),
            })
        }
    }
}

// ── Key aliases ──────────────────────────────────────────────────────────────
//
// serde refuses an object that names the same field twice under different
// aliases, so every group is reduced to one key before deserializing. Each
// group lists the canonical key first; the first non-null key wins.

const ENVELOPE_KEYS: &[&[&str]] = &[
    &["crime_statistics", "rows", "crime_stats", "statistics"],
    &["conviction_stats", "conviction", "convictions", "conviction_statistics"],
];

const ENTRY_KEYS: &[&[&str]] = &[
    &["crime_head", "crime", "head", "name", "crime_head_name"],
    &["registered", "reg", "registered_cases"],
    &["detected", "det", "detected_cases"],
    &["pending_0_3", "month_0_3", "pending_0_3_months"],
    &["pending_3_6", "month_3_6", "pending_3_6_months"],
    &["pending_6_12", "month_6_12", "pending_6_12_months"],
    &[
        "pending_1_year",
        "above_1_year",
        "pending_above_1_year",
        "pending_over_1_year",
    ],
];

const CONVICTION_KEYS: &[&[&str]] = &[
    &["decided", "cases_decided", "total_decided"],
    &["convicted", "conviction"],
    &["acquitted", "acquittal"],
];

/// Drop all but one key of each alias group.
fn keep_one_per_field(map: &mut Map<String, Value>, groups: &[&[&str]]) {
    for group in groups {
        let present: Vec<&str> = group.iter().copied().filter(|k| map.contains_key(*k)).collect();
        if present.len() < 2 {
            continue;
        }
        let keep = present
            .iter()
            .copied()
            .find(|k| map.get(*k).is_some_and(|v| !v.is_null()))
            .unwrap_or(present[0]);
        for key in present {
            if key != keep {
                map.remove(key);
            }
        }
    }
}

fn rows_from(items: Vec<Value>) -> Vec<RawRow> {
    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| match item {
            Value::Object(mut map) => {
                keep_one_per_field(&mut map, ENTRY_KEYS);
                match serde_json::from_value::<RawEntry>(Value::Object(map)) {
                    Ok(entry) => RawRow::Entry(entry),
                    Err(e) => {
                        warn!("Entry {} could not be read: {}", index, e);
                        RawRow::NotAnObject
                    }
                }
            }
            _ => RawRow::NotAnObject,
        })
        .collect()
}

fn conviction_from(value: Value) -> Option<RawConviction> {
    let read = |mut map: Map<String, Value>| {
        keep_one_per_field(&mut map, CONVICTION_KEYS);
        serde_json::from_value(Value::Object(map)).ok()
    };
    match value {
        Value::Object(map) => read(map),
        Value::Array(items) => items.into_iter().find_map(|v| match v {
            Value::Object(map) => read(map),
            _ => None,
        }),
        _ => None,
    }
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// ── Field coercion ───────────────────────────────────────────────────────────

/// Coerce any JSON scalar into a non-negative count; anything unusable is 0.
pub fn count_from_value(value: &Value) -> u64 {
    match value {
        Value::Number(n) => {
            if let Some(u) = n.as_u64() {
                u
            } else if let Some(f) = n.as_f64() {
                if f.is_finite() && f > 0.0 {
                    f.round() as u64
                } else {
                    0
                }
            } else {
                0
            }
        }
        Value::String(s) => {
            let digits: String = s
                .trim()
                .chars()
                .filter(|c| !matches!(c, ',' | ' ' | '_'))
                .collect();
            digits
                .parse::<u64>()
                .ok()
                .or_else(|| {
                    digits
                        .parse::<f64>()
                        .ok()
                        .filter(|f| f.is_finite() && *f > 0.0)
                        .map(|f| f.round() as u64)
                })
                .unwrap_or(0)
        }
        _ => 0,
    }
}

fn lenient_count<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().map(count_from_value).unwrap_or(0))
}

fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) => {
            let t = s.trim();
            (!t.is_empty()).then(|| t.to_string())
        }
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(row: &RawRow) -> &RawEntry {
        match row {
            RawRow::Entry(e) => e,
            RawRow::NotAnObject => panic!("expected an entry"),
        }
    }

    #[test]
    fn parses_envelope_with_conviction() {
        let text = r#"{
            "crime_statistics": [
                {"crime_head": "Murder", "registered": 25, "detected": 24,
                 "pending_0_3": 1, "pending_3_6": 0, "pending_6_12": 2, "pending_1_year": 3}
            ],
            "conviction_stats": {"decided": 0, "convicted": 17, "acquitted": 3}
        }"#;
        let page = parse_response(text).unwrap();
        assert_eq!(page.rows.len(), 1);
        let e = entry(&page.rows[0]);
        assert_eq!(e.crime_head.as_deref(), Some("Murder"));
        assert_eq!(e.registered, 25);
        assert_eq!(e.pending(), [1, 0, 2, 3]);
        let c = page.conviction.unwrap();
        assert_eq!((c.decided, c.convicted, c.acquitted), (0, 17, 3));
    }

    #[test]
    fn missing_numbers_default_to_zero() {
        let page =
            parse_response(r#"{"crime_statistics":[{"crime_head":"Murder","registered":25,"detected":24}]}"#)
                .unwrap();
        let e = entry(&page.rows[0]);
        assert_eq!(e.pending(), [0, 0, 0, 0]);
        assert!(page.conviction.is_none());
    }

    #[test]
    fn coerces_strings_floats_and_nulls() {
        let page = parse_response(
            r#"[{"crime_head":"  Theft ","registered":"1,024","detected":12.0,
                 "pending_0_3":null,"pending_3_6":"-","pending_6_12":-4,"above_1_year":"7"}]"#,
        )
        .unwrap();
        let e = entry(&page.rows[0]);
        assert_eq!(e.crime_head.as_deref(), Some("Theft"));
        assert_eq!(e.registered, 1024);
        assert_eq!(e.detected, 12);
        assert_eq!(e.pending(), [0, 0, 0, 7]);
    }

    #[test]
    fn strips_markdown_fences() {
        let text = "```json\n{\"crime_statistics\": []}\n```";
        let page = parse_response(text).unwrap();
        assert!(page.rows.is_empty());
    }

    #[test]
    fn recovers_json_surrounded_by_prose() {
        let text = "Here is the data: {\"rows\": [{\"crime_head\": \"Robbery\"}]} Hope this helps.";
        let page = parse_response(text).unwrap();
        assert_eq!(entry(&page.rows[0]).crime_head.as_deref(), Some("Robbery"));
    }

    #[test]
    fn non_object_rows_are_kept_as_markers() {
        let page = parse_response(r#"{"crime_statistics": ["Murder", 3, {"crime_head": "Riot"}]}"#)
            .unwrap();
        assert_eq!(page.rows.len(), 3);
        assert_eq!(page.rows[0], RawRow::NotAnObject);
        assert_eq!(page.rows[1], RawRow::NotAnObject);
        assert_eq!(entry(&page.rows[2]).crime_head.as_deref(), Some("Riot"));
    }

    #[test]
    fn empty_object_is_an_empty_page() {
        let page = parse_response("{}").unwrap();
        assert!(page.rows.is_empty());
    }

    #[test]
    fn unrelated_object_is_malformed() {
        let err = parse_response(r#"{"title": "Monthly crime review"}"#).unwrap_err();
        assert!(matches!(err, CapabilityError::Malformed { .. }));
    }

    #[test]
    fn invalid_json_is_malformed() {
        let err = parse_response("I could not read this page.").unwrap_err();
        assert!(matches!(err, CapabilityError::Malformed { .. }));
        let err = parse_response("   ").unwrap_err();
        assert!(matches!(err, CapabilityError::Malformed { .. }));
    }

    #[test]
    fn scalar_top_level_is_malformed() {
        let err = parse_response("42").unwrap_err();
        assert!(err.to_string().contains("a number"));
    }

    #[test]
    fn conviction_array_uses_first_object() {
        let page = parse_response(
            r#"{"crime_statistics": [], "conviction_stats": [{"decided": "5", "convicted": 4, "acquitted": 1}]}"#,
        )
        .unwrap();
        assert_eq!(page.conviction.unwrap().decided, 5);
    }

    #[test]
    fn numeric_head_names_become_text() {
        let page = parse_response(r#"[{"crime_head": 302, "registered": 1}]"#).unwrap();
        assert_eq!(entry(&page.rows[0]).crime_head.as_deref(), Some("302"));
    }

    #[test]
    fn key_and_alias_together_keep_the_row() {
        let page = parse_response(
            r#"[{"crime_head": "Murder", "name": "Murder", "registered": 25,
                 "registered_cases": 25, "detected": 24,
                 "pending_1_year": 3, "above_1_year": 3}]"#,
        )
        .unwrap();
        let e = entry(&page.rows[0]);
        assert_eq!(e.crime_head.as_deref(), Some("Murder"));
        assert_eq!(e.registered, 25);
        assert_eq!(e.detected, 24);
        assert_eq!(e.pending(), [0, 0, 0, 3]);
    }

    #[test]
    fn null_canonical_key_yields_to_alias() {
        let page = parse_response(r#"[{"crime_head": "Riot", "pending_1_year": null, "above_1_year": "7"}]"#)
            .unwrap();
        assert_eq!(entry(&page.rows[0]).pending_1_year, 7);
    }

    #[test]
    fn duplicate_envelope_and_conviction_keys_are_tolerated() {
        let page = parse_response(
            r#"{"crime_statistics": [{"crime_head": "Theft"}], "rows": [],
                "conviction_stats": {"decided": 20, "cases_decided": 20, "convicted": 17}}"#,
        )
        .unwrap();
        assert_eq!(page.rows.len(), 1);
        let c = page.conviction.unwrap();
        assert_eq!((c.decided, c.convicted), (20, 17));
    }
}
