//! Structured-output extraction from generation replies
//!
//! Replies are supposed to be JSON, but models wrap them in prose, fence them
//! in markdown, leave trailing commas or cut them off. Extraction runs an
//! ordered list of strategies and the first success wins:
//!
//! 1. [`Strategy::Direct`]: the whole reply parses as JSON
//! 2. [`Strategy::FencedBlock`]: the body of a ```` ``` ```` / ```` ```json ```` block
//! 3. [`Strategy::BraceMatch`]: the first balanced `{...}` fragment
//! 4. [`Strategy::FieldPatterns`]: `"field": value` pairs picked out by regex
//!
//! Callers supply the final fallback: a structurally valid default.

use lazy_static::lazy_static;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

lazy_static! {
    static ref FENCED: Regex = Regex::new(r"(?s)```(?:json|JSON)?\s*\n?(.*?)```").unwrap();
}

/// One way of recovering JSON from a reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Direct,
    FencedBlock,
    BraceMatch,
    FieldPatterns,
}

impl Strategy {
    /// Strategies in the order they are tried
    pub const ORDERED: [Strategy; 4] = [
        Strategy::Direct,
        Strategy::FencedBlock,
        Strategy::BraceMatch,
        Strategy::FieldPatterns,
    ];

    fn apply(self, text: &str, shape: &Shape<'_>) -> Option<Value> {
        match self {
            Strategy::Direct => serde_json::from_str::<Value>(text.trim())
                .ok()
                .filter(is_structured),
            Strategy::FencedBlock => FENCED
                .captures_iter(text)
                .filter_map(|cap| cap.get(1))
                .find_map(|body| parse_lenient(body.as_str())),
            Strategy::BraceMatch => {
                extract_json_fragment(text, '{', '}').and_then(parse_lenient)
            }
            Strategy::FieldPatterns => extract_fields(text, shape),
        }
    }
}

/// Expected shape of a reply, used by the field-pattern strategy
#[derive(Debug, Clone, Copy)]
pub struct Shape<'a> {
    /// Key of the top-level array of records, if the reply is a list
    pub list_key: Option<&'a str>,
    /// Field names of one record
    pub fields: &'a [&'a str],
}

impl<'a> Shape<'a> {
    /// A single flat object
    pub const fn object(fields: &'a [&'a str]) -> Self {
        Self {
            list_key: None,
            fields,
        }
    }

    /// `{ list_key: [ {fields...}, ... ] }`
    pub const fn list(list_key: &'a str, fields: &'a [&'a str]) -> Self {
        Self {
            list_key: Some(list_key),
            fields,
        }
    }
}

/// A recovered value and the strategy that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct Extracted {
    pub value: Value,
    pub strategy: Strategy,
}

/// Run the strategies in order; `None` when every one of them fails
pub fn extract_structured(text: &str, shape: &Shape<'_>) -> Option<Extracted> {
    Strategy::ORDERED.iter().find_map(|strategy| {
        strategy.apply(text, shape).map(|value| Extracted {
            value,
            strategy: *strategy,
        })
    })
}

/// Extract and deserialize into `T`, trying each strategy's output in order
pub fn parse_as<T: DeserializeOwned>(text: &str, shape: &Shape<'_>) -> Option<(T, Strategy)> {
    Strategy::ORDERED.iter().find_map(|strategy| {
        let value = strategy.apply(text, shape)?;
        match serde_json::from_value::<T>(value) {
            Ok(parsed) => Some((parsed, *strategy)),
            Err(e) => {
                tracing::debug!(?strategy, error = %e, "Recovered JSON did not match expected shape");
                None
            }
        }
    })
}

/// Like [`parse_as`], falling back to `T::default()`
pub fn parse_or_default<T: DeserializeOwned + Default>(text: &str, shape: &Shape<'_>) -> T {
    parse_as(text, shape).map(|(v, _)| v).unwrap_or_default()
}

fn is_structured(value: &Value) -> bool {
    value.is_object() || value.is_array()
}

fn parse_lenient(fragment: &str) -> Option<Value> {
    let trimmed = fragment.trim();
    serde_json::from_str::<Value>(trimmed)
        .ok()
        .or_else(|| serde_json::from_str::<Value>(&fix_json_issues(trimmed)).ok())
        .filter(is_structured)
}

/// Extract a balanced JSON fragment between matching delimiters, ignoring
/// delimiters inside strings
pub fn extract_json_fragment(text: &str, open: char, close: char) -> Option<&str> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape_next = false;
    let mut start_idx = None;

    for (i, c) in text.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }

        if c == '\\' && in_string {
            escape_next = true;
            continue;
        }

        if c == '"' {
            in_string = !in_string;
            continue;
        }

        if in_string {
            continue;
        }

        if c == open {
            if depth == 0 {
                start_idx = Some(i);
            }
            depth += 1;
        } else if c == close && depth > 0 {
            depth -= 1;
            if depth == 0 {
                if let Some(start) = start_idx {
                    return Some(&text[start..=i]);
                }
            }
        }
    }

    None
}

/// Repair the usual model mistakes: trailing commas, smart quotes, control
/// characters
pub fn fix_json_issues(json: &str) -> String {
    lazy_static! {
        static ref TRAILING_COMMA: Regex = Regex::new(r",\s*([\]}])").unwrap();
    }

    let fixed = json
        .replace(['\u{201C}', '\u{201D}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");
    let fixed = TRAILING_COMMA.replace_all(&fixed, "$1");

    fixed
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect()
}

fn field_regex(field: &str) -> Option<Regex> {
    Regex::new(&format!(
        r#""{}"\s*:\s*("(?:[^"\\]|\\.)*"|-?\d+(?:\.\d+)?|true|false|null)"#,
        regex::escape(field)
    ))
    .ok()
}

fn field_values(text: &str, field: &str) -> Vec<Value> {
    let Some(re) = field_regex(field) else {
        return Vec::new();
    };
    re.captures_iter(text)
        .filter_map(|cap| cap.get(1))
        .filter_map(|m| serde_json::from_str::<Value>(m.as_str()).ok())
        .collect()
}

/// Field-level pattern extraction. For lists, the i-th occurrence of each
/// field forms record i; the record count follows the first field.
fn extract_fields(text: &str, shape: &Shape<'_>) -> Option<Value> {
    let columns: Vec<(&str, Vec<Value>)> = shape
        .fields
        .iter()
        .map(|f| (*f, field_values(text, f)))
        .collect();

    match shape.list_key {
        None => {
            let mut object = Map::new();
            for (field, values) in columns {
                if let Some(first) = values.into_iter().next() {
                    object.insert(field.to_string(), first);
                }
            }
            (!object.is_empty()).then_some(Value::Object(object))
        }
        Some(list_key) => {
            let rows = columns.first().map(|(_, v)| v.len()).unwrap_or(0);
            if rows == 0 {
                return None;
            }
            let records: Vec<Value> = (0..rows)
                .map(|i| {
                    let mut record = Map::new();
                    for (field, values) in &columns {
                        if let Some(v) = values.get(i) {
                            record.insert(field.to_string(), v.clone());
                        }
                    }
                    Value::Object(record)
                })
                .collect();
            let mut wrapper = Map::new();
            wrapper.insert(list_key.to_string(), Value::Array(records));
            Some(Value::Object(wrapper))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    const CANDIDATE: Shape<'static> = Shape::list("suggestions", &["title", "description"]);

    #[derive(Debug, Default, Deserialize, PartialEq)]
    struct Reply {
        suggestions: Vec<Item>,
    }

    #[derive(Debug, Default, Deserialize, PartialEq)]
    struct Item {
        title: String,
        #[serde(default)]
        description: String,
    }

    #[test]
    fn test_direct() {
        let out = extract_structured(r#"{"suggestions": []}"#, &CANDIDATE).unwrap();
        assert_eq!(out.strategy, Strategy::Direct);
    }

    #[test]
    fn test_fenced_block() {
        let text = "Here you go:\n```json\n{\"suggestions\": [{\"title\": \"A\"}],}\n```\nThanks";
        let out = extract_structured(text, &CANDIDATE).unwrap();
        assert_eq!(out.strategy, Strategy::FencedBlock);
        assert_eq!(out.value["suggestions"][0]["title"], "A");
    }

    #[test]
    fn test_brace_match_ignores_braces_in_strings() {
        let text = r#"Sure! {"suggestions": [{"title": "Use {} formatting"}]} hope that helps"#;
        let out = extract_structured(text, &CANDIDATE).unwrap();
        assert_eq!(out.strategy, Strategy::BraceMatch);
        assert_eq!(out.value["suggestions"][0]["title"], "Use {} formatting");
    }

    #[test]
    fn test_field_patterns_on_truncated_reply() {
        let text = r#"{"suggestions": [{"title": "First", "description": "one"}, {"title": "Second", "descr"#;
        let out = extract_structured(text, &CANDIDATE).unwrap();
        assert_eq!(out.strategy, Strategy::FieldPatterns);
        let records = out.value["suggestions"].as_array().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1]["title"], "Second");
        assert!(records[1].get("description").is_none());
    }

    #[test]
    fn test_flat_object_patterns() {
        let shape = Shape::object(&["primary_goal", "confidence"]);
        let text = r#"primary_goal: oops "primary_goal": "Ship the parser", "confidence": 0.7"#;
        let out = extract_structured(text, &shape).unwrap();
        assert_eq!(out.value["primary_goal"], "Ship the parser");
        assert_eq!(out.value["confidence"], 0.7);
    }

    #[test]
    fn test_nothing_recoverable() {
        assert!(extract_structured("I cannot help with that.", &CANDIDATE).is_none());
        let reply: Reply = parse_or_default("no json", &CANDIDATE);
        assert_eq!(reply, Reply::default());
    }

    #[test]
    fn test_parse_as_skips_mismatched_shapes() {
        // Neither the bare array nor the first object fits `Reply`; the
        // field patterns still recover the records.
        let text = r#"[{"title": "A", "description": "x"}]"#;
        let (reply, strategy) = parse_as::<Reply>(text, &CANDIDATE).unwrap();
        assert_eq!(strategy, Strategy::FieldPatterns);
        assert_eq!(reply.suggestions[0].title, "A");
    }

    #[test]
    fn test_fix_json_issues() {
        let fixed = fix_json_issues("{\u{201C}a\u{201D}: [1, 2, ], }");
        assert_eq!(serde_json::from_str::<Value>(&fixed).unwrap()["a"][1], 2);
    }
}
