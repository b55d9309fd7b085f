//! GraphQL query construction and response parsing
//!
//! Queries are built as strings against the `Get` root. All user-supplied
//! strings pass through [`escape_string`] and collection names are
//! validated before interpolation.

use crate::error::{Error, Result};
use serde_json::{Map, Value};

/// One object returned by a search query
#[derive(Debug, Clone)]
pub struct SearchHit {
    /// Object UUID (`_additional.id`)
    pub uuid: String,
    /// The full property map, verbatim from the cluster
    pub properties: Map<String, Value>,
    /// BM25/hybrid relevance score
    pub score: Option<f64>,
    /// Vector distance
    pub distance: Option<f64>,
}

/// Collection names are interpolated into queries and URL paths; restrict
/// them to GraphQL identifier shape.
pub fn validate_collection_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            first.is_ascii_alphabetic() && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };

    if valid {
        Ok(())
    } else {
        Err(Error::Weaviate(format!("Invalid collection name: {name:?}")))
    }
}

/// Escape a string as a GraphQL string literal (including the quotes).
fn escape_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

fn format_vector(vector: &[f32]) -> String {
    let parts: Vec<String> = vector.iter().map(|v| v.to_string()).collect();
    format!("[{}]", parts.join(", "))
}

fn get_query(collection: &str, operator: &str, limit: usize, props: &[String], additional: &str) -> String {
    let selection = if props.is_empty() {
        String::new()
    } else {
        format!("{} ", props.join(" "))
    };

    format!(
        "{{ Get {{ {collection}({operator}, limit: {limit}) {{ {selection}_additional {{ {additional} }} }} }} }}"
    )
}

/// BM25 keyword query
pub fn keyword_query(collection: &str, query: &str, limit: usize, props: &[String]) -> String {
    let operator = format!("bm25: {{query: {}}}", escape_string(query));
    get_query(collection, &operator, limit, props, "id score")
}

/// nearText semantic query
pub fn semantic_query(collection: &str, query: &str, limit: usize, props: &[String]) -> String {
    let operator = format!("nearText: {{concepts: [{}]}}", escape_string(query));
    get_query(collection, &operator, limit, props, "id distance")
}

/// Hybrid query, optionally restricted to `query_properties` for the
/// keyword leg and carrying an explicit `vector` for the vector leg.
pub fn hybrid_query(
    collection: &str,
    query: &str,
    limit: usize,
    alpha: f64,
    query_properties: Option<&[String]>,
    vector: Option<&[f32]>,
    props: &[String],
) -> String {
    let mut operator = format!("hybrid: {{query: {}, alpha: {alpha}", escape_string(query));
    if let Some(properties) = query_properties.filter(|p| !p.is_empty()) {
        let escaped: Vec<String> = properties.iter().map(|p| escape_string(p)).collect();
        operator.push_str(&format!(", properties: [{}]", escaped.join(", ")));
    }
    if let Some(vector) = vector {
        operator.push_str(&format!(", vector: {}", format_vector(vector)));
    }
    operator.push('}');
    get_query(collection, &operator, limit, props, "id score distance")
}

/// Parse a GraphQL response body into hits for `collection`.
///
/// A non-empty `errors` array always wins over partial data. A missing
/// class key yields an empty hit list (Weaviate omits it for zero results).
pub fn parse_hits(body: &Value, collection: &str) -> Result<Vec<SearchHit>> {
    if let Some(errors) = body.get("errors").and_then(|e| e.as_array()) {
        if !errors.is_empty() {
            let messages: Vec<&str> = errors
                .iter()
                .filter_map(|e| e.get("message").and_then(|m| m.as_str()))
                .collect();
            return Err(Error::Weaviate(messages.join("; ")));
        }
    }

    let objects = match body
        .get("data")
        .and_then(|d| d.get("Get"))
        .and_then(|g| g.get(collection))
        .and_then(|c| c.as_array())
    {
        Some(objects) => objects,
        None => return Ok(Vec::new()),
    };

    let hits = objects
        .iter()
        .filter_map(|obj| obj.as_object())
        .map(|obj| {
            let additional = obj.get("_additional").and_then(|a| a.as_object());
            let uuid = additional
                .and_then(|a| a.get("id"))
                .and_then(|id| id.as_str())
                .unwrap_or_default()
                .to_string();
            let score = additional.and_then(|a| a.get("score")).and_then(number_from);
            let distance = additional
                .and_then(|a| a.get("distance"))
                .and_then(number_from);

            let mut properties = obj.clone();
            properties.remove("_additional");

            SearchHit {
                uuid,
                properties,
                score,
                distance,
            }
        })
        .collect();

    Ok(hits)
}

/// Weaviate serializes `score` as a JSON string and `distance` as a number.
fn number_from(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse::<f64>().ok(),
        _ => None,
    }
}
