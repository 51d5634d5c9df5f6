//! Input-format adapters producing canonical `LabeledQuery` records.
//!
//! Every source format is one `QueryFormat` variant. Adding a format means
//! adding a variant and its record type here; nothing downstream changes.
//! Files are JSON Lines: one record object per non-blank line.

use crate::dataset::literal::parse_python_literal;
use crate::dataset::types::LabeledQuery;
use crate::error::{AppError, Result};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeSet;
use std::path::Path;
use std::str::FromStr;

/// Source layout of the labeled query file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryFormat {
    /// `{"query", "tools", "is_evaluation", "template"?}`
    Canonical,
    /// Annotation sheet columns: `final_query`, `instruction_template`,
    /// `is_train`, `available_tools`.
    Annotated,
}

impl FromStr for QueryFormat {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "canonical" | "" => Ok(Self::Canonical),
            "annotated" | "sheet" => Ok(Self::Annotated),
            other => Err(AppError::ConfigError(format!(
                "unknown query format '{other}' (expected canonical or annotated)"
            ))),
        }
    }
}

/// How the annotated `is_train` flag maps onto split membership.
///
/// Annotation files disagree on this, so the mapping is explicit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitConvention {
    /// `is_train == 1` is a training record.
    Standard,
    /// `is_train == 0` is a training record.
    Inverted,
}

impl SplitConvention {
    fn is_evaluation(self, is_train_flag: bool) -> bool {
        match self {
            Self::Standard => !is_train_flag,
            Self::Inverted => is_train_flag,
        }
    }
}

impl FromStr for SplitConvention {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "standard" | "" => Ok(Self::Standard),
            "inverted" => Ok(Self::Inverted),
            other => Err(AppError::ConfigError(format!(
                "unknown split convention '{other}' (expected standard or inverted)"
            ))),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CanonicalRecord {
    query: String,
    #[serde(default)]
    tools: Value,
    #[serde(default)]
    is_evaluation: bool,
    #[serde(default)]
    template: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnnotatedRecord {
    final_query: String,
    #[serde(default)]
    instruction_template: Option<String>,
    is_train: Value,
    #[serde(default)]
    available_tools: Value,
}

/// Load a labeled query file. Failures are fatal and name the file.
pub fn load_queries(
    path: &Path,
    format: QueryFormat,
    convention: SplitConvention,
) -> Result<Vec<LabeledQuery>> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        AppError::DatasetError(format!("failed to read '{}': {}", path.display(), e))
    })?;

    let queries = parse_queries(&content, format, convention)
        .map_err(|e| AppError::DatasetError(format!("'{}': {}", path.display(), e)))?;

    tracing::info!(
        path = %path.display(),
        format = ?format,
        queries = queries.len(),
        evaluation = queries.iter().filter(|q| q.is_evaluation).count(),
        "Labeled queries loaded"
    );

    Ok(queries)
}

/// Parse JSON Lines content with the given adapter.
pub fn parse_queries(
    content: &str,
    format: QueryFormat,
    convention: SplitConvention,
) -> Result<Vec<LabeledQuery>> {
    let mut queries = Vec::new();

    for (idx, line) in content.lines().enumerate() {
        let line_no = idx + 1;
        if line.trim().is_empty() {
            continue;
        }

        let query = match format {
            QueryFormat::Canonical => adapt_canonical(line, line_no)?,
            QueryFormat::Annotated => adapt_annotated(line, line_no, convention)?,
        };
        queries.push(query);
    }

    if queries.is_empty() {
        return Err(AppError::DatasetError("no labeled queries found".into()));
    }

    Ok(queries)
}

fn adapt_canonical(line: &str, line_no: usize) -> Result<LabeledQuery> {
    let record: CanonicalRecord = serde_json::from_str(line)
        .map_err(|e| AppError::DatasetError(format!("line {line_no}: {e}")))?;

    Ok(LabeledQuery {
        ground_truth: parse_ground_truth(&record.tools, line_no),
        text: record.query,
        template: record.template.filter(|t| !t.trim().is_empty()),
        is_evaluation: record.is_evaluation,
    })
}

fn adapt_annotated(line: &str, line_no: usize, convention: SplitConvention) -> Result<LabeledQuery> {
    let record: AnnotatedRecord = serde_json::from_str(line)
        .map_err(|e| AppError::DatasetError(format!("line {line_no}: {e}")))?;

    let flag = parse_flag(&record.is_train).ok_or_else(|| {
        AppError::DatasetError(format!(
            "line {line_no}: is_train must be 0/1 or a boolean, got {}",
            record.is_train
        ))
    })?;

    Ok(LabeledQuery {
        ground_truth: parse_ground_truth(&record.available_tools, line_no),
        text: record.final_query,
        template: record.instruction_template.filter(|t| !t.trim().is_empty()),
        is_evaluation: convention.is_evaluation(flag),
    })
}

fn parse_flag(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_f64()? {
            x if x == 0.0 => Some(false),
            x if x == 1.0 => Some(true),
            _ => None,
        },
        Value::String(s) => match s.trim() {
            "0" | "false" | "False" => Some(false),
            "1" | "true" | "True" => Some(true),
            _ => None,
        },
        _ => None,
    }
}

/// Decode a ground-truth cell into a set of tool names.
///
/// Accepts a JSON array of names or `{name}` objects, or a string holding
/// either JSON or a Python literal of the same. Anything else is treated as
/// an empty set with a warning rather than failing the load.
pub fn parse_ground_truth(cell: &Value, line_no: usize) -> BTreeSet<String> {
    let decoded;
    let value = match cell {
        Value::Null => return BTreeSet::new(),
        Value::String(raw) => {
            let raw = raw.trim();
            if raw.is_empty() {
                return BTreeSet::new();
            }
            decoded = serde_json::from_str::<Value>(raw)
                .ok()
                .or_else(|| parse_python_literal(raw));
            match &decoded {
                Some(v) => v,
                None => {
                    tracing::warn!(
                        line = line_no,
                        cell = %raw.chars().take(80).collect::<String>(),
                        "Unparseable ground truth, treating as empty"
                    );
                    return BTreeSet::new();
                }
            }
        }
        other => other,
    };

    match names_from_value(value) {
        Some(names) => names,
        None => {
            tracing::warn!(line = line_no, cell = %value, "Malformed ground truth, treating as empty");
            BTreeSet::new()
        }
    }
}

fn names_from_value(value: &Value) -> Option<BTreeSet<String>> {
    let items = match value {
        Value::Array(items) => items,
        Value::Null => return Some(BTreeSet::new()),
        _ => return None,
    };

    items
        .iter()
        .map(|item| {
            let name = match item {
                Value::String(s) => s.as_str(),
                Value::Object(obj) => obj.get("name")?.as_str()?,
                _ => return None,
            };
            Some(name.trim().to_string())
        })
        .filter(|name| !matches!(name.as_deref(), Some("")))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_canonical_records() {
        let content = r#"
{"query": "查看购物车", "tools": ["open_cart_content(app, filter_type)"], "is_evaluation": false}
{"query": "帮我签到", "tools": [{"name": "sign_in(app, page_type)"}], "is_evaluation": true, "template": "签到"}
"#;
        let queries = parse_queries(content, QueryFormat::Canonical, SplitConvention::Standard).unwrap();

        assert_eq!(queries.len(), 2);
        assert!(!queries[0].is_evaluation);
        assert!(queries[0].ground_truth.contains("open_cart_content(app, filter_type)"));
        assert!(queries[1].is_evaluation);
        assert_eq!(queries[1].template.as_deref(), Some("签到"));
        assert_eq!(queries[1].primary_tool(), Some("sign_in(app, page_type)"));
    }

    #[test]
    fn test_annotated_python_literal_cell() {
        let line = r#"{"final_query": "打开淘宝的购物车", "instruction_template": "打开购物车", "is_train": 0, "available_tools": "[{'name': 'open_cart_content(app, filter_type)', 'description': '查看购物车'}]"}"#;

        let standard = parse_queries(line, QueryFormat::Annotated, SplitConvention::Standard).unwrap();
        let inverted = parse_queries(line, QueryFormat::Annotated, SplitConvention::Inverted).unwrap();

        assert!(standard[0].is_evaluation);
        assert!(!inverted[0].is_evaluation);
        assert_eq!(
            inverted[0].ground_truth,
            BTreeSet::from(["open_cart_content(app, filter_type)".to_string()])
        );
        assert_eq!(inverted[0].template.as_deref(), Some("打开购物车"));
    }

    #[test]
    fn test_malformed_ground_truth_becomes_empty() {
        assert!(parse_ground_truth(&json!("[{'name': broken"), 1).is_empty());
        assert!(parse_ground_truth(&json!(42), 1).is_empty());
        assert!(parse_ground_truth(&json!([{ "label": "x" }]), 1).is_empty());
        assert!(parse_ground_truth(&Value::Null, 1).is_empty());
        assert!(parse_ground_truth(&json!(""), 1).is_empty());
    }

    #[test]
    fn test_deeply_nested_ground_truth_becomes_empty() {
        let cell = format!("{}{}", "[".repeat(200_000), "]".repeat(200_000));
        assert!(parse_ground_truth(&Value::String(cell), 7).is_empty());
    }

    #[test]
    fn test_ground_truth_deduplicates_and_trims() {
        let names = parse_ground_truth(&json!(["a ", "a", { "name": "b" }]), 1);
        assert_eq!(names, BTreeSet::from(["a".to_string(), "b".to_string()]));
    }

    #[test]
    fn test_string_is_train_flag() {
        let line = r#"{"final_query": "q", "is_train": "1", "available_tools": "[]"}"#;
        let queries = parse_queries(line, QueryFormat::Annotated, SplitConvention::Standard).unwrap();
        assert!(!queries[0].is_evaluation);
        assert!(queries[0].ground_truth.is_empty());
    }

    #[test]
    fn test_invalid_is_train_is_fatal_with_line() {
        let content = "\n{\"final_query\": \"q\", \"is_train\": 7}";
        let err = parse_queries(content, QueryFormat::Annotated, SplitConvention::Standard).unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_non_object_line_is_fatal() {
        let err = parse_queries("not json", QueryFormat::Canonical, SplitConvention::Standard).unwrap_err();
        assert!(matches!(err, AppError::DatasetError(_)));
    }

    #[test]
    fn test_empty_file_is_fatal() {
        assert!(parse_queries("\n\n", QueryFormat::Canonical, SplitConvention::Standard).is_err());
    }

    #[test]
    fn test_format_and_convention_parse() {
        assert_eq!("Annotated".parse::<QueryFormat>().unwrap(), QueryFormat::Annotated);
        assert_eq!("inverted".parse::<SplitConvention>().unwrap(), SplitConvention::Inverted);
        assert!("csv".parse::<QueryFormat>().is_err());
    }
}
