//! Field-path extraction from structured objects.
//!
//! Paths are accepted in four relaxed spellings (`a.b`, `.a.b`, `{a.b}`,
//! `{.a.b}`) and normalized to the bracketed form `{.a.b}` before
//! evaluation. The evaluator understands the JSONPath dialect used by
//! object store clients:
//!
//! - `.field` map member access, `.*` for every member
//! - `..field` recursive descent
//! - `['quoted.key']`, `["quoted.key"]` and unions like `['a','b']`
//! - `[n]`, `[n,m]` list indexing, negative values count from the end
//! - `[start:end:step]` slices with optional bounds
//! - `[*]` wildcard over list items or map values
//! - `[?(@.key == 'value')]` filters with `==`, `!=`, `<`, `<=`, `>`, `>=`,
//!   or a bare `[?(@.key)]` existence test
//!
//! Only the first result is ever used.

use std::cmp::Ordering;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::error::ExtractError;

static RELAXED_JSON_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\{\.?([^{}]+)\}$|^\.?([^{}]+)$").expect("valid relaxed path regex")
});

/// Normalizes a relaxed path expression to `{.name1.name2}`.
///
/// The empty string is returned unchanged.
pub fn relaxed_json_path_expression(expression: &str) -> Result<String, ExtractError> {
    if expression.is_empty() {
        return Ok(String::new());
    }
    let captures = RELAXED_JSON_PATH.captures(expression).ok_or_else(|| {
        ExtractError::parse(
            expression,
            "unexpected path string, expected a 'name1.name2' or '.name1.name2' or '{name1.name2}' or '{.name1.name2}'",
        )
    })?;
    let field_spec = captures
        .get(1)
        .or_else(|| captures.get(2))
        .map(|m| m.as_str())
        .unwrap_or_default();
    Ok(format!("{{.{field_spec}}}"))
}

/// Extracts the value at `field_path` from `object`.
///
/// An empty path yields the whole object.
pub fn extract_field(object: &Value, field_path: &str) -> Result<Value, ExtractError> {
    if field_path.is_empty() {
        return Ok(object.clone());
    }
    let canonical = relaxed_json_path_expression(field_path)?;
    let body = canonical
        .strip_prefix('{')
        .and_then(|s| s.strip_suffix('}'))
        .ok_or_else(|| ExtractError::parse(&canonical, "expected a {...} expression"))?;
    let segments = PathParser::new(&canonical, body).parse()?;

    evaluate(object, &segments)
        .first()
        .map(|value| (*value).clone())
        .ok_or_else(|| ExtractError::not_found(canonical))
}

fn evaluate<'a>(root: &'a Value, segments: &[Segment]) -> Vec<&'a Value> {
    let mut current: Vec<&Value> = vec![root];
    for segment in segments {
        current = current
            .into_iter()
            .flat_map(|value| segment.select(value))
            .collect();
        if current.is_empty() {
            break;
        }
    }
    current
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Field(String),
    Wildcard,
    Descendants,
    Union(Vec<Selector>),
    Slice {
        start: Option<i64>,
        end: Option<i64>,
        step: i64,
    },
    Filter(Filter),
}

#[derive(Debug, Clone, PartialEq)]
enum Selector {
    Index(i64),
    Key(String),
}

#[derive(Debug, Clone, PartialEq)]
enum Filter {
    Exists(Vec<Segment>),
    Compare {
        left: Operand,
        op: CompareOp,
        right: Operand,
    },
}

#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Path(Vec<Segment>),
    Literal(Value),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

// Longer operators first so `<=` is not read as `<`.
const COMPARE_OPS: [(&str, CompareOp); 6] = [
    ("==", CompareOp::Eq),
    ("!=", CompareOp::Ne),
    ("<=", CompareOp::Le),
    (">=", CompareOp::Ge),
    ("<", CompareOp::Lt),
    (">", CompareOp::Gt),
];

impl Segment {
    fn select<'a>(&self, value: &'a Value) -> Vec<&'a Value> {
        match (self, value) {
            (Segment::Field(name), Value::Object(map)) => map.get(name).into_iter().collect(),
            (Segment::Wildcard, Value::Array(items)) => items.iter().collect(),
            (Segment::Wildcard, Value::Object(map)) => map.values().collect(),
            (Segment::Descendants, _) => {
                let mut out = Vec::new();
                collect_descendants(value, &mut out);
                out
            }
            (Segment::Union(selectors), _) => selectors
                .iter()
                .filter_map(|selector| selector.select(value))
                .collect(),
            (Segment::Slice { start, end, step }, Value::Array(items)) => {
                slice_positions(items.len(), *start, *end, *step)
                    .map(|i| &items[i])
                    .collect()
            }
            (Segment::Filter(filter), Value::Array(items)) => {
                items.iter().filter(|item| filter.matches(item)).collect()
            }
            _ => Vec::new(),
        }
    }
}

impl Selector {
    fn select<'a>(&self, value: &'a Value) -> Option<&'a Value> {
        match (self, value) {
            (Selector::Key(key), Value::Object(map)) => map.get(key),
            (Selector::Index(index), Value::Array(items)) => {
                let len = items.len() as i64;
                let position = if *index < 0 { len + index } else { *index };
                (0..len)
                    .contains(&position)
                    .then(|| &items[position as usize])
            }
            _ => None,
        }
    }
}

impl Filter {
    fn matches(&self, item: &Value) -> bool {
        match self {
            Filter::Exists(path) => !evaluate(item, path).is_empty(),
            Filter::Compare { left, op, right } => {
                match (left.resolve(item), right.resolve(item)) {
                    (Some(l), Some(r)) => compare(&l, *op, &r),
                    _ => false,
                }
            }
        }
    }
}

impl Operand {
    fn resolve(&self, item: &Value) -> Option<Value> {
        match self {
            Operand::Path(path) => evaluate(item, path).first().map(|v| (*v).clone()),
            Operand::Literal(value) => Some(value.clone()),
        }
    }
}

fn compare(left: &Value, op: CompareOp, right: &Value) -> bool {
    let ordering = match (left, right) {
        (Value::Number(l), Value::Number(r)) => l
            .as_f64()
            .zip(r.as_f64())
            .and_then(|(l, r)| l.partial_cmp(&r)),
        (Value::String(l), Value::String(r)) => Some(l.cmp(r)),
        _ => None,
    };
    match (op, ordering) {
        (CompareOp::Eq, Some(o)) => o == Ordering::Equal,
        (CompareOp::Ne, Some(o)) => o != Ordering::Equal,
        (CompareOp::Eq, None) => left == right,
        (CompareOp::Ne, None) => left != right,
        (CompareOp::Lt, Some(o)) => o == Ordering::Less,
        (CompareOp::Le, Some(o)) => o != Ordering::Greater,
        (CompareOp::Gt, Some(o)) => o == Ordering::Greater,
        (CompareOp::Ge, Some(o)) => o != Ordering::Less,
        _ => false,
    }
}

fn collect_descendants<'a>(value: &'a Value, out: &mut Vec<&'a Value>) {
    out.push(value);
    match value {
        Value::Array(items) => items.iter().for_each(|item| collect_descendants(item, out)),
        Value::Object(map) => map.values().for_each(|item| collect_descendants(item, out)),
        _ => {}
    }
}

fn slice_positions(
    len: usize,
    start: Option<i64>,
    end: Option<i64>,
    step: i64,
) -> impl Iterator<Item = usize> {
    let len = len as i64;
    let clamp = |bound: i64| {
        let bound = if bound < 0 { len + bound } else { bound };
        bound.clamp(0, len)
    };
    let start = start.map_or(0, clamp);
    let end = end.map_or(len, clamp);
    (start..end.max(start))
        .step_by(step.max(1) as usize)
        .map(|i| i as usize)
}

/// Returns the position of `close` in `chars` at or after `from`, skipping
/// quoted text and nested parentheses.
fn find_unquoted(chars: &[char], from: usize, close: char) -> Option<usize> {
    let mut quote: Option<char> = None;
    let mut depth = 0usize;
    let mut pos = from;
    while pos < chars.len() {
        let c = chars[pos];
        match quote {
            Some(_) if c == '\\' => pos += 1,
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '\'' || c == '"' => quote = Some(c),
            None if c == close && depth == 0 => return Some(pos),
            None if c == '(' => depth += 1,
            None if c == ')' => depth = depth.saturating_sub(1),
            None => {}
        }
        pos += 1;
    }
    None
}

/// Splits `text` on top-level commas, honouring quotes.
fn split_unquoted(text: &str, separator: char) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut parts = Vec::new();
    let mut start = 0;
    while let Some(at) = find_unquoted(&chars, start, separator) {
        parts.push(chars[start..at].iter().collect());
        start = at + 1;
    }
    parts.push(chars[start..].iter().collect());
    parts
}

fn unquote(text: &str) -> Option<String> {
    ['\'', '"'].into_iter().find_map(|quote| {
        text.strip_prefix(quote)
            .and_then(|s| s.strip_suffix(quote))
            .map(|s| s.replace(&format!("\\{quote}"), &quote.to_string()))
    })
}

/// Parses the body of a canonical `{...}` expression into segments.
struct PathParser<'a> {
    canonical: &'a str,
    chars: Vec<char>,
    pos: usize,
}

impl<'a> PathParser<'a> {
    fn new(canonical: &'a str, body: &str) -> Self {
        Self {
            canonical,
            chars: body.chars().collect(),
            pos: 0,
        }
    }

    fn error(&self, message: impl Into<String>) -> ExtractError {
        ExtractError::parse(self.canonical, message)
    }

    fn parse(mut self) -> Result<Vec<Segment>, ExtractError> {
        let mut segments = Vec::new();

        while self.pos < self.chars.len() {
            match self.chars[self.pos] {
                '.' => {
                    self.pos += 1;
                    if self.peek() == Some('.') {
                        self.pos += 1;
                        segments.push(Segment::Descendants);
                        if self.peek() == Some('[') {
                            continue;
                        }
                    }
                    let name = self.take_field_name();
                    if name.is_empty() {
                        // A lone leading dot before a bracket refers to the root.
                        if self.peek() == Some('[') && segments.is_empty() {
                            continue;
                        }
                        return Err(self.error("empty field name"));
                    }
                    if name == "*" {
                        segments.push(Segment::Wildcard);
                    } else {
                        segments.push(Segment::Field(name));
                    }
                }
                '[' => {
                    let close = find_unquoted(&self.chars, self.pos + 1, ']')
                        .ok_or_else(|| self.error("unterminated '['"))?;
                    let inner: String = self.chars[self.pos + 1..close].iter().collect();
                    segments.push(self.parse_bracket(inner.trim())?);
                    self.pos = close + 1;
                }
                other => {
                    return Err(self.error(format!("unexpected character {other:?}")));
                }
            }
        }

        Ok(segments)
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn take_field_name(&mut self) -> String {
        let start = self.pos;
        while let Some(c) = self.peek()
            && c != '.'
            && c != '['
        {
            self.pos += 1;
        }
        self.chars[start..self.pos].iter().collect()
    }

    fn parse_bracket(&self, inner: &str) -> Result<Segment, ExtractError> {
        if inner == "*" {
            return Ok(Segment::Wildcard);
        }
        if let Some(expression) = inner.strip_prefix('?') {
            return self.parse_filter(expression.trim()).map(Segment::Filter);
        }
        let parts = split_unquoted(inner, ',');
        if parts.len() == 1 && unquote(inner.trim()).is_none() && inner.contains(':') {
            return self.parse_slice(inner);
        }
        parts
            .iter()
            .map(|part| {
                let part = part.trim();
                if let Some(key) = unquote(part) {
                    return Ok(Selector::Key(key));
                }
                part.parse::<i64>()
                    .map(Selector::Index)
                    .map_err(|_| self.error(format!("invalid array index {part:?}")))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Segment::Union)
    }

    fn parse_slice(&self, inner: &str) -> Result<Segment, ExtractError> {
        let bounds: Vec<&str> = inner.split(':').map(str::trim).collect();
        if bounds.len() > 3 {
            return Err(self.error(format!("invalid slice {inner:?}")));
        }
        let bound = |text: Option<&&str>| -> Result<Option<i64>, ExtractError> {
            match text.filter(|t| !t.is_empty()) {
                None => Ok(None),
                Some(t) => t
                    .parse::<i64>()
                    .map(Some)
                    .map_err(|_| self.error(format!("invalid slice bound {t:?}"))),
            }
        };
        let start = bound(bounds.first())?;
        let end = bound(bounds.get(1))?;
        let step = bound(bounds.get(2))?.unwrap_or(1);
        if step <= 0 {
            return Err(self.error("slice step must be > 0"));
        }
        Ok(Segment::Slice { start, end, step })
    }

    fn parse_filter(&self, expression: &str) -> Result<Filter, ExtractError> {
        let condition = expression
            .strip_prefix('(')
            .and_then(|s| s.strip_suffix(')'))
            .ok_or_else(|| self.error(format!("invalid filter {expression:?}")))?
            .trim();

        let chars: Vec<char> = condition.chars().collect();
        for (symbol, op) in COMPARE_OPS {
            let first = symbol.chars().next().unwrap_or_default();
            let mut from = 0;
            while let Some(at) = find_unquoted(&chars, from, first) {
                let candidate: String = chars[at..(at + symbol.len()).min(chars.len())]
                    .iter()
                    .collect();
                if candidate == symbol {
                    let left: String = chars[..at].iter().collect();
                    let right: String = chars[at + symbol.len()..].iter().collect();
                    return Ok(Filter::Compare {
                        left: self.parse_operand(left.trim())?,
                        op,
                        right: self.parse_operand(right.trim())?,
                    });
                }
                from = at + 1;
            }
        }

        match self.parse_operand(condition)? {
            Operand::Path(path) => Ok(Filter::Exists(path)),
            Operand::Literal(_) => Err(self.error(format!("invalid filter {condition:?}"))),
        }
    }

    fn parse_operand(&self, text: &str) -> Result<Operand, ExtractError> {
        if let Some(relative) = text.strip_prefix('@') {
            return PathParser::new(self.canonical, relative)
                .parse()
                .map(Operand::Path);
        }
        if let Some(literal) = unquote(text) {
            return Ok(Operand::Literal(Value::String(literal)));
        }
        match text {
            "true" => return Ok(Operand::Literal(Value::Bool(true))),
            "false" => return Ok(Operand::Literal(Value::Bool(false))),
            "nil" | "null" => return Ok(Operand::Literal(Value::Null)),
            _ => {}
        }
        serde_json::from_str::<serde_json::Number>(text)
            .map(|n| Operand::Literal(Value::Number(n)))
            .map_err(|_| self.error(format!("invalid filter operand {text:?}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config_map() -> Value {
        json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {
                "name": "settings",
                "annotations": {"example.com/owner": "platform", "a]b": "bracket"}
            },
            "data": {"replicas": "3", "mode": "fast"},
            "items": [{"name": "a"}, {"name": "b"}, {"name": "c"}]
        })
    }

    fn pod() -> Value {
        json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {"name": "web"},
            "spec": {
                "containers": [
                    {"name": "sidecar", "image": "proxy:1", "port": 9090},
                    {"name": "app", "image": "app:2", "port": 8080, "tty": true}
                ]
            }
        })
    }

    #[test]
    fn test_relaxed_forms_normalize_identically() {
        for form in ["data.replicas", ".data.replicas", "{data.replicas}", "{.data.replicas}"] {
            assert_eq!(relaxed_json_path_expression(form).unwrap(), "{.data.replicas}");
            assert_eq!(extract_field(&config_map(), form).unwrap(), json!("3"));
        }
    }

    #[test]
    fn test_relaxed_rejects_nested_braces() {
        let err = relaxed_json_path_expression("{a.{b}}").unwrap_err();
        assert!(matches!(err, ExtractError::Parse { .. }));
    }

    #[test]
    fn test_empty_path_returns_whole_object() {
        let object = config_map();
        assert_eq!(extract_field(&object, "").unwrap(), object);
        assert_eq!(extract_field(&json!(42), "").unwrap(), json!(42));
    }

    #[test]
    fn test_missing_field() {
        let err = extract_field(&config_map(), "data.missing").unwrap_err();
        assert_eq!(err, ExtractError::not_found("{.data.missing}"));
        assert_eq!(err.to_string(), "field path {.data.missing} returned empty result");
    }

    #[test]
    fn test_subtree_extraction() {
        assert_eq!(
            extract_field(&config_map(), "data").unwrap(),
            json!({"replicas": "3", "mode": "fast"})
        );
    }

    #[test]
    fn test_brackets() {
        let object = config_map();
        assert_eq!(extract_field(&object, "items[1].name").unwrap(), json!("b"));
        assert_eq!(extract_field(&object, "items[-1].name").unwrap(), json!("c"));
        assert_eq!(extract_field(&object, "items[*].name").unwrap(), json!("a"));
        assert_eq!(
            extract_field(&object, "metadata.annotations['example.com/owner']").unwrap(),
            json!("platform")
        );
        assert!(matches!(
            extract_field(&object, "items[5]").unwrap_err(),
            ExtractError::NotFound { .. }
        ));
    }

    #[test]
    fn test_quoted_key_may_contain_close_bracket() {
        assert_eq!(
            extract_field(&config_map(), "metadata.annotations['a]b']").unwrap(),
            json!("bracket")
        );
    }

    #[test]
    fn test_unions() {
        let object = config_map();
        assert_eq!(extract_field(&object, "items[2,0].name").unwrap(), json!("c"));
        assert_eq!(
            extract_field(&object, "data['missing','mode']").unwrap(),
            json!("fast")
        );
    }

    #[test]
    fn test_slices() {
        let object = config_map();
        assert_eq!(extract_field(&object, "items[1:3].name").unwrap(), json!("b"));
        assert_eq!(extract_field(&object, "items[-1:].name").unwrap(), json!("c"));
        assert_eq!(extract_field(&object, "items[:2]").unwrap(), json!({"name": "a"}));
        assert_eq!(extract_field(&object, "items[1::2].name").unwrap(), json!("b"));
        assert!(matches!(
            extract_field(&object, "items[3:]").unwrap_err(),
            ExtractError::NotFound { .. }
        ));
        assert!(matches!(
            extract_field(&object, "items[0:1:0]").unwrap_err(),
            ExtractError::Parse { .. }
        ));
    }

    #[test]
    fn test_filters() {
        let pod = pod();
        assert_eq!(
            extract_field(&pod, "spec.containers[?(@.name==\"app\")].image").unwrap(),
            json!("app:2")
        );
        assert_eq!(
            extract_field(&pod, "spec.containers[?(@.name != 'app')].image").unwrap(),
            json!("proxy:1")
        );
        assert_eq!(
            extract_field(&pod, "spec.containers[?(@.port < 9000)].name").unwrap(),
            json!("app")
        );
        assert_eq!(
            extract_field(&pod, "spec.containers[?(@.port >= 9090)].name").unwrap(),
            json!("sidecar")
        );
        assert_eq!(
            extract_field(&pod, "spec.containers[?(@.tty)].name").unwrap(),
            json!("app")
        );
        assert!(matches!(
            extract_field(&pod, "spec.containers[?(@.name=='db')].image").unwrap_err(),
            ExtractError::NotFound { .. }
        ));
    }

    #[test]
    fn test_filter_literal_may_contain_brackets() {
        let object = json!({"items": [{"key": "a]b", "value": 1}]});
        assert_eq!(
            extract_field(&object, "items[?(@.key=='a]b')].value").unwrap(),
            json!(1)
        );
    }

    #[test]
    fn test_recursive_descent() {
        let pod = pod();
        assert_eq!(extract_field(&pod, "..image").unwrap(), json!("proxy:1"));
        assert_eq!(extract_field(&pod, "{..image}").unwrap(), json!("proxy:1"));
        assert_eq!(extract_field(&pod, "spec..port").unwrap(), json!(9090));
        assert_eq!(extract_field(&config_map(), "data..replicas").unwrap(), json!("3"));
        assert_eq!(
            extract_field(&pod, "..containers[?(@.name=='app')].port").unwrap(),
            json!(8080)
        );
    }

    #[test]
    fn test_malformed_brackets() {
        for path in ["items[x]", "items[0", "items[?(@.name=='a')", "items[?@.name]", "data.."] {
            assert!(
                matches!(
                    extract_field(&config_map(), path).unwrap_err(),
                    ExtractError::Parse { .. }
                ),
                "{path} should not parse"
            );
        }
    }
}
