//! `${{ … }}` expression parsing and evaluation.
//!
//! Grammar: `expr ::= ["not"] path` where `path` is a dot- and
//! index-separated sequence starting with one of `inputs`, `steps`, `item`,
//! `index`. Numeric subscripts resolve into arrays and into objects keyed
//! by the number's decimal string.
//!
//! A string that is exactly one fragment evaluates to the underlying value
//! with its type intact; any surrounding literal text forces template
//! substitution and the result is a string.

use serde_json::Value;

use super::context::WorkflowContext;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

fn fmt_available(available: &[String]) -> String {
    if available.is_empty() {
        String::new()
    } else {
        format!(" (available: {})", available.join(", "))
    }
}

/// Errors raised while parsing or evaluating expressions.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ExpressionError {
    /// The fragment could not be parsed.
    #[error("syntax error at position {position} in `{expression}`: {message}")]
    Syntax {
        expression: String,
        position: usize,
        message: String,
    },

    /// The fragment parsed but referenced something missing at run time.
    #[error("{message} in `{expression}`{}", fmt_available(.available))]
    Evaluation {
        expression: String,
        message: String,
        available: Vec<String>,
    },
}

impl ExpressionError {
    fn syntax(expression: &str, position: usize, message: impl Into<String>) -> Self {
        Self::Syntax {
            expression: expression.to_string(),
            position,
            message: message.into(),
        }
    }

    fn evaluation(expression: &str, message: impl Into<String>, available: Vec<String>) -> Self {
        Self::Evaluation {
            expression: expression.to_string(),
            message: message.into(),
            available,
        }
    }
}

// ---------------------------------------------------------------------------
// Expression model
// ---------------------------------------------------------------------------

/// What a parsed expression refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExpressionKind {
    /// Path starts with `inputs`.
    InputRef,
    /// Path starts with `steps`.
    StepRef,
    /// Path is `item` or `item.…`.
    ItemRef,
    /// Path is `index`.
    IndexRef,
}

/// One element of an expression path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

impl std::fmt::Display for PathSegment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PathSegment::Key(k) => f.write_str(k),
            PathSegment::Index(i) => write!(f, "[{i}]"),
        }
    }
}

/// A parsed `${{ … }}` fragment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Expression {
    /// The exact fragment text, delimiters included.
    pub raw: String,
    pub kind: ExpressionKind,
    pub path: Vec<PathSegment>,
    pub negated: bool,
}

// ---------------------------------------------------------------------------
// Tokenizer and parser
// ---------------------------------------------------------------------------

/// Split a path string into identifier, number, and punctuation tokens.
pub fn tokenize(path: &str) -> Result<Vec<String>, ExpressionError> {
    let mut tokens = Vec::new();
    let bytes = path.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        match c {
            '.' | '[' | ']' => {
                tokens.push(c.to_string());
                i += 1;
            }
            c if c.is_ascii_digit() => {
                let start = i;
                while i < bytes.len() && (bytes[i] as char).is_ascii_digit() {
                    i += 1;
                }
                tokens.push(path[start..i].to_string());
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < bytes.len() {
                    let c = bytes[i] as char;
                    if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                        i += 1;
                    } else {
                        break;
                    }
                }
                tokens.push(path[start..i].to_string());
            }
            c if c.is_whitespace() => {
                return Err(ExpressionError::syntax(
                    path,
                    i,
                    "unexpected whitespace in path",
                ));
            }
            other => {
                return Err(ExpressionError::syntax(
                    path,
                    i,
                    format!("unexpected character '{other}'"),
                ));
            }
        }
    }
    Ok(tokens)
}

fn parse_segments(path: &str) -> Result<Vec<PathSegment>, ExpressionError> {
    let tokens = tokenize(path)?;
    let mut segments = Vec::new();
    let mut iter = tokens.into_iter().peekable();

    // First token must be an identifier
    match iter.next() {
        Some(tok) if tok.chars().next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_') => {
            segments.push(PathSegment::Key(tok));
        }
        _ => {
            return Err(ExpressionError::syntax(
                path,
                0,
                "path must start with an identifier",
            ));
        }
    }

    while let Some(tok) = iter.next() {
        match tok.as_str() {
            "." => match iter.next() {
                Some(next) if next.chars().all(|c| c.is_ascii_digit()) => {
                    segments.push(PathSegment::Index(next.parse().map_err(|_| {
                        ExpressionError::syntax(path, 0, "numeric subscript out of range")
                    })?));
                }
                Some(next)
                    if next
                        .chars()
                        .next()
                        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_') =>
                {
                    segments.push(PathSegment::Key(next));
                }
                _ => {
                    return Err(ExpressionError::syntax(
                        path,
                        0,
                        "expected identifier after '.'",
                    ));
                }
            },
            "[" => {
                let index = match iter.next() {
                    Some(n) if n.chars().all(|c| c.is_ascii_digit()) => {
                        n.parse().map_err(|_| {
                            ExpressionError::syntax(path, 0, "numeric subscript out of range")
                        })?
                    }
                    _ => {
                        return Err(ExpressionError::syntax(
                            path,
                            0,
                            "expected number after '['",
                        ));
                    }
                };
                if iter.next().as_deref() != Some("]") {
                    return Err(ExpressionError::syntax(path, 0, "expected closing ']'"));
                }
                segments.push(PathSegment::Index(index));
            }
            other => {
                return Err(ExpressionError::syntax(
                    path,
                    0,
                    format!("unexpected token '{other}'"),
                ));
            }
        }
    }

    Ok(segments)
}

/// Parse a complete `${{ [not] path }}` fragment.
pub fn parse_expression(raw: &str) -> Result<Expression, ExpressionError> {
    let trimmed = raw.trim();
    let inner = trimmed
        .strip_prefix("${{")
        .and_then(|rest| rest.strip_suffix("}}"))
        .ok_or_else(|| {
            ExpressionError::syntax(raw, 0, "expression must have the form ${{ path }}")
        })?
        .trim();

    if inner.is_empty() {
        return Err(ExpressionError::syntax(raw, 3, "empty expression"));
    }

    let (negated, path_text) = match inner.strip_prefix("not ") {
        Some(rest) => (true, rest.trim()),
        None => (false, inner),
    };

    let path = parse_segments(path_text)?;

    let head = match &path[0] {
        PathSegment::Key(k) => k.as_str(),
        PathSegment::Index(_) => {
            return Err(ExpressionError::syntax(
                raw,
                0,
                "path must start with an identifier",
            ));
        }
    };

    let kind = match head {
        "inputs" => {
            if path.len() < 2 {
                return Err(ExpressionError::syntax(
                    raw,
                    0,
                    "input reference requires a name, e.g. inputs.branch",
                ));
            }
            ExpressionKind::InputRef
        }
        "steps" => {
            if path.len() < 3 || path[2] != PathSegment::Key("output".to_string()) {
                return Err(ExpressionError::syntax(
                    raw,
                    0,
                    "step reference must have the form steps.NAME.output",
                ));
            }
            ExpressionKind::StepRef
        }
        "item" => ExpressionKind::ItemRef,
        "index" => {
            if path.len() != 1 {
                return Err(ExpressionError::syntax(
                    raw,
                    0,
                    "index takes no path elements",
                ));
            }
            ExpressionKind::IndexRef
        }
        other => {
            return Err(ExpressionError::syntax(
                raw,
                0,
                format!("unknown reference '{other}' (expected inputs, steps, item, or index)"),
            ));
        }
    };

    Ok(Expression {
        raw: trimmed.to_string(),
        kind,
        path,
        negated,
    })
}

/// Extract every `${{ … }}` fragment from a string, in order.
pub fn extract_all(text: &str) -> Result<Vec<Expression>, ExpressionError> {
    let mut expressions = Vec::new();
    let mut search = 0;
    while let Some(offset) = text[search..].find("${{") {
        let start = search + offset;
        let end = match text[start..].find("}}") {
            Some(e) => start + e + 2,
            None => {
                return Err(ExpressionError::syntax(
                    text,
                    start,
                    "unterminated expression (missing '}}')",
                ));
            }
        };
        expressions.push(parse_expression(&text[start..end])?);
        search = end;
    }
    Ok(expressions)
}

// ---------------------------------------------------------------------------
// Truthiness
// ---------------------------------------------------------------------------

/// `false`, `0`, `""`, empty containers, and null are falsy; everything
/// else is truthy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

// ---------------------------------------------------------------------------
// Evaluator
// ---------------------------------------------------------------------------

/// Evaluates expressions against a live workflow context.
///
/// Sources: the frozen inputs, prior step outputs, and the current
/// iteration frame. Evaluation is synchronous and never blocks.
pub struct ExpressionEvaluator<'a> {
    ctx: &'a WorkflowContext,
}

impl<'a> ExpressionEvaluator<'a> {
    pub fn new(ctx: &'a WorkflowContext) -> Self {
        Self { ctx }
    }

    /// Evaluate a parsed expression to an owned value.
    pub fn evaluate(&self, expr: &Expression) -> Result<Value, ExpressionError> {
        let (base, rest): (&Value, &[PathSegment]) = match expr.kind {
            ExpressionKind::InputRef => {
                let name = match &expr.path[1] {
                    PathSegment::Key(k) => k.as_str(),
                    PathSegment::Index(_) => {
                        return Err(ExpressionError::syntax(
                            &expr.raw,
                            0,
                            "input name must be an identifier",
                        ));
                    }
                };
                let value = self.ctx.inputs().get(name).ok_or_else(|| {
                    ExpressionError::evaluation(
                        &expr.raw,
                        format!("unknown input '{name}'"),
                        self.ctx.inputs().keys().cloned().collect(),
                    )
                })?;
                (value, &expr.path[2..])
            }
            ExpressionKind::StepRef => {
                let name = match &expr.path[1] {
                    PathSegment::Key(k) => k.as_str(),
                    PathSegment::Index(_) => {
                        return Err(ExpressionError::syntax(
                            &expr.raw,
                            0,
                            "step name must be an identifier",
                        ));
                    }
                };
                let value = self.ctx.output(name).ok_or_else(|| {
                    ExpressionError::evaluation(
                        &expr.raw,
                        format!("no completed step named '{name}'"),
                        self.ctx.step_names(),
                    )
                })?;
                // path[2] is the literal "output"; fields follow it
                (value, &expr.path[3..])
            }
            ExpressionKind::ItemRef => {
                let frame = self.ctx.iteration.as_ref().ok_or_else(|| {
                    ExpressionError::evaluation(
                        &expr.raw,
                        "'item' referenced outside an iteration".to_string(),
                        Vec::new(),
                    )
                })?;
                (&frame.item, &expr.path[1..])
            }
            ExpressionKind::IndexRef => {
                let frame = self.ctx.iteration.as_ref().ok_or_else(|| {
                    ExpressionError::evaluation(
                        &expr.raw,
                        "'index' referenced outside an iteration".to_string(),
                        Vec::new(),
                    )
                })?;
                let value = Value::from(frame.index as u64);
                return Ok(self.finish(expr, value));
            }
        };

        let value = self.walk(expr, base, rest)?;
        Ok(self.finish(expr, value))
    }

    fn finish(&self, expr: &Expression, value: Value) -> Value {
        if expr.negated {
            Value::Bool(!is_truthy(&value))
        } else {
            value
        }
    }

    fn walk(
        &self,
        expr: &Expression,
        base: &Value,
        rest: &[PathSegment],
    ) -> Result<Value, ExpressionError> {
        let mut current = base;
        for segment in rest {
            current = match (segment, current) {
                (PathSegment::Key(k), Value::Object(map)) => map.get(k).ok_or_else(|| {
                    ExpressionError::evaluation(
                        &expr.raw,
                        format!("missing field '{k}'"),
                        map.keys().cloned().collect(),
                    )
                })?,
                (PathSegment::Index(i), Value::Array(items)) => items.get(*i).ok_or_else(|| {
                    ExpressionError::evaluation(
                        &expr.raw,
                        format!("index {i} out of bounds (length {})", items.len()),
                        Vec::new(),
                    )
                })?,
                // Numeric subscripts also resolve into objects keyed by the
                // number's decimal string.
                (PathSegment::Index(i), Value::Object(map)) => {
                    map.get(&i.to_string()).ok_or_else(|| {
                        ExpressionError::evaluation(
                            &expr.raw,
                            format!("missing field '{i}'"),
                            map.keys().cloned().collect(),
                        )
                    })?
                }
                (segment, other) => {
                    return Err(ExpressionError::evaluation(
                        &expr.raw,
                        format!(
                            "cannot access '{segment}' on {}",
                            value_type_name(other)
                        ),
                        Vec::new(),
                    ));
                }
            };
        }
        Ok(current.clone())
    }

    /// Substitute every fragment in a template string.
    pub fn evaluate_string(&self, template: &str) -> Result<String, ExpressionError> {
        let mut out = String::with_capacity(template.len());
        let mut search = 0;
        while let Some(offset) = template[search..].find("${{") {
            let start = search + offset;
            let end = match template[start..].find("}}") {
                Some(e) => start + e + 2,
                None => {
                    return Err(ExpressionError::syntax(
                        template,
                        start,
                        "unterminated expression (missing '}}')",
                    ));
                }
            };
            out.push_str(&template[search..start]);
            let expr = parse_expression(&template[start..end])?;
            out.push_str(&value_to_string(&self.evaluate(&expr)?));
            search = end;
        }
        out.push_str(&template[search..]);
        Ok(out)
    }

    /// Resolve a value that may contain expressions.
    ///
    /// A string that is exactly one fragment keeps the evaluated value's
    /// type. Strings with surrounding text become templates. Arrays and
    /// objects are resolved element-wise; everything else passes through.
    pub fn resolve_value(&self, value: &Value) -> Result<Value, ExpressionError> {
        match value {
            Value::String(s) => {
                if !s.contains("${{") {
                    return Ok(value.clone());
                }
                let expressions = extract_all(s)?;
                if expressions.len() == 1 && expressions[0].raw == s.trim() {
                    self.evaluate(&expressions[0])
                } else {
                    Ok(Value::String(self.evaluate_string(s)?))
                }
            }
            Value::Array(items) => Ok(Value::Array(
                items
                    .iter()
                    .map(|v| self.resolve_value(v))
                    .collect::<Result<_, _>>()?,
            )),
            Value::Object(map) => {
                let mut resolved = serde_json::Map::with_capacity(map.len());
                for (k, v) in map {
                    resolved.insert(k.clone(), self.resolve_value(v)?);
                }
                Ok(Value::Object(resolved))
            }
            other => Ok(other.clone()),
        }
    }

    /// Resolve every value of a keyword-argument map.
    pub fn resolve_map(
        &self,
        map: &serde_json::Map<String, Value>,
    ) -> Result<serde_json::Map<String, Value>, ExpressionError> {
        let mut resolved = serde_json::Map::with_capacity(map.len());
        for (k, v) in map {
            resolved.insert(k.clone(), self.resolve_value(v)?);
        }
        Ok(resolved)
    }

    /// Evaluate a guard or predicate string to a boolean.
    pub fn evaluate_condition(&self, condition: &str) -> Result<bool, ExpressionError> {
        let expr = parse_expression(condition)?;
        Ok(is_truthy(&self.evaluate(&expr)?))
    }
}

/// Render a value for template substitution.
fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        // Objects and arrays render as compact JSON
        _ => serde_json::to_string(value).unwrap_or_default(),
    }
}

fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
