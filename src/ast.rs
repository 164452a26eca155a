//! AST node and value model for compile-time macros.
//!
//! Macros receive evaluated argument values and must return an AST node; the
//! node is printed back into the rewritten source and also folded to a plain
//! value so that downstream macros consuming the binding see data, not an
//! opaque tree. Nodes cross the sidecar wire as tagged JSON, so the serde
//! representation here is the protocol.

use serde::{Deserialize, Serialize};

// ═══════════════════════════════════════════════════════════════════════════════
// NODES
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AstProperty {
    pub key: String,
    pub value: AstNode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum AstNode {
    StringLiteral { value: String },
    NumericLiteral { value: f64 },
    BooleanLiteral { value: bool },
    NullLiteral,
    Identifier { name: String },
    TemplateLiteral { quasis: Vec<String>, expressions: Vec<AstNode> },
    ArrayExpression { elements: Vec<AstNode> },
    ObjectExpression { properties: Vec<AstProperty> },
    CallExpression { callee: String, arguments: Vec<AstNode> },
    /// Escape hatch for macros that synthesize code the node vocabulary does
    /// not cover. Printed verbatim; has no value form.
    Raw { code: String },
}

// ═══════════════════════════════════════════════════════════════════════════════
// FACTORY
// ═══════════════════════════════════════════════════════════════════════════════

pub fn string(value: impl Into<String>) -> AstNode {
    AstNode::StringLiteral { value: value.into() }
}

pub fn number(value: f64) -> AstNode {
    AstNode::NumericLiteral { value }
}

pub fn boolean(value: bool) -> AstNode {
    AstNode::BooleanLiteral { value }
}

pub fn null() -> AstNode {
    AstNode::NullLiteral
}

pub fn undefined() -> AstNode {
    AstNode::Identifier { name: "undefined".to_string() }
}

pub fn identifier(name: impl Into<String>) -> AstNode {
    AstNode::Identifier { name: name.into() }
}

pub fn array(elements: Vec<AstNode>) -> AstNode {
    AstNode::ArrayExpression { elements }
}

pub fn object(properties: Vec<(String, AstNode)>) -> AstNode {
    AstNode::ObjectExpression {
        properties: properties
            .into_iter()
            .map(|(key, value)| AstProperty { key, value })
            .collect(),
    }
}

pub fn call(callee: impl Into<String>, arguments: Vec<AstNode>) -> AstNode {
    AstNode::CallExpression { callee: callee.into(), arguments }
}

pub fn raw(code: impl Into<String>) -> AstNode {
    AstNode::Raw { code: code.into() }
}

/// Build the node form of a plain value. Used by macros that compute a value
/// and want it inserted literally.
pub fn from_value(value: &Value) -> AstNode {
    match value {
        Value::Null => AstNode::NullLiteral,
        Value::Undefined => undefined(),
        Value::Bool(b) => boolean(*b),
        Value::Number(n) => number(*n),
        Value::String(s) => string(s.clone()),
        Value::List(items) => array(items.iter().map(from_value).collect()),
        Value::Map(entries) => object(
            entries
                .iter()
                .map(|(k, v)| (k.clone(), from_value(v)))
                .collect(),
        ),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PRINTER
// ═══════════════════════════════════════════════════════════════════════════════

/// Print a node as source text. Deterministic: the same node always prints
/// the same text.
pub fn print(node: &AstNode) -> String {
    match node {
        AstNode::StringLiteral { value } => quote_string(value),
        AstNode::NumericLiteral { value } => format_number(*value),
        AstNode::BooleanLiteral { value } => value.to_string(),
        AstNode::NullLiteral => "null".to_string(),
        AstNode::Identifier { name } => name.clone(),
        AstNode::TemplateLiteral { quasis, expressions } => {
            let mut out = String::from("`");
            for (i, quasi) in quasis.iter().enumerate() {
                out.push_str(&escape_template(quasi));
                if let Some(expr) = expressions.get(i) {
                    out.push_str("${");
                    out.push_str(&print(expr));
                    out.push('}');
                }
            }
            out.push('`');
            out
        }
        AstNode::ArrayExpression { elements } => {
            let inner: Vec<String> = elements.iter().map(print).collect();
            format!("[{}]", inner.join(", "))
        }
        AstNode::ObjectExpression { properties } => {
            if properties.is_empty() {
                return "{}".to_string();
            }
            let inner: Vec<String> = properties
                .iter()
                .map(|p| format!("{}: {}", quote_key(&p.key), print(&p.value)))
                .collect();
            format!("{{ {} }}", inner.join(", "))
        }
        AstNode::CallExpression { callee, arguments } => {
            let inner: Vec<String> = arguments.iter().map(print).collect();
            format!("{}({})", callee, inner.join(", "))
        }
        AstNode::Raw { code } => code.clone(),
    }
}

fn quote_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

fn escape_template(s: &str) -> String {
    s.replace('\\', "\\\\").replace('`', "\\`").replace("${", "\\${")
}

fn quote_key(key: &str) -> String {
    if is_identifier_name(key) {
        key.to_string()
    } else {
        quote_string(key)
    }
}

fn is_identifier_name(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

/// Number formatting matching how the numbers would read in source:
/// integral values print without a fractional part.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity".to_string() } else { "-Infinity".to_string() };
    }
    if n == n.trunc() && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// VALUES
// ═══════════════════════════════════════════════════════════════════════════════

/// The dynamic value representation produced by compile-time evaluation.
/// Maps preserve insertion order so that printing and re-evaluation stay
/// deterministic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum Value {
    Null,
    Undefined,
    Bool(bool),
    Number(f64),
    String(String),
    List(Vec<Value>),
    Map(Vec<(String, Value)>),
}

impl Value {
    pub fn truthy(&self) -> bool {
        match self {
            Value::Null | Value::Undefined => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
            Value::List(_) | Value::Map(_) => true,
        }
    }

    /// ToString semantics for template interpolation and `+` concatenation.
    pub fn to_display(&self) -> String {
        match self {
            Value::Null => "null".to_string(),
            Value::Undefined => "undefined".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => format_number(*n),
            Value::String(s) => s.clone(),
            Value::List(items) => items
                .iter()
                .map(Value::to_display)
                .collect::<Vec<_>>()
                .join(","),
            Value::Map(_) => "[object Object]".to_string(),
        }
    }

    /// ToNumber semantics for arithmetic.
    pub fn to_number(&self) -> f64 {
        match self {
            Value::Null => 0.0,
            Value::Undefined => f64::NAN,
            Value::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            Value::Number(n) => *n,
            Value::String(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    0.0
                } else {
                    trimmed.parse::<f64>().unwrap_or(f64::NAN)
                }
            }
            Value::List(_) | Value::Map(_) => f64::NAN,
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        match self {
            Value::Map(entries) => entries
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone()),
            Value::List(items) => match key {
                "length" => Some(Value::Number(items.len() as f64)),
                _ => key
                    .parse::<usize>()
                    .ok()
                    .and_then(|i| items.get(i).cloned()),
            },
            Value::String(s) => match key {
                "length" => Some(Value::Number(s.chars().count() as f64)),
                _ => None,
            },
            _ => None,
        }
    }

    /// Strict equality (`===`).
    pub fn strict_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => a == b,
            _ => self == other,
        }
    }

    /// Loose equality (`==`), limited to the coercions the evaluator needs.
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Undefined) | (Value::Undefined, Value::Null) => true,
            (Value::Number(_), Value::String(_))
            | (Value::String(_), Value::Number(_))
            | (Value::Bool(_), _)
            | (_, Value::Bool(_)) => {
                let a = self.to_number();
                let b = other.to_number();
                a == b
            }
            _ => self.strict_eq(other),
        }
    }
}

/// Fold a node to its value form. Literals flatten; objects and arrays are
/// reconstructed. Nodes with no value form (identifiers other than
/// `undefined`, calls, raw code) yield `None`.
pub fn value_of(node: &AstNode) -> Option<Value> {
    match node {
        AstNode::StringLiteral { value } => Some(Value::String(value.clone())),
        AstNode::NumericLiteral { value } => Some(Value::Number(*value)),
        AstNode::BooleanLiteral { value } => Some(Value::Bool(*value)),
        AstNode::NullLiteral => Some(Value::Null),
        AstNode::Identifier { name } if name == "undefined" => Some(Value::Undefined),
        AstNode::Identifier { .. } => None,
        AstNode::TemplateLiteral { quasis, expressions } => {
            let mut out = String::new();
            for (i, quasi) in quasis.iter().enumerate() {
                out.push_str(quasi);
                if let Some(expr) = expressions.get(i) {
                    out.push_str(&value_of(expr)?.to_display());
                }
            }
            Some(Value::String(out))
        }
        AstNode::ArrayExpression { elements } => {
            let items: Option<Vec<Value>> = elements.iter().map(value_of).collect();
            items.map(Value::List)
        }
        AstNode::ObjectExpression { properties } => {
            let mut entries = Vec::with_capacity(properties.len());
            for p in properties {
                entries.push((p.key.clone(), value_of(&p.value)?));
            }
            Some(Value::Map(entries))
        }
        AstNode::CallExpression { .. } | AstNode::Raw { .. } => None,
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
