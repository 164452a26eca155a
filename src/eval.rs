//! Compile-time expression evaluation.
//!
//! Macro arguments are evaluated against a three-layer identifier resolver:
//! local const bindings, macro-produced bindings (which record dependency
//! edges in the graph), and imported bindings chased through relative
//! modules. Operator behavior follows conventional ECMA semantics. The same
//! evaluator runs in the no-commit probing phase (callers ignore failures)
//! and in the execution phase (failures are definitive).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use oxc_allocator::Allocator;
use oxc_ast::ast::*;
use oxc_parser::Parser;
use oxc_span::SourceType;
use oxc_syntax::operator::{BinaryOperator, LogicalOperator, UnaryOperator};

use crate::analysis::FileAnalysis;
use crate::ast::Value;
use crate::errors::ExpandError;
use crate::graph::{MacroGraph, SiteCall};

// ═══════════════════════════════════════════════════════════════════════════════
// ERRORS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub enum EvalError {
    Unresolved { name: String },
    NonConst { name: String },
    PackageImport { name: String, specifier: String },
    /// The referenced macro binding exists but has not been computed yet.
    /// Benign while probing; definitive during execution.
    NotComputed { key: String },
    Unsupported { what: String },
    Syntax { message: String },
}

impl EvalError {
    pub fn into_expand(self, file: &Path) -> ExpandError {
        let file_name = file.display().to_string();
        match self {
            EvalError::Unresolved { name } => ExpandError::Resolution { name, file: file_name },
            EvalError::NonConst { name } => ExpandError::NonConstBinding { name },
            EvalError::PackageImport { name, specifier } => {
                ExpandError::PackageImport { name, specifier }
            }
            EvalError::NotComputed { key } => ExpandError::Resolution {
                name: key,
                file: file_name,
            },
            EvalError::Unsupported { what } => ExpandError::Resolution {
                name: what,
                file: file_name,
            },
            EvalError::Syntax { message } => ExpandError::Parse {
                file: file_name,
                message,
            },
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RESOLVER
// ═══════════════════════════════════════════════════════════════════════════════

pub struct Resolver<'g> {
    graph: &'g mut MacroGraph,
    analyses: HashMap<PathBuf, Rc<FileAnalysis>>,
    /// When set, identifier reads that land on macro bindings record a
    /// dependency edge from this site.
    record_from: Option<String>,
    /// Guard against const-initializer reference cycles.
    resolving: Vec<(PathBuf, String)>,
}

impl<'g> Resolver<'g> {
    pub fn new(graph: &'g mut MacroGraph) -> Self {
        Resolver {
            graph,
            analyses: HashMap::new(),
            record_from: None,
            resolving: Vec::new(),
        }
    }

    pub fn graph(&mut self) -> &mut MacroGraph {
        &mut *self.graph
    }

    /// Seed the cache with an analysis built from in-memory source (the file
    /// currently being expanded may not be on disk in its current form).
    pub fn insert_analysis(&mut self, analysis: Rc<FileAnalysis>) {
        self.analyses.insert(analysis.path.clone(), analysis);
    }

    pub fn set_record_from(&mut self, from: Option<String>) {
        self.record_from = from;
    }

    pub fn analysis(&mut self, file: &Path) -> Result<Rc<FileAnalysis>, EvalError> {
        if let Some(existing) = self.analyses.get(file) {
            return Ok(existing.clone());
        }
        let source = std::fs::read_to_string(file).map_err(|e| EvalError::Syntax {
            message: format!("cannot read {}: {}", file.display(), e),
        })?;
        let analysis = FileAnalysis::analyze(&source, file).map_err(|e| EvalError::Syntax {
            message: e.to_string(),
        })?;
        let analysis = Rc::new(analysis);
        self.analyses.insert(file.to_path_buf(), analysis.clone());
        Ok(analysis)
    }

    /// Register the variable-bound macro site `binding` of `file` in the
    /// graph (idempotent) and probe its arguments so its own dependency
    /// edges exist before ordering.
    pub fn ensure_site(&mut self, file: &Path, binding: &str) -> Result<String, EvalError> {
        let analysis = self.analysis(file)?;
        let record = analysis
            .site_for(binding)
            .ok_or_else(|| EvalError::Unresolved {
                name: binding.to_string(),
            })?
            .clone();
        let key = self.graph.create_key(file, binding);
        if self.graph.contains(&key) {
            return Ok(key);
        }
        self.graph.add_site(
            &key,
            binding,
            SiteCall {
                callee: record.callee.clone(),
                args: record.args.clone(),
            },
            file,
        );
        let saved = self.record_from.take();
        self.record_from = Some(key.clone());
        for arg in &record.args {
            // No-commit probe: failures here only mean the dependency set
            // may be incomplete; execution will error definitively.
            let _ = self.eval_source(file, arg);
        }
        self.record_from = saved;
        Ok(key)
    }

    /// Three-layer identifier resolution.
    pub fn resolve(&mut self, file: &Path, name: &str) -> Result<Value, EvalError> {
        let analysis = self.analysis(file)?;

        if analysis.lets.contains(name) {
            return Err(EvalError::NonConst {
                name: name.to_string(),
            });
        }

        // Layer 2 checked before plain consts: a const macro site also
        // appears in the const table, but its initializer must go through
        // the graph, not re-evaluation.
        if analysis.site_for(name).is_some() {
            let key = self.ensure_site(file, name)?;
            if let Some(from) = self.record_from.clone() {
                if from != key {
                    self.graph.add_dependency(&from, &key);
                }
            }
            if self.graph.is_computed(&key) {
                return self
                    .graph
                    .value(&key)
                    .cloned()
                    .ok_or_else(|| EvalError::Unsupported {
                        what: format!("result of macro binding `{}` has no value form", name),
                    });
            }
            return Err(EvalError::NotComputed { key });
        }

        // Layer 1: plain local const.
        if let Some(init) = analysis.consts.get(name).cloned() {
            let guard = (file.to_path_buf(), name.to_string());
            if self.resolving.contains(&guard) {
                return Err(EvalError::Unresolved {
                    name: name.to_string(),
                });
            }
            self.resolving.push(guard);
            let result = self.eval_source(file, &init);
            self.resolving.pop();
            return result;
        }

        // Layer 3: imported binding.
        if let Some(import) = analysis.imports.get(name).cloned() {
            if !is_relative_specifier(&import.specifier) {
                return Err(EvalError::PackageImport {
                    name: name.to_string(),
                    specifier: import.specifier,
                });
            }
            let target =
                resolve_module(file, &import.specifier).ok_or_else(|| EvalError::Unresolved {
                    name: name.to_string(),
                })?;
            let target_analysis = self.analysis(&target)?;
            let local = target_analysis
                .exports
                .get(&import.imported)
                .cloned()
                .ok_or_else(|| EvalError::Unresolved {
                    name: import.imported.clone(),
                })?;
            return self.resolve(&target, &local);
        }

        Err(EvalError::Unresolved {
            name: name.to_string(),
        })
    }

    /// Parse a source slice as an expression and evaluate it.
    pub fn eval_source(&mut self, file: &Path, src: &str) -> Result<Value, EvalError> {
        let allocator = Allocator::default();
        let source_type = SourceType::default().with_typescript(true);
        match Parser::new(&allocator, src, source_type).parse_expression() {
            Ok(expr) => self.eval_expr(file, &expr),
            Err(errors) => Err(EvalError::Syntax {
                message: errors
                    .first()
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| format!("invalid expression: {}", src)),
            }),
        }
    }

    fn eval_expr(&mut self, file: &Path, expr: &Expression<'_>) -> Result<Value, EvalError> {
        match expr {
            Expression::StringLiteral(s) => Ok(Value::String(s.value.to_string())),
            Expression::NumericLiteral(n) => Ok(Value::Number(n.value)),
            Expression::BooleanLiteral(b) => Ok(Value::Bool(b.value)),
            Expression::NullLiteral(_) => Ok(Value::Null),

            Expression::Identifier(id) => match id.name.as_str() {
                "undefined" => Ok(Value::Undefined),
                "NaN" => Ok(Value::Number(f64::NAN)),
                "Infinity" => Ok(Value::Number(f64::INFINITY)),
                name => self.resolve(file, name),
            },

            Expression::TemplateLiteral(template) => {
                let mut out = String::new();
                for (i, quasi) in template.quasis.iter().enumerate() {
                    match &quasi.value.cooked {
                        Some(cooked) => out.push_str(cooked.as_str()),
                        None => out.push_str(quasi.value.raw.as_str()),
                    }
                    if let Some(inner) = template.expressions.get(i) {
                        out.push_str(&self.eval_expr(file, inner)?.to_display());
                    }
                }
                Ok(Value::String(out))
            }

            Expression::ObjectExpression(object) => {
                let mut entries: Vec<(String, Value)> = Vec::new();
                for property in &object.properties {
                    match property {
                        ObjectPropertyKind::ObjectProperty(p) => {
                            let key = self.property_key(file, &p.key, p.computed)?;
                            let value = self.eval_expr(file, &p.value)?;
                            upsert(&mut entries, key, value);
                        }
                        ObjectPropertyKind::SpreadProperty(spread) => {
                            match self.eval_expr(file, &spread.argument)? {
                                Value::Map(inner) => {
                                    for (k, v) in inner {
                                        upsert(&mut entries, k, v);
                                    }
                                }
                                Value::Null | Value::Undefined => {}
                                _ => {
                                    return Err(EvalError::Unsupported {
                                        what: "spread of a non-object into an object".to_string(),
                                    })
                                }
                            }
                        }
                    }
                }
                Ok(Value::Map(entries))
            }

            Expression::ArrayExpression(array) => {
                let mut items: Vec<Value> = Vec::new();
                for element in &array.elements {
                    match element {
                        ArrayExpressionElement::Elision(_) => items.push(Value::Undefined),
                        ArrayExpressionElement::SpreadElement(spread) => {
                            match self.eval_expr(file, &spread.argument)? {
                                Value::List(inner) => items.extend(inner),
                                Value::String(s) => items
                                    .extend(s.chars().map(|c| Value::String(c.to_string()))),
                                _ => {
                                    return Err(EvalError::Unsupported {
                                        what: "spread of a non-array into an array".to_string(),
                                    })
                                }
                            }
                        }
                        other => {
                            let inner = other.as_expression().ok_or_else(|| {
                                EvalError::Unsupported {
                                    what: "array element".to_string(),
                                }
                            })?;
                            items.push(self.eval_expr(file, inner)?);
                        }
                    }
                }
                Ok(Value::List(items))
            }

            Expression::UnaryExpression(unary) => {
                let operand = self.eval_expr(file, &unary.argument)?;
                match unary.operator {
                    UnaryOperator::UnaryNegation => Ok(Value::Number(-operand.to_number())),
                    UnaryOperator::UnaryPlus => Ok(Value::Number(operand.to_number())),
                    UnaryOperator::LogicalNot => Ok(Value::Bool(!operand.truthy())),
                    UnaryOperator::Void => Ok(Value::Undefined),
                    UnaryOperator::Typeof => Ok(Value::String(type_of(&operand).to_string())),
                    _ => Err(EvalError::Unsupported {
                        what: format!("unary operator {}", unary.operator.as_str()),
                    }),
                }
            }

            Expression::BinaryExpression(binary) => {
                let left = self.eval_expr(file, &binary.left)?;
                let right = self.eval_expr(file, &binary.right)?;
                eval_binary(binary.operator, &left, &right)
            }

            Expression::LogicalExpression(logical) => {
                let left = self.eval_expr(file, &logical.left)?;
                match logical.operator {
                    LogicalOperator::And => {
                        if left.truthy() {
                            self.eval_expr(file, &logical.right)
                        } else {
                            Ok(left)
                        }
                    }
                    LogicalOperator::Or => {
                        if left.truthy() {
                            Ok(left)
                        } else {
                            self.eval_expr(file, &logical.right)
                        }
                    }
                    LogicalOperator::Coalesce => {
                        if matches!(left, Value::Null | Value::Undefined) {
                            self.eval_expr(file, &logical.right)
                        } else {
                            Ok(left)
                        }
                    }
                }
            }

            Expression::ParenthesizedExpression(paren) => {
                self.eval_expr(file, &paren.expression)
            }

            Expression::ConditionalExpression(conditional) => {
                if self.eval_expr(file, &conditional.test)?.truthy() {
                    self.eval_expr(file, &conditional.consequent)
                } else {
                    self.eval_expr(file, &conditional.alternate)
                }
            }

            Expression::StaticMemberExpression(member) => {
                let object = self.eval_expr(file, &member.object)?;
                member_access(&object, member.property.name.as_str())
            }

            Expression::ComputedMemberExpression(member) => {
                let object = self.eval_expr(file, &member.object)?;
                let key = self.eval_expr(file, &member.expression)?;
                member_access(&object, &key.to_display())
            }

            Expression::TSAsExpression(cast) => self.eval_expr(file, &cast.expression),
            Expression::TSSatisfiesExpression(cast) => self.eval_expr(file, &cast.expression),
            Expression::TSNonNullExpression(cast) => self.eval_expr(file, &cast.expression),

            other => Err(EvalError::Unsupported {
                what: format!("expression kind {:?}", ExpressionKind(other)),
            }),
        }
    }

    fn property_key(
        &mut self,
        file: &Path,
        key: &PropertyKey<'_>,
        computed: bool,
    ) -> Result<String, EvalError> {
        if computed {
            let expr = key.as_expression().ok_or_else(|| EvalError::Unsupported {
                what: "computed property key".to_string(),
            })?;
            return Ok(self.eval_expr(file, expr)?.to_display());
        }
        match key {
            PropertyKey::StaticIdentifier(id) => Ok(id.name.to_string()),
            PropertyKey::StringLiteral(s) => Ok(s.value.to_string()),
            PropertyKey::NumericLiteral(n) => Ok(crate::ast::format_number(n.value)),
            other => match other.as_expression() {
                Some(expr) => Ok(self.eval_expr(file, expr)?.to_display()),
                None => Err(EvalError::Unsupported {
                    what: "property key".to_string(),
                }),
            },
        }
    }
}

/// Debug label for unsupported expression kinds without dumping the tree.
struct ExpressionKind<'a, 'b>(&'a Expression<'b>);

impl std::fmt::Debug for ExpressionKind<'_, '_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self.0 {
            Expression::CallExpression(_) => "call",
            Expression::ArrowFunctionExpression(_) => "arrow function",
            Expression::FunctionExpression(_) => "function",
            Expression::NewExpression(_) => "new",
            Expression::AssignmentExpression(_) => "assignment",
            Expression::AwaitExpression(_) => "await",
            _ => "unsupported",
        };
        write!(f, "{}", name)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// OPERATORS
// ═══════════════════════════════════════════════════════════════════════════════

fn eval_binary(op: BinaryOperator, left: &Value, right: &Value) -> Result<Value, EvalError> {
    use BinaryOperator::*;
    match op {
        Addition => {
            if matches!(left, Value::String(_)) || matches!(right, Value::String(_)) {
                Ok(Value::String(format!(
                    "{}{}",
                    left.to_display(),
                    right.to_display()
                )))
            } else {
                Ok(Value::Number(left.to_number() + right.to_number()))
            }
        }
        Subtraction => Ok(Value::Number(left.to_number() - right.to_number())),
        Multiplication => Ok(Value::Number(left.to_number() * right.to_number())),
        Division => Ok(Value::Number(left.to_number() / right.to_number())),
        Remainder => Ok(Value::Number(left.to_number() % right.to_number())),
        Exponential => Ok(Value::Number(left.to_number().powf(right.to_number()))),
        Equality => Ok(Value::Bool(left.loose_eq(right))),
        Inequality => Ok(Value::Bool(!left.loose_eq(right))),
        StrictEquality => Ok(Value::Bool(left.strict_eq(right))),
        StrictInequality => Ok(Value::Bool(!left.strict_eq(right))),
        LessThan | LessEqualThan | GreaterThan | GreaterEqualThan => {
            let result = match (left, right) {
                (Value::String(a), Value::String(b)) => match op {
                    LessThan => a < b,
                    LessEqualThan => a <= b,
                    GreaterThan => a > b,
                    _ => a >= b,
                },
                _ => {
                    let a = left.to_number();
                    let b = right.to_number();
                    if a.is_nan() || b.is_nan() {
                        false
                    } else {
                        match op {
                            LessThan => a < b,
                            LessEqualThan => a <= b,
                            GreaterThan => a > b,
                            _ => a >= b,
                        }
                    }
                }
            };
            Ok(Value::Bool(result))
        }
        _ => Err(EvalError::Unsupported {
            what: format!("binary operator {}", op.as_str()),
        }),
    }
}

fn member_access(object: &Value, key: &str) -> Result<Value, EvalError> {
    match object {
        Value::Map(_) | Value::List(_) | Value::String(_) => {
            Ok(object.get(key).unwrap_or(Value::Undefined))
        }
        _ => Err(EvalError::Unsupported {
            what: format!("property access `.{}` on a non-container value", key),
        }),
    }
}

fn type_of(value: &Value) -> &'static str {
    match value {
        Value::Undefined => "undefined",
        Value::Null | Value::List(_) | Value::Map(_) => "object",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
    }
}

fn upsert(entries: &mut Vec<(String, Value)>, key: String, value: Value) {
    if let Some(existing) = entries.iter_mut().find(|(k, _)| *k == key) {
        existing.1 = value;
    } else {
        entries.push((key, value));
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// MODULE RESOLUTION
// ═══════════════════════════════════════════════════════════════════════════════

pub fn is_relative_specifier(specifier: &str) -> bool {
    specifier.starts_with("./") || specifier.starts_with("../") || specifier.starts_with('/')
}

/// Resolve a relative import against the importing file, trying the
/// TypeScript-family extensions and index files.
pub fn resolve_module(from: &Path, specifier: &str) -> Option<PathBuf> {
    let base = from.parent()?;
    let joined = if specifier.starts_with('/') {
        PathBuf::from(specifier)
    } else {
        base.join(specifier)
    };
    if joined.is_file() {
        return Some(joined);
    }
    for ext in ["ts", "tsx", "js", "jsx"] {
        let candidate = PathBuf::from(format!("{}.{}", joined.display(), ext));
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    for ext in ["ts", "tsx", "js", "jsx"] {
        let candidate = joined.join(format!("index.{}", ext));
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    fn eval_in(source: &str, expr: &str) -> Result<Value, EvalError> {
        let path = Path::new("/proj/src/page.ts");
        let analysis = Rc::new(FileAnalysis::analyze(source, path).unwrap());
        let mut graph = MacroGraph::new("/proj");
        let mut resolver = Resolver::new(&mut graph);
        resolver.insert_analysis(analysis);
        resolver.eval_source(path, expr)
    }

    fn eval(expr: &str) -> Value {
        eval_in("", expr).unwrap()
    }

    #[test]
    fn test_literals_and_arithmetic() {
        assert_eq!(eval("1 + 2 * 3"), Value::Number(7.0));
        assert_eq!(eval("(1 + 2) * 3"), Value::Number(9.0));
        assert_eq!(eval("2 ** 10"), Value::Number(1024.0));
        assert_eq!(eval("\"a\" + 1"), Value::String("a1".to_string()));
        assert_eq!(eval("-4"), Value::Number(-4.0));
        assert_eq!(eval("!0"), Value::Bool(true));
    }

    #[test]
    fn test_comparisons_and_logic() {
        assert_eq!(eval("1 < 2"), Value::Bool(true));
        assert_eq!(eval("\"a\" < \"b\""), Value::Bool(true));
        assert_eq!(eval("1 == \"1\""), Value::Bool(true));
        assert_eq!(eval("1 === \"1\""), Value::Bool(false));
        assert_eq!(eval("null ?? 3"), Value::Number(3.0));
        assert_eq!(eval("0 || \"x\""), Value::String("x".to_string()));
        assert_eq!(eval("true ? 1 : 2"), Value::Number(1.0));
    }

    #[test]
    fn test_template_literals() {
        assert_eq!(
            eval_in("const name = \"pod\";", "`hello ${name}!`").unwrap(),
            Value::String("hello pod!".to_string())
        );
    }

    #[test]
    fn test_objects_and_arrays() {
        let value = eval("{ a: 1, b: [2, 3], \"c-d\": true }");
        assert_eq!(value.get("a"), Some(Value::Number(1.0)));
        assert_eq!(value.get("c-d"), Some(Value::Bool(true)));
        assert_eq!(eval("[1, ...[2, 3]]"), eval("[1, 2, 3]"));

        let spread = eval_in("const base = { a: 1 };", "{ ...base, b: 2 }").unwrap();
        assert_eq!(spread.get("a"), Some(Value::Number(1.0)));
        assert_eq!(spread.get("b"), Some(Value::Number(2.0)));
    }

    #[test]
    fn test_shorthand_properties() {
        let value = eval_in("const a = 1;", "{ a }").unwrap();
        assert_eq!(value.get("a"), Some(Value::Number(1.0)));
    }

    #[test]
    fn test_member_and_element_access() {
        assert_eq!(eval("{ a: [10, 20] }.a[1]"), Value::Number(20.0));
        assert_eq!(eval("[1, 2, 3].length"), Value::Number(3.0));
        assert_eq!(eval("\"pod\".length"), Value::Number(3.0));
        assert_eq!(eval("{ a: 1 }.missing"), Value::Undefined);
    }

    #[test]
    fn test_const_chain_resolution() {
        let value = eval_in("const a = 2;\nconst b = a * 3;", "b + 1").unwrap();
        assert_eq!(value, Value::Number(7.0));
    }

    #[test]
    fn test_let_binding_is_rejected() {
        match eval_in("let a = 1;", "a + 1") {
            Err(EvalError::NonConst { name }) => assert_eq!(name, "a"),
            other => panic!("expected NonConst, got {:?}", other),
        }
    }

    #[test]
    fn test_package_import_is_rejected() {
        match eval_in("import { K } from \"some-package\";", "K") {
            Err(EvalError::PackageImport { name, specifier }) => {
                assert_eq!(name, "K");
                assert_eq!(specifier, "some-package");
            }
            other => panic!("expected PackageImport, got {:?}", other),
        }
    }

    #[test]
    fn test_typeof_and_void() {
        assert_eq!(eval("typeof 1"), Value::String("number".to_string()));
        assert_eq!(eval("typeof \"s\""), Value::String("string".to_string()));
        assert_eq!(eval("void 0"), Value::Undefined);
    }
}
