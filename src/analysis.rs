//! Per-file static analysis.
//!
//! One pass over the oxc AST collects everything later phases need: const
//! initializers, `let`/`var` names, import bindings, exports, variable-bound
//! macro sites, and inline macro calls. Everything is captured as a source
//! slice plus its span, so later phases can re-parse a single expression with
//! a fresh allocator instead of holding the arena-backed tree alive.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use oxc_allocator::Allocator;
use oxc_ast::ast::*;
use oxc_ast_visit::{walk, Visit};
use oxc_parser::Parser;
use oxc_span::{GetSpan, SourceType};

use crate::errors::ExpandError;

/// Where an imported name comes from.
#[derive(Debug, Clone)]
pub struct ImportBinding {
    pub specifier: String,
    /// The name on the exporting side (`default` for default imports).
    pub imported: String,
}

/// A variable-bound macro call: `const x = table$(...)`.
#[derive(Debug, Clone)]
pub struct SiteRecord {
    pub binding: String,
    pub callee: String,
    pub args: Vec<String>,
    pub call_span: (u32, u32),
    /// Span of the whole initializer, replaced during rewrite.
    pub init_span: (u32, u32),
}

/// A macro call that is not bound to a variable.
#[derive(Debug, Clone)]
pub struct InlineCallRecord {
    pub callee: String,
    pub args: Vec<String>,
    pub span: (u32, u32),
}

#[derive(Debug)]
pub struct FileAnalysis {
    pub path: PathBuf,
    pub source: String,
    /// const name -> initializer source slice. First declaration wins.
    pub consts: HashMap<String, String>,
    /// Names declared with `let` or `var`.
    pub lets: HashSet<String>,
    /// local name -> import origin.
    pub imports: HashMap<String, ImportBinding>,
    /// exported name -> local binding name.
    pub exports: HashMap<String, String>,
    pub sites: Vec<SiteRecord>,
    pub inline_calls: Vec<InlineCallRecord>,
    /// binding name -> index into `sites`.
    pub macro_bindings: HashMap<String, usize>,
}

impl FileAnalysis {
    pub fn analyze(source: &str, path: &Path) -> Result<FileAnalysis, ExpandError> {
        let allocator = Allocator::default();
        let source_type = source_type_for(path);
        let ret = Parser::new(&allocator, source, source_type).parse();
        if ret.panicked || !ret.errors.is_empty() {
            let message = ret
                .errors
                .first()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unrecoverable parse failure".to_string());
            return Err(ExpandError::Parse {
                file: path.display().to_string(),
                message,
            });
        }

        let mut collector = Collector {
            source,
            consts: HashMap::new(),
            lets: HashSet::new(),
            imports: HashMap::new(),
            exports: HashMap::new(),
            sites: Vec::new(),
            sigil_calls: Vec::new(),
            bound_call_spans: HashSet::new(),
        };
        collector.visit_program(&ret.program);

        let Collector {
            consts,
            lets,
            imports,
            exports,
            sites,
            sigil_calls,
            bound_call_spans,
            ..
        } = collector;

        let inline_calls = sigil_calls
            .into_iter()
            .filter(|c| !bound_call_spans.contains(&c.span))
            .collect();

        let macro_bindings = sites
            .iter()
            .enumerate()
            .map(|(i, s)| (s.binding.clone(), i))
            .collect();

        Ok(FileAnalysis {
            path: path.to_path_buf(),
            source: source.to_string(),
            consts,
            lets,
            imports,
            exports,
            sites,
            inline_calls,
            macro_bindings,
        })
    }

    pub fn site_for(&self, binding: &str) -> Option<&SiteRecord> {
        self.macro_bindings.get(binding).map(|i| &self.sites[*i])
    }
}

/// TSX for `.tsx`/`.jsx`, plain TypeScript otherwise.
pub fn source_type_for(path: &Path) -> SourceType {
    let jsx = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("tsx") | Some("jsx")
    );
    let mut source_type = SourceType::default().with_typescript(true).with_module(true);
    if jsx {
        source_type = source_type.with_jsx(true);
    }
    source_type
}

/// True when an identifier carries the macro sigil.
pub fn is_macro_name(name: &str) -> bool {
    name.len() > 1 && name.ends_with('$')
}

struct Collector<'s> {
    source: &'s str,
    consts: HashMap<String, String>,
    lets: HashSet<String>,
    imports: HashMap<String, ImportBinding>,
    exports: HashMap<String, String>,
    sites: Vec<SiteRecord>,
    sigil_calls: Vec<InlineCallRecord>,
    bound_call_spans: HashSet<(u32, u32)>,
}

impl<'s> Collector<'s> {
    fn slice(&self, start: u32, end: u32) -> String {
        self.source[start as usize..end as usize].to_string()
    }

    /// `Some((callee, args, span))` when the expression is a direct call to a
    /// sigil-suffixed identifier.
    fn as_macro_call(&self, expr: &Expression<'_>) -> Option<(String, Vec<String>, (u32, u32))> {
        let Expression::CallExpression(call) = expr else {
            return None;
        };
        let Expression::Identifier(ident) = &call.callee else {
            return None;
        };
        if !is_macro_name(&ident.name) {
            return None;
        }
        let args = call
            .arguments
            .iter()
            .map(|arg| {
                let span = arg.span();
                self.slice(span.start, span.end)
            })
            .collect();
        Some((
            ident.name.to_string(),
            args,
            (call.span.start, call.span.end),
        ))
    }
}

impl<'a, 's> Visit<'a> for Collector<'s> {
    fn visit_variable_declaration(&mut self, decl: &VariableDeclaration<'a>) {
        let is_const = decl.kind == VariableDeclarationKind::Const;
        for declarator in &decl.declarations {
            let BindingPatternKind::BindingIdentifier(id) = &declarator.id.kind else {
                continue;
            };
            let name = id.name.to_string();
            match &declarator.init {
                Some(init) => {
                    let init_span = init.span();
                    if is_const {
                        let slice = self.slice(init_span.start, init_span.end);
                        self.consts.entry(name.clone()).or_insert(slice);
                    } else {
                        self.lets.insert(name.clone());
                    }
                    if let Some((callee, args, call_span)) = self.as_macro_call(init) {
                        self.bound_call_spans.insert(call_span);
                        self.sites.push(SiteRecord {
                            binding: name,
                            callee,
                            args,
                            call_span,
                            init_span: (init_span.start, init_span.end),
                        });
                    }
                }
                None => {
                    if !is_const {
                        self.lets.insert(name);
                    }
                }
            }
        }
        walk::walk_variable_declaration(self, decl);
    }

    fn visit_call_expression(&mut self, call: &CallExpression<'a>) {
        if let Expression::Identifier(ident) = &call.callee {
            if is_macro_name(&ident.name) {
                let args = call
                    .arguments
                    .iter()
                    .map(|arg| {
                        let span = arg.span();
                        self.slice(span.start, span.end)
                    })
                    .collect();
                self.sigil_calls.push(InlineCallRecord {
                    callee: ident.name.to_string(),
                    args,
                    span: (call.span.start, call.span.end),
                });
            }
        }
        walk::walk_call_expression(self, call);
    }

    fn visit_import_declaration(&mut self, decl: &ImportDeclaration<'a>) {
        let specifier = decl.source.value.to_string();
        if let Some(specifiers) = &decl.specifiers {
            for item in specifiers {
                match item {
                    ImportDeclarationSpecifier::ImportSpecifier(named) => {
                        self.imports.insert(
                            named.local.name.to_string(),
                            ImportBinding {
                                specifier: specifier.clone(),
                                imported: module_export_name(&named.imported),
                            },
                        );
                    }
                    ImportDeclarationSpecifier::ImportDefaultSpecifier(default) => {
                        self.imports.insert(
                            default.local.name.to_string(),
                            ImportBinding {
                                specifier: specifier.clone(),
                                imported: "default".to_string(),
                            },
                        );
                    }
                    ImportDeclarationSpecifier::ImportNamespaceSpecifier(_) => {
                        // Namespace imports carry no single binding the
                        // resolver can chase; references through them fail
                        // resolution with the member name.
                    }
                }
            }
        }
        walk::walk_import_declaration(self, decl);
    }

    fn visit_export_named_declaration(&mut self, decl: &ExportNamedDeclaration<'a>) {
        if let Some(Declaration::VariableDeclaration(var)) = &decl.declaration {
            for declarator in &var.declarations {
                if let BindingPatternKind::BindingIdentifier(id) = &declarator.id.kind {
                    let name = id.name.to_string();
                    self.exports.insert(name.clone(), name);
                }
            }
        }
        for specifier in &decl.specifiers {
            self.exports.insert(
                module_export_name(&specifier.exported),
                module_export_name(&specifier.local),
            );
        }
        walk::walk_export_named_declaration(self, decl);
    }
}

fn module_export_name(name: &ModuleExportName<'_>) -> String {
    match name {
        ModuleExportName::IdentifierName(id) => id.name.to_string(),
        ModuleExportName::IdentifierReference(id) => id.name.to_string(),
        ModuleExportName::StringLiteral(s) => s.value.to_string(),
    }
}
