//! Compile-time macro expansion.
//!
//! `expand` takes a source file, discovers calls to `$`-suffixed functions,
//! orders them by dependency, evaluates each in the macro host, and splices
//! the computed results back into the source. Sources without macro sigils
//! round-trip verbatim.
//!
//! Phases:
//! 1. Discovery: register every variable-bound macro call as a graph site.
//! 2. Probing: no-commit traversal of argument expressions to record
//!    dependency edges. Failures here are benign.
//! 3. Ordering: topological sort; a cycle aborts the build.
//! 4. Execution: invoke each un-computed site in order and store both the
//!    AST result and its value form.
//! 5. Rewrite: replace site initializers and inline calls, then print.

use std::path::Path;
use std::rc::Rc;

use crate::analysis::{FileAnalysis, InlineCallRecord};
use crate::ast;
use crate::errors::ExpandError;
use crate::eval::Resolver;
use crate::graph::MacroGraph;
use crate::host::{MacroContext, MacroHost};
use crate::store;

/// Expand every macro invocation in `source` and return the rewritten text.
///
/// The graph must have been created with the same `project_root`; it is
/// shared across the files of one whole-program build and reset between
/// builds by the coordinator.
pub fn expand(
    source: &str,
    file_path: &Path,
    project_root: &Path,
    graph: &mut MacroGraph,
    host: &mut dyn MacroHost,
) -> Result<String, ExpandError> {
    debug_assert_eq!(graph.project_root(), project_root);

    // Fast path: a source free of macro sigils MUST round-trip verbatim.
    if !source.contains("$(") && !source.contains("$`") {
        return Ok(source.to_string());
    }

    let analysis = Rc::new(FileAnalysis::analyze(source, file_path)?);
    let mut resolver = Resolver::new(graph);
    resolver.insert_analysis(analysis.clone());

    // Phase 1 + 2: discovery, then a no-commit probe of each un-computed
    // site's arguments. Probe failures only mean the dependency set may be
    // incomplete; execution errors definitively.
    for site in &analysis.sites {
        let key = resolver
            .ensure_site(file_path, &site.binding)
            .map_err(|e| e.into_expand(file_path))?;
        if !resolver.graph().is_computed(&key) {
            resolver.set_record_from(Some(key));
            for arg in &site.args {
                let _ = resolver.eval_source(file_path, arg);
            }
            resolver.set_record_from(None);
        }
    }

    // Phase 3: ordering. The cycle error carries the full offending path.
    let order = resolver.graph().topological_sort()?;

    // Phase 4: execution in dependency order.
    for key in &order {
        let site = match resolver.graph().site(key) {
            Some(site) if !site.computed => site.clone(),
            _ => continue,
        };
        let site_analysis = resolver
            .analysis(&site.file)
            .map_err(|e| e.into_expand(&site.file))?;
        let import = site_analysis
            .imports
            .get(&site.call.callee)
            .cloned()
            .ok_or_else(|| ExpandError::UnresolvedMacro {
                name: site.call.callee.clone(),
                file: site.file.display().to_string(),
            })?;

        resolver.set_record_from(Some(key.clone()));
        let mut args = Vec::with_capacity(site.call.args.len());
        for arg in &site.call.args {
            match resolver.eval_source(&site.file, arg) {
                Ok(value) => args.push(value),
                Err(e) => {
                    resolver.set_record_from(None);
                    return Err(e.into_expand(&site.file));
                }
            }
        }
        resolver.set_record_from(None);

        let node = {
            let mut ctx = MacroContext {
                file: &site.file,
                binding: &site.binding,
                graph: resolver.graph(),
                store: store::global(),
            };
            host.invoke(&import.specifier, &import.imported, &args, &mut ctx)?
        };
        let value = ast::value_of(&node);
        resolver.graph().set_result(key, node, value);
    }

    // Phase 5: rewrite.
    let mut replacements: Vec<(u32, u32, String)> = Vec::new();
    for site in &analysis.sites {
        let key = resolver.graph().create_key(file_path, &site.binding);
        if let Some(node) = resolver.graph().result(&key) {
            replacements.push((site.init_span.0, site.init_span.1, ast::print(node)));
        }
    }

    for call in &analysis.inline_calls {
        // An inline call nested inside a site's initializer is consumed by
        // the site's own replacement.
        let nested = analysis
            .sites
            .iter()
            .any(|s| call.span.0 >= s.init_span.0 && call.span.1 <= s.init_span.1);
        if nested {
            continue;
        }
        match expand_inline(&mut resolver, host, file_path, &analysis, call) {
            Ok(text) => replacements.push((call.span.0, call.span.1, text)),
            Err(err) => {
                // Inline calls are often context-dependent and may be
                // rewritten later by a downstream transform, so the call is
                // left untouched.
                eprintln!(
                    "[pod] inline macro {} left in place at {}: {}",
                    call.callee,
                    file_path.display(),
                    err
                );
            }
        }
    }

    Ok(splice(source, replacements))
}

/// Invoke a macro for a call that is not bound to a variable. Inline calls
/// do not participate in the graph; they are evaluated in place.
fn expand_inline(
    resolver: &mut Resolver<'_>,
    host: &mut dyn MacroHost,
    file: &Path,
    analysis: &FileAnalysis,
    call: &InlineCallRecord,
) -> Result<String, ExpandError> {
    let import = analysis
        .imports
        .get(&call.callee)
        .cloned()
        .ok_or_else(|| ExpandError::UnresolvedMacro {
            name: call.callee.clone(),
            file: file.display().to_string(),
        })?;

    let mut args = Vec::with_capacity(call.args.len());
    for arg in &call.args {
        args.push(
            resolver
                .eval_source(file, arg)
                .map_err(|e| e.into_expand(file))?,
        );
    }

    let binding = format!("inline@{}", call.span.0);
    let node = {
        let mut ctx = MacroContext {
            file,
            binding: &binding,
            graph: resolver.graph(),
            store: store::global(),
        };
        host.invoke(&import.specifier, &import.imported, &args, &mut ctx)?
    };
    Ok(ast::print(&node))
}

/// Apply span replacements to the source. Overlapping spans keep the
/// outermost replacement; application runs back-to-front so earlier spans
/// stay valid.
fn splice(source: &str, mut replacements: Vec<(u32, u32, String)>) -> String {
    replacements.sort_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)));
    let mut kept: Vec<(u32, u32, String)> = Vec::with_capacity(replacements.len());
    let mut last_end = 0u32;
    for replacement in replacements {
        if replacement.0 >= last_end {
            last_end = replacement.1;
            kept.push(replacement);
        }
    }

    let mut out = source.to_string();
    for (start, end, text) in kept.into_iter().rev() {
        out.replace_range(start as usize..end as usize, &text);
    }
    out
}
