#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use crate::ast::{self, Value};
    use crate::errors::ExpandError;
    use crate::expander::expand;
    use crate::graph::MacroGraph;
    use crate::host::MacroRegistry;
    use crate::store;

    fn registry() -> MacroRegistry {
        let mut registry = MacroRegistry::new();
        registry.register("./macros", "add$", |args, _ctx| {
            let a = args.first().map(Value::to_number).unwrap_or(f64::NAN);
            let b = args.get(1).map(Value::to_number).unwrap_or(f64::NAN);
            Ok(ast::number(a + b))
        });
        registry.register("./m", "base$", |args, _ctx| {
            Ok(ast::from_value(args.first().unwrap_or(&Value::Undefined)))
        });
        registry.register("./m", "dbl$", |args, _ctx| {
            let x = args.first().map(Value::to_number).unwrap_or(f64::NAN);
            Ok(ast::number(x * 2.0))
        });
        registry.register("./m", "f$", |args, _ctx| {
            Ok(ast::from_value(args.first().unwrap_or(&Value::Undefined)))
        });
        registry.register("./fail", "boom$", |_args, ctx| {
            Err(ctx.error("boom$", "kaput"))
        });
        registry
    }

    fn run(source: &str) -> Result<(String, MacroGraph), ExpandError> {
        let mut host = registry();
        let mut graph = MacroGraph::new("/proj");
        let out = expand(
            source,
            Path::new("/proj/src/page.ts"),
            Path::new("/proj"),
            &mut graph,
            &mut host,
        )?;
        Ok((out, graph))
    }

    // ── fast path ───────────────────────────────────────────────────────────

    #[test]
    fn fast_path_round_trips_verbatim() {
        let sources = [
            "const a = 1;\nlet b = a + 2;\n",
            "// even weird spacing   \n\n\nexport const price$ = 3;\n",
            "",
        ];
        for source in sources {
            let (out, _) = run(source).unwrap();
            assert_eq!(out, source);
        }
    }

    // ── scenario 1: trivial macro ───────────────────────────────────────────

    #[test]
    fn trivial_macro_inlines_result_and_keeps_import() {
        let source = "import { add$ } from \"./macros\";\nconst x = add$(1, 2);\n";
        let (out, _) = run(source).unwrap();
        assert_eq!(
            out,
            "import { add$ } from \"./macros\";\nconst x = 3;\n"
        );
    }

    // ── scenario 2: transitive macro ────────────────────────────────────────

    #[test]
    fn transitive_macros_compute_in_dependency_order() {
        let source =
            "import { base$, dbl$ } from \"./m\";\nconst a = base$(5);\nconst b = dbl$(a);\n";
        let (out, graph) = run(source).unwrap();
        assert!(out.contains("const a = 5;"));
        assert!(out.contains("const b = 10;"));

        let b_site = graph.site("src/page.ts:b").unwrap();
        assert!(b_site.dependencies.contains("src/page.ts:a"));
    }

    // ── scenario 3: cycle ───────────────────────────────────────────────────

    #[test]
    fn cycle_aborts_with_full_path() {
        let source = "import { f$ } from \"./m\";\nconst p = f$(q);\nconst q = f$(p);\n";
        match run(source) {
            Err(ExpandError::CycleDetected { path }) => {
                assert!(path.contains(&"src/page.ts:p".to_string()));
                assert!(path.contains(&"src/page.ts:q".to_string()));
            }
            other => panic!("expected cycle, got {:?}", other.map(|_| ())),
        }
    }

    // ── scenario 4: package-import rejection ────────────────────────────────

    #[test]
    fn package_imported_argument_is_rejected() {
        let source = "import { f$ } from \"./m\";\nimport { K } from \"some-package\";\nconst x = f$(K);\n";
        match run(source) {
            Err(ExpandError::PackageImport { name, specifier }) => {
                assert_eq!(name, "K");
                assert_eq!(specifier, "some-package");
            }
            other => panic!("expected package rejection, got {:?}", other.map(|_| ())),
        }
    }

    // ── directives ──────────────────────────────────────────────────────────

    #[test]
    fn directive_is_preserved_as_first_statement() {
        for directive in ["\"use interactive\";", "\"use public\";"] {
            let source = format!(
                "{}\nimport {{ add$ }} from \"./macros\";\nconst x = add$(2, 2);\n",
                directive
            );
            let (out, _) = run(&source).unwrap();
            assert!(out.starts_with(directive));
            assert_eq!(out.matches(directive).count(), 1);
            assert!(out.contains("const x = 4;"));
        }
    }

    // ── determinism ─────────────────────────────────────────────────────────

    #[test]
    fn expansion_is_deterministic_from_a_reset_graph() {
        let source = "import { base$, dbl$ } from \"./m\";\nconst a = base$({ n: [1, 2] });\nconst b = dbl$(a.n[1]);\n";
        let (first, _) = run(source).unwrap();
        let (second, _) = run(source).unwrap();
        assert_eq!(first, second);
        assert!(first.contains("const b = 4;"));
    }

    // ── argument evaluation ─────────────────────────────────────────────────

    #[test]
    fn plain_const_arguments_resolve_without_graph_edges() {
        let source =
            "import { add$ } from \"./macros\";\nconst k = 2;\nconst x = add$(k, k * 2);\n";
        let (out, graph) = run(source).unwrap();
        assert!(out.contains("const x = 6;"));
        let site = graph.site("src/page.ts:x").unwrap();
        assert!(site.dependencies.is_empty());
    }

    #[test]
    fn let_bound_argument_is_rejected() {
        let source = "import { add$ } from \"./macros\";\nlet n = 3;\nconst x = add$(n, 1);\n";
        match run(source) {
            Err(ExpandError::NonConstBinding { name }) => assert_eq!(name, "n"),
            other => panic!("expected NonConstBinding, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn unresolved_macro_is_fatal() {
        let source = "const x = mystery$(1);\n";
        match run(source) {
            Err(ExpandError::UnresolvedMacro { name, .. }) => assert_eq!(name, "mystery$"),
            other => panic!("expected UnresolvedMacro, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn composite_results_round_trip_as_values() {
        let source = "import { base$, dbl$ } from \"./m\";\nconst cfg = base$({ port: 8080, tags: [\"a\"] });\nconst doubled = dbl$(cfg.port);\n";
        let (out, _) = run(source).unwrap();
        assert!(out.contains("const cfg = { port: 8080, tags: [\"a\"] };"));
        assert!(out.contains("const doubled = 16160;"));
    }

    // ── inline calls ────────────────────────────────────────────────────────

    #[test]
    fn inline_call_is_replaced_in_place() {
        let source = "import { add$ } from \"./macros\";\nconst y = register(add$(1, 2));\n";
        let (out, graph) = run(source).unwrap();
        assert!(out.contains("const y = register(3);"));
        // Inline calls do not participate in the graph.
        assert!(graph.sites_in(Path::new("/proj/src/page.ts")).is_empty());
    }

    #[test]
    fn failing_inline_call_is_left_untouched() {
        let source = "import { boom$ } from \"./fail\";\nsetup(boom$(1));\n";
        let (out, _) = run(source).unwrap();
        assert_eq!(out, source);
    }

    // ── cross-file resolution ───────────────────────────────────────────────

    fn write(root: &Path, rel: &str, content: &str) -> PathBuf {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn relative_import_resolves_through_the_other_file() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, "src/config.ts", "export const K = 7;\n");
        let page = root.join("src/page.ts");

        let source = "import { add$ } from \"./macros\";\nimport { K } from \"./config\";\nconst x = add$(K, 1);\n";
        let mut host = registry();
        let mut graph = MacroGraph::new(root);
        let out = expand(source, &page, root, &mut graph, &mut host).unwrap();
        assert!(out.contains("const x = 8;"));
    }

    #[test]
    fn cross_file_macro_binding_registers_a_site_and_edge() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(
            root,
            "src/shared.ts",
            "import { base$ } from \"./m\";\nexport const a = base$(4);\n",
        );
        let page = root.join("src/page.ts");

        let source = "import { dbl$ } from \"./m\";\nimport { a } from \"./shared\";\nconst b = dbl$(a);\n";
        let mut host = registry();
        let mut graph = MacroGraph::new(root);
        let out = expand(source, &page, root, &mut graph, &mut host).unwrap();
        assert!(out.contains("const b = 8;"));

        let b_site = graph.site("src/page.ts:b").unwrap();
        assert!(b_site.dependencies.contains("src/shared.ts:a"));
        assert!(graph.is_computed("src/shared.ts:a"));
    }

    // ── store side channel ──────────────────────────────────────────────────

    #[test]
    fn macros_can_append_to_the_shared_store() {
        let mut host = MacroRegistry::new();
        host.register("./style", "css$", |args, ctx| {
            let rule = args.first().cloned().unwrap_or(Value::Undefined);
            ctx.store.push("expander_tests_css", rule);
            Ok(ast::string("generated"))
        });

        let mut graph = MacroGraph::new("/proj");
        let source = "import { css$ } from \"./style\";\nconst cls = css$(\".a { color: red }\");\n";
        let out = expand(
            source,
            Path::new("/proj/src/page.ts"),
            Path::new("/proj"),
            &mut graph,
            &mut host,
        )
        .unwrap();
        assert!(out.contains("const cls = \"generated\";"));

        let collected = store::global().drain("expander_tests_css");
        assert_eq!(collected.len(), 1);
    }
}
