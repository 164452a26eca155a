//! Macro site graph.
//!
//! Every variable-bound macro call discovered during expansion is registered
//! here, keyed `<normalized-relative-path>:<binding>`. The graph records the
//! dependency edges found while probing argument expressions and hands the
//! expander a topological order to execute sites in. Owned by the build
//! coordinator and reset between whole-program builds.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use crate::ast::{AstNode, Value};
use crate::errors::ExpandError;

/// The call recorded for a site. Immutable once the site is created.
#[derive(Debug, Clone)]
pub struct SiteCall {
    /// Local callee name, sigil included (e.g. `table$`).
    pub callee: String,
    /// Argument expressions as source slices, in call order.
    pub args: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct MacroSite {
    pub key: String,
    pub binding: String,
    pub file: PathBuf,
    pub call: SiteCall,
    pub dependencies: BTreeSet<String>,
    pub computed: bool,
    pub result: Option<AstNode>,
    /// Value form of the result, so dependent macros consume data.
    pub value: Option<Value>,
}

#[derive(Debug, Default)]
pub struct MacroGraph {
    sites: HashMap<String, MacroSite>,
    project_root: PathBuf,
}

impl MacroGraph {
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        MacroGraph {
            sites: HashMap::new(),
            project_root: project_root.into(),
        }
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    /// `<normalized-relative-path>:<binding>`. Paths are normalized against
    /// the project root with forward-slash separators so keys are stable
    /// across platforms.
    pub fn create_key(&self, file: &Path, binding: &str) -> String {
        let relative = file.strip_prefix(&self.project_root).unwrap_or(file);
        let normalized: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        format!("{}:{}", normalized.join("/"), binding)
    }

    /// Idempotent: re-adding an existing key is a no-op.
    pub fn add_site(&mut self, key: &str, binding: &str, call: SiteCall, file: &Path) {
        if self.sites.contains_key(key) {
            return;
        }
        self.sites.insert(
            key.to_string(),
            MacroSite {
                key: key.to_string(),
                binding: binding.to_string(),
                file: file.to_path_buf(),
                call,
                dependencies: BTreeSet::new(),
                computed: false,
                result: None,
                value: None,
            },
        );
    }

    pub fn contains(&self, key: &str) -> bool {
        self.sites.contains_key(key)
    }

    pub fn site(&self, key: &str) -> Option<&MacroSite> {
        self.sites.get(key)
    }

    pub fn add_dependency(&mut self, from: &str, to: &str) {
        if let Some(site) = self.sites.get_mut(from) {
            site.dependencies.insert(to.to_string());
        }
    }

    /// Transition the site to computed and record both forms of the result.
    pub fn set_result(&mut self, key: &str, node: AstNode, value: Option<Value>) {
        if let Some(site) = self.sites.get_mut(key) {
            site.result = Some(node);
            site.value = value;
            site.computed = true;
        }
    }

    pub fn result(&self, key: &str) -> Option<&AstNode> {
        self.sites.get(key).and_then(|s| s.result.as_ref())
    }

    pub fn value(&self, key: &str) -> Option<&Value> {
        self.sites.get(key).and_then(|s| s.value.as_ref())
    }

    pub fn is_computed(&self, key: &str) -> bool {
        self.sites.get(key).map(|s| s.computed).unwrap_or(false)
    }

    /// Keys of the sites discovered in a given file, for per-file
    /// re-processing.
    pub fn sites_in(&self, file: &Path) -> Vec<String> {
        let mut keys: Vec<String> = self
            .sites
            .values()
            .filter(|s| s.file == file)
            .map(|s| s.key.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Depth-first topological sort with three marks. Dependencies come
    /// before their dependents. A re-entry on an in-progress node is a
    /// cycle; the error carries the full offending cycle.
    pub fn topological_sort(&self) -> Result<Vec<String>, ExpandError> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            InProgress,
            Done,
        }

        let mut marks: HashMap<&str, Mark> = self
            .sites
            .keys()
            .map(|k| (k.as_str(), Mark::Unvisited))
            .collect();
        let mut order: Vec<String> = Vec::with_capacity(self.sites.len());
        let mut stack: Vec<String> = Vec::new();

        fn visit(
            graph: &MacroGraph,
            key: &str,
            marks: &mut HashMap<&str, Mark>,
            order: &mut Vec<String>,
            stack: &mut Vec<String>,
        ) -> Result<(), ExpandError> {
            match marks.get(key).copied() {
                Some(Mark::Done) => return Ok(()),
                Some(Mark::InProgress) => {
                    let from = stack.iter().position(|k| k == key).unwrap_or(0);
                    return Err(ExpandError::CycleDetected {
                        path: stack[from..].to_vec(),
                    });
                }
                _ => {}
            }
            if let Some(mark) = marks.get_mut(key) {
                *mark = Mark::InProgress;
            }
            stack.push(key.to_string());
            if let Some(site) = graph.sites.get(key) {
                for dep in &site.dependencies {
                    visit(graph, dep, marks, order, stack)?;
                }
            }
            stack.pop();
            if let Some(mark) = marks.get_mut(key) {
                *mark = Mark::Done;
            }
            order.push(key.to_string());
            Ok(())
        }

        let mut roots: Vec<&str> = self.sites.keys().map(String::as_str).collect();
        roots.sort();
        for key in roots {
            visit(self, key, &mut marks, &mut order, &mut stack)?;
        }
        Ok(order)
    }

    /// Reset between whole-program builds and for test isolation.
    pub fn reset(&mut self) {
        self.sites.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call() -> SiteCall {
        SiteCall { callee: "f$".to_string(), args: vec![] }
    }

    #[test]
    fn test_key_normalization() {
        let graph = MacroGraph::new("/proj");
        let key = graph.create_key(Path::new("/proj/src/pages/index.ts"), "x");
        assert_eq!(key, "src/pages/index.ts:x");
    }

    #[test]
    fn test_add_site_is_idempotent() {
        let mut graph = MacroGraph::new("/proj");
        let file = Path::new("/proj/a.ts");
        graph.add_site("a.ts:x", "x", call(), file);
        graph.set_result("a.ts:x", crate::ast::number(1.0), None);
        graph.add_site("a.ts:x", "x", call(), file);
        assert!(graph.is_computed("a.ts:x"));
    }

    #[test]
    fn test_topological_order_puts_dependencies_first() {
        let mut graph = MacroGraph::new("/proj");
        let file = Path::new("/proj/a.ts");
        graph.add_site("a.ts:b", "b", call(), file);
        graph.add_site("a.ts:a", "a", call(), file);
        graph.add_dependency("a.ts:b", "a.ts:a");
        let order = graph.topological_sort().unwrap();
        let pos = |k: &str| order.iter().position(|o| o == k).unwrap();
        assert!(pos("a.ts:a") < pos("a.ts:b"));
    }

    #[test]
    fn test_cycle_payload_lists_every_node() {
        let mut graph = MacroGraph::new("/proj");
        let file = Path::new("/proj/a.ts");
        graph.add_site("a.ts:p", "p", call(), file);
        graph.add_site("a.ts:q", "q", call(), file);
        graph.add_dependency("a.ts:p", "a.ts:q");
        graph.add_dependency("a.ts:q", "a.ts:p");
        match graph.topological_sort() {
            Err(ExpandError::CycleDetected { path }) => {
                assert!(path.contains(&"a.ts:p".to_string()));
                assert!(path.contains(&"a.ts:q".to_string()));
            }
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_sites_in_file() {
        let mut graph = MacroGraph::new("/proj");
        graph.add_site("a.ts:x", "x", call(), Path::new("/proj/a.ts"));
        graph.add_site("b.ts:y", "y", call(), Path::new("/proj/b.ts"));
        assert_eq!(graph.sites_in(Path::new("/proj/a.ts")), vec!["a.ts:x"]);
    }
}
