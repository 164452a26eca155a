//! Single-file transformation contract and the whole-project compile.
//!
//! The outer build feeds *source + path* in and gets back the rewritten
//! source plus the file's directive, which selects one of the three
//! downstream pipelines. The project compile walks `src/`, expands every
//! TypeScript-family file against one shared graph (reset per build), and
//! mirrors the results into `.pod/out`. Unchanged files are skipped via a
//! content-hash cache.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::directive::{classify, FileDirective};
use crate::errors::ExpandError;
use crate::expander::expand;
use crate::graph::MacroGraph;
use crate::host::MacroHost;

/// Result of the single-file transformation contract.
#[derive(Debug, Clone)]
pub struct CompiledFile {
    pub directive: FileDirective,
    pub code: String,
}

/// Compile one source file: classify its directive and expand its macros.
/// The directive round-trips through expansion untouched.
pub fn compile_file(
    source: &str,
    path: &Path,
    project_root: &Path,
    graph: &mut MacroGraph,
    host: &mut dyn MacroHost,
) -> Result<CompiledFile, ExpandError> {
    let directive = classify(source, path);
    let code = expand(source, path, project_root, graph, host)?;
    Ok(CompiledFile { directive, code })
}

// ═══════════════════════════════════════════════════════════════════════════════
// EXPANSION CACHE
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Serialize, Deserialize)]
struct CacheEntry {
    hash: String,
    directive: FileDirective,
    code: String,
}

/// Content-addressed cache of expanded files under `.pod/cache`.
pub struct ExpandCache {
    cache_dir: PathBuf,
}

impl ExpandCache {
    pub fn new(project_root: &Path) -> Self {
        let cache_dir = project_root.join(".pod").join("cache");
        if !cache_dir.exists() {
            fs::create_dir_all(&cache_dir).ok();
        }
        ExpandCache { cache_dir }
    }

    pub fn compute_hash(source: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(source.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    fn cache_path(&self, file_key: &str) -> PathBuf {
        let safe_name = file_key
            .replace('/', "_")
            .replace('\\', "_")
            .replace(':', "_");
        self.cache_dir.join(format!("{}.json", safe_name))
    }

    pub fn get(&self, file_key: &str, source: &str) -> Option<CompiledFile> {
        let cache_path = self.cache_path(file_key);
        if !cache_path.exists() {
            return None;
        }
        let data = fs::read_to_string(&cache_path).ok()?;
        let entry: CacheEntry = match serde_json::from_str(&data) {
            Ok(entry) => entry,
            Err(e) => {
                eprintln!("[pod] cache entry for {} is corrupt: {}", file_key, e);
                fs::remove_file(cache_path).ok();
                return None;
            }
        };
        if entry.hash == Self::compute_hash(source) {
            Some(CompiledFile {
                directive: entry.directive,
                code: entry.code,
            })
        } else {
            None
        }
    }

    pub fn set(&self, file_key: &str, source: &str, compiled: &CompiledFile) {
        let entry = CacheEntry {
            hash: Self::compute_hash(source),
            directive: compiled.directive,
            code: compiled.code.clone(),
        };
        if let Ok(data) = serde_json::to_string(&entry) {
            fs::write(self.cache_path(file_key), data).ok();
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PROJECT COMPILE
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default)]
pub struct CompileSummary {
    pub compiled: usize,
    pub cached: usize,
    pub out_dir: PathBuf,
}

fn is_source_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("ts") | Some("tsx") | Some("js") | Some("jsx")
    )
}

/// Compile every source file under `<root>/src` into `.pod/out`, sharing one
/// graph across the build. Expansions run serially; the graph is never
/// accessed concurrently.
pub fn compile_project(
    project_root: &Path,
    host: &mut dyn MacroHost,
) -> Result<CompileSummary, ExpandError> {
    let src_dir = project_root.join("src");
    let out_dir = project_root.join(".pod").join("out");
    let cache = ExpandCache::new(project_root);

    // Fresh graph per whole-program build.
    let mut graph = MacroGraph::new(project_root);

    let mut summary = CompileSummary {
        out_dir: out_dir.clone(),
        ..CompileSummary::default()
    };

    let mut files: Vec<PathBuf> = WalkDir::new(&src_dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_file() && is_source_file(entry.path()))
        .filter(|entry| {
            !entry
                .path()
                .components()
                .any(|c| c.as_os_str() == "node_modules")
        })
        .map(|entry| entry.path().to_path_buf())
        .collect();
    files.sort();

    for file in files {
        let source = fs::read_to_string(&file)?;
        let rel = file.strip_prefix(project_root).unwrap_or(&file);
        let file_key = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");

        let compiled = match cache.get(&file_key, &source) {
            Some(hit) => {
                summary.cached += 1;
                hit
            }
            None => {
                let compiled = compile_file(&source, &file, project_root, &mut graph, host)?;
                cache.set(&file_key, &source, &compiled);
                summary.compiled += 1;
                compiled
            }
        };

        let out_path = out_dir.join(rel);
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&out_path, compiled.code)?;
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ExpandCache::new(dir.path());
        let compiled = CompiledFile {
            directive: FileDirective::Public,
            code: "const x = 3;".to_string(),
        };
        cache.set("src/a.ts", "const x = t$(1);", &compiled);

        let hit = cache.get("src/a.ts", "const x = t$(1);").unwrap();
        assert_eq!(hit.code, compiled.code);
        assert_eq!(hit.directive, FileDirective::Public);

        // A content change misses.
        assert!(cache.get("src/a.ts", "const x = t$(2);").is_none());
    }

    #[test]
    fn test_source_file_filter() {
        assert!(is_source_file(Path::new("a.ts")));
        assert!(is_source_file(Path::new("a.tsx")));
        assert!(!is_source_file(Path::new("a.css")));
        assert!(!is_source_file(Path::new("a")));
    }
}
