//! Macro host runtime.
//!
//! A macro definition is a callable identified by (module specifier, exported
//! name); names carry the trailing `$` sigil. The host loads definitions,
//! caches them per specifier, and invokes them synchronously with evaluated
//! argument values plus a context object. Two hosts exist:
//!
//! - [`NodeHost`] runs macro modules in an isolated Node sidecar. The sidecar
//!   bundles each module into a self-contained CommonJS unit and executes it
//!   inside a `vm` context with a controlled global surface; parent and
//!   sidecar speak newline-delimited JSON.
//! - [`MacroRegistry`] holds in-process definitions, used by tests and
//!   built-ins.
//!
//! The host persists across expander runs within a process; `clear_cache`
//! exists for test harnesses.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc;
use std::time::Duration;

use serde_json::json;

use crate::ast::{AstNode, Value};
use crate::errors::ExpandError;
use crate::graph::MacroGraph;
use crate::store::Store;

/// Context passed to every macro invocation, after its arguments.
pub struct MacroContext<'a> {
    /// File containing the call site.
    pub file: &'a Path,
    /// Binding the result is assigned to, or a synthetic position-based name
    /// for inline calls.
    pub binding: &'a str,
    pub graph: &'a mut MacroGraph,
    pub store: &'static Store,
}

impl<'a> MacroContext<'a> {
    /// Fatal macro error constructor, exposed to macro bodies.
    pub fn error(&self, name: &str, message: impl Into<String>) -> ExpandError {
        ExpandError::MacroExecution {
            name: name.to_string(),
            message: message.into(),
        }
    }
}

pub trait MacroHost {
    /// Load a module and return the names of its macro exports.
    fn load(&mut self, specifier: &str) -> Result<Vec<String>, ExpandError>;

    /// Invoke a macro definition. The return value must be an AST node.
    fn invoke(
        &mut self,
        specifier: &str,
        name: &str,
        args: &[Value],
        ctx: &mut MacroContext<'_>,
    ) -> Result<AstNode, ExpandError>;

    fn clear_cache(&mut self, specifier: Option<&str>);
}

// ═══════════════════════════════════════════════════════════════════════════════
// IN-PROCESS REGISTRY
// ═══════════════════════════════════════════════════════════════════════════════

pub type MacroFn =
    Box<dyn Fn(&[Value], &mut MacroContext<'_>) -> Result<AstNode, ExpandError> + Send + Sync>;

/// In-process macro definitions keyed by (specifier, name).
#[derive(Default)]
pub struct MacroRegistry {
    macros: HashMap<(String, String), MacroFn>,
}

impl MacroRegistry {
    pub fn new() -> Self {
        MacroRegistry::default()
    }

    pub fn register<F>(&mut self, specifier: &str, name: &str, f: F)
    where
        F: Fn(&[Value], &mut MacroContext<'_>) -> Result<AstNode, ExpandError>
            + Send
            + Sync
            + 'static,
    {
        self.macros
            .insert((specifier.to_string(), name.to_string()), Box::new(f));
    }
}

impl MacroHost for MacroRegistry {
    fn load(&mut self, specifier: &str) -> Result<Vec<String>, ExpandError> {
        let names: Vec<String> = self
            .macros
            .keys()
            .filter(|(s, _)| s == specifier)
            .map(|(_, n)| n.clone())
            .collect();
        if names.is_empty() {
            return Err(ExpandError::MacroLoad {
                specifier: specifier.to_string(),
                message: "module has no registered macros".to_string(),
            });
        }
        Ok(names)
    }

    fn invoke(
        &mut self,
        specifier: &str,
        name: &str,
        args: &[Value],
        ctx: &mut MacroContext<'_>,
    ) -> Result<AstNode, ExpandError> {
        let key = (specifier.to_string(), name.to_string());
        match self.macros.get(&key) {
            Some(f) => f(args, ctx),
            None => Err(ExpandError::UnresolvedMacro {
                name: name.to_string(),
                file: ctx.file.display().to_string(),
            }),
        }
    }

    fn clear_cache(&mut self, _specifier: Option<&str>) {
        // Registry definitions are not cached beyond the map itself.
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// NODE SIDECAR HOST
// ═══════════════════════════════════════════════════════════════════════════════

const LOADER_JS: &str = include_str!("host_loader.js");
const DEFAULT_MACRO_TIMEOUT: Duration = Duration::from_secs(10);

struct Sidecar {
    child: Child,
    stdin: ChildStdin,
    lines: mpsc::Receiver<std::io::Result<String>>,
    // Keeps the materialized loader script alive for the sidecar's lifetime.
    _loader: tempfile::TempPath,
}

/// Production macro host: one Node sidecar per process.
pub struct NodeHost {
    project_root: PathBuf,
    timeout: Duration,
    sidecar: Option<Sidecar>,
}

impl NodeHost {
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        NodeHost {
            project_root: project_root.into(),
            timeout: DEFAULT_MACRO_TIMEOUT,
            sidecar: None,
        }
    }

    /// Watchdog budget per macro call. A macro that does not return within
    /// the budget is aborted by killing the sidecar.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn ensure_sidecar(&mut self) -> Result<&mut Sidecar, ExpandError> {
        if self.sidecar.is_none() {
            let mut loader = tempfile::Builder::new()
                .prefix("pod-macro-host-")
                .suffix(".cjs")
                .tempfile()
                .map_err(|e| load_error("<sidecar>", e.to_string()))?;
            loader
                .write_all(LOADER_JS.as_bytes())
                .map_err(|e| load_error("<sidecar>", e.to_string()))?;
            let loader_path = loader.into_temp_path();

            let mut child = Command::new("node")
                .arg(&*loader_path)
                .arg(&self.project_root)
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::inherit())
                .spawn()
                .map_err(|e| load_error("<sidecar>", format!("failed to start node: {}", e)))?;

            let stdin = child
                .stdin
                .take()
                .ok_or_else(|| load_error("<sidecar>", "no stdin handle".to_string()))?;
            let stdout = child
                .stdout
                .take()
                .ok_or_else(|| load_error("<sidecar>", "no stdout handle".to_string()))?;

            let (tx, rx) = mpsc::channel();
            std::thread::spawn(move || {
                let reader = BufReader::new(stdout);
                for line in reader.lines() {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
            });

            self.sidecar = Some(Sidecar {
                child,
                stdin,
                lines: rx,
                _loader: loader_path,
            });
        }
        Ok(self.sidecar.as_mut().unwrap())
    }

    fn kill_sidecar(&mut self) {
        if let Some(mut sidecar) = self.sidecar.take() {
            let _ = sidecar.child.kill();
            let _ = sidecar.child.wait();
        }
    }

    fn request(
        &mut self,
        attribution: &str,
        payload: serde_json::Value,
    ) -> Result<serde_json::Value, ExpandError> {
        let timeout = self.timeout;
        let sidecar = self.ensure_sidecar()?;

        let line = serde_json::to_string(&payload)
            .map_err(|e| load_error(attribution, e.to_string()))?;
        if writeln!(sidecar.stdin, "{}", line)
            .and_then(|_| sidecar.stdin.flush())
            .is_err()
        {
            self.kill_sidecar();
            return Err(load_error(attribution, "sidecar is gone".to_string()));
        }

        match sidecar.lines.recv_timeout(timeout) {
            Ok(Ok(response)) => serde_json::from_str(&response)
                .map_err(|e| load_error(attribution, format!("bad sidecar response: {}", e))),
            Ok(Err(e)) => {
                self.kill_sidecar();
                Err(load_error(attribution, e.to_string()))
            }
            Err(_) => {
                // The macro exceeded the watchdog budget. Abort it.
                self.kill_sidecar();
                Err(ExpandError::MacroExecution {
                    name: attribution.to_string(),
                    message: format!("did not return within {:?}", timeout),
                })
            }
        }
    }
}

impl Drop for NodeHost {
    fn drop(&mut self) {
        self.kill_sidecar();
    }
}

fn load_error(specifier: &str, message: String) -> ExpandError {
    ExpandError::MacroLoad {
        specifier: specifier.to_string(),
        message,
    }
}

/// Map a sidecar `{error: {kind, message}}` payload to the expander's error
/// vocabulary.
fn sidecar_error(response: &serde_json::Value, specifier: &str, name: &str) -> ExpandError {
    let kind = response["error"]["kind"].as_str().unwrap_or("execution");
    let message = response["error"]["message"]
        .as_str()
        .unwrap_or("unknown sidecar failure")
        .to_string();
    match kind {
        "load" => ExpandError::MacroLoad {
            specifier: specifier.to_string(),
            message,
        },
        "return" => ExpandError::MacroReturn {
            name: name.to_string(),
        },
        _ => ExpandError::MacroExecution {
            name: name.to_string(),
            message,
        },
    }
}

impl MacroHost for NodeHost {
    fn load(&mut self, specifier: &str) -> Result<Vec<String>, ExpandError> {
        let response = self.request(specifier, json!({ "op": "load", "specifier": specifier }))?;
        if response.get("error").is_some() {
            return Err(sidecar_error(&response, specifier, specifier));
        }
        let names = response["ok"]["macros"]
            .as_array()
            .map(|macros| {
                macros
                    .iter()
                    .filter_map(|m| m.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();
        Ok(names)
    }

    fn invoke(
        &mut self,
        specifier: &str,
        name: &str,
        args: &[Value],
        ctx: &mut MacroContext<'_>,
    ) -> Result<AstNode, ExpandError> {
        let payload = json!({
            "op": "invoke",
            "specifier": specifier,
            "name": name,
            "args": args,
            "context": {
                "file": ctx.file.display().to_string(),
                "binding": ctx.binding,
                "store": ctx.store.snapshot(),
            },
        });
        let response = self.request(name, payload)?;
        if response.get("error").is_some() {
            return Err(sidecar_error(&response, specifier, name));
        }

        if let Some(appends) = response["ok"]["store"].as_array() {
            let mut merged: Vec<(String, Value)> = Vec::new();
            for entry in appends {
                if let (Some(key), Some(raw)) = (entry[0].as_str(), entry.get(1)) {
                    if let Ok(value) = serde_json::from_value::<Value>(raw.clone()) {
                        merged.push((key.to_string(), value));
                    }
                }
            }
            ctx.store.merge(merged);
        }

        serde_json::from_value::<AstNode>(response["ok"]["node"].clone()).map_err(|_| {
            ExpandError::MacroReturn {
                name: name.to_string(),
            }
        })
    }

    fn clear_cache(&mut self, specifier: Option<&str>) {
        let payload = match specifier {
            Some(s) => json!({ "op": "clear", "specifier": s }),
            None => json!({ "op": "clear" }),
        };
        let _ = self.request("<clear>", payload);
    }
}
