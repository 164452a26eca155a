//! Error types for the macro expander and the deploy orchestrator.
//!
//! Every fatal error surfaces at the CLI boundary as a one-line summary plus
//! its causal chain. The expander never recovers from a fatal kind, with one
//! exception: a macro that fails while invoked inline is logged and the call
//! is left in place for a downstream transform.

use thiserror::Error;

/// Failures raised while expanding compile-time macros in a source file.
#[derive(Debug, Error)]
pub enum ExpandError {
    /// The source (or an imported source) could not be parsed.
    #[error("parse error in {file}: {message}")]
    Parse { file: String, message: String },

    /// An identifier in a macro argument resolved to nothing usable.
    #[error("cannot resolve `{name}` to a compile-time value in {file}")]
    Resolution { name: String, file: String },

    /// A macro argument referenced a binding imported from a package
    /// specifier. Package imports only exist at runtime.
    #[error("`{name}` is imported from package \"{specifier}\"; macro arguments must be compile-time-knowable")]
    PackageImport { name: String, specifier: String },

    /// A macro argument referenced a `let`/`var` binding.
    #[error("`{name}` is declared with let/var; macro arguments may only reference const bindings")]
    NonConstBinding { name: String },

    /// The macro dependency graph contains a cycle. The payload lists every
    /// node of the cycle, in order.
    #[error("macro dependency cycle: {}", path.join(" -> "))]
    CycleDetected { path: Vec<String> },

    /// A macro returned something that is not an AST node.
    #[error("macro `{name}` did not return an AST node")]
    MacroReturn { name: String },

    /// Module resolution or sandboxed execution of a macro module failed.
    #[error("failed to load macro module \"{specifier}\": {message}")]
    MacroLoad { specifier: String, message: String },

    /// The macro body threw. Fatal for variable-bound sites; recoverable for
    /// inline calls (the call is left untouched and a diagnostic is printed).
    #[error("macro `{name}` failed: {message}")]
    MacroExecution { name: String, message: String },

    /// A macro call's callee has no definition reachable through the host.
    #[error("no macro definition found for `{name}` (used in {file})")]
    UnresolvedMacro { name: String, file: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures raised while executing a deployment target.
#[derive(Debug, Error)]
pub enum DeployError {
    #[error("invalid deployment manifest: {0}")]
    Manifest(String),

    #[error("unknown deploy target `{0}`")]
    UnknownTarget(String),

    /// An operation failed. Carries the operation name; the underlying cause
    /// is the source. Aborts the remainder of the target's operation list.
    #[error("operation `{name}` failed")]
    Operation {
        name: String,
        #[source]
        source: Box<DeployError>,
    },

    /// The secure-shell or local-shell primitive failed.
    #[error("transport: {0}")]
    Transport(String),

    /// A command executed by a strategy exited non-zero.
    #[error("command exited with status {status}: {command}")]
    CommandFailed { command: String, status: i32 },

    /// A verify-operation's check did not pass.
    #[error("verification `{0}` failed")]
    VerificationFailed(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl DeployError {
    /// Wrap a failure with the name of the operation that raised it.
    pub fn in_operation(self, name: &str) -> DeployError {
        DeployError::Operation {
            name: name.to_string(),
            source: Box::new(self),
        }
    }
}
