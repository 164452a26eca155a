//! Command-center tooling for the pod component framework.
//!
//! Two subsystems carry the weight here: the compile-time macro expander
//! (graph, host runtime, and the five-phase rewrite in [`expander`]) and the
//! idempotent deployment orchestrator in [`deploy`]. The rest is generation
//! templates and CLI glue.

pub mod analysis;
pub mod ast;
pub mod deploy;
pub mod directive;
pub mod dockerize;
pub mod errors;
pub mod eval;
pub mod expander;
pub mod graph;
pub mod host;
pub mod pipeline;
pub mod scaffold;
pub mod store;

mod expander_tests;

pub use directive::FileDirective;
pub use errors::{DeployError, ExpandError};
pub use expander::expand;
pub use graph::MacroGraph;
pub use host::{MacroContext, MacroHost, MacroRegistry, NodeHost};
pub use pipeline::{compile_file, compile_project, CompiledFile};
