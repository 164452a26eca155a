//! The `pod` command line.
//!
//! Five subcommands: `new` scaffolds a project, `dev` compiles the sources,
//! `add` generates boilerplate, `dockerize` emits container files, and
//! `deploy` runs the orchestrator. Every failure exits non-zero with a
//! one-line summary plus its causal chain.

use std::path::Path;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};

use pod_cli::deploy::{self, DeployOptions};
use pod_cli::{dockerize, pipeline, scaffold, NodeHost};

#[derive(Parser)]
#[command(name = "pod")]
#[command(version)]
#[command(about = "Command center for the pod component framework")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum AddKind {
    /// Component
    C,
    /// Feature
    F,
}

#[derive(Subcommand)]
enum Commands {
    /// Scaffold a new project
    New { name: String },
    /// Compile the project sources (the watcher and bundler wrap this)
    Dev,
    /// Generate a component (c) or feature (f)
    Add { kind: AddKind, name: String },
    /// Generate container files for an environment
    Dockerize { env: String },
    /// Run the named deploy target
    Deploy {
        target: String,
        /// Re-run ensure installation scripts even when satisfied
        #[arg(long)]
        force_install: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            report_error(err.as_ref());
            ExitCode::FAILURE
        }
    }
}

fn report_error(err: &(dyn std::error::Error + 'static)) {
    eprintln!("[pod] error: {}", err);
    let mut source = err.source();
    while let Some(cause) = source {
        eprintln!("  caused by: {}", cause);
        source = cause.source();
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::New { name } => {
            let root = scaffold::create_project(&name, Path::new("."))?;
            println!("[pod] created {}", root.display());
            println!("[pod] next: cd {} && npm install && pod dev", name);
        }

        Commands::Dev => {
            let cwd = std::env::current_dir()?;
            let mut host = NodeHost::new(&cwd);
            let summary = pipeline::compile_project(&cwd, &mut host)?;
            println!(
                "[pod] compiled {} files ({} cached) into {}",
                summary.compiled,
                summary.cached,
                summary.out_dir.display()
            );
        }

        Commands::Add { kind, name } => {
            let written = match kind {
                AddKind::C => scaffold::add_component(&name, Path::new("."))?,
                AddKind::F => scaffold::add_feature(&name, Path::new("."))?,
            };
            println!("[pod] generated {}", written.display());
        }

        Commands::Dockerize { env } => {
            for path in dockerize::generate(&env, Path::new("."))? {
                println!("[pod] wrote {}", path.display());
            }
        }

        Commands::Deploy {
            target,
            force_install,
        } => {
            deploy::deploy(&target, &DeployOptions { force_install })?;
            println!("[pod] deploy `{}` complete", target);
        }
    }
    Ok(())
}
