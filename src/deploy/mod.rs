//! Idempotent deployment orchestration.
//!
//! `deploy` reads the target out of `pod.deploy.yml`, opens a connection
//! strategy, and executes the target's operations serially, in declared
//! order, against the persisted lock file. Repeating a deployment converges:
//! satisfied ensures and already-run `once` actions are skipped, and a
//! failure aborts the sequence while preserving the partial lock, so the
//! next run resumes instead of restarting.

pub mod lock;
pub mod manifest;
pub mod strategy;

use std::path::Path;
use std::time::Duration;

use colored::Colorize;

use crate::errors::DeployError;
use lock::{EnsureEntry, LockFile};
use manifest::{
    ActionStep, Action, Ensure, Manifest, Operation, Target, TransportKind, Verify, When,
    MANIFEST_FILE,
};
use strategy::{LocalStrategy, SshStrategy, Strategy};

#[derive(Debug, Default, Clone)]
pub struct DeployOptions {
    /// Re-run every ensure's installation script regardless of lock state.
    pub force_install: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum OpStatus {
    Satisfied,
    Installed,
    Executed,
    Skipped,
    Verified,
}

fn report(status: OpStatus, name: &str) {
    let tag = match status {
        OpStatus::Satisfied => "satisfied".green(),
        OpStatus::Installed => "installed".cyan(),
        OpStatus::Executed => "executed".cyan(),
        OpStatus::Skipped => "skipped".dimmed(),
        OpStatus::Verified => "verified".green(),
    };
    println!("  {} {}", tag, name);
}

/// Execute the named target's operation list from the manifest at CWD.
pub fn deploy(target_name: &str, options: &DeployOptions) -> Result<(), DeployError> {
    let manifest = Manifest::load(Path::new(MANIFEST_FILE))?;
    let target = manifest.target(target_name)?.clone();

    let mut strategy = open_strategy(&target)?;
    println!(
        "[pod] deploying `{}` {} via {}",
        target_name,
        manifest.version,
        strategy.label()
    );

    // The session is released on every exit path; operation failures flow
    // through `result` after close.
    let result = run_operations(&manifest, &target, strategy.as_mut(), options);
    strategy.close();
    result
}

fn open_strategy(target: &Target) -> Result<Box<dyn Strategy>, DeployError> {
    match target.kind {
        TransportKind::Ssh => {
            let connection = target.connection.clone().ok_or_else(|| {
                DeployError::Manifest("ssh target has no connection parameters".to_string())
            })?;
            Ok(Box::new(SshStrategy::open(connection)?))
        }
        TransportKind::Local => Ok(Box::new(LocalStrategy::new()?)),
    }
}

/// The orchestrator body, strategy-injected so tests can drive it with a
/// counting mock.
pub fn run_operations(
    manifest: &Manifest,
    target: &Target,
    strategy: &mut dyn Strategy,
    options: &DeployOptions,
) -> Result<(), DeployError> {
    let lock_path = target.lock_path();
    let mut lock = LockFile::load(strategy, &lock_path);

    // Version handshake: a manifest version change invalidates the
    // once-action set immediately. Ensures are kept; they reconverge on
    // their own version/config comparison.
    if lock.deployment_version != manifest.version {
        lock.once_actions.clear();
        lock.deployment_version = manifest.version.clone();
        lock.save(strategy, &lock_path)?;
    }

    for operation in &target.operations {
        let name = operation.name();
        let result = match operation {
            Operation::Ensure(ensure) => {
                run_ensure(ensure, strategy, &mut lock, &lock_path, options)
            }
            Operation::Action(action) => run_action(action, strategy, &mut lock, &lock_path),
            Operation::Verify(verify) => run_verify(verify, strategy),
        };
        result.map_err(|e| e.in_operation(&name))?;
    }
    Ok(())
}

/// Ensure state machine: Unknown -> Checking -> (Satisfied | Installing ->
/// Installed). Installed writes the lock entry before acknowledging success.
fn run_ensure(
    ensure: &Ensure,
    strategy: &mut dyn Strategy,
    lock: &mut LockFile,
    lock_path: &str,
    options: &DeployOptions,
) -> Result<(), DeployError> {
    let key = ensure.key();

    let satisfied = !options.force_install
        && lock
            .ensures
            .get(&key)
            .map(|entry| entry.version == ensure.version() && entry.config == ensure.config())
            .unwrap_or(false);
    if satisfied {
        report(OpStatus::Satisfied, &key);
        return Ok(());
    }

    let output = strategy.run_script(&key, ensure.script(), &ensure.script_context())?;
    output.expect_success(&key)?;

    lock.ensures.insert(
        key.clone(),
        EnsureEntry {
            version: ensure.version(),
            config: ensure.config(),
        },
    );
    lock.save(strategy, lock_path)?;
    report(OpStatus::Installed, &key);
    Ok(())
}

fn run_action(
    action: &Action,
    strategy: &mut dyn Strategy,
    lock: &mut LockFile,
    lock_path: &str,
) -> Result<(), DeployError> {
    match action.when {
        When::Never => {
            report(OpStatus::Skipped, &action.name);
            return Ok(());
        }
        When::Once if lock.has_once_action(&action.lock_id()) => {
            report(OpStatus::Skipped, &action.name);
            return Ok(());
        }
        _ => {}
    }

    match &action.step {
        ActionStep::Sync {
            source,
            dest,
            exclude,
        } => {
            let uploaded = strategy.sync_directory(source, dest, exclude)?;
            println!("  {} {} ({} files)", "synced".cyan(), action.name, uploaded);
        }
        ActionStep::Command { command } => {
            let output = strategy.run(command)?;
            output.expect_success(command)?;
            report(OpStatus::Executed, &action.name);
        }
    }

    if action.when == When::Once {
        lock.once_actions.push(action.lock_id());
        lock.save(strategy, lock_path)?;
    }
    Ok(())
}

fn run_verify(verify: &Verify, strategy: &mut dyn Strategy) -> Result<(), DeployError> {
    match verify {
        Verify::Http {
            name,
            url,
            timeout_secs,
        } => {
            if !http_check(url, *timeout_secs) {
                return Err(DeployError::VerificationFailed(name.clone()));
            }
            report(OpStatus::Verified, name);
        }
        Verify::Command { name, command } => {
            let output = strategy.run(command)?;
            if !output.success() {
                return Err(DeployError::VerificationFailed(name.clone()));
            }
            report(OpStatus::Verified, name);
        }
    }
    Ok(())
}

fn http_check(url: &str, timeout_secs: u64) -> bool {
    let client = match reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
    {
        Ok(client) => client,
        Err(_) => return false,
    };
    match client.get(url).send() {
        Ok(response) => response.status().is_success(),
        Err(_) => false,
    }
}
