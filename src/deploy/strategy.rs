//! Connection strategies.
//!
//! Every deploy operation goes through this trait, so the orchestrator never
//! knows whether it is talking to a remote host or the local shell. The ssh
//! strategy delegates transport to the standard ssh client; the local
//! strategy runs `sh -c` with a tracked working directory. `cd <path>` with a
//! single argument is interpreted at the strategy level and no shell runs
//! for it. Temporary scripts are released on every exit path.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use walkdir::WalkDir;

use crate::deploy::manifest::{interpolate, SshConnection};
use crate::errors::DeployError;

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }

    pub fn expect_success(&self, command: &str) -> Result<(), DeployError> {
        if self.success() {
            Ok(())
        } else {
            Err(DeployError::CommandFailed {
                command: command.to_string(),
                status: self.status,
            })
        }
    }

    fn ok() -> CommandOutput {
        CommandOutput {
            status: 0,
            stdout: String::new(),
            stderr: String::new(),
        }
    }
}

pub trait Strategy {
    /// Human-readable destination, for progress output.
    fn label(&self) -> String;

    /// Execute a shell command and collect its output. A single-argument
    /// `cd <path>` only updates the tracked working directory.
    fn run(&mut self, command: &str) -> Result<CommandOutput, DeployError>;

    /// Write `content` to a temporary location, interpolate `${...}` against
    /// `context`, make it executable, run it, and remove it whether it
    /// succeeds, fails, or the caller unwinds.
    fn run_script(
        &mut self,
        name: &str,
        content: &str,
        context: &HashMap<String, String>,
    ) -> Result<CommandOutput, DeployError>;

    /// Write bytes to a path, creating parent directories as needed.
    fn upload_content(&mut self, path: &str, bytes: &[u8]) -> Result<(), DeployError>;

    /// Read and parse a JSON file. Absent on missing file or parse failure.
    fn read_json(&mut self, path: &str) -> Option<serde_json::Value>;

    /// Recursively copy a tree, honoring exclusion patterns. Returns the
    /// number of files written.
    fn sync_directory(
        &mut self,
        source: &Path,
        dest: &str,
        exclude: &[String],
    ) -> Result<usize, DeployError> {
        let mut uploaded = 0;
        for entry in WalkDir::new(source) {
            let entry = entry.map_err(|e| DeployError::Transport(e.to_string()))?;
            if !entry.path().is_file() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(source)
                .unwrap_or(entry.path())
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            if is_excluded(&rel, exclude) {
                continue;
            }
            let bytes = std::fs::read(entry.path())?;
            let dest_path = format!("{}/{}", dest.trim_end_matches('/'), rel);
            self.upload_content(&dest_path, &bytes)?;
            uploaded += 1;
        }
        Ok(uploaded)
    }

    /// Release the session. Called on every exit path of a deploy.
    fn close(&mut self) {}
}

/// Exclusion grammar, three rules only:
/// - a trailing-slash pattern matches any directory of that name at any depth,
/// - a `*.ext` pattern matches by file-name suffix,
/// - anything else matches by exact relative-path equality.
pub fn is_excluded(rel: &str, patterns: &[String]) -> bool {
    let components: Vec<&str> = rel.split('/').collect();
    let file_name = components.last().copied().unwrap_or("");
    for pattern in patterns {
        if let Some(dir_name) = pattern.strip_suffix('/') {
            if components[..components.len().saturating_sub(1)]
                .iter()
                .any(|c| *c == dir_name)
            {
                return true;
            }
        } else if let Some(suffix) = pattern.strip_prefix('*') {
            if file_name.ends_with(suffix) {
                return true;
            }
        } else if rel == pattern {
            return true;
        }
    }
    false
}

/// `["cd", <path>]` and nothing else.
fn parse_cd(command: &str) -> Option<&str> {
    let mut parts = command.split_whitespace();
    if parts.next() != Some("cd") {
        return None;
    }
    let path = parts.next()?;
    if parts.next().is_some() {
        return None;
    }
    Some(path)
}

fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

fn parent_dir(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) => "/",
        Some(idx) => &path[..idx],
        None => ".",
    }
}

fn collect_output(output: std::process::Output) -> CommandOutput {
    CommandOutput {
        status: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// LOCAL
// ═══════════════════════════════════════════════════════════════════════════════

pub struct LocalStrategy {
    cwd: PathBuf,
}

impl LocalStrategy {
    pub fn new() -> Result<Self, DeployError> {
        Ok(LocalStrategy {
            cwd: std::env::current_dir()?,
        })
    }

    pub fn with_cwd(cwd: impl Into<PathBuf>) -> Self {
        LocalStrategy { cwd: cwd.into() }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let candidate = PathBuf::from(path);
        if candidate.is_absolute() {
            candidate
        } else {
            self.cwd.join(candidate)
        }
    }
}

impl Strategy for LocalStrategy {
    fn label(&self) -> String {
        format!("local ({})", self.cwd.display())
    }

    fn run(&mut self, command: &str) -> Result<CommandOutput, DeployError> {
        if let Some(path) = parse_cd(command) {
            self.cwd = self.resolve(path);
            return Ok(CommandOutput::ok());
        }
        let output = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&self.cwd)
            .output()
            .map_err(|e| DeployError::Transport(format!("sh: {}", e)))?;
        Ok(collect_output(output))
    }

    fn run_script(
        &mut self,
        name: &str,
        content: &str,
        context: &HashMap<String, String>,
    ) -> Result<CommandOutput, DeployError> {
        let interpolated = interpolate(content, context)?;
        // NamedTempFile removes itself on drop, which covers success,
        // failure, and unwinding callers alike.
        let mut script = tempfile::Builder::new()
            .prefix(&format!("pod-{}-", name))
            .suffix(".sh")
            .tempfile()
            .map_err(DeployError::Io)?;
        script.write_all(interpolated.as_bytes())?;
        script.flush()?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(script.path(), std::fs::Permissions::from_mode(0o755))?;
        }

        let output = Command::new("sh")
            .arg(script.path())
            .current_dir(&self.cwd)
            .output()
            .map_err(|e| DeployError::Transport(format!("sh: {}", e)))?;
        Ok(collect_output(output))
    }

    fn upload_content(&mut self, path: &str, bytes: &[u8]) -> Result<(), DeployError> {
        let resolved = self.resolve(path);
        if let Some(parent) = resolved.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(resolved, bytes)?;
        Ok(())
    }

    fn read_json(&mut self, path: &str) -> Option<serde_json::Value> {
        let text = std::fs::read_to_string(self.resolve(path)).ok()?;
        serde_json::from_str(&text).ok()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SSH
// ═══════════════════════════════════════════════════════════════════════════════

/// Removes a remote temp file when dropped, independent of the strategy's
/// borrow state, so interruption mid-script still cleans up.
struct RemoteTempGuard {
    connection: SshConnection,
    path: String,
}

impl Drop for RemoteTempGuard {
    fn drop(&mut self) {
        let _ = ssh_base(&self.connection)
            .arg(format!("rm -f {}", shell_quote(&self.path)))
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
    }
}

fn ssh_base(connection: &SshConnection) -> Command {
    let mut command = Command::new("ssh");
    command
        .arg("-i")
        .arg(&connection.key_path)
        .arg("-p")
        .arg(connection.port.to_string())
        .arg("-o")
        .arg("BatchMode=yes")
        .arg("-o")
        .arg("StrictHostKeyChecking=accept-new")
        .arg(format!("{}@{}", connection.user, connection.host));
    command
}

pub struct SshStrategy {
    connection: SshConnection,
    cwd: Option<String>,
}

impl SshStrategy {
    /// Open the session: authenticate once so a bad key or host fails the
    /// deploy before any operation runs. Command execution itself goes
    /// through the standard ssh client per call (session reuse is the ssh
    /// config's business, e.g. ControlMaster).
    pub fn open(connection: SshConnection) -> Result<Self, DeployError> {
        let mut strategy = SshStrategy {
            connection,
            cwd: None,
        };
        let probe = strategy.run("true")?;
        if !probe.success() {
            return Err(DeployError::Transport(format!(
                "cannot reach {}@{}: {}",
                strategy.connection.user,
                strategy.connection.host,
                probe.stderr.trim()
            )));
        }
        Ok(strategy)
    }

    fn remote_command(&self, command: &str) -> String {
        match &self.cwd {
            Some(cwd) => format!("cd {} && {}", shell_quote(cwd), command),
            None => command.to_string(),
        }
    }

    fn exec(&self, remote: &str, stdin_bytes: Option<&[u8]>) -> Result<CommandOutput, DeployError> {
        let mut command = ssh_base(&self.connection);
        command.arg(remote);
        command.stdout(Stdio::piped()).stderr(Stdio::piped());
        match stdin_bytes {
            Some(bytes) => {
                command.stdin(Stdio::piped());
                let mut child = command
                    .spawn()
                    .map_err(|e| DeployError::Transport(format!("ssh: {}", e)))?;
                child
                    .stdin
                    .as_mut()
                    .ok_or_else(|| DeployError::Transport("ssh: no stdin".to_string()))?
                    .write_all(bytes)?;
                let output = child
                    .wait_with_output()
                    .map_err(|e| DeployError::Transport(format!("ssh: {}", e)))?;
                Ok(collect_output(output))
            }
            None => {
                command.stdin(Stdio::null());
                let output = command
                    .output()
                    .map_err(|e| DeployError::Transport(format!("ssh: {}", e)))?;
                Ok(collect_output(output))
            }
        }
    }
}

impl Strategy for SshStrategy {
    fn label(&self) -> String {
        format!("{}@{}", self.connection.user, self.connection.host)
    }

    fn run(&mut self, command: &str) -> Result<CommandOutput, DeployError> {
        if let Some(path) = parse_cd(command) {
            self.cwd = Some(path.to_string());
            return Ok(CommandOutput::ok());
        }
        let remote = self.remote_command(command);
        self.exec(&remote, None)
    }

    fn run_script(
        &mut self,
        name: &str,
        content: &str,
        context: &HashMap<String, String>,
    ) -> Result<CommandOutput, DeployError> {
        let interpolated = interpolate(content, context)?;
        let remote_path = format!("/tmp/pod-{}-{}.sh", name, std::process::id());
        let _guard = RemoteTempGuard {
            connection: self.connection.clone(),
            path: remote_path.clone(),
        };
        self.upload_content(&remote_path, interpolated.as_bytes())?;
        let run = format!(
            "chmod +x {path} && {path}",
            path = shell_quote(&remote_path)
        );
        let remote = self.remote_command(&run);
        self.exec(&remote, None)
    }

    fn upload_content(&mut self, path: &str, bytes: &[u8]) -> Result<(), DeployError> {
        let remote = format!(
            "mkdir -p {} && cat > {}",
            shell_quote(parent_dir(path)),
            shell_quote(path)
        );
        let output = self.exec(&remote, Some(bytes))?;
        output.expect_success(&format!("upload {}", path))
    }

    fn read_json(&mut self, path: &str) -> Option<serde_json::Value> {
        let output = self
            .exec(&format!("cat {}", shell_quote(path)), None)
            .ok()?;
        if !output.success() {
            return None;
        }
        serde_json::from_str(&output.stdout).ok()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
