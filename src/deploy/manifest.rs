//! Deployment manifest.
//!
//! `pod.deploy.yml` names the project and its deploy targets. Each target is
//! either local or reached over ssh and carries an ordered operation list of
//! *ensure / action / verify* steps. After deserialization every string field
//! goes through `${key}` interpolation against the merged (manifest ∪ target)
//! context, and local file paths are tilde-expanded and resolved against the
//! working directory. YAML anchors are resolved by the parser.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};

use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;

use crate::errors::DeployError;

pub const MANIFEST_FILE: &str = "pod.deploy.yml";
pub const LOCK_FILE: &str = "pod-lock.json";

// ═══════════════════════════════════════════════════════════════════════════════
// RAW DOCUMENT SHAPE
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Deserialize)]
struct RawManifest {
    name: String,
    version: String,
    targets: BTreeMap<String, RawTarget>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTarget {
    #[serde(rename = "type")]
    kind: Option<String>,
    host: Option<String>,
    user: Option<String>,
    key_path: Option<String>,
    port: Option<u16>,
    deploy_path: Option<String>,
    #[serde(default)]
    operations: Vec<RawOperation>,
    /// Target-local keys available to interpolation.
    #[serde(flatten)]
    extra: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawOperation {
    Ensure(RawEnsure),
    Action(RawAction),
    Verify(RawVerify),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEnsure {
    ensure: String,
    size: Option<String>,
    version: Option<String>,
    path: Option<String>,
    owner: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAction {
    action: String,
    name: String,
    #[serde(default)]
    when: When,
    source: Option<String>,
    dest: Option<String>,
    #[serde(default)]
    exclude: Vec<String>,
    command: Option<String>,
}

fn default_verify_timeout() -> u64 {
    10
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawVerify {
    verify: String,
    name: String,
    url: Option<String>,
    #[serde(default = "default_verify_timeout")]
    timeout_secs: u64,
    command: Option<String>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// TYPED MODEL
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum When {
    #[default]
    Always,
    Once,
    Never,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Ssh,
    Local,
}

#[derive(Debug, Clone)]
pub struct SshConnection {
    pub host: String,
    pub user: String,
    pub key_path: PathBuf,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct Target {
    pub kind: TransportKind,
    pub connection: Option<SshConnection>,
    pub deploy_path: Option<String>,
    pub operations: Vec<Operation>,
}

impl Target {
    /// Where the lock file lives for this target: the deploy path on remote
    /// targets, the working directory locally.
    pub fn lock_path(&self) -> String {
        match (&self.kind, &self.deploy_path) {
            (TransportKind::Ssh, Some(deploy_path)) => {
                format!("{}/{}", deploy_path.trim_end_matches('/'), LOCK_FILE)
            }
            _ => LOCK_FILE.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Operation {
    Ensure(Ensure),
    Action(Action),
    Verify(Verify),
}

impl Operation {
    pub fn name(&self) -> String {
        match self {
            Operation::Ensure(ensure) => ensure.key(),
            Operation::Action(action) => action.name.clone(),
            Operation::Verify(verify) => verify.name().to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Ensure {
    Swap { size: String },
    Docker { version: String },
    Directory { path: String, owner: String },
}

impl Ensure {
    /// Deterministic lock key per ensure kind.
    pub fn key(&self) -> String {
        match self {
            Ensure::Swap { .. } => "swap".to_string(),
            Ensure::Docker { .. } => "docker".to_string(),
            Ensure::Directory { path, .. } => format!("directory_{}", path),
        }
    }

    pub fn version(&self) -> String {
        match self {
            Ensure::Swap { size } => size.clone(),
            Ensure::Docker { version } => version.clone(),
            Ensure::Directory { .. } => "1".to_string(),
        }
    }

    pub fn config(&self) -> serde_json::Value {
        match self {
            Ensure::Swap { size } => serde_json::json!({ "size": size }),
            Ensure::Docker { version } => serde_json::json!({ "version": version }),
            Ensure::Directory { path, owner } => {
                serde_json::json!({ "path": path, "owner": owner })
            }
        }
    }

    /// Context handed to the installation script's `${...}` interpolation.
    pub fn script_context(&self) -> HashMap<String, String> {
        let mut context = HashMap::new();
        match self {
            Ensure::Swap { size } => {
                context.insert("size".to_string(), size.clone());
            }
            Ensure::Docker { version } => {
                context.insert("version".to_string(), version.clone());
            }
            Ensure::Directory { path, owner } => {
                context.insert("path".to_string(), path.clone());
                context.insert("owner".to_string(), owner.clone());
            }
        }
        context
    }

    pub fn script(&self) -> &'static str {
        match self {
            Ensure::Swap { .. } => include_str!("scripts/ensure_swap.sh"),
            Ensure::Docker { .. } => include_str!("scripts/ensure_docker.sh"),
            Ensure::Directory { .. } => include_str!("scripts/ensure_directory.sh"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Action {
    pub name: String,
    pub when: When,
    pub step: ActionStep,
}

impl Action {
    /// Identifier recorded in the lock's `once_actions` list.
    pub fn lock_id(&self) -> String {
        format!("action_{}", self.name)
    }
}

#[derive(Debug, Clone)]
pub enum ActionStep {
    Sync {
        source: PathBuf,
        dest: String,
        exclude: Vec<String>,
    },
    Command {
        command: String,
    },
}

#[derive(Debug, Clone)]
pub enum Verify {
    Http {
        name: String,
        url: String,
        timeout_secs: u64,
    },
    Command {
        name: String,
        command: String,
    },
}

impl Verify {
    pub fn name(&self) -> &str {
        match self {
            Verify::Http { name, .. } => name,
            Verify::Command { name, .. } => name,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Manifest {
    pub name: String,
    pub version: String,
    pub targets: BTreeMap<String, Target>,
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Manifest, DeployError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            DeployError::Manifest(format!("cannot read {}: {}", path.display(), e))
        })?;
        let base = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Manifest::parse(&text, &base)
    }

    /// Parse and validate a manifest document. `base` anchors relative local
    /// paths (normally the working directory).
    pub fn parse(text: &str, base: &Path) -> Result<Manifest, DeployError> {
        let raw: RawManifest = serde_yaml::from_str(text)
            .map_err(|e| DeployError::Manifest(e.to_string()))?;

        let mut targets = BTreeMap::new();
        for (target_name, raw_target) in raw.targets {
            let target = build_target(&raw.name, &raw.version, &target_name, raw_target, base)?;
            targets.insert(target_name, target);
        }

        Ok(Manifest {
            name: raw.name,
            version: raw.version,
            targets,
        })
    }

    pub fn target(&self, name: &str) -> Result<&Target, DeployError> {
        self.targets
            .get(name)
            .ok_or_else(|| DeployError::UnknownTarget(name.to_string()))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// VALIDATION + INTERPOLATION
// ═══════════════════════════════════════════════════════════════════════════════

fn build_target(
    manifest_name: &str,
    manifest_version: &str,
    target_name: &str,
    raw: RawTarget,
    base: &Path,
) -> Result<Target, DeployError> {
    let kind = match raw.kind.as_deref() {
        Some("local") => TransportKind::Local,
        Some("ssh") => TransportKind::Ssh,
        Some(other) => {
            return Err(DeployError::Manifest(format!(
                "target `{}`: unknown type `{}` (expected ssh or local)",
                target_name, other
            )))
        }
        None => {
            if raw.host.is_some() {
                TransportKind::Ssh
            } else {
                TransportKind::Local
            }
        }
    };

    // Merged interpolation context: manifest keys, then target-local keys.
    let mut context: HashMap<String, String> = HashMap::new();
    context.insert("name".to_string(), manifest_name.to_string());
    context.insert("version".to_string(), manifest_version.to_string());
    for (key, value) in &raw.extra {
        if let Some(scalar) = yaml_scalar(value) {
            context.insert(key.clone(), scalar);
        }
    }
    if let Some(host) = &raw.host {
        context.insert("host".to_string(), host.clone());
    }
    if let Some(user) = &raw.user {
        context.insert("user".to_string(), user.clone());
    }
    let deploy_path = raw
        .deploy_path
        .map(|p| interpolate(&p, &context))
        .transpose()?;
    if let Some(deploy_path) = &deploy_path {
        context.insert("deployPath".to_string(), deploy_path.clone());
    }

    let connection = if kind == TransportKind::Ssh {
        let missing = |field: &str| {
            DeployError::Manifest(format!(
                "target `{}` is ssh and must set `{}`",
                target_name, field
            ))
        };
        let host = raw.host.clone().ok_or_else(|| missing("host"))?;
        let user = raw.user.clone().ok_or_else(|| missing("user"))?;
        let key_path = raw.key_path.clone().ok_or_else(|| missing("keyPath"))?;
        if deploy_path.is_none() {
            return Err(missing("deployPath"));
        }
        Some(SshConnection {
            host: interpolate(&host, &context)?,
            user: interpolate(&user, &context)?,
            key_path: resolve_local_path(&interpolate(&key_path, &context)?, base),
            port: raw.port.unwrap_or(22),
        })
    } else {
        None
    };

    let default_owner = raw.user.clone().unwrap_or_else(|| "root".to_string());
    let mut operations = Vec::with_capacity(raw.operations.len());
    let mut action_names: HashSet<String> = HashSet::new();
    for raw_op in raw.operations {
        let operation = build_operation(
            target_name,
            raw_op,
            &context,
            base,
            deploy_path.as_deref(),
            &default_owner,
        )?;
        if let Operation::Action(action) = &operation {
            // Once-action identifiers are keyed by name; a duplicate would
            // collide in the lock file.
            if !action_names.insert(action.name.clone()) {
                return Err(DeployError::Manifest(format!(
                    "target `{}`: duplicate action name `{}`",
                    target_name, action.name
                )));
            }
        }
        operations.push(operation);
    }

    Ok(Target {
        kind,
        connection,
        deploy_path,
        operations,
    })
}

fn build_operation(
    target_name: &str,
    raw: RawOperation,
    context: &HashMap<String, String>,
    base: &Path,
    deploy_path: Option<&str>,
    default_owner: &str,
) -> Result<Operation, DeployError> {
    let bad = |message: String| DeployError::Manifest(format!("target `{}`: {}", target_name, message));

    match raw {
        RawOperation::Ensure(ensure) => {
            let kind = match ensure.ensure.as_str() {
                "swap" => Ensure::Swap {
                    size: interpolate(
                        &ensure.size.ok_or_else(|| bad("ensure swap needs `size`".into()))?,
                        context,
                    )?,
                },
                "docker" => Ensure::Docker {
                    version: interpolate(
                        &ensure
                            .version
                            .ok_or_else(|| bad("ensure docker needs `version`".into()))?,
                        context,
                    )?,
                },
                "directory" => Ensure::Directory {
                    path: interpolate(
                        &ensure
                            .path
                            .ok_or_else(|| bad("ensure directory needs `path`".into()))?,
                        context,
                    )?,
                    owner: interpolate(
                        &ensure.owner.unwrap_or_else(|| default_owner.to_string()),
                        context,
                    )?,
                },
                other => return Err(bad(format!("unknown ensure kind `{}`", other))),
            };
            Ok(Operation::Ensure(kind))
        }

        RawOperation::Action(action) => {
            let name = interpolate(&action.name, context)?;
            let step = match action.action.as_str() {
                "sync" => {
                    let source = action
                        .source
                        .ok_or_else(|| bad(format!("action `{}` needs `source`", name)))?;
                    let dest = match action.dest {
                        Some(dest) => interpolate(&dest, context)?,
                        None => deploy_path
                            .map(String::from)
                            .ok_or_else(|| bad(format!("action `{}` needs `dest`", name)))?,
                    };
                    ActionStep::Sync {
                        source: resolve_local_path(&interpolate(&source, context)?, base),
                        dest,
                        exclude: action
                            .exclude
                            .iter()
                            .map(|p| interpolate(p, context))
                            .collect::<Result<_, _>>()?,
                    }
                }
                "command" => ActionStep::Command {
                    command: interpolate(
                        &action
                            .command
                            .ok_or_else(|| bad(format!("action `{}` needs `command`", name)))?,
                        context,
                    )?,
                },
                other => return Err(bad(format!("unknown action kind `{}`", other))),
            };
            Ok(Operation::Action(Action {
                name,
                when: action.when,
                step,
            }))
        }

        RawOperation::Verify(verify) => {
            let name = interpolate(&verify.name, context)?;
            let kind = match verify.verify.as_str() {
                "http" => Verify::Http {
                    url: interpolate(
                        &verify
                            .url
                            .ok_or_else(|| bad(format!("verify `{}` needs `url`", name)))?,
                        context,
                    )?,
                    timeout_secs: verify.timeout_secs,
                    name,
                },
                "command" => Verify::Command {
                    command: interpolate(
                        &verify
                            .command
                            .ok_or_else(|| bad(format!("verify `{}` needs `command`", name)))?,
                        context,
                    )?,
                    name,
                },
                other => return Err(bad(format!("unknown verify kind `{}`", other))),
            };
            Ok(Operation::Verify(kind))
        }
    }
}

fn yaml_scalar(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

lazy_static! {
    static ref INTERP_RE: Regex = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap();
}

/// Replace every `${key}` token by its context value. Single pass,
/// non-recursive: a substituted value is never re-scanned.
pub fn interpolate(input: &str, context: &HashMap<String, String>) -> Result<String, DeployError> {
    let mut out = String::with_capacity(input.len());
    let mut last_end = 0;
    for caps in INTERP_RE.captures_iter(input) {
        let whole = caps.get(0).unwrap();
        let key = caps.get(1).unwrap().as_str();
        let value = context.get(key).ok_or_else(|| {
            DeployError::Manifest(format!("unknown interpolation key `{}`", key))
        })?;
        out.push_str(&input[last_end..whole.start()]);
        out.push_str(value);
        last_end = whole.end();
    }
    out.push_str(&input[last_end..]);
    Ok(out)
}

/// Tilde-expand against the home directory, then resolve against `base`
/// when not absolute.
pub fn resolve_local_path(raw: &str, base: &Path) -> PathBuf {
    let expanded = if raw == "~" {
        dirs::home_dir().unwrap_or_else(|| PathBuf::from("~"))
    } else if let Some(rest) = raw.strip_prefix("~/") {
        dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(raw))
    } else {
        PathBuf::from(raw)
    };
    if expanded.is_absolute() {
        expanded
    } else {
        base.join(expanded)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
name: shop
version: 1.0.0
targets:
  prod:
    host: 203.0.113.10
    user: deploy
    keyPath: /tmp/ci-key
    deployPath: /srv/${name}
    operations:
      - ensure: swap
        size: 2G
      - ensure: directory
        path: ${deployPath}/shared
      - action: sync
        name: upload
        source: ./dist
        exclude:
          - "node_modules/"
          - "*.map"
      - action: command
        name: restart
        when: once
        command: docker compose -p ${name} up -d
      - verify: http
        name: health
        url: http://203.0.113.10/health
        timeoutSecs: 5
  workstation:
    type: local
    operations:
      - action: command
        name: build
        command: echo build ${version}
"#;

    fn parse() -> Manifest {
        Manifest::parse(SAMPLE, Path::new("/work")).unwrap()
    }

    #[test]
    fn test_parses_targets_and_infers_transport() {
        let manifest = parse();
        let prod = manifest.target("prod").unwrap();
        assert_eq!(prod.kind, TransportKind::Ssh);
        let connection = prod.connection.as_ref().unwrap();
        assert_eq!(connection.port, 22);
        assert_eq!(connection.user, "deploy");

        let local = manifest.target("workstation").unwrap();
        assert_eq!(local.kind, TransportKind::Local);
        assert!(local.connection.is_none());
    }

    #[test]
    fn test_interpolation_is_applied() {
        let manifest = parse();
        let prod = manifest.target("prod").unwrap();
        assert_eq!(prod.deploy_path.as_deref(), Some("/srv/shop"));
        match &prod.operations[1] {
            Operation::Ensure(Ensure::Directory { path, owner }) => {
                assert_eq!(path, "/srv/shop/shared");
                assert_eq!(owner, "deploy");
            }
            other => panic!("expected directory ensure, got {:?}", other),
        }
        match &prod.operations[3] {
            Operation::Action(action) => match &action.step {
                ActionStep::Command { command } => {
                    assert_eq!(command, "docker compose -p shop up -d")
                }
                other => panic!("expected command, got {:?}", other),
            },
            other => panic!("expected action, got {:?}", other),
        }
    }

    #[test]
    fn test_sync_defaults_dest_to_deploy_path() {
        let manifest = parse();
        let prod = manifest.target("prod").unwrap();
        match &prod.operations[2] {
            Operation::Action(action) => match &action.step {
                ActionStep::Sync { source, dest, exclude } => {
                    assert_eq!(source, &PathBuf::from("/work/dist"));
                    assert_eq!(dest, "/srv/shop");
                    assert_eq!(exclude.len(), 2);
                }
                other => panic!("expected sync, got {:?}", other),
            },
            other => panic!("expected action, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_interpolation_key_is_rejected() {
        let text = SAMPLE.replace("${version}", "${missing}");
        match Manifest::parse(&text, Path::new("/work")) {
            Err(DeployError::Manifest(message)) => assert!(message.contains("missing")),
            other => panic!("expected manifest error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_duplicate_action_names_are_rejected() {
        let text = SAMPLE.replace("name: restart", "name: upload");
        match Manifest::parse(&text, Path::new("/work")) {
            Err(DeployError::Manifest(message)) => assert!(message.contains("duplicate")),
            other => panic!("expected manifest error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_ssh_target_requires_connection_fields() {
        let text = SAMPLE.replace("    keyPath: /tmp/ci-key\n", "");
        match Manifest::parse(&text, Path::new("/work")) {
            Err(DeployError::Manifest(message)) => assert!(message.contains("keyPath")),
            other => panic!("expected manifest error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_ensure_lock_identity() {
        let swap = Ensure::Swap { size: "2G".to_string() };
        assert_eq!(swap.key(), "swap");
        assert_eq!(swap.version(), "2G");
        let dir = Ensure::Directory {
            path: "/srv/app".to_string(),
            owner: "deploy".to_string(),
        };
        assert_eq!(dir.key(), "directory_/srv/app");
    }

    #[test]
    fn test_action_lock_id_format() {
        let action = Action {
            name: "migrate".to_string(),
            when: When::Once,
            step: ActionStep::Command { command: "x".to_string() },
        };
        assert_eq!(action.lock_id(), "action_migrate");
    }

    #[test]
    fn test_tilde_and_relative_resolution() {
        let resolved = resolve_local_path("dist", Path::new("/work"));
        assert_eq!(resolved, PathBuf::from("/work/dist"));
        let absolute = resolve_local_path("/etc/key", Path::new("/work"));
        assert_eq!(absolute, PathBuf::from("/etc/key"));
    }
}
