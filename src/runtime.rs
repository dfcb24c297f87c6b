//! Container runtime collaborator
//!
//! The orchestrator talks to the runtime through the [`ContainerRuntime`]
//! trait and branches on the closed [`RuntimeError`] enum - it never
//! inspects raw responses. [`DockerCli`] is the shipped implementation,
//! driving the `docker` binary.

use std::collections::BTreeMap;
use std::process::{Command, Output};

use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Name collision on creation
    #[error("conflict: {0}")]
    Conflict(String),

    /// The requested entity does not exist
    #[error("not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Other(String),
}

pub type RuntimeResult<T> = std::result::Result<T, RuntimeError>;

/// Everything the runtime needs to create one container
#[derive(Debug, Clone, Default)]
pub struct CreateSpec {
    /// runtime-visible container name
    pub name: String,
    pub image: String,
    pub command: Option<String>,
    pub hostname: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub environment: BTreeMap<String, String>,
    /// host path -> container path
    pub binds: BTreeMap<String, String>,
    /// runtime container name -> alias
    pub links: BTreeMap<String, String>,
    pub expose_ports: Vec<u16>,
    /// external port -> internal port
    pub publish_ports: BTreeMap<u16, u16>,
    pub dns: Vec<String>,
    /// attach to this network instead of the default bridge
    pub network: Option<String>,
}

/// Result of inspecting a container
#[derive(Debug, Clone, Default)]
pub struct Inspection {
    pub running: bool,
    /// IP on the default bridge network
    pub default_ip: Option<String>,
    /// network name -> IP, for user-defined networks
    pub networks: BTreeMap<String, String>,
}

/// One entry from a label-filtered container listing
#[derive(Debug, Clone)]
pub struct RuntimeContainer {
    pub id: String,
    pub names: Vec<String>,
}

#[cfg_attr(test, mockall::automock)]
pub trait ContainerRuntime {
    /// Create a container; does not start it. Returns the runtime id.
    fn create_container(&self, spec: &CreateSpec) -> RuntimeResult<String>;
    fn start_container(&self, id: &str) -> RuntimeResult<()>;
    fn stop_container(&self, id: &str, timeout_secs: u64) -> RuntimeResult<()>;
    fn kill_container(&self, id: &str, signal: &str) -> RuntimeResult<()>;
    fn remove_container(&self, id_or_name: &str, force: bool) -> RuntimeResult<()>;
    fn inspect(&self, id: &str) -> RuntimeResult<Inspection>;
    /// All containers (running or not) carrying the given label
    fn list_containers(&self, label: &str) -> RuntimeResult<Vec<RuntimeContainer>>;
    /// Returns the runtime's warning, if it emitted one
    fn create_network(&self, name: &str) -> RuntimeResult<Option<String>>;
    fn remove_network(&self, name: &str) -> RuntimeResult<()>;
    fn logs(&self, id: &str) -> RuntimeResult<String>;
}

/// [`ContainerRuntime`] backed by the `docker` command line client
pub struct DockerCli {
    binary: String,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new()
    }
}

impl DockerCli {
    pub fn new() -> Self {
        Self {
            binary: "docker".to_string(),
        }
    }

    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn run(&self, args: &[&str]) -> RuntimeResult<Output> {
        tracing::debug!(binary = %self.binary, ?args, "running container runtime command");
        let output = Command::new(&self.binary)
            .args(args)
            .output()
            .map_err(|e| RuntimeError::Other(format!("failed to run {}: {e}", self.binary)))?;
        if output.status.success() {
            Ok(output)
        } else {
            Err(classify_failure(&output))
        }
    }
}

/// Map the tool's stderr onto the closed error enum
fn classify_failure(output: &Output) -> RuntimeError {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    let lowered = stderr.to_lowercase();
    if lowered.contains("no such") || lowered.contains("not found") {
        RuntimeError::NotFound(stderr)
    } else if lowered.contains("conflict") || lowered.contains("already in use") {
        RuntimeError::Conflict(stderr)
    } else {
        RuntimeError::Other(stderr)
    }
}

fn stdout_string(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

impl ContainerRuntime for DockerCli {
    fn create_container(&self, spec: &CreateSpec) -> RuntimeResult<String> {
        let mut args: Vec<String> = vec!["create".into(), "--name".into(), spec.name.clone()];
        for (key, value) in &spec.labels {
            args.push("--label".into());
            args.push(format!("{key}={value}"));
        }
        if let Some(hostname) = &spec.hostname {
            args.push("--hostname".into());
            args.push(hostname.clone());
        }
        for (key, value) in &spec.environment {
            args.push("--env".into());
            args.push(format!("{key}={value}"));
        }
        for (host, container) in &spec.binds {
            args.push("--volume".into());
            args.push(format!("{host}:{container}"));
        }
        for (target, alias) in &spec.links {
            args.push("--link".into());
            args.push(format!("{target}:{alias}"));
        }
        for port in &spec.expose_ports {
            args.push("--expose".into());
            args.push(port.to_string());
        }
        for (external, internal) in &spec.publish_ports {
            args.push("--publish".into());
            args.push(format!("{external}:{internal}"));
        }
        for server in &spec.dns {
            args.push("--dns".into());
            args.push(server.clone());
        }
        if let Some(network) = &spec.network {
            args.push("--network".into());
            args.push(network.clone());
        }
        args.push(spec.image.clone());
        if let Some(command) = &spec.command {
            args.extend(command.split_whitespace().map(String::from));
        }

        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let output = self.run(&arg_refs)?;
        Ok(stdout_string(&output))
    }

    fn start_container(&self, id: &str) -> RuntimeResult<()> {
        self.run(&["start", id]).map(|_| ())
    }

    fn stop_container(&self, id: &str, timeout_secs: u64) -> RuntimeResult<()> {
        self.run(&["stop", "--time", &timeout_secs.to_string(), id])
            .map(|_| ())
    }

    fn kill_container(&self, id: &str, signal: &str) -> RuntimeResult<()> {
        self.run(&["kill", "--signal", signal, id]).map(|_| ())
    }

    fn remove_container(&self, id_or_name: &str, force: bool) -> RuntimeResult<()> {
        if force {
            self.run(&["rm", "--force", id_or_name]).map(|_| ())
        } else {
            self.run(&["rm", id_or_name]).map(|_| ())
        }
    }

    fn inspect(&self, id: &str) -> RuntimeResult<Inspection> {
        let output = self.run(&["inspect", id])?;
        parse_inspection(&stdout_string(&output))
    }

    fn list_containers(&self, label: &str) -> RuntimeResult<Vec<RuntimeContainer>> {
        let filter = format!("label={label}");
        let output = self.run(&[
            "ps",
            "--all",
            "--filter",
            &filter,
            "--format",
            "{{.ID}}\t{{.Names}}",
        ])?;
        Ok(parse_listing(&stdout_string(&output)))
    }

    fn create_network(&self, name: &str) -> RuntimeResult<Option<String>> {
        let output = self.run(&["network", "create", name])?;
        let warning = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if warning.is_empty() {
            Ok(None)
        } else {
            Ok(Some(warning))
        }
    }

    fn remove_network(&self, name: &str) -> RuntimeResult<()> {
        self.run(&["network", "rm", name]).map(|_| ())
    }

    fn logs(&self, id: &str) -> RuntimeResult<String> {
        let output = self.run(&["logs", id])?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[derive(Debug, Deserialize)]
struct InspectEntry {
    #[serde(rename = "State")]
    state: Option<InspectState>,
    #[serde(rename = "NetworkSettings")]
    network_settings: Option<InspectNetworkSettings>,
}

#[derive(Debug, Deserialize)]
struct InspectState {
    #[serde(rename = "Running", default)]
    running: bool,
}

#[derive(Debug, Deserialize)]
struct InspectNetworkSettings {
    #[serde(rename = "IPAddress", default)]
    ip_address: Option<String>,
    #[serde(rename = "Networks", default)]
    networks: BTreeMap<String, InspectNetwork>,
}

#[derive(Debug, Deserialize)]
struct InspectNetwork {
    #[serde(rename = "IPAddress", default)]
    ip_address: Option<String>,
}

fn parse_inspection(raw: &str) -> RuntimeResult<Inspection> {
    let entries: Vec<InspectEntry> = serde_json::from_str(raw)
        .map_err(|e| RuntimeError::Other(format!("unparsable inspect output: {e}")))?;
    let entry = entries
        .into_iter()
        .next()
        .ok_or_else(|| RuntimeError::NotFound("inspect returned no entries".into()))?;

    let mut inspection = Inspection {
        running: entry.state.map(|s| s.running).unwrap_or(false),
        ..Inspection::default()
    };
    if let Some(settings) = entry.network_settings {
        inspection.default_ip = settings.ip_address.filter(|ip| !ip.is_empty());
        for (name, network) in settings.networks {
            if let Some(ip) = network.ip_address.filter(|ip| !ip.is_empty()) {
                inspection.networks.insert(name, ip);
            }
        }
    }
    Ok(inspection)
}

fn parse_listing(raw: &str) -> Vec<RuntimeContainer> {
    raw.lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| {
            let (id, names) = line.split_once('\t')?;
            Some(RuntimeContainer {
                id: id.trim().to_string(),
                names: names
                    .split(',')
                    .map(|n| n.trim().to_string())
                    .filter(|n| !n.is_empty())
                    .collect(),
            })
        })
        .collect()
}
