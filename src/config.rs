//! Session configuration with builder pattern
//!
//! A session is declared as a set of named containers plus network
//! options. Containers are handed to the orchestrator in link-dependency
//! order: if `web` links to `db`, `db` is created first.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Declaration of one container in the session
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContainerSpec {
    #[serde(default)]
    pub name: String,
    pub image: String,
    #[serde(default)]
    pub command: Option<String>,
    /// host path -> container path
    #[serde(default)]
    pub volumes: BTreeMap<String, String>,
    /// linked container name -> alias
    #[serde(default)]
    pub links: BTreeMap<String, String>,
    #[serde(default)]
    pub expose_ports: Vec<u16>,
    /// external port -> internal port
    #[serde(default)]
    pub publish_ports: BTreeMap<u16, u16>,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    #[serde(default)]
    pub dns: Vec<String>,
    /// blocking delay before this container is created, in seconds
    #[serde(default)]
    pub start_delay: u64,
    /// explicit runtime name override (default: "<session>_<name>")
    #[serde(default)]
    pub container_name: Option<String>,
    /// never eligible for network partitioning
    #[serde(default)]
    pub holy: bool,
    /// always granted its own partition unless covered by leftover
    #[serde(default)]
    pub neutral: bool,
}

impl ContainerSpec {
    pub fn builder(name: impl Into<String>, image: impl Into<String>) -> ContainerSpecBuilder {
        ContainerSpecBuilder {
            spec: ContainerSpec {
                name: name.into(),
                image: image.into(),
                ..ContainerSpec::default()
            },
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::Config("container name cannot be empty".into()));
        }
        if self.image.is_empty() {
            return Err(Error::Config(format!(
                "container '{}' has no image",
                self.name
            )));
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct ContainerSpecBuilder {
    spec: ContainerSpec,
}

impl ContainerSpecBuilder {
    pub fn command(mut self, command: impl Into<String>) -> Self {
        self.spec.command = Some(command.into());
        self
    }

    pub fn volume(mut self, host: impl Into<String>, container: impl Into<String>) -> Self {
        self.spec.volumes.insert(host.into(), container.into());
        self
    }

    pub fn link(mut self, name: impl Into<String>, alias: impl Into<String>) -> Self {
        self.spec.links.insert(name.into(), alias.into());
        self
    }

    pub fn expose_port(mut self, port: u16) -> Self {
        self.spec.expose_ports.push(port);
        self
    }

    pub fn publish_port(mut self, external: u16, internal: u16) -> Self {
        self.spec.publish_ports.insert(external, internal);
        self
    }

    pub fn hostname(mut self, hostname: impl Into<String>) -> Self {
        self.spec.hostname = Some(hostname.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.spec.environment.insert(key.into(), value.into());
        self
    }

    pub fn dns(mut self, server: impl Into<String>) -> Self {
        self.spec.dns.push(server.into());
        self
    }

    pub fn start_delay(mut self, seconds: u64) -> Self {
        self.spec.start_delay = seconds;
        self
    }

    pub fn container_name(mut self, name: impl Into<String>) -> Self {
        self.spec.container_name = Some(name.into());
        self
    }

    pub fn holy(mut self, holy: bool) -> Self {
        self.spec.holy = holy;
        self
    }

    pub fn neutral(mut self, neutral: bool) -> Self {
        self.spec.neutral = neutral;
        self
    }

    pub fn build(self) -> ContainerSpec {
        self.spec
    }
}

/// Network options for a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkOptions {
    /// create a dedicated user-defined network for hostname resolution
    #[serde(default)]
    pub udn: bool,
    #[serde(default = "default_slow")]
    pub slow: String,
    #[serde(default = "default_flaky")]
    pub flaky: String,
    #[serde(default = "default_duplicate")]
    pub duplicate: String,
}

fn default_slow() -> String {
    "75ms 100ms distribution normal".to_string()
}

fn default_flaky() -> String {
    "30%".to_string()
}

fn default_duplicate() -> String {
    "5%".to_string()
}

impl Default for NetworkOptions {
    fn default() -> Self {
        Self {
            udn: false,
            slow: default_slow(),
            flaky: default_flaky(),
            duplicate: default_duplicate(),
        }
    }
}

/// Full declarative configuration of a session
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default)]
    pub containers: BTreeMap<String, ContainerSpec>,
    #[serde(default)]
    pub network: Option<NetworkOptions>,
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_container(mut self, spec: ContainerSpec) -> Self {
        self.containers.insert(spec.name.clone(), spec);
        self
    }

    pub fn with_network(mut self, network: NetworkOptions) -> Self {
        self.network = Some(network);
        self
    }

    /// Load configuration from a JSON file. Container names come from
    /// the map keys.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let mut config: SessionConfig = serde_json::from_str(&raw)?;
        for (name, spec) in config.containers.iter_mut() {
            spec.name = name.clone();
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for spec in self.containers.values() {
            spec.validate()?;
            for link in spec.links.keys() {
                if !self.containers.contains_key(link) {
                    return Err(Error::Config(format!(
                        "container '{}' links to unknown container '{}'",
                        spec.name, link
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn container(&self, name: &str) -> Option<&ContainerSpec> {
        self.containers.get(name)
    }

    pub fn is_udn(&self) -> bool {
        self.network.as_ref().map(|n| n.udn).unwrap_or(false)
    }

    pub fn network_options(&self) -> NetworkOptions {
        self.network.clone().unwrap_or_default()
    }

    /// Containers in link-dependency order: every linked-to container
    /// precedes its dependents. Fails on a dependency cycle.
    pub fn sorted_containers(&self) -> Result<Vec<&ContainerSpec>> {
        let mut sorted = Vec::with_capacity(self.containers.len());
        let mut placed = BTreeSet::new();
        let mut visiting = BTreeSet::new();

        fn visit<'a>(
            name: &str,
            containers: &'a BTreeMap<String, ContainerSpec>,
            placed: &mut BTreeSet<String>,
            visiting: &mut BTreeSet<String>,
            sorted: &mut Vec<&'a ContainerSpec>,
        ) -> Result<()> {
            if placed.contains(name) {
                return Ok(());
            }
            if !visiting.insert(name.to_string()) {
                return Err(Error::Config(format!(
                    "dependency cycle involving container '{name}'"
                )));
            }
            let spec = containers
                .get(name)
                .ok_or_else(|| Error::Config(format!("unknown container '{name}'")))?;
            for link in spec.links.keys() {
                visit(link, containers, placed, visiting, sorted)?;
            }
            visiting.remove(name);
            placed.insert(name.to_string());
            sorted.push(spec);
            Ok(())
        }

        for name in self.containers.keys() {
            visit(
                name,
                &self.containers,
                &mut placed,
                &mut visiting,
                &mut sorted,
            )?;
        }
        Ok(sorted)
    }
}
