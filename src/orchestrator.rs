//! Session orchestrator
//!
//! Composes the container runtime, the network-fault engine and the
//! state gateway into the session lifecycle: create/destroy, status
//! reconciliation, start/stop/restart/kill, fault profiles and
//! partitioning. Every operation reloads persisted state before use;
//! nothing is cached across calls. All collaborator calls are blocking
//! and issued one at a time, in order; a failure aborts the remaining
//! iterations. Concurrent invocations against the same session must be
//! serialized by the caller.

use std::collections::BTreeMap;
use std::thread;
use std::time::Duration;

use rand::Rng;

use crate::config::{ContainerSpec, SessionConfig};
use crate::container::{ContainerStatus, ContainerView};
use crate::error::{Error, Result};
use crate::net::{NetError, NetTarget, NetworkEngine};
use crate::partition;
use crate::runtime::{ContainerRuntime, CreateSpec, RuntimeError};
use crate::state::{ContainerRecord, StateGateway, StateMap};

/// Grace period, in seconds, between a polite stop and a forced kill
pub const DEFAULT_KILL_TIMEOUT: u64 = 3;

/// Signal sent by `kill` when none is given
pub const DEFAULT_KILL_SIGNAL: &str = "SIGKILL";

/// Label attached to every container of a session
pub const SESSION_LABEL: &str = "barricade.id";

/// Runtime-visible name of a session container
pub fn runtime_container_name(session_id: &str, name: &str) -> String {
    format!("{session_id}_{name}")
}

pub struct Orchestrator<R, N, S> {
    session_id: String,
    config: SessionConfig,
    runtime: R,
    net: N,
    state: S,
}

impl<R, N, S> Orchestrator<R, N, S>
where
    R: ContainerRuntime,
    N: NetworkEngine,
    S: StateGateway,
{
    pub fn new(
        session_id: impl Into<String>,
        config: SessionConfig,
        runtime: R,
        net: N,
        state: S,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            config,
            runtime,
            net,
            state,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    fn session_label(&self) -> String {
        format!("{SESSION_LABEL}={}", self.session_id)
    }

    fn network_name(&self) -> String {
        format!("{}_net", self.session_id)
    }

    /// Create and start every declared container, in dependency order,
    /// then persist the full name -> {id, device} map in one write.
    ///
    /// A failure mid-loop leaves already-created containers untracked;
    /// there is no automatic rollback. A subsequent `force` create can
    /// replace them.
    pub fn create(&self, verbose: bool, force: bool) -> Result<Vec<ContainerView>> {
        if self.state.exists() {
            return Err(Error::AlreadyExists(self.session_id.clone()));
        }

        if self.config.is_udn() {
            // dedicated network so the runtime's DNS resolves container
            // hostnames within the session
            if let Some(warning) = self.runtime.create_network(&self.network_name())? {
                return Err(Error::Creation(format!(
                    "error while creating network: '{warning}'"
                )));
            }
        }

        let sorted = self.config.sorted_containers()?;
        let total = sorted.len();
        let mut records = StateMap::new();

        for (index, &spec) in sorted.iter().enumerate() {
            if verbose {
                println!("[{}/{}] starting '{}'", index + 1, total, spec.name);
            }
            tracing::info!(container = %spec.name, "creating container");

            if spec.start_delay > 0 {
                tracing::debug!(
                    container = %spec.name,
                    seconds = spec.start_delay,
                    "honoring startup delay"
                );
                thread::sleep(Duration::from_secs(spec.start_delay));
            }

            let id = self.create_and_start(spec, force)?;
            let device = self.init_device(&id, &spec.name)?;
            records.insert(
                spec.name.clone(),
                ContainerRecord {
                    id,
                    device: Some(device),
                },
            );
        }

        self.state.persist(&records)?;

        let mut views = Vec::with_capacity(total);
        for spec in sorted {
            views.push(self.container_view(&spec.name, &records, None)?);
        }
        Ok(views)
    }

    fn create_and_start(&self, spec: &ContainerSpec, force: bool) -> Result<String> {
        let name = spec
            .container_name
            .clone()
            .unwrap_or_else(|| runtime_container_name(&self.session_id, &spec.name));

        let mut create_spec = CreateSpec {
            name: name.clone(),
            image: spec.image.clone(),
            command: spec.command.clone(),
            hostname: spec.hostname.clone(),
            environment: spec.environment.clone(),
            binds: spec.volumes.clone(),
            expose_ports: spec.expose_ports.clone(),
            publish_ports: spec.publish_ports.clone(),
            dns: spec.dns.clone(),
            ..CreateSpec::default()
        };
        create_spec
            .labels
            .insert(SESSION_LABEL.to_string(), self.session_id.clone());
        for (link, alias) in &spec.links {
            create_spec.links.insert(
                runtime_container_name(&self.session_id, link),
                alias.clone(),
            );
        }
        if self.config.is_udn() {
            create_spec.network = Some(self.network_name());
        }

        let id = match self.runtime.create_container(&create_spec) {
            Ok(id) => id,
            Err(RuntimeError::Conflict(_)) => {
                // with force set, replace the stale container and retry
                // exactly once
                if force && self.runtime.remove_container(&name, true).is_ok() {
                    self.runtime.create_container(&create_spec)?
                } else {
                    return Err(Error::ContainerConflict(name));
                }
            }
            Err(e) => return Err(e.into()),
        };

        self.runtime.start_container(&id)?;
        Ok(id)
    }

    fn init_device(&self, container_id: &str, name: &str) -> Result<String> {
        match self.net.discover_device(container_id) {
            Ok(device) => Ok(device),
            Err(NetError::PermissionDenied(_)) => Err(Error::InsufficientPermissions(format!(
                "failed to determine network device of container '{name}' [{container_id}]"
            ))),
            Err(e) => Err(e.into()),
        }
    }

    /// Build the view of one tracked container from its persisted
    /// record and a live inspection.
    fn container_view(
        &self,
        name: &str,
        records: &StateMap,
        ip_partitions: Option<&BTreeMap<String, usize>>,
    ) -> Result<ContainerView> {
        let record = records
            .get(name)
            .ok_or_else(|| Error::State(format!("container '{name}' is not tracked")))?;

        let inspection = match self.runtime.inspect(&record.id) {
            Ok(inspection) => inspection,
            // removed out-of-band; reconciled as MISSING, not an error
            Err(RuntimeError::NotFound(_)) => {
                return Ok(ContainerView::new(name, &record.id, ContainerStatus::Missing));
            }
            Err(e) => return Err(e.into()),
        };

        let status = if inspection.running {
            ContainerStatus::Up
        } else {
            ContainerStatus::Down
        };

        let ip = if self.config.is_udn() {
            inspection.networks.get(&self.network_name()).cloned()
        } else {
            inspection.default_ip.clone()
        };

        let mut view = ContainerView::new(name, &record.id, status);
        if let Some(ip) = &ip {
            view = view.ip_address(ip.clone());
        }

        if status == ContainerStatus::Up {
            if let Some(device) = &record.device {
                view = view
                    .device(device.clone())
                    .network_state(self.net.network_state(device));
            }
            if let (Some(map), Some(ip)) = (ip_partitions, &ip) {
                view = view.partition(map.get(ip).copied());
            }
        }

        if let Some(spec) = self.config.container(name) {
            view = view.holy(spec.holy).neutral(spec.neutral);
        }
        Ok(view)
    }

    /// Persisted records joined with the live, session-labeled
    /// container listing. Only entities carrying the session label and
    /// a tracked logical name are considered.
    fn tracked_containers(&self) -> Result<(StateMap, BTreeMap<String, String>)> {
        let records = self.state.load()?;
        let listed = self.runtime.list_containers(&self.session_label())?;
        let prefix = format!("{}_", self.session_id);

        let mut by_name = BTreeMap::new();
        for entry in listed {
            for raw in &entry.names {
                let name = raw.strip_prefix('/').unwrap_or(raw);
                let name = name.strip_prefix(&prefix).unwrap_or(name);
                if records.contains_key(name) {
                    by_name.insert(name.to_string(), entry.id.clone());
                    break;
                }
            }
        }
        Ok((records, by_name))
    }

    /// Reconciled view of every tracked container
    pub fn status(&self) -> Result<Vec<ContainerView>> {
        let (records, by_name) = self.tracked_containers()?;
        let ip_partitions = self.net.ip_partition_map(&self.session_id)?;

        let mut views = Vec::with_capacity(by_name.len());
        for name in by_name.keys() {
            views.push(self.container_view(name, &records, Some(&ip_partitions))?);
        }
        Ok(views)
    }

    /// Tear the session down: stop and remove every labeled container,
    /// restore full connectivity, delete persisted state and the
    /// dedicated network (tolerating "already gone").
    pub fn destroy(&self) -> Result<()> {
        let (_, by_name) = self.tracked_containers()?;
        for (name, id) in &by_name {
            tracing::info!(container = %name, "removing container");
            self.runtime.stop_container(id, DEFAULT_KILL_TIMEOUT)?;
            self.runtime.remove_container(id, false)?;
        }

        self.net.restore(&self.session_id)?;
        self.state.delete()?;

        if self.config.is_udn() {
            match self.runtime.remove_network(&self.network_name()) {
                Ok(()) | Err(RuntimeError::NotFound(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Currently-UP containers. With `names` given, every requested
    /// name must resolve; unresolved names are reported as one batch.
    fn running_containers(&self, names: Option<&[String]>) -> Result<Vec<ContainerView>> {
        let running: BTreeMap<String, ContainerView> = self
            .status()?
            .into_iter()
            .filter(ContainerView::is_up)
            .map(|c| (c.name.clone(), c))
            .collect();

        match names {
            None => Ok(running.into_values().collect()),
            Some(names) => {
                let mut found = Vec::with_capacity(names.len());
                let mut missing = Vec::new();
                for name in names {
                    match running.get(name) {
                        Some(container) => found.push(container.clone()),
                        None => missing.push(name.clone()),
                    }
                }
                if !missing.is_empty() {
                    return Err(Error::NotRunning(missing));
                }
                Ok(found)
            }
        }
    }

    fn running_container(&self, name: &str) -> Result<ContainerView> {
        let mut found = self.running_containers(Some(std::slice::from_ref(&name.to_string())))?;
        Ok(found.remove(0))
    }

    fn with_running_devices<F>(&self, names: &[String], apply: F) -> Result<()>
    where
        F: Fn(&N, &str) -> crate::net::NetResult<()>,
    {
        let containers = self.running_containers(Some(names))?;
        for container in containers {
            if let Some(device) = &container.device {
                apply(&self.net, device)?;
            } else {
                tracing::warn!(container = %container.name, "no known device, skipping");
            }
        }
        Ok(())
    }

    pub fn flaky(&self, names: &[String]) -> Result<()> {
        self.with_running_devices(names, |net, device| net.flaky(device))
    }

    pub fn slow(&self, names: &[String]) -> Result<()> {
        self.with_running_devices(names, |net, device| net.slow(device))
    }

    pub fn duplicate(&self, names: &[String]) -> Result<()> {
        self.with_running_devices(names, |net, device| net.duplicate(device))
    }

    pub fn fast(&self, names: &[String]) -> Result<()> {
        self.with_running_devices(names, |net, device| net.fast(device))
    }

    /// Start containers by logical name. A name with no persisted
    /// runtime id is skipped silently. Device discovery is re-run and
    /// the persisted record overwritten, since the runtime may assign
    /// a fresh device across a stop/start cycle.
    pub fn start(&self, names: &[String]) -> Result<()> {
        let mut records = self.state.load()?;
        for name in names {
            let Some(record) = records.get(name).cloned() else {
                continue;
            };
            self.runtime.start_container(&record.id)?;
            let device = self.init_device(&record.id, name)?;
            records.insert(
                name.clone(),
                ContainerRecord {
                    id: record.id,
                    device: Some(device),
                },
            );
            self.state.persist(&records)?;
        }
        Ok(())
    }

    pub fn stop(&self, names: &[String]) -> Result<()> {
        let containers = self.running_containers(Some(names))?;
        for container in containers {
            self.runtime
                .stop_container(&container.container_id, DEFAULT_KILL_TIMEOUT)?;
        }
        Ok(())
    }

    /// Sequential stop-then-start per container, in request order
    pub fn restart(&self, names: &[String]) -> Result<()> {
        let containers = self.running_containers(Some(names))?;
        for container in containers {
            self.runtime
                .stop_container(&container.container_id, DEFAULT_KILL_TIMEOUT)?;
            self.start(std::slice::from_ref(&container.name))?;
        }
        Ok(())
    }

    /// Send a signal. Persisted state is untouched; a killed container
    /// shows DOWN on the next status query.
    pub fn kill(&self, names: &[String], signal: Option<&str>) -> Result<()> {
        let signal = signal.unwrap_or(DEFAULT_KILL_SIGNAL);
        let containers = self.running_containers(Some(names))?;
        for container in containers {
            self.runtime.kill_container(&container.container_id, signal)?;
        }
        Ok(())
    }

    /// Expand and validate the given partitions over the running set,
    /// then enforce cross-partition isolation.
    pub fn partition(&self, partitions: &[Vec<String>]) -> Result<()> {
        let containers = self.running_containers(None)?;
        let by_name: BTreeMap<&str, &ContainerView> =
            containers.iter().map(|c| (c.name.as_str(), c)).collect();

        let expanded = partition::expand_partitions(&containers, partitions)?;

        let mut groups = Vec::with_capacity(expanded.len());
        for part in &expanded {
            let mut group = Vec::with_capacity(part.len());
            for name in part {
                let container = by_name.get(name.as_str()).ok_or_else(|| {
                    Error::State(format!("partitioned container '{name}' is not running"))
                })?;
                group.push(NetTarget {
                    name: container.name.clone(),
                    ip: container.ip_address.clone(),
                    device: container.device.clone(),
                });
            }
            groups.push(group);
        }

        self.net.partition_containers(&self.session_id, &groups)?;
        Ok(())
    }

    /// Partition the running non-holy set at random. Returns the
    /// applied plan; an empty plan means a full rejoin happened (or
    /// there was nothing to partition).
    pub fn random_partition<G: Rng>(&self, rng: &mut G) -> Result<Vec<Vec<String>>> {
        let names: Vec<String> = self
            .running_containers(None)?
            .into_iter()
            .filter(|c| !c.holy)
            .map(|c| c.name)
            .collect();

        if names.is_empty() {
            return Ok(Vec::new());
        }

        let plan = partition::random_partition(names, rng);
        if plan.is_empty() {
            // a single partition is no partitioning at all
            self.join()?;
            return Ok(Vec::new());
        }

        self.partition(&plan)?;
        Ok(plan)
    }

    /// Restore full connectivity - the inverse of `partition`
    pub fn join(&self) -> Result<()> {
        self.state.load()?;
        self.net.restore(&self.session_id)?;
        Ok(())
    }

    /// Verbatim log content of one running container
    pub fn logs(&self, name: &str) -> Result<String> {
        let container = self.running_container(name)?;
        Ok(self.runtime.logs(&container.container_id)?)
    }
}
