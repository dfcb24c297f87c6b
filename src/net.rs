//! Network-fault engine
//!
//! Impairment profiles are applied per network device with `tc` netem;
//! partitions are enforced with per-session iptables chains. The
//! orchestrator consumes the [`NetworkEngine`] trait; [`NetfilterEngine`]
//! is the shipped Linux implementation.

use std::collections::BTreeMap;
use std::process::{Command, Output};

use thiserror::Error;

use crate::config::NetworkOptions;
use crate::container::NetworkState;

#[derive(Error, Debug)]
pub enum NetError {
    /// The OS denied a privileged network operation
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("{0}")]
    Command(String),
}

pub type NetResult<T> = std::result::Result<T, NetError>;

/// Identity of one container as the network engine sees it
#[derive(Debug, Clone)]
pub struct NetTarget {
    pub name: String,
    pub ip: Option<String>,
    pub device: Option<String>,
}

#[cfg_attr(test, mockall::automock)]
pub trait NetworkEngine {
    /// Find the host-side network device of a running container
    fn discover_device(&self, container_id: &str) -> NetResult<String>;
    /// Current fault profile on a device; Unknown when undeterminable
    fn network_state(&self, device: &str) -> NetworkState;
    fn flaky(&self, device: &str) -> NetResult<()>;
    fn slow(&self, device: &str) -> NetResult<()>;
    fn duplicate(&self, device: &str) -> NetResult<()>;
    /// Reset the device back to an unimpaired profile
    fn fast(&self, device: &str) -> NetResult<()>;
    /// Isolate the given groups from each other (full connectivity
    /// within each group is preserved)
    fn partition_containers(
        &self,
        session_id: &str,
        partitions: &[Vec<NetTarget>],
    ) -> NetResult<()>;
    /// Restore full connectivity for a session
    fn restore(&self, session_id: &str) -> NetResult<()>;
    /// IP address -> partition index, for display only
    fn ip_partition_map(&self, session_id: &str) -> NetResult<BTreeMap<String, usize>>;
}

/// Linux implementation over `tc`, `iptables` and sysfs
pub struct NetfilterEngine {
    options: NetworkOptions,
    docker_binary: String,
}

impl NetfilterEngine {
    pub fn new(options: NetworkOptions) -> Self {
        Self {
            options,
            docker_binary: "docker".to_string(),
        }
    }

    fn run(&self, program: &str, args: &[&str]) -> NetResult<Output> {
        tracing::debug!(%program, ?args, "running network command");
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|e| NetError::Command(format!("failed to run {program}: {e}")))?;
        if output.status.success() {
            Ok(output)
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            if stderr.to_lowercase().contains("permission denied")
                || stderr.to_lowercase().contains("operation not permitted")
            {
                Err(NetError::PermissionDenied(stderr))
            } else {
                Err(NetError::Command(format!("{program} failed: {stderr}")))
            }
        }
    }

    fn netem(&self, device: &str, profile: &str) -> NetResult<()> {
        let mut args = vec!["qdisc", "replace", "dev", device, "root", "netem"];
        args.extend(profile.split_whitespace());
        self.run("tc", &args).map(|_| ())
    }

    /// Remove every FORWARD jump into this session's chains, then flush
    /// and delete the chains themselves.
    fn clear_chains(&self, session_id: &str) -> NetResult<()> {
        let prefix = chain_prefix(session_id);

        let forward = self.run("iptables", &["-S", "FORWARD"])?;
        let forward_text = String::from_utf8_lossy(&forward.stdout);
        for rule in forward_rules_for_prefix(&forward_text, &prefix) {
            let mut args = vec!["-D", "FORWARD"];
            args.extend(rule.iter().map(String::as_str));
            self.run("iptables", &args)?;
        }

        let listing = self.run("iptables", &["-S"])?;
        let listing_text = String::from_utf8_lossy(&listing.stdout);
        for chain in chains_for_prefix(&listing_text, &prefix) {
            self.run("iptables", &["-F", &chain])?;
            self.run("iptables", &["-X", &chain])?;
        }
        Ok(())
    }
}

/// Per-session chain name prefix. iptables limits chain names to 28
/// characters, so long session ids are truncated.
fn chain_prefix(session_id: &str) -> String {
    let short: String = session_id.chars().take(14).collect();
    format!("barricade-{short}")
}

fn chain_name(session_id: &str, partition_index: usize) -> String {
    format!("{}-p{partition_index}", chain_prefix(session_id))
}

/// Chain names declared (`-N <chain>`) with the given prefix
fn chains_for_prefix(iptables_listing: &str, prefix: &str) -> Vec<String> {
    iptables_listing
        .lines()
        .filter_map(|line| line.strip_prefix("-N "))
        .map(str::trim)
        .filter(|chain| chain.starts_with(prefix))
        .map(String::from)
        .collect()
}

/// FORWARD rule bodies (without the leading `-A FORWARD`) that jump to
/// a chain with the given prefix, ready to be replayed as deletions
fn forward_rules_for_prefix(forward_listing: &str, prefix: &str) -> Vec<Vec<String>> {
    forward_listing
        .lines()
        .filter_map(|line| line.strip_prefix("-A FORWARD "))
        .filter(|rest| {
            rest.split_whitespace()
                .zip(rest.split_whitespace().skip(1))
                .any(|(flag, value)| flag == "-j" && value.starts_with(prefix))
        })
        .map(|rest| rest.split_whitespace().map(String::from).collect())
        .collect()
}

/// `ip -> partition index` recovered from the FORWARD jumps
fn partition_map_from_rules(forward_listing: &str, prefix: &str) -> BTreeMap<String, usize> {
    let mut map = BTreeMap::new();
    for rule in forward_rules_for_prefix(forward_listing, prefix) {
        let mut source = None;
        let mut index = None;
        let mut parts = rule.iter();
        while let Some(flag) = parts.next() {
            match flag.as_str() {
                "-s" => {
                    source = parts
                        .next()
                        .map(|value| value.trim_end_matches("/32").to_string());
                }
                "-j" => {
                    index = parts
                        .next()
                        .and_then(|chain| chain.rsplit_once("-p"))
                        .and_then(|(_, n)| n.parse::<usize>().ok());
                }
                _ => {}
            }
        }
        if let (Some(ip), Some(idx)) = (source, index) {
            map.insert(ip, idx);
        }
    }
    map
}

/// Read the fault profile back out of `tc qdisc show` output
fn parse_qdisc_state(qdisc_listing: &str) -> NetworkState {
    let netem_line = match qdisc_listing.lines().find(|l| l.contains("netem")) {
        Some(line) => line,
        None => return NetworkState::Normal,
    };
    if netem_line.contains(" loss") {
        NetworkState::Flaky
    } else if netem_line.contains(" delay") {
        NetworkState::Slow
    } else if netem_line.contains(" duplicate") {
        NetworkState::Duplicate
    } else {
        NetworkState::Normal
    }
}

impl NetworkEngine for NetfilterEngine {
    fn discover_device(&self, container_id: &str) -> NetResult<String> {
        // the container's eth0 iflink is the ifindex of the host-side
        // veth peer
        let output = self.run(
            &self.docker_binary,
            &[
                "exec",
                container_id,
                "cat",
                "/sys/class/net/eth0/iflink",
            ],
        )?;
        let iflink = String::from_utf8_lossy(&output.stdout).trim().to_string();

        let entries = std::fs::read_dir("/sys/class/net").map_err(|e| {
            if e.kind() == std::io::ErrorKind::PermissionDenied {
                NetError::PermissionDenied(format!("reading /sys/class/net: {e}"))
            } else {
                NetError::Command(format!("reading /sys/class/net: {e}"))
            }
        })?;
        for entry in entries.flatten() {
            let ifindex_path = entry.path().join("ifindex");
            if let Ok(ifindex) = std::fs::read_to_string(&ifindex_path) {
                if ifindex.trim() == iflink {
                    return Ok(entry.file_name().to_string_lossy().into_owned());
                }
            }
        }
        Err(NetError::Command(format!(
            "no host device with ifindex {iflink} for container {container_id}"
        )))
    }

    fn network_state(&self, device: &str) -> NetworkState {
        match self.run("tc", &["qdisc", "show", "dev", device]) {
            Ok(output) => parse_qdisc_state(&String::from_utf8_lossy(&output.stdout)),
            Err(_) => NetworkState::Unknown,
        }
    }

    fn flaky(&self, device: &str) -> NetResult<()> {
        let profile = format!("loss {}", self.options.flaky);
        self.netem(device, &profile)
    }

    fn slow(&self, device: &str) -> NetResult<()> {
        let profile = format!("delay {}", self.options.slow);
        self.netem(device, &profile)
    }

    fn duplicate(&self, device: &str) -> NetResult<()> {
        let profile = format!("duplicate {}", self.options.duplicate);
        self.netem(device, &profile)
    }

    fn fast(&self, device: &str) -> NetResult<()> {
        match self.run("tc", &["qdisc", "del", "dev", device, "root"]) {
            Ok(_) => Ok(()),
            // nothing was impaired in the first place
            Err(NetError::Command(msg)) if msg.contains("No such file or directory") => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn partition_containers(
        &self,
        session_id: &str,
        partitions: &[Vec<NetTarget>],
    ) -> NetResult<()> {
        // start from a clean slate so repeated partitioning replaces,
        // not accumulates
        self.clear_chains(session_id)?;

        let partition_ips: Vec<Vec<&str>> = partitions
            .iter()
            .map(|p| {
                p.iter()
                    .filter_map(|target| target.ip.as_deref())
                    .collect()
            })
            .collect();

        for (index, members) in partition_ips.iter().enumerate() {
            let chain = chain_name(session_id, index + 1);
            self.run("iptables", &["-N", &chain])?;

            for (other_index, others) in partition_ips.iter().enumerate() {
                if other_index == index {
                    continue;
                }
                for &other_ip in others {
                    self.run("iptables", &["-A", &chain, "-d", other_ip, "-j", "DROP"])?;
                }
            }

            for &member_ip in members {
                self.run(
                    "iptables",
                    &["-I", "FORWARD", "-s", member_ip, "-j", &chain],
                )?;
            }
        }

        tracing::info!(session = session_id, partitions = partitions.len(), "network partitioned");
        Ok(())
    }

    fn restore(&self, session_id: &str) -> NetResult<()> {
        self.clear_chains(session_id)?;
        tracing::info!(session = session_id, "network restored");
        Ok(())
    }

    fn ip_partition_map(&self, session_id: &str) -> NetResult<BTreeMap<String, usize>> {
        let forward = self.run("iptables", &["-S", "FORWARD"])?;
        let text = String::from_utf8_lossy(&forward.stdout);
        Ok(partition_map_from_rules(&text, &chain_prefix(session_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_name_stays_within_iptables_limit() {
        let chain = chain_name("a-very-long-session-identifier", 12);
        assert!(chain.len() <= 28, "chain '{chain}' too long");
        assert!(chain.starts_with("barricade-"));
        assert!(chain.ends_with("-p12"));
    }

    #[test]
    fn test_chains_for_prefix() {
        let listing = "\
-N DOCKER
-N barricade-demo-p1
-N barricade-demo-p2
-N barricade-other-p1
";
        let chains = chains_for_prefix(listing, "barricade-demo");
        assert_eq!(
            chains,
            vec!["barricade-demo-p1".to_string(), "barricade-demo-p2".to_string()]
        );
    }

    #[test]
    fn test_forward_rules_for_prefix() {
        let listing = "\
-A FORWARD -j DOCKER
-A FORWARD -s 172.17.0.2/32 -j barricade-demo-p1
-A FORWARD -s 172.17.0.3/32 -j barricade-other-p1
";
        let rules = forward_rules_for_prefix(listing, "barricade-demo");
        assert_eq!(rules.len(), 1);
        assert_eq!(
            rules[0],
            vec!["-s", "172.17.0.2/32", "-j", "barricade-demo-p1"]
        );
    }

    #[test]
    fn test_partition_map_from_rules() {
        let listing = "\
-A FORWARD -s 172.17.0.2/32 -j barricade-demo-p1
-A FORWARD -s 172.17.0.3/32 -j barricade-demo-p2
-A FORWARD -s 172.17.0.4/32 -j barricade-demo-p2
";
        let map = partition_map_from_rules(listing, "barricade-demo");
        assert_eq!(map.get("172.17.0.2"), Some(&1));
        assert_eq!(map.get("172.17.0.3"), Some(&2));
        assert_eq!(map.get("172.17.0.4"), Some(&2));
    }

    #[test]
    fn test_parse_qdisc_states() {
        assert_eq!(
            parse_qdisc_state("qdisc noqueue 0: dev veth0 root refcnt 2"),
            NetworkState::Normal
        );
        assert_eq!(
            parse_qdisc_state("qdisc netem 8001: root refcnt 2 limit 1000 loss 30%"),
            NetworkState::Flaky
        );
        assert_eq!(
            parse_qdisc_state("qdisc netem 8001: root refcnt 2 limit 1000 delay 75ms 100ms"),
            NetworkState::Slow
        );
        assert_eq!(
            parse_qdisc_state("qdisc netem 8001: root refcnt 2 limit 1000 duplicate 5%"),
            NetworkState::Duplicate
        );
        assert_eq!(parse_qdisc_state(""), NetworkState::Normal);
    }
}
