//! Container read-model: status, network state and the reconciled view

use serde::{Deserialize, Serialize};

/// Observable fault profile of a container's network device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkState {
    Normal,
    Slow,
    Flaky,
    Duplicate,
    Unknown,
}

impl std::fmt::Display for NetworkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NetworkState::Normal => write!(f, "NORMAL"),
            NetworkState::Slow => write!(f, "SLOW"),
            NetworkState::Flaky => write!(f, "FLAKY"),
            NetworkState::Duplicate => write!(f, "DUPLICATE"),
            NetworkState::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Runtime status of a tracked container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerStatus {
    Up,
    Down,
    /// A persisted record exists but the runtime has no matching entity
    Missing,
}

impl std::fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContainerStatus::Up => write!(f, "UP"),
            ContainerStatus::Down => write!(f, "DOWN"),
            ContainerStatus::Missing => write!(f, "MISSING"),
        }
    }
}

/// Reconciled view of one container: persisted identity merged with a
/// live runtime inspection. Recomputed on every query, never persisted.
///
/// `device` and `network_state` are only populated while the container
/// is [`ContainerStatus::Up`].
#[derive(Debug, Clone)]
pub struct ContainerView {
    pub name: String,
    pub container_id: String,
    pub status: ContainerStatus,
    pub ip_address: Option<String>,
    pub device: Option<String>,
    pub network_state: NetworkState,
    pub partition: Option<usize>,
    pub holy: bool,
    pub neutral: bool,
}

impl ContainerView {
    pub fn new(
        name: impl Into<String>,
        container_id: impl Into<String>,
        status: ContainerStatus,
    ) -> Self {
        Self {
            name: name.into(),
            container_id: container_id.into(),
            status,
            ip_address: None,
            device: None,
            network_state: NetworkState::Unknown,
            partition: None,
            holy: false,
            neutral: false,
        }
    }

    pub fn ip_address(mut self, ip: impl Into<String>) -> Self {
        self.ip_address = Some(ip.into());
        self
    }

    pub fn device(mut self, device: impl Into<String>) -> Self {
        self.device = Some(device.into());
        self
    }

    pub fn network_state(mut self, state: NetworkState) -> Self {
        self.network_state = state;
        self
    }

    pub fn partition(mut self, partition: Option<usize>) -> Self {
        self.partition = partition;
        self
    }

    pub fn holy(mut self, holy: bool) -> Self {
        self.holy = holy;
        self
    }

    pub fn neutral(mut self, neutral: bool) -> Self {
        self.neutral = neutral;
        self
    }

    pub fn is_up(&self) -> bool {
        self.status == ContainerStatus::Up
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_display() {
        assert_eq!(ContainerStatus::Up.to_string(), "UP");
        assert_eq!(ContainerStatus::Missing.to_string(), "MISSING");
    }

    #[test]
    fn test_network_state_display() {
        assert_eq!(NetworkState::Normal.to_string(), "NORMAL");
        assert_eq!(NetworkState::Duplicate.to_string(), "DUPLICATE");
    }

    #[test]
    fn test_view_defaults() {
        let view = ContainerView::new("db", "abc123", ContainerStatus::Down);
        assert_eq!(view.ip_address, None);
        assert_eq!(view.device, None);
        assert_eq!(view.network_state, NetworkState::Unknown);
        assert_eq!(view.partition, None);
        assert!(!view.holy);
        assert!(!view.neutral);
        assert!(!view.is_up());
    }

    #[test]
    fn test_view_builders() {
        let view = ContainerView::new("web", "id1", ContainerStatus::Up)
            .ip_address("172.17.0.2")
            .device("veth0a1b")
            .network_state(NetworkState::Slow)
            .partition(Some(1))
            .holy(false)
            .neutral(true);

        assert!(view.is_up());
        assert_eq!(view.ip_address.as_deref(), Some("172.17.0.2"));
        assert_eq!(view.device.as_deref(), Some("veth0a1b"));
        assert_eq!(view.network_state, NetworkState::Slow);
        assert_eq!(view.partition, Some(1));
        assert!(view.neutral);
    }
}
