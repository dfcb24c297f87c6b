//! Barricade
//!
//! A Rust library for orchestrating groups of containers and injecting
//! network faults between them - partitions, latency, packet loss and
//! duplication - to test how distributed applications behave when the
//! network misbehaves.
//!
//! # Key Features
//!
//! - **Session lifecycle** - Declare a set of containers once, then
//!   create, inspect and tear them down as a unit
//! - **Network partitions** - Split the session into isolated groups,
//!   with `holy` containers that can never be cut off and `neutral`
//!   containers that stay reachable from everyone
//! - **Traffic shaping** - Per-container slow, flaky and duplicate
//!   profiles driven by `tc netem`
//! - **Deterministic chaos** - Random partitioning takes an injected
//!   seedable RNG, so failure scenarios replay exactly
//!
//! # Example
//!
//! ```no_run
//! use barricade::{ContainerSpec, Orchestrator, SessionConfig};
//! use barricade::net::NetfilterEngine;
//! use barricade::runtime::DockerCli;
//! use barricade::state::FileState;
//!
//! let config = SessionConfig::new()
//!     .add_container(ContainerSpec::builder("db", "postgres:16").build())
//!     .add_container(
//!         ContainerSpec::builder("web", "nginx:1.25")
//!             .link("db", "db")
//!             .build(),
//!     );
//!
//! let orchestrator = Orchestrator::new(
//!     "demo",
//!     config.clone(),
//!     DockerCli::default(),
//!     NetfilterEngine::new(config.network_options()),
//!     FileState::in_current_dir("demo")?,
//! );
//!
//! orchestrator.create(false, false)?;
//! orchestrator.partition(&[vec!["db".to_string()]])?;
//! // ... observe the application under partition ...
//! orchestrator.join()?;
//! orchestrator.destroy()?;
//! # Ok::<(), barricade::Error>(())
//! ```

pub mod config;
pub mod container;
pub mod error;
pub mod net;
pub mod orchestrator;
pub mod partition;
pub mod runtime;
pub mod state;

pub use config::{ContainerSpec, NetworkOptions, SessionConfig};
pub use container::{ContainerStatus, ContainerView, NetworkState};
pub use error::{Error, Result};
pub use orchestrator::Orchestrator;
