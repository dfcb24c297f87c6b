//! Persisted session state
//!
//! The only thing a session durably records is which logical container
//! name maps to which runtime id and network device. The gateway is
//! reloaded before every operation and rewritten whole on mutation;
//! there is no in-memory cache to trust across calls.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Persisted record for one container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerRecord {
    pub id: String,
    pub device: Option<String>,
}

pub type StateMap = BTreeMap<String, ContainerRecord>;

/// Durable storage for a session's name -> {id, device} mapping
#[cfg_attr(test, mockall::automock)]
pub trait StateGateway {
    /// Whether state for this session has already been initialized
    fn exists(&self) -> bool;
    fn load(&self) -> Result<StateMap>;
    fn persist(&self, containers: &StateMap) -> Result<()>;
    fn delete(&self) -> Result<()>;
}

#[derive(Debug, Serialize, Deserialize)]
struct StateDocument {
    session_id: String,
    containers: StateMap,
}

/// JSON file storage under `<base>/.barricade/<session>.json`
pub struct FileState {
    session_id: String,
    path: PathBuf,
}

impl FileState {
    pub fn new(base: impl AsRef<Path>, session_id: impl Into<String>) -> Self {
        let session_id = session_id.into();
        let path = base
            .as_ref()
            .join(".barricade")
            .join(format!("{session_id}.json"));
        Self { session_id, path }
    }

    /// State rooted in the current working directory
    pub fn in_current_dir(session_id: impl Into<String>) -> Result<Self> {
        Ok(Self::new(std::env::current_dir()?, session_id))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StateGateway for FileState {
    fn exists(&self) -> bool {
        self.path.exists()
    }

    fn load(&self) -> Result<StateMap> {
        let raw = std::fs::read_to_string(&self.path).map_err(|e| {
            Error::State(format!(
                "no session state at {} ({e})",
                self.path.display()
            ))
        })?;
        let document: StateDocument = serde_json::from_str(&raw)?;
        if document.session_id != self.session_id {
            return Err(Error::State(format!(
                "state file {} belongs to session '{}', not '{}'",
                self.path.display(),
                document.session_id,
                self.session_id
            )));
        }
        Ok(document.containers)
    }

    fn persist(&self, containers: &StateMap) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let document = StateDocument {
            session_id: self.session_id.clone(),
            containers: containers.clone(),
        };
        std::fs::write(&self.path, serde_json::to_string_pretty(&document)?)?;
        tracing::debug!(path = %self.path.display(), "persisted session state");
        Ok(())
    }

    fn delete(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
