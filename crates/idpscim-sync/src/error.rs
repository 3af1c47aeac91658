use std::fmt;

use idpscim_adapters::{DirectoryError, ProvisioningError};
use idpscim_core::ModelError;
use idpscim_storage::StateError;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Fetch,
    Diff,
    Apply,
    Persist,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Fetch => "fetch",
            Self::Diff => "diff",
            Self::Apply => "apply",
            Self::Persist => "persist",
        })
    }
}

#[derive(Debug, Error)]
pub enum ReconcileSource {
    #[error(transparent)]
    Directory(#[from] DirectoryError),
    #[error(transparent)]
    Provisioning(#[from] ProvisioningError),
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("{kind} {ipid} has no provisioning id")]
    MissingScimId { kind: &'static str, ipid: String },
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("{phase} failed for {entity}: {source}")]
    Phase {
        phase: Phase,
        entity: String,
        #[source]
        source: ReconcileSource,
    },
    #[error("run cancelled during {phase}")]
    Cancelled { phase: Phase },
}

impl ReconcileError {
    pub fn phase(phase: Phase, entity: impl Into<String>, source: impl Into<ReconcileSource>) -> Self {
        Self::Phase {
            phase,
            entity: entity.into(),
            source: source.into(),
        }
    }

    pub fn failed_phase(&self) -> Phase {
        match self {
            Self::Phase { phase, .. } | Self::Cancelled { phase } => *phase,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}
