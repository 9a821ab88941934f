//! Run/phase status types and the external status-provider contract.
//!
//! The surrounding system (REST API, database) is the authoritative source of
//! phase state; this module only mirrors its wire shape. Timestamps stay
//! strings on this boundary so a malformed value is representable rather than
//! a deserialization failure — the stale handler treats it as "unknown age".

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::BoxError;

/// Lifecycle state of a phase, as reported by the status provider.
///
/// `QUEUED → EXECUTING → {COMPLETE | FAILED | GATE}`, plus the recovery edge
/// `EXECUTING → QUEUED` written exclusively by the stale-phase handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PhaseState {
    Queued,
    Executing,
    Complete,
    Failed,
    Gate,
}

impl PhaseState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseState::Queued => "QUEUED",
            PhaseState::Executing => "EXECUTING",
            PhaseState::Complete => "COMPLETE",
            PhaseState::Failed => "FAILED",
            PhaseState::Gate => "GATE",
        }
    }
}

impl std::fmt::Display for PhaseState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One phase as observed in a status snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseStatus {
    /// Identifier of the phase, unique within a run.
    pub phase_id: String,
    /// Current lifecycle state.
    pub state: PhaseState,
    /// Last-update timestamp as an RFC 3339 string. May be absent or
    /// malformed; consumers decide how to treat that.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl PhaseStatus {
    /// The update timestamp, if present and parseable.
    pub fn parsed_updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
            .as_deref()
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|ts| ts.with_timezone(&Utc))
    }
}

/// A priority-ordered grouping of phases within a run.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TierStatus {
    #[serde(default)]
    pub phases: Vec<PhaseStatus>,
}

/// Point-in-time view of every tier and phase of a run.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RunStatusSnapshot {
    #[serde(default)]
    pub tiers: Vec<TierStatus>,
}

impl RunStatusSnapshot {
    /// Iterate every phase across every tier.
    pub fn phases(&self) -> impl Iterator<Item = &PhaseStatus> {
        self.tiers.iter().flat_map(|tier| tier.phases.iter())
    }

    /// Look up a phase by id.
    pub fn find_phase(&self, phase_id: &str) -> Option<&PhaseStatus> {
        self.phases().find(|p| p.phase_id == phase_id)
    }
}

/// Black-box contract to the authoritative run/phase state. Transport and
/// persistence are the surrounding system's business.
#[async_trait]
pub trait StatusProvider: Send + Sync {
    /// Fetch the current authoritative snapshot.
    async fn get_run_status(&self) -> Result<RunStatusSnapshot, BoxError>;

    /// Transition a phase to a new state. Returns false when the provider
    /// rejected the update.
    async fn update_phase_status(
        &self,
        phase_id: &str,
        new_state: PhaseState,
    ) -> Result<bool, BoxError>;
}
