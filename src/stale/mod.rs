//! Detection and race-safe recovery of stalled phases.
//!
//! A phase stuck in EXECUTING past the staleness threshold indicates a
//! crashed or hung worker. The handler resets such phases to QUEUED using a
//! double-checked protocol: after taking its reset mutex it re-fetches the
//! authoritative status and only resets phases that are *still* EXECUTING, so
//! two concurrent observers can never double-reset the same phase. The
//! handler never raises to its caller — a polling loop must keep running.

mod status;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::audit::{AuditRecord, AuditWriter, StaleResetAudit};
use crate::error::StaleResetError;

pub use status::{PhaseState, PhaseStatus, RunStatusSnapshot, StatusProvider, TierStatus};

/// Phases EXECUTING for longer than this are considered abandoned.
pub const DEFAULT_STALE_THRESHOLD: Duration = Duration::from_secs(10 * 60);

/// Detects phases abandoned mid-execution and resets them to QUEUED.
pub struct StalePhaseHandler {
    provider: Arc<dyn StatusProvider>,
    stale_threshold: Duration,
    /// Serializes the re-fetch/verify/update critical section. Coarse by
    /// design: the section is one status fetch plus one update call.
    reset_mutex: Mutex<()>,
    reset_counts: StdMutex<HashMap<String, u64>>,
    audit: Option<AuditWriter>,
}

impl StalePhaseHandler {
    /// Create a handler with the default ten-minute staleness threshold.
    pub fn new(provider: Arc<dyn StatusProvider>) -> Self {
        Self {
            provider,
            stale_threshold: DEFAULT_STALE_THRESHOLD,
            reset_mutex: Mutex::new(()),
            reset_counts: StdMutex::new(HashMap::new()),
            audit: None,
        }
    }

    /// Sets the staleness threshold.
    pub fn with_stale_threshold(mut self, threshold: Duration) -> Self {
        self.stale_threshold = threshold;
        self
    }

    /// Sets the staleness threshold in whole minutes.
    pub fn with_stale_threshold_minutes(self, minutes: u64) -> Self {
        self.with_stale_threshold(Duration::from_secs(minutes * 60))
    }

    /// Attach an audit writer; every reset attempt leaves a record.
    pub fn with_audit_writer(mut self, audit: AuditWriter) -> Self {
        self.audit = Some(audit);
        self
    }

    /// The configured staleness threshold.
    pub fn stale_threshold(&self) -> Duration {
        self.stale_threshold
    }

    /// Inspect every phase of every tier in the supplied snapshot and reset
    /// the ones that appear abandoned. Returns the number of confirmed
    /// resets. Never returns an error: provider failures are logged and the
    /// affected phases stay candidates for the next cycle.
    pub async fn detect_and_reset_stale_phases(&self, run_data: &RunStatusSnapshot) -> usize {
        let now = Utc::now();
        let mut resets = 0;

        for phase in run_data.phases() {
            if phase.state != PhaseState::Executing {
                continue;
            }

            let is_stale = match phase.parsed_updated_at() {
                Some(ts) => {
                    let elapsed = now.signed_duration_since(ts);
                    elapsed
                        .to_std()
                        .map(|e| e > self.stale_threshold)
                        .unwrap_or(false)
                }
                // Missing or unparseable timestamp: fail safe, prefer a
                // retry over a permanent stall.
                None => true,
            };

            if !is_stale {
                continue;
            }

            debug!(
                phase_id = %phase.phase_id,
                updated_at = ?phase.updated_at,
                "stale candidate detected"
            );
            if self.reset_phase(&phase.phase_id).await {
                resets += 1;
            }
        }

        resets
    }

    /// Fetch the authoritative status and run one detection pass over it.
    /// Convenience for periodic polling loops.
    pub async fn run_detection_cycle(&self) -> usize {
        let snapshot = match self.provider.get_run_status().await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                error!(%err, "status fetch failed, skipping detection cycle");
                return 0;
            }
        };
        self.detect_and_reset_stale_phases(&snapshot).await
    }

    /// Number of confirmed resets for one phase.
    pub fn get_reset_count(&self, phase_id: &str) -> u64 {
        let counts = self.reset_counts.lock().unwrap_or_else(|e| e.into_inner());
        counts.get(phase_id).copied().unwrap_or(0)
    }

    /// All per-phase reset counts, for telemetry consumers.
    pub fn get_all_reset_counts(&self) -> HashMap<String, u64> {
        let counts = self.reset_counts.lock().unwrap_or_else(|e| e.into_inner());
        counts.clone()
    }

    /// Double-checked reset of one phase. Returns true only when this call
    /// performed the reset.
    async fn reset_phase(&self, phase_id: &str) -> bool {
        let _guard = self.reset_mutex.lock().await;

        match self.try_reset(phase_id).await {
            Ok(true) => {
                let count = {
                    let mut counts =
                        self.reset_counts.lock().unwrap_or_else(|e| e.into_inner());
                    let count = counts.entry(phase_id.to_string()).or_insert(0);
                    *count += 1;
                    *count
                };
                info!(phase_id, reset_count = count, "Stale Phase Auto-Reset: EXECUTING -> QUEUED");
                self.audit_attempt(phase_id, "reset", None);
                true
            }
            Ok(false) => {
                // Another actor already handled it. Not an error.
                debug!(phase_id, "phase no longer executing, skipping reset");
                self.audit_attempt(phase_id, "skipped", None);
                false
            }
            Err(err) => {
                error!(phase_id, %err, "Stale Phase Auto-Reset failed");
                self.audit_attempt(phase_id, "failed", Some(err.to_string()));
                false
            }
        }
    }

    /// The critical section proper: re-fetch the authoritative status, verify
    /// the phase is *still* EXECUTING, then flip it to QUEUED. The initial
    /// observation that made the phase a candidate may already be stale.
    async fn try_reset(&self, phase_id: &str) -> Result<bool, StaleResetError> {
        let fresh = self
            .provider
            .get_run_status()
            .await
            .map_err(|e| StaleResetError::Fetch(e.to_string()))?;

        match fresh.find_phase(phase_id) {
            Some(phase) if phase.state == PhaseState::Executing => {}
            _ => return Ok(false),
        }

        match self
            .provider
            .update_phase_status(phase_id, PhaseState::Queued)
            .await
        {
            Ok(true) => Ok(true),
            Ok(false) => Err(StaleResetError::Update {
                phase_id: phase_id.to_string(),
                message: "provider rejected update".to_string(),
            }),
            Err(err) => Err(StaleResetError::Update {
                phase_id: phase_id.to_string(),
                message: err.to_string(),
            }),
        }
    }

    fn audit_attempt(&self, phase_id: &str, outcome: &str, detail: Option<String>) {
        let Some(audit) = &self.audit else {
            return;
        };
        let payload = StaleResetAudit {
            phase_id: phase_id.to_string(),
            outcome: outcome.to_string(),
            detail,
        };
        match serde_json::to_value(&payload) {
            Ok(value) => audit.append(&AuditRecord::new("stale_phase_reset", value)),
            Err(err) => warn!(%err, "failed to serialize stale-reset audit payload"),
        }
    }
}

impl std::fmt::Debug for StalePhaseHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StalePhaseHandler")
            .field("stale_threshold", &self.stale_threshold)
            .field("reset_counts", &self.get_all_reset_counts())
            .finish()
    }
}
