//! Reconciliation engine.
//!
//! A pass walks every configured group in order: one walk of the member
//! listing refreshes the cache and yields the identity tags, then the pass
//! diffs, applies each change and posts an audit summary. Failures are contained at the member, group and pass level, in
//! that order.
//!
//! Only one pass runs at a time. A pass that starts while another is in
//! flight returns [`PassOutcome::Skipped`] immediately.

use crate::audit::AuditEmitter;
use crate::diff::compute_changes;
use crate::error::{ReconcileError, ReconcileResult};
use crate::traits::{RoleMutator, RosterSource};
use rolesync_core::{ChangeKind, GroupConfig, GroupConfigProvider, GroupId, PassId, RoleChange};
use rolesync_gateway::{ReadyGate, RosterCache};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Engine cadence configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Seconds between reconciliation ticks.
    #[serde(default = "default_reconcile_interval_secs")]
    pub reconcile_interval_secs: u64,
}

fn default_reconcile_interval_secs() -> u64 {
    5
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reconcile_interval_secs: default_reconcile_interval_secs(),
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub fn with_reconcile_interval(mut self, interval: Duration) -> Self {
        self.reconcile_interval_secs = interval.as_secs().max(1);
        self
    }

    #[must_use]
    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs.max(1))
    }
}

// ── Outcomes ──────────────────────────────────────────────────────────

/// Per-group result of one pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupSummary {
    pub group_id: GroupId,
    pub added: usize,
    pub removed: usize,
    /// Mutations that failed.
    pub errors: usize,
    /// Role holders left alone because their tag was not fetched.
    pub withheld: usize,
    /// Set when the group was not reconciled.
    pub skipped_reason: Option<String>,
}

impl GroupSummary {
    fn new(group_id: GroupId) -> Self {
        Self {
            group_id,
            added: 0,
            removed: 0,
            errors: 0,
            withheld: 0,
            skipped_reason: None,
        }
    }

    fn skipped(group_id: GroupId, reason: impl Into<String>) -> Self {
        Self {
            skipped_reason: Some(reason.into()),
            ..Self::new(group_id)
        }
    }

    #[must_use]
    pub fn is_skipped(&self) -> bool {
        self.skipped_reason.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PassSummary {
    pub pass_id: PassId,
    pub groups: Vec<GroupSummary>,
    pub duration_ms: u64,
    /// The connection went down before every group was visited.
    pub interrupted: bool,
}

impl PassSummary {
    #[must_use]
    pub fn added(&self) -> usize {
        self.groups.iter().map(|g| g.added).sum()
    }

    #[must_use]
    pub fn removed(&self) -> usize {
        self.groups.iter().map(|g| g.removed).sum()
    }

    #[must_use]
    pub fn errors(&self) -> usize {
        self.groups.iter().map(|g| g.errors).sum()
    }

    #[must_use]
    pub fn group(&self, group_id: &GroupId) -> Option<&GroupSummary> {
        self.groups.iter().find(|g| &g.group_id == group_id)
    }
}

/// How a call to [`ReconciliationEngine::run_pass`] ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    /// Another pass was in flight; this tick was dropped.
    Skipped,
    /// The connection was not ready; nothing was read or written.
    NotReady,
    /// The group list could not be loaded.
    Aborted(String),
    Completed(PassSummary),
}

impl PassOutcome {
    #[must_use]
    pub fn summary(&self) -> Option<&PassSummary> {
        match self {
            Self::Completed(summary) => Some(summary),
            _ => None,
        }
    }
}

// ── Engine ────────────────────────────────────────────────────────────

/// Clears the in-flight flag when a pass ends, however it ends.
struct PassGuard<'a>(&'a AtomicBool);

impl<'a> PassGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct ReconciliationEngine {
    provider: Arc<dyn GroupConfigProvider>,
    gate: Arc<dyn ReadyGate>,
    cache: RosterCache,
    roster: Arc<dyn RosterSource>,
    mutator: Arc<dyn RoleMutator>,
    audit: AuditEmitter,
    config: EngineConfig,
    in_flight: AtomicBool,
}

impl std::fmt::Debug for ReconciliationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconciliationEngine")
            .field("config", &self.config)
            .field("in_flight", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl ReconciliationEngine {
    #[must_use]
    pub fn new(
        provider: Arc<dyn GroupConfigProvider>,
        gate: Arc<dyn ReadyGate>,
        cache: RosterCache,
        roster: Arc<dyn RosterSource>,
        mutator: Arc<dyn RoleMutator>,
        audit: AuditEmitter,
        config: EngineConfig,
    ) -> Self {
        Self {
            provider,
            gate,
            cache,
            roster,
            mutator,
            audit,
            config,
            in_flight: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Whether a pass is currently in flight.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Run one reconciliation pass, unless one is already running.
    pub async fn run_pass(&self) -> PassOutcome {
        let Some(_guard) = PassGuard::acquire(&self.in_flight) else {
            debug!("Reconciliation pass already in flight, dropping tick");
            return PassOutcome::Skipped;
        };
        self.run_guarded(PassId::new()).await
    }

    #[instrument(skip_all, fields(pass_id = %pass_id))]
    async fn run_guarded(&self, pass_id: PassId) -> PassOutcome {
        if !self.gate.is_ready() {
            debug!("Connection not ready, skipping pass");
            return PassOutcome::NotReady;
        }

        let started = Instant::now();
        let configs = match self.provider.list_group_configs().await {
            Ok(configs) => configs,
            Err(e) => {
                let e = ReconcileError::from(e);
                warn!(error = %e, "Reconciliation pass aborted");
                return PassOutcome::Aborted(e.to_string());
            }
        };

        let mut groups = Vec::with_capacity(configs.len());
        let mut interrupted = false;

        for config in &configs {
            if !self.gate.is_ready() {
                warn!(
                    remaining = configs.len() - groups.len(),
                    "Connection lost mid-pass, stopping"
                );
                interrupted = true;
                break;
            }

            let summary = match self.reconcile_group(config).await {
                Ok(summary) => summary,
                Err(e) => {
                    warn!(group_id = %config.group_id, error = %e, "Group reconciliation failed");
                    GroupSummary::skipped(config.group_id.clone(), e.to_string())
                }
            };
            groups.push(summary);
        }

        let summary = PassSummary {
            pass_id,
            groups,
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            interrupted,
        };

        info!(
            groups = summary.groups.len(),
            added = summary.added(),
            removed = summary.removed(),
            errors = summary.errors(),
            duration_ms = summary.duration_ms,
            "Reconciliation pass complete"
        );

        PassOutcome::Completed(summary)
    }

    async fn reconcile_group(&self, config: &GroupConfig) -> ReconcileResult<GroupSummary> {
        let group_id = &config.group_id;

        if !self.cache.has_group(group_id).await {
            debug!(group_id = %group_id, "Group not in cache, skipping");
            return Ok(GroupSummary::skipped(group_id.clone(), "group not cached"));
        }
        if !self.cache.has_role(group_id, &config.target_role_id).await {
            debug!(
                group_id = %group_id,
                role_id = %config.target_role_id,
                "Target role not in cache, skipping"
            );
            return Ok(GroupSummary::skipped(group_id.clone(), "target role not cached"));
        }
        if let Some(sink) = &config.audit_sink_id {
            if !self.cache.has_channel(group_id, sink).await {
                debug!(group_id = %group_id, channel_id = %sink, "Audit channel not in cache, skipping");
                return Ok(GroupSummary::skipped(group_id.clone(), "audit channel not cached"));
            }
        }

        let fetch = self.roster.fetch_roster(group_id).await;
        if fetch.members.is_empty() && !fetch.complete() {
            return Err(ReconcileError::RosterUnavailable(group_id.clone()));
        }
        let attributes = fetch.attributes;
        self.cache
            .replace_members(group_id, fetch.members, attributes.complete)
            .await;

        let cached = self.cache.members(group_id).await;
        let diff = compute_changes(&cached, group_id, &config.target_role_id, &attributes);
        if diff.withheld > 0 {
            warn!(
                group_id = %group_id,
                withheld = diff.withheld,
                pages = attributes.pages,
                "Attribute fetch truncated, leaving unfetched role holders alone"
            );
        }

        let mut summary = GroupSummary::new(group_id.clone());
        summary.withheld = diff.withheld;

        let applied = self.apply(config, diff.changes, &mut summary).await;

        if let Some(sink) = &config.audit_sink_id {
            self.audit.emit(sink, &applied).await;
        }

        debug!(
            group_id = %group_id,
            added = summary.added,
            removed = summary.removed,
            errors = summary.errors,
            "Group reconciled"
        );
        Ok(summary)
    }

    /// Apply changes one member at a time, returning those that succeeded.
    async fn apply(
        &self,
        config: &GroupConfig,
        changes: Vec<RoleChange>,
        summary: &mut GroupSummary,
    ) -> Vec<RoleChange> {
        let group_id = &config.group_id;
        let role_id = &config.target_role_id;
        let mut applied = Vec::with_capacity(changes.len());

        for change in changes {
            let result = match change.kind {
                ChangeKind::Add => self.mutator.add_role(group_id, &change.member_id, role_id).await,
                ChangeKind::Remove => {
                    self.mutator
                        .remove_role(group_id, &change.member_id, role_id)
                        .await
                }
            };

            match result {
                Ok(()) => {
                    self.cache
                        .apply_role_change(group_id, &change.member_id, role_id, change.kind)
                        .await;
                    match change.kind {
                        ChangeKind::Add => summary.added += 1,
                        ChangeKind::Remove => summary.removed += 1,
                    }
                    applied.push(change);
                }
                Err(e) => {
                    warn!(
                        group_id = %group_id,
                        member_id = %change.member_id,
                        kind = %change.kind,
                        error = %e,
                        "Role change failed"
                    );
                    summary.errors += 1;
                }
            }
        }

        applied
    }
}
