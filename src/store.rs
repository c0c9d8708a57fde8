//! Persistence and settings collaborator seams
//!
//! The dispatch engine does not own a database. Rules, channels, the
//! service/dependency graph, the audit history table and the tunable
//! thresholds all live in the surrounding dashboard and are consumed here
//! through the narrow traits below. Accessors are synchronous by contract;
//! implementations backed by a connection pool are expected to block
//! briefly or serve from a cache.

use crate::error::StoreError;
use crate::events::{
    AlertKind, ChannelId, DependencyId, ServiceId, SeverityFilter, TeamId, Timestamp,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

/// Team-scoped alert rule; read-only to this subsystem
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlertRule {
    pub id: i64,
    pub team_id: TeamId,
    pub severity_filter: SeverityFilter,
    pub active: bool,
}

/// Team-scoped outbound notification target; read-only to this subsystem
///
/// `config` is an opaque JSON blob owned by the channel-CRUD collaborator;
/// only the sender registered for `channel_type` knows its shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlertChannel {
    pub id: ChannelId,
    pub team_id: TeamId,
    pub channel_type: String,
    pub config: String,
    pub active: bool,
}

/// Outcome of one dispatch attempt as recorded in the audit history
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Sent,
    Failed,
    Suppressed,
}

/// Write-only audit record of one (channel, evaluation) pair
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlertHistoryEntry {
    pub channel_id: ChannelId,
    pub service_id: ServiceId,
    pub dependency_id: Option<DependencyId>,
    pub kind: AlertKind,
    /// Serialized [`crate::events::AlertEvent`] payload
    pub payload: String,
    pub status: DeliveryStatus,
    pub timestamp: Timestamp,
}

/// Lookup into the dashboard's service/dependency graph
#[cfg_attr(test, mockall::automock)]
pub trait ServiceDirectory: Send + Sync {
    /// Team that owns the service, if the service exists
    fn team_for_service(&self, service: ServiceId) -> Result<Option<TeamId>, StoreError>;

    /// Resolve a dependency of a service by its display name
    fn dependency_for_service(
        &self,
        service: ServiceId,
        name: &str,
    ) -> Result<Option<DependencyId>, StoreError>;
}

/// Access to active alert rules
#[cfg_attr(test, mockall::automock)]
pub trait RuleStore: Send + Sync {
    fn active_rules(&self, team: TeamId) -> Result<Vec<AlertRule>, StoreError>;
}

/// Access to active alert channels
#[cfg_attr(test, mockall::automock)]
pub trait ChannelStore: Send + Sync {
    fn active_channels(&self, team: TeamId) -> Result<Vec<AlertChannel>, StoreError>;
}

/// Sink for audit history rows
#[cfg_attr(test, mockall::automock)]
pub trait HistoryStore: Send + Sync {
    fn record(&self, entry: AlertHistoryEntry) -> Result<(), StoreError>;
}

/// Tunable thresholds served by the settings collaborator
///
/// Both values are read on every evaluation so the dashboard can change
/// them live without a restart.
#[cfg_attr(test, mockall::automock)]
pub trait AlertSettings: Send + Sync {
    /// Flap-suppression cooldown in minutes; zero or negative disables it
    fn cooldown_minutes(&self) -> i64;

    /// Per-team cap on dispatched alerts within a sliding hour
    fn max_alerts_per_hour(&self) -> u32;
}

#[derive(Debug, Default)]
struct MemoryStoreInner {
    service_teams: HashMap<ServiceId, TeamId>,
    dependencies: HashMap<(ServiceId, String), DependencyId>,
    rules: Vec<AlertRule>,
    channels: Vec<AlertChannel>,
    history: Vec<AlertHistoryEntry>,
}

/// In-memory reference implementation of the persistence seams
///
/// Backs the test suite and the CLI; embedders with a real database replace
/// it with adapters over their own schema.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryStoreInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a service under a team
    pub fn add_service(&self, service: ServiceId, team: TeamId) {
        self.inner
            .lock()
            .unwrap()
            .service_teams
            .insert(service, team);
    }

    /// Register a named dependency of a service
    pub fn add_dependency(&self, service: ServiceId, dependency: DependencyId, name: &str) {
        self.inner
            .lock()
            .unwrap()
            .dependencies
            .insert((service, name.to_string()), dependency);
    }

    pub fn add_rule(&self, rule: AlertRule) {
        self.inner.lock().unwrap().rules.push(rule);
    }

    pub fn add_channel(&self, channel: AlertChannel) {
        self.inner.lock().unwrap().channels.push(channel);
    }

    /// Snapshot of all recorded history entries, oldest first
    pub fn history(&self) -> Vec<AlertHistoryEntry> {
        self.inner.lock().unwrap().history.clone()
    }
}

impl ServiceDirectory for MemoryStore {
    fn team_for_service(&self, service: ServiceId) -> Result<Option<TeamId>, StoreError> {
        Ok(self.inner.lock().unwrap().service_teams.get(&service).copied())
    }

    fn dependency_for_service(
        &self,
        service: ServiceId,
        name: &str,
    ) -> Result<Option<DependencyId>, StoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .dependencies
            .get(&(service, name.to_string()))
            .copied())
    }
}

impl RuleStore for MemoryStore {
    fn active_rules(&self, team: TeamId) -> Result<Vec<AlertRule>, StoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .rules
            .iter()
            .filter(|r| r.team_id == team && r.active)
            .cloned()
            .collect())
    }
}

impl ChannelStore for MemoryStore {
    fn active_channels(&self, team: TeamId) -> Result<Vec<AlertChannel>, StoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .channels
            .iter()
            .filter(|c| c.team_id == team && c.active)
            .cloned()
            .collect())
    }
}

impl HistoryStore for MemoryStore {
    fn record(&self, entry: AlertHistoryEntry) -> Result<(), StoreError> {
        self.inner.lock().unwrap().history.push(entry);
        Ok(())
    }
}
