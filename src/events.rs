//! Core event types for the alert dispatch engine
//!
//! This module defines the inbound health-event contract consumed from the
//! polling subsystem, the ephemeral alert event that flows through one
//! dispatch pass, and the severity model used by rule filtering.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Timestamp type for consistent time handling across the engine
pub type Timestamp = DateTime<Utc>;

/// Identifier of a team owning services, rules and channels
pub type TeamId = i64;

/// Identifier of a monitored service
pub type ServiceId = i64;

/// Identifier of a dependency edge of a monitored service
pub type DependencyId = i64;

/// Identifier of a configured alert channel
pub type ChannelId = i64;

/// Raw health event produced by the polling subsystem
///
/// This is the fixed inbound contract: the poller publishes these on its
/// event bus and the dispatcher subscribes. Events are ephemeral and are
/// never persisted in this shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HealthEvent {
    /// A dependency (or the service itself) transitioned between healthy
    /// and unhealthy.
    StatusChange {
        service_id: ServiceId,
        service_name: String,
        /// Display name of the dependency that transitioned, if the
        /// transition was scoped to a single dependency.
        dependency_name: Option<String>,
        previous_healthy: bool,
        current_healthy: bool,
        timestamp: Timestamp,
    },
    /// The poller failed to evaluate the service at all.
    PollError {
        service_id: ServiceId,
        service_name: String,
        error: String,
    },
}

impl HealthEvent {
    /// Service the event refers to
    pub fn service_id(&self) -> ServiceId {
        match self {
            HealthEvent::StatusChange { service_id, .. } => *service_id,
            HealthEvent::PollError { service_id, .. } => *service_id,
        }
    }

    /// Service display name, used in logs and payloads
    pub fn service_name(&self) -> &str {
        match self {
            HealthEvent::StatusChange { service_name, .. } => service_name,
            HealthEvent::PollError { service_name, .. } => service_name,
        }
    }
}

/// Discriminator carried by an alert event and its history rows
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    StatusChange,
    PollError,
}

/// Severity of an alert event
///
/// Recoveries (transition back to healthy) are warnings; transitions to
/// unhealthy and poll errors are critical.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Attention-worthy but not actionable on its own (e.g. a recovery)
    Warning,
    /// Requires immediate attention
    Critical,
}

/// A rule's declared sensitivity threshold
///
/// `Critical` matches only critical events, `Warning` matches critical and
/// warning events, `All` matches everything.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SeverityFilter {
    Critical,
    Warning,
    All,
}

impl SeverityFilter {
    /// Whether an event of the given severity passes this filter
    pub fn matches(&self, severity: Severity) -> bool {
        match self {
            SeverityFilter::Critical => severity == Severity::Critical,
            SeverityFilter::Warning => {
                severity == Severity::Critical || severity == Severity::Warning
            }
            SeverityFilter::All => true,
        }
    }
}

/// Key scoping flap-cooldown tracking
///
/// Alerts for a dependency are throttled per dependency; alerts without a
/// resolved dependency fall back to the owning service so service-level
/// flapping is still suppressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SuppressionKey {
    Dependency(DependencyId),
    Service(ServiceId),
}

/// Alert event flowing through one dispatch pass
///
/// Built by the dispatcher from a [`HealthEvent`] after dependency
/// resolution; lives only for the duration of the pass plus any deferred
/// retry that captured it. The serialized form (with `None` fields omitted)
/// is what lands in the audit history payload and in generic webhook bodies.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlertEvent {
    pub kind: AlertKind,
    pub service_id: ServiceId,
    pub service_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dependency_id: Option<DependencyId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dependency_name: Option<String>,
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_healthy: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_healthy: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: Timestamp,
}

impl AlertEvent {
    /// Build a status-change alert
    ///
    /// Severity is derived from the transition direction: back to healthy
    /// is a warning (recovery), away from healthy is critical.
    pub fn status_change(
        service_id: ServiceId,
        service_name: String,
        dependency_id: Option<DependencyId>,
        dependency_name: Option<String>,
        previous_healthy: bool,
        current_healthy: bool,
        timestamp: Timestamp,
    ) -> Self {
        let severity = if current_healthy {
            Severity::Warning
        } else {
            Severity::Critical
        };

        Self {
            kind: AlertKind::StatusChange,
            service_id,
            service_name,
            dependency_id,
            dependency_name,
            severity,
            previous_healthy: Some(previous_healthy),
            current_healthy: Some(current_healthy),
            error: None,
            timestamp,
        }
    }

    /// Build a poll-error alert; always critical
    pub fn poll_error(
        service_id: ServiceId,
        service_name: String,
        error: String,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            kind: AlertKind::PollError,
            service_id,
            service_name,
            dependency_id: None,
            dependency_name: None,
            severity: Severity::Critical,
            previous_healthy: None,
            current_healthy: None,
            error: Some(error),
            timestamp,
        }
    }

    /// Key used for flap-cooldown tracking: the dependency if one was
    /// resolved, otherwise the service
    pub fn suppression_key(&self) -> SuppressionKey {
        match self.dependency_id {
            Some(id) => SuppressionKey::Dependency(id),
            None => SuppressionKey::Service(self.service_id),
        }
    }

    /// Whether this event reports a recovery back to healthy
    pub fn is_recovery(&self) -> bool {
        self.current_healthy == Some(true)
    }
}
