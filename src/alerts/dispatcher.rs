//! The alert dispatch pipeline
//!
//! The dispatcher subscribes to the health-polling event source and runs
//! every event through a gated pipeline: resolve the owning team, match
//! rule severity filters, apply flap suppression and the per-team rate
//! limit, then fan out to every active channel sender. Each (channel,
//! evaluation) pair that reaches the fan-out stage leaves exactly one
//! audit history row; a transiently failed delivery gets exactly one
//! deferred retry.

use crate::alerts::{FlapSuppressor, RateLimiter};
use crate::events::{AlertEvent, ChannelId, HealthEvent};
use crate::senders::{ChannelSender, SendResult};
use crate::store::{
    AlertChannel, AlertHistoryEntry, AlertSettings, ChannelStore, DeliveryStatus, HistoryStore,
    RuleStore, ServiceDirectory,
};
use chrono::Utc;
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Fixed delay before the single delivery retry
const RETRY_DELAY: Duration = Duration::from_secs(30);

/// Both throttle stores live behind one mutex so the check-then-record
/// sequence of a dispatch pass is a single critical section. No await
/// points occur while the guard is held.
#[derive(Debug, Default)]
struct Throttles {
    flap: FlapSuppressor,
    rate: RateLimiter,
}

/// Outcome of the throttle gate for one evaluation
enum ThrottleVerdict {
    Pass,
    Flapping,
    RateLimited,
}

/// Handle for one scheduled delivery retry
///
/// Kept only so `shutdown` can cancel the deferred task; the task removes
/// its own entry once it has run.
struct PendingRetry {
    channel_id: ChannelId,
    handle: JoinHandle<()>,
}

/// Orchestrator turning health events into channel notifications
///
/// Constructed explicitly by the composition root with its collaborators
/// injected; there is no global instance. Senders are registered per
/// channel type before the dispatcher is shared.
pub struct AlertDispatcher {
    directory: Arc<dyn ServiceDirectory>,
    rules: Arc<dyn RuleStore>,
    channels: Arc<dyn ChannelStore>,
    history: Arc<dyn HistoryStore>,
    settings: Arc<dyn AlertSettings>,
    senders: HashMap<String, Arc<dyn ChannelSender>>,
    throttles: Mutex<Throttles>,
    retries: Arc<Mutex<HashMap<u64, PendingRetry>>>,
    next_retry_id: AtomicU64,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl AlertDispatcher {
    /// Create a dispatcher with its persistence and settings collaborators
    pub fn new(
        directory: Arc<dyn ServiceDirectory>,
        rules: Arc<dyn RuleStore>,
        channels: Arc<dyn ChannelStore>,
        history: Arc<dyn HistoryStore>,
        settings: Arc<dyn AlertSettings>,
    ) -> Self {
        Self {
            directory,
            rules,
            channels,
            history,
            settings,
            senders: HashMap::new(),
            throttles: Mutex::new(Throttles::default()),
            retries: Arc::new(Mutex::new(HashMap::new())),
            next_retry_id: AtomicU64::new(0),
            listener: Mutex::new(None),
        }
    }

    /// Register a sender for its channel type
    ///
    /// Channels whose type has no registered sender fail their dispatch
    /// attempts without a retry.
    pub fn register_sender(&mut self, sender: Arc<dyn ChannelSender>) {
        self.senders
            .insert(sender.channel_type().to_string(), sender);
    }

    /// Subscribe to the health event source
    ///
    /// Spawns a listener task that feeds [`Self::process_event`]; the task
    /// runs until `shutdown` detaches it or the source closes. Calling
    /// `start` again replaces a previous listener.
    pub fn start(self: &Arc<Self>, mut events: broadcast::Receiver<HealthEvent>) {
        let dispatcher = Arc::clone(self);
        let handle = tokio::spawn(async move {
            info!("Alert dispatcher listening for health events");
            loop {
                match events.recv().await {
                    Ok(event) => dispatcher.process_event(event).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(
                            "Alert dispatcher lagged behind the event source, {} events skipped",
                            skipped
                        );
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("Health event source closed");
                        break;
                    }
                }
            }
        });

        if let Some(previous) = self.listener.lock().unwrap().replace(handle) {
            warn!("Alert dispatcher was already started, replacing listener");
            previous.abort();
        }
    }

    /// Run one health event through the dispatch pipeline
    ///
    /// Completes once the initial fan-out (including history writes) is
    /// done; deferred retries outlive the call. Every early exit is logged
    /// and leaves no history.
    pub async fn process_event(&self, event: HealthEvent) {
        let service_id = event.service_id();

        let team_id = match self.directory.team_for_service(service_id) {
            Ok(Some(team)) => team,
            Ok(None) => {
                warn!("Dropping alert for unknown service {}", service_id);
                return;
            }
            Err(e) => {
                warn!(
                    "Dropping alert for service {}: team lookup failed: {}",
                    service_id, e
                );
                return;
            }
        };

        let rules = match self.rules.active_rules(team_id) {
            Ok(rules) => rules,
            Err(e) => {
                warn!(
                    "Dropping alert for service {}: rule lookup failed: {}",
                    service_id, e
                );
                return;
            }
        };
        if rules.is_empty() {
            debug!("No active alert rules for team {}, skipping event", team_id);
            return;
        }

        let alert = self.build_alert_event(event);

        if !rules
            .iter()
            .any(|rule| rule.severity_filter.matches(alert.severity))
        {
            debug!(
                "No rule of team {} matches severity {:?}, skipping event",
                team_id, alert.severity
            );
            return;
        }

        let channels = match self.channels.active_channels(team_id) {
            Ok(channels) => channels,
            Err(e) => {
                warn!(
                    "Dropping alert for service {}: channel lookup failed: {}",
                    service_id, e
                );
                return;
            }
        };
        if channels.is_empty() {
            debug!("No active channels for team {}, skipping event", team_id);
            return;
        }

        // Both tunables are re-read every evaluation so settings changes
        // take effect without a restart.
        let cooldown_ms = self.settings.cooldown_minutes().saturating_mul(60_000);
        let max_per_hour = self.settings.max_alerts_per_hour();
        let key = alert.suppression_key();

        let verdict = {
            let mut throttles = self.throttles.lock().unwrap();
            if throttles.flap.is_suppressed(key, cooldown_ms) {
                ThrottleVerdict::Flapping
            } else if throttles.rate.is_limited(team_id, max_per_hour) {
                ThrottleVerdict::RateLimited
            } else {
                // Accounted once per passing event, not once per channel.
                throttles.flap.record_alert(key);
                throttles.rate.record_alert(team_id);
                ThrottleVerdict::Pass
            }
        };

        match verdict {
            ThrottleVerdict::Flapping => {
                info!(
                    "Suppressing alert for {:?}: still inside the {}ms cooldown",
                    key, cooldown_ms
                );
                self.record_for_channels(&channels, &alert, DeliveryStatus::Suppressed);
                return;
            }
            ThrottleVerdict::RateLimited => {
                info!(
                    "Suppressing alert for team {}: hourly cap of {} reached",
                    team_id, max_per_hour
                );
                self.record_for_channels(&channels, &alert, DeliveryStatus::Suppressed);
                return;
            }
            ThrottleVerdict::Pass => {}
        }

        // Sequential fan-out keeps history ordering deterministic and
        // bounds in-flight sends to one.
        for channel in channels {
            self.dispatch_to_channel(channel, &alert).await;
        }
    }

    /// Send a synthetic alert through one sender, bypassing the pipeline
    ///
    /// Backs the user-initiated "test this channel" action: no rule or
    /// throttle checks, no history.
    pub async fn send_test_alert(&self, channel_type: &str, config: &str) -> SendResult {
        let Some(sender) = self.senders.get(channel_type) else {
            return SendResult::config_failure(format!(
                "no sender registered for channel type '{}'",
                channel_type
            ));
        };

        let event = AlertEvent::status_change(
            0,
            "Test Service".to_string(),
            None,
            None,
            true,
            false,
            Utc::now(),
        );

        info!("Sending test alert through '{}'", channel_type);
        sender.send(&event, config).await
    }

    /// Detach from the event source, cancel pending retries and clear both
    /// throttle stores
    pub fn shutdown(&self) {
        info!("Shutting down alert dispatcher");

        // Detach first so no new events are accepted while retries drain.
        if let Some(listener) = self.listener.lock().unwrap().take() {
            listener.abort();
        }

        let pending: Vec<PendingRetry> = {
            let mut retries = self.retries.lock().unwrap();
            retries.drain().map(|(_, retry)| retry).collect()
        };
        for retry in pending {
            debug!("Cancelling pending retry for channel {}", retry.channel_id);
            retry.handle.abort();
        }

        let mut throttles = self.throttles.lock().unwrap();
        throttles.flap.clear();
        throttles.rate.clear();
    }

    /// Number of retries currently scheduled
    pub fn pending_retries(&self) -> usize {
        self.retries.lock().unwrap().len()
    }

    /// Build the alert event for one dispatch pass
    ///
    /// Resolves the dependency id from the event's dependency name when one
    /// is present. A failed resolution downgrades gracefully: the alert
    /// still dispatches, scoped to the service instead.
    fn build_alert_event(&self, event: HealthEvent) -> AlertEvent {
        match event {
            HealthEvent::StatusChange {
                service_id,
                service_name,
                dependency_name,
                previous_healthy,
                current_healthy,
                timestamp,
            } => {
                let dependency_id = match &dependency_name {
                    Some(name) => match self.directory.dependency_for_service(service_id, name) {
                        Ok(Some(id)) => Some(id),
                        Ok(None) => {
                            warn!(
                                "Unknown dependency '{}' of service {}, dispatching without dependency id",
                                name, service_id
                            );
                            None
                        }
                        Err(e) => {
                            warn!(
                                "Dependency lookup failed for service {}: {}, dispatching without dependency id",
                                service_id, e
                            );
                            None
                        }
                    },
                    None => None,
                };

                AlertEvent::status_change(
                    service_id,
                    service_name,
                    dependency_id,
                    dependency_name,
                    previous_healthy,
                    current_healthy,
                    timestamp,
                )
            }
            HealthEvent::PollError {
                service_id,
                service_name,
                error,
            } => AlertEvent::poll_error(service_id, service_name, error, Utc::now()),
        }
    }

    /// Attempt delivery on one channel and record the outcome
    async fn dispatch_to_channel(&self, channel: AlertChannel, alert: &AlertEvent) {
        let Some(sender) = self.senders.get(&channel.channel_type) else {
            warn!(
                "No sender registered for channel type '{}' (channel {})",
                channel.channel_type, channel.id
            );
            record_history(self.history.as_ref(), &channel, alert, DeliveryStatus::Failed);
            return;
        };

        let result = sender.send(alert, &channel.config).await;
        if result.success {
            info!(
                "Alert delivered to channel {} ({})",
                channel.id, channel.channel_type
            );
            record_history(self.history.as_ref(), &channel, alert, DeliveryStatus::Sent);
        } else {
            let reason = result.error.as_deref().unwrap_or("unknown error");
            error!("Delivery to channel {} failed: {}", channel.id, reason);
            record_history(self.history.as_ref(), &channel, alert, DeliveryStatus::Failed);

            if result.retryable {
                self.schedule_retry(Arc::clone(sender), channel, alert.clone());
            }
        }
    }

    /// Schedule the single deferred retry for a failed delivery
    ///
    /// The task sleeps for the fixed delay, re-sends once, records the
    /// outcome and removes itself from the pending set. A second failure is
    /// terminal. Retries never block shutdown; `shutdown` aborts them.
    fn schedule_retry(
        &self,
        sender: Arc<dyn ChannelSender>,
        channel: AlertChannel,
        alert: AlertEvent,
    ) {
        let history = Arc::clone(&self.history);
        let retries = Arc::clone(&self.retries);
        let id = self.next_retry_id.fetch_add(1, Ordering::Relaxed);
        let channel_id = channel.id;

        info!(
            "Scheduling retry for channel {} in {}s",
            channel_id,
            RETRY_DELAY.as_secs()
        );

        // Hold the pending-set lock across the spawn so the task cannot
        // observe the set before its own entry exists.
        let mut pending = self.retries.lock().unwrap();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(RETRY_DELAY).await;

            let result = sender.send(&alert, &channel.config).await;
            if result.success {
                info!("Retry delivered alert to channel {}", channel_id);
                record_history(history.as_ref(), &channel, &alert, DeliveryStatus::Sent);
            } else {
                error!(
                    "Retry for channel {} failed, giving up: {}",
                    channel_id,
                    result.error.as_deref().unwrap_or("unknown error")
                );
                record_history(history.as_ref(), &channel, &alert, DeliveryStatus::Failed);
            }

            retries.lock().unwrap().remove(&id);
        });
        pending.insert(id, PendingRetry { channel_id, handle });
    }

    /// Record one history row per channel with the given status
    fn record_for_channels(
        &self,
        channels: &[AlertChannel],
        alert: &AlertEvent,
        status: DeliveryStatus,
    ) {
        for channel in channels {
            record_history(self.history.as_ref(), channel, alert, status);
        }
    }
}

/// Write one audit history row; failures are logged and swallowed so they
/// never abort dispatch or retry logic
fn record_history(
    history: &dyn HistoryStore,
    channel: &AlertChannel,
    alert: &AlertEvent,
    status: DeliveryStatus,
) {
    let payload = match serde_json::to_string(alert) {
        Ok(payload) => payload,
        Err(e) => {
            error!("Failed to serialize alert payload: {}", e);
            "{}".to_string()
        }
    };

    let entry = AlertHistoryEntry {
        channel_id: channel.id,
        service_id: alert.service_id,
        dependency_id: alert.dependency_id,
        kind: alert.kind,
        payload,
        status,
        timestamp: Utc::now(),
    };

    if let Err(e) = history.record(entry) {
        error!(
            "Failed to record alert history for channel {}: {}",
            channel.id, e
        );
    }
}
