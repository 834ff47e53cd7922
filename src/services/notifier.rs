//! Outbound notifications.
//!
//! The engine never waits on a notification and never lets one fail a
//! booking: every call lands here after the seat and credit change already
//! committed. The HTTP sender keeps a circuit breaker in front of the
//! webhook endpoint so a dead notification service cannot pile up timeouts
//! behind the booking path.

use async_trait::async_trait;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::{Duration, Instant};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::NotifierConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationEvent {
    SeatReserved,
    ReservationConfirmed,
    WaitingListPromoted,
    SeatRevoked,
}

impl NotificationEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationEvent::SeatReserved => "seat_reserved",
            NotificationEvent::ReservationConfirmed => "reservation_confirmed",
            NotificationEvent::WaitingListPromoted => "waiting_list_promoted",
            NotificationEvent::SeatRevoked => "seat_revoked",
        }
    }
}

/// Fire-and-forget sender. Implementations log failures and swallow them.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn notify(&self, user_id: i64, event: NotificationEvent, payload: serde_json::Value);
}

/// Sender for tests and deployments with notifications switched off.
pub struct NoopNotifier;

#[async_trait]
impl NotificationSender for NoopNotifier {
    async fn notify(&self, user_id: i64, event: NotificationEvent, _payload: serde_json::Value) {
        info!("notification suppressed: user={} event={}", user_id, event.as_str());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BreakerState {
    /// Normal operation, requests flow.
    Closed,
    /// Too many consecutive failures, requests blocked until the timeout.
    Open,
    /// One probe request allowed to test whether the endpoint recovered.
    HalfOpen,
}

struct CircuitBreaker {
    state: RwLock<BreakerState>,
    failure_count: AtomicU32,
    last_failure: Mutex<Option<Instant>>,
    failure_threshold: u32,
    open_timeout: Duration,
}

impl CircuitBreaker {
    fn new(failure_threshold: u32, open_timeout: Duration) -> Self {
        Self {
            state: RwLock::new(BreakerState::Closed),
            failure_count: AtomicU32::new(0),
            last_failure: Mutex::new(None),
            failure_threshold,
            open_timeout,
        }
    }

    fn allow_request(&self) -> bool {
        let state = *self.state.read().unwrap();
        match state {
            BreakerState::Closed | BreakerState::HalfOpen => true,
            BreakerState::Open => {
                let elapsed = self
                    .last_failure
                    .lock()
                    .unwrap()
                    .map(|at| at.elapsed())
                    .unwrap_or(Duration::MAX);
                if elapsed >= self.open_timeout {
                    *self.state.write().unwrap() = BreakerState::HalfOpen;
                    info!("notifier circuit breaker half-open, probing endpoint");
                    true
                } else {
                    false
                }
            }
        }
    }

    fn record_success(&self) {
        let mut state = self.state.write().unwrap();
        if *state != BreakerState::Closed {
            info!("notifier circuit breaker closed again");
        }
        *state = BreakerState::Closed;
        self.failure_count.store(0, Ordering::Relaxed);
    }

    fn record_failure(&self) {
        let failures = self.failure_count.fetch_add(1, Ordering::Relaxed) + 1;
        *self.last_failure.lock().unwrap() = Some(Instant::now());

        let mut state = self.state.write().unwrap();
        match *state {
            BreakerState::Closed if failures >= self.failure_threshold => {
                *state = BreakerState::Open;
                warn!(
                    "notifier circuit breaker OPEN after {} consecutive failures",
                    failures
                );
            }
            BreakerState::HalfOpen => {
                *state = BreakerState::Open;
                warn!("notifier probe failed, circuit breaker back to open");
            }
            _ => {}
        }
    }
}

#[derive(Debug, Serialize)]
struct NotificationPayload {
    id: Uuid,
    user_id: i64,
    event: &'static str,
    payload: serde_json::Value,
    token: String,
}

/// Webhook sender used in production. Payloads carry a sha256 token over
/// (id, user, event, secret) so the receiving side can reject forgeries.
pub struct WebhookNotifier {
    http_client: reqwest::Client,
    endpoint: String,
    signing_secret: String,
    breaker: CircuitBreaker,
}

impl WebhookNotifier {
    pub fn from_config(config: &NotifierConfig) -> Self {
        Self {
            http_client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            endpoint: config.webhook_url.clone(),
            signing_secret: config.signing_secret.clone(),
            breaker: CircuitBreaker::new(
                config.failure_threshold,
                Duration::from_secs(config.open_timeout_seconds),
            ),
        }
    }

    fn sign(&self, id: Uuid, user_id: i64, event: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(format!("{}{}{}{}", id, user_id, event, self.signing_secret));
        format!("{:x}", hasher.finalize())
    }
}

#[async_trait]
impl NotificationSender for WebhookNotifier {
    async fn notify(&self, user_id: i64, event: NotificationEvent, payload: serde_json::Value) {
        if !self.breaker.allow_request() {
            warn!(
                "notifier circuit breaker open, dropping {} for user {}",
                event.as_str(),
                user_id
            );
            return;
        }

        let id = Uuid::new_v4();
        let body = NotificationPayload {
            id,
            user_id,
            event: event.as_str(),
            payload,
            token: self.sign(id, user_id, event.as_str()),
        };

        let result = self
            .http_client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .and_then(|resp| resp.error_for_status());

        match result {
            Ok(_) => {
                self.breaker.record_success();
                info!("notified user {} about {}", user_id, event.as_str());
            }
            Err(e) => {
                // Best effort only; the booking already committed.
                self.breaker.record_failure();
                warn!(
                    "notification {} for user {} failed: {}",
                    event.as_str(),
                    user_id,
                    e
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NotifierConfig;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn notifier(url: String) -> WebhookNotifier {
        WebhookNotifier::from_config(&NotifierConfig {
            webhook_url: url,
            signing_secret: "secret".into(),
            failure_threshold: 3,
            open_timeout_seconds: 60,
        })
    }

    #[tokio::test]
    async fn delivers_signed_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hooks/booking"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = notifier(format!("{}/hooks/booking", server.uri()));
        notifier
            .notify(7, NotificationEvent::SeatReserved, json!({"assignment_id": 1}))
            .await;
    }

    #[tokio::test]
    async fn breaker_opens_after_consecutive_failures() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let notifier = notifier(server.uri());
        for _ in 0..3 {
            notifier
                .notify(7, NotificationEvent::SeatReserved, json!({}))
                .await;
        }
        assert_eq!(*notifier.breaker.state.read().unwrap(), BreakerState::Open);
        // Further sends are dropped without touching the endpoint.
        assert!(!notifier.breaker.allow_request());
    }
}
