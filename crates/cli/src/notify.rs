//! Outbound enrollment notifications for the operator CLI.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::Notify;

use academy_core::config::NotificationConfig;
use academy_core::{
    EnrollmentNotice, LoggingNotificationDispatcher, NotificationDispatcher, NotificationError,
};

/// Posts each notice as JSON to a configured webhook.
pub struct WebhookNotificationDispatcher {
    client: Client,
    endpoint: String,
    api_token: Option<SecretString>,
}

impl WebhookNotificationDispatcher {
    pub fn new(endpoint: impl Into<String>, config: &NotificationConfig) -> Result<Self, NotificationError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|error| NotificationError::Transport(error.to_string()))?;
        Ok(Self { client, endpoint: endpoint.into(), api_token: config.api_token.clone() })
    }

    async fn post(&self, notice: &EnrollmentNotice) -> Result<(), NotificationError> {
        let mut request = self.client.post(&self.endpoint).json(notice);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token.expose_secret());
        }

        let response = request
            .send()
            .await
            .map_err(|error| NotificationError::Transport(error.to_string()))?;
        if !response.status().is_success() {
            return Err(NotificationError::Rejected(response.status().as_u16()));
        }

        tracing::debug!(
            event_name = "notification.delivered",
            correlation_id = %notice.correlation_id,
            enrollment_id = %notice.enrollment_id,
            status = %response.status(),
            "webhook accepted notice"
        );
        Ok(())
    }
}

#[async_trait]
impl NotificationDispatcher for WebhookNotificationDispatcher {
    async fn notify_approved(&self, notice: &EnrollmentNotice) -> Result<(), NotificationError> {
        self.post(notice).await
    }

    async fn notify_rejected(&self, notice: &EnrollmentNotice) -> Result<(), NotificationError> {
        self.post(notice).await
    }
}

/// Counts deliveries still running so a short-lived process can wait for
/// them before its runtime shuts down.
#[derive(Clone)]
pub struct TrackedDispatcher {
    inner: Arc<dyn NotificationDispatcher>,
    in_flight: Arc<AtomicUsize>,
    idle: Arc<Notify>,
}

impl TrackedDispatcher {
    pub fn new(inner: Arc<dyn NotificationDispatcher>) -> Self {
        Self { inner, in_flight: Arc::new(AtomicUsize::new(0)), idle: Arc::new(Notify::new()) }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Waits until no delivery is running. Returns false if `limit` elapsed first.
    pub async fn drain(&self, limit: Duration) -> bool {
        // Spawned deliveries may not have been polled yet.
        tokio::task::yield_now().await;

        tokio::time::timeout(limit, async {
            loop {
                let idle = self.idle.notified();
                if self.in_flight() == 0 {
                    return;
                }
                idle.await;
            }
        })
        .await
        .is_ok()
    }

    async fn track<F>(&self, delivery: F) -> Result<(), NotificationError>
    where
        F: std::future::Future<Output = Result<(), NotificationError>>,
    {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let result = delivery.await;
        if self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
        result
    }
}

#[async_trait]
impl NotificationDispatcher for TrackedDispatcher {
    async fn notify_approved(&self, notice: &EnrollmentNotice) -> Result<(), NotificationError> {
        self.track(self.inner.notify_approved(notice)).await
    }

    async fn notify_rejected(&self, notice: &EnrollmentNotice) -> Result<(), NotificationError> {
        self.track(self.inner.notify_rejected(notice)).await
    }
}

/// Webhook delivery when enabled with an endpoint, log-only otherwise.
pub fn dispatcher_from_config(
    config: &NotificationConfig,
) -> Result<Arc<dyn NotificationDispatcher>, NotificationError> {
    match (config.enabled, config.webhook_url.as_deref()) {
        (true, Some(endpoint)) => {
            Ok(Arc::new(WebhookNotificationDispatcher::new(endpoint, config)?))
        }
        _ => Ok(Arc::new(LoggingNotificationDispatcher)),
    }
}
