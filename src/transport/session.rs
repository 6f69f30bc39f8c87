//! Transport session: connection lifecycle and send-with-retry
//!
//! ```text
//! Disconnected → Connecting → Connected ⇄ Sending ⇄ Retrying
//!                     ↓                       ↓
//!                   Failed          (DeliveryFailed, stays Connected)
//! ```
//!
//! Every radio operation is bounded by the response timeout; a timed-out
//! operation counts as a failed attempt and is never left pending. A message
//! that exhausts its retries fails on its own, the session stays usable for
//! the next one. Only failing to connect at all is fatal.
//!
//! Replies carry no sequence number, so a reply that arrives after its
//! command timed out would otherwise answer the next command. After any
//! timeout the session is marked desynced and the next exchange first sends
//! a device query, discarding everything up to its DEVICE_INFO answer. An
//! OK seen while draining after a timed-out send means the radio did take
//! that message. Until the query is answered every command fails.

use super::channels::{ChannelAddress, ChannelSlot};
use super::codec::{Command, Response};
use super::link::{Connector, Link};
use super::TransportError;
use crate::config::{defaults, RetryConfig, TransportConfig};
use chrono::Utc;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// How many response timeouts a resync may take to drain stale replies.
const RESYNC_WINDOW_FACTOR: u32 = 4;

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Sending,
    Retrying,
    /// Connection could not be established
    Failed,
}

/// Backoff between attempts: `min(base × multiplier^(n−1), max)`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl RetryPolicy {
    /// Fixed delay between attempts.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: delay,
            multiplier: 1.0,
            max_delay: delay,
        }
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let factor = self.multiplier.max(1.0).powi(exponent);
        let secs = self.base_delay.as_secs_f64() * factor;
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs)
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(cfg: &RetryConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts.max(1),
            base_delay: Duration::from_millis(cfg.base_delay_ms),
            multiplier: cfg.multiplier,
            max_delay: Duration::from_millis(cfg.max_delay_ms),
        }
    }
}

/// Session tuning, taken from `[transport]` and `[retry]`.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub connect_attempts: u32,
    pub response_timeout: Duration,
    /// Pause after the handshake before the first command
    pub settle_delay: Duration,
    pub app_name: String,
    pub retry: RetryPolicy,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::from_config(&TransportConfig::default(), &RetryConfig::default())
    }
}

impl SessionOptions {
    pub fn from_config(transport: &TransportConfig, retry: &RetryConfig) -> Self {
        Self {
            connect_attempts: transport.connect_attempts.max(1),
            response_timeout: Duration::from_secs(transport.response_timeout_secs),
            settle_delay: Duration::from_millis(transport.settle_delay_ms),
            app_name: transport.app_name.clone(),
            retry: RetryPolicy::from(retry),
        }
    }
}

/// Counters for one session.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SessionStats {
    pub sent: u64,
    pub retries: u64,
    pub failed: u64,
}

/// Exclusive, connected session with one radio.
pub struct TransportSession {
    link: Option<Box<dyn Link>>,
    state: SessionState,
    options: SessionOptions,
    stats: SessionStats,
    radio_name: Option<String>,
    /// A command timed out and its reply may still be in flight
    desynced: bool,
}

impl TransportSession {
    /// Open a link and complete the handshake, retrying with backoff.
    ///
    /// Returns [`TransportError::ConnectionError`] once every attempt failed.
    pub async fn connect(
        connector: &dyn Connector,
        options: SessionOptions,
    ) -> Result<Self, TransportError> {
        let mut session = Self {
            link: None,
            state: SessionState::Disconnected,
            options,
            stats: SessionStats::default(),
            radio_name: None,
            desynced: false,
        };
        session.establish(connector).await?;
        Ok(session)
    }

    async fn establish(&mut self, connector: &dyn Connector) -> Result<(), TransportError> {
        let attempts = self.options.connect_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            self.state = SessionState::Connecting;
            info!(
                target_link = %connector.describe(),
                attempt,
                max_attempts = attempts,
                "Connecting to radio"
            );

            match self.open_and_handshake(connector).await {
                Ok(()) => {
                    self.state = SessionState::Connected;
                    info!(
                        radio = self.radio_name.as_deref().unwrap_or("?"),
                        attempt,
                        "Radio session established"
                    );
                    return Ok(());
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Connect attempt failed");
                    last_error = e.to_string();
                    self.release_link().await;
                    if attempt < attempts {
                        let delay = self.options.retry.delay_for(attempt);
                        debug!(delay_ms = delay.as_millis(), "Waiting before reconnect");
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        self.state = SessionState::Failed;
        error!(attempts, error = %last_error, "Could not connect to radio");
        Err(TransportError::ConnectionError {
            attempts,
            reason: last_error,
        })
    }

    async fn open_and_handshake(
        &mut self,
        connector: &dyn Connector,
    ) -> Result<(), TransportError> {
        self.link = Some(connector.open().await?);
        self.desynced = false;

        let app_name = self.options.app_name.clone();
        match self.request(&Command::AppStart { app_name: &app_name }).await? {
            Response::SelfInfo { name } => self.radio_name = Some(name),
            Response::Ok => {}
            Response::Err { code } => {
                return Err(TransportError::Rejected {
                    command: "app-start",
                    code,
                })
            }
            other => {
                return Err(TransportError::Protocol(format!(
                    "unexpected handshake response {other:?}"
                )))
            }
        }

        if !self.options.settle_delay.is_zero() {
            tokio::time::sleep(self.options.settle_delay).await;
        }
        Ok(())
    }

    /// Send one command and wait for its answer, skipping push frames.
    ///
    /// Resyncs first if an earlier command timed out.
    async fn request(&mut self, command: &Command<'_>) -> Result<Response, TransportError> {
        if self.desynced && self.resync().await? {
            warn!(command = command.name(), "Late acknowledgement for an earlier message");
        }

        let timeout = self.options.response_timeout;
        let link = self.link.as_mut().ok_or(TransportError::NotConnected)?;
        link.send_frame(&command.encode()).await?;

        let deadline = tokio::time::Instant::now() + timeout;
        let outcome = loop {
            let Ok(frame) = tokio::time::timeout_at(deadline, link.recv_frame()).await else {
                break Err(TransportError::Timeout {
                    operation: command.name(),
                    after: timeout,
                });
            };
            let response = Response::parse(&frame?)?;
            if response.is_push() {
                trace!(command = command.name(), ?response, "Skipping push frame");
                continue;
            }
            break Ok(response);
        };

        if outcome.is_err() {
            self.desynced = true;
        }
        outcome
    }

    /// Drain replies left over from a timed-out command.
    ///
    /// Sends a device query and discards frames until its DEVICE_INFO answer.
    /// Returns whether an OK or SENT went by, i.e. whether the radio accepted
    /// the timed-out command after all. The session stays desynced if the
    /// query itself goes unanswered.
    async fn resync(&mut self) -> Result<bool, TransportError> {
        let window = self.options.response_timeout * RESYNC_WINDOW_FACTOR;
        let link = self.link.as_mut().ok_or(TransportError::NotConnected)?;
        debug!(window_ms = window.as_millis(), "Resynchronising with radio");
        link.send_frame(&Command::DeviceQuery.encode()).await?;

        let deadline = tokio::time::Instant::now() + window;
        let mut acknowledged = false;
        loop {
            let frame = tokio::time::timeout_at(deadline, link.recv_frame())
                .await
                .map_err(|_| TransportError::Timeout {
                    operation: Command::DeviceQuery.name(),
                    after: window,
                })??;
            match Response::parse(&frame)? {
                Response::DeviceInfo => break,
                Response::Ok | Response::Sent => acknowledged = true,
                stale => trace!(?stale, "Discarding stale reply"),
            }
        }

        self.desynced = false;
        debug!(acknowledged, "Radio back in step");
        Ok(acknowledged)
    }

    fn ensure_connected(&self) -> Result<(), TransportError> {
        if self.link.is_none() {
            return Err(TransportError::NotConnected);
        }
        Ok(())
    }

    /// Read every populated channel slot from the radio.
    pub async fn list_channels(&mut self) -> Result<Vec<ChannelSlot>, TransportError> {
        self.ensure_connected()?;
        let mut slots = Vec::new();

        for index in 0..defaults::MAX_CHANNEL_SLOTS {
            match self.request(&Command::GetChannel { index }).await {
                Ok(Response::ChannelInfo(slot)) => {
                    if !slot.is_empty() {
                        slots.push(slot);
                    }
                }
                Ok(Response::Err { .. }) => {
                    trace!(index, "Channel slot not available");
                }
                Ok(other) => {
                    debug!(index, ?other, "Unexpected reply to get-channel");
                }
                Err(e) if e.is_timeout_of("get-channel") => {
                    warn!(index, error = %e, "Channel slot query timed out");
                }
                Err(e) => return Err(e),
            }
        }

        debug!(count = slots.len(), "Channel slots read");
        Ok(slots)
    }

    /// Deliver `text` to a resolved channel, retrying per the policy.
    ///
    /// On retry exhaustion returns [`TransportError::DeliveryFailed`]; the
    /// session remains connected.
    pub async fn send(
        &mut self,
        address: &ChannelAddress,
        text: &str,
    ) -> Result<(), TransportError> {
        self.ensure_connected()?;
        let max_attempts = self.options.retry.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            self.state = SessionState::Sending;
            let timestamp = u32::try_from(Utc::now().timestamp()).unwrap_or(0);
            let command = Command::SendChannelText {
                index: address.index,
                timestamp,
                text,
            };

            match self.request(&command).await {
                Ok(Response::Ok | Response::Sent) => {
                    self.mark_sent(address, text, attempt);
                    return Ok(());
                }
                Ok(Response::Err { code }) => {
                    last_error = TransportError::Rejected {
                        command: command.name(),
                        code,
                    }
                    .to_string();
                }
                Ok(other) => {
                    last_error = format!("unexpected response {other:?}");
                }
                Err(e) if e.is_timeout_of(command.name()) => {
                    last_error = e.to_string();
                    match self.resync().await {
                        Ok(true) => {
                            info!(
                                channel = %address.key,
                                attempt,
                                "Radio acknowledged after timeout"
                            );
                            self.mark_sent(address, text, attempt);
                            return Ok(());
                        }
                        Ok(false) => {}
                        Err(e) => {
                            warn!(
                                channel = %address.key,
                                error = %e,
                                "Radio did not answer resync"
                            );
                        }
                    }
                }
                Err(e) => {
                    last_error = e.to_string();
                }
            }

            if attempt < max_attempts {
                self.state = SessionState::Retrying;
                self.stats.retries += 1;
                let delay = self.options.retry.delay_for(attempt);
                warn!(
                    channel = %address.key,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis(),
                    error = %last_error,
                    "Send failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }

        self.state = SessionState::Connected;
        self.stats.failed += 1;
        error!(
            channel = %address.key,
            attempts = max_attempts,
            error = %last_error,
            "Delivery failed"
        );
        Err(TransportError::DeliveryFailed {
            channel: address.key.clone(),
            attempts: max_attempts,
            reason: last_error,
        })
    }

    fn mark_sent(&mut self, address: &ChannelAddress, text: &str, attempt: u32) {
        self.state = SessionState::Connected;
        self.stats.sent += 1;
        debug!(
            channel = %address.key,
            slot = address.index,
            attempt,
            bytes = text.len(),
            "Message sent"
        );
    }

    async fn release_link(&mut self) {
        if let Some(mut link) = self.link.take() {
            if let Err(e) = link.close().await {
                warn!(link = %link.link_name(), error = %e, "Error closing link");
            }
        }
    }

    /// Release the link. Safe to call more than once.
    pub async fn disconnect(&mut self) {
        if self.link.is_some() {
            self.release_link().await;
            info!(
                sent = self.stats.sent,
                failed = self.stats.failed,
                retries = self.stats.retries,
                "Radio session closed"
            );
        }
        self.state = SessionState::Disconnected;
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    pub fn radio_name(&self) -> Option<&str> {
        self.radio_name.as_deref()
    }

    /// True while a timed-out reply may still be pending on the link.
    pub fn is_desynced(&self) -> bool {
        self.desynced
    }
}

impl Drop for TransportSession {
    fn drop(&mut self) {
        if self.link.is_some() {
            // The link's own drop closes the descriptor.
            warn!("Transport session dropped while connected");
        }
    }
}

/// Connect, run `body`, then disconnect whatever `body` returned.
///
/// `body` owns the session for its duration and hands it back alongside its
/// result, so the disconnect runs on success and on every error path the
/// body reports.
pub async fn with_session<T, F, Fut>(
    connector: &dyn Connector,
    options: SessionOptions,
    body: F,
) -> Result<T, TransportError>
where
    F: FnOnce(TransportSession) -> Fut,
    Fut: Future<Output = (TransportSession, T)>,
{
    let session = TransportSession::connect(connector, options).await?;
    let (mut session, out) = body(session).await;
    session.disconnect().await;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::channels::{ChannelSecret, MatchKind, CHANNEL_SECRET_LEN};
    use crate::transport::link::SimulatedRadio;

    fn fast_options() -> SessionOptions {
        SessionOptions {
            connect_attempts: 3,
            response_timeout: Duration::from_millis(50),
            settle_delay: Duration::ZERO,
            app_name: "test".to_string(),
            retry: RetryPolicy::fixed(3, Duration::from_millis(1)),
        }
    }

    fn radio() -> SimulatedRadio {
        SimulatedRadio::with_channels(&[
            ("Public", ChannelSecret::from_bytes([0x8b; CHANNEL_SECRET_LEN])),
            ("Alpha", ChannelSecret::from_bytes([0x11; CHANNEL_SECRET_LEN])),
        ])
    }

    fn address(index: u8) -> ChannelAddress {
        ChannelAddress {
            key: "alpha".to_string(),
            index,
            live_name: "Alpha".to_string(),
            matched_by: MatchKind::Secret,
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let p = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_secs(2),
            multiplier: 2.0,
            max_delay: Duration::from_secs(60),
        };
        assert_eq!(p.delay_for(1), Duration::from_secs(2));
        assert_eq!(p.delay_for(2), Duration::from_secs(4));
        assert_eq!(p.delay_for(5), Duration::from_secs(32));
        assert_eq!(p.delay_for(6), Duration::from_secs(60));
        assert_eq!(p.delay_for(40), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn connect_handshake_and_list() {
        let radio = radio();
        let mut session = TransportSession::connect(&radio, fast_options()).await.unwrap();
        assert_eq!(session.state(), SessionState::Connected);
        assert_eq!(session.radio_name(), Some("SIM-RADIO"));

        let slots = session.list_channels().await.unwrap();
        let names: Vec<_> = slots.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Public", "Alpha"]);

        session.disconnect().await;
        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(radio.lock().open_links, 0);
    }

    #[tokio::test]
    async fn connect_retries_then_succeeds() {
        let radio = radio();
        radio.lock().refuse_connects = 2;
        let mut session = TransportSession::connect(&radio, fast_options()).await.unwrap();
        assert_eq!(radio.lock().opens, 3);
        session.disconnect().await;
    }

    #[tokio::test]
    async fn connect_exhaustion_is_connection_error() {
        let radio = radio();
        radio.lock().refuse_connects = 10;
        let err = TransportSession::connect(&radio, fast_options()).await.err().unwrap();
        assert!(err.is_connection_failure());
        assert!(matches!(err, TransportError::ConnectionError { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn send_retries_after_timeout_and_rejection() {
        let radio = radio();
        {
            let mut s = radio.lock();
            s.drop_sends = 1;
            s.reject_sends = 1;
        }
        let mut session = TransportSession::connect(&radio, fast_options()).await.unwrap();
        session.send(&address(1), "hello").await.unwrap();
        assert_eq!(session.stats().retries, 2);
        assert_eq!(radio.delivered(), vec![(1, "hello".to_string())]);
        session.disconnect().await;
    }

    #[tokio::test]
    async fn late_acknowledgement_is_not_credited_to_next_message() {
        let radio = radio();
        radio.lock().late_sends = 1;
        let mut session = TransportSession::connect(&radio, fast_options()).await.unwrap();

        // OK arrives only after the timeout; the resync drain picks it up
        session.send(&address(1), "first").await.unwrap();
        assert_eq!(session.stats().retries, 0);
        assert!(!session.is_desynced());

        radio.lock().reject_sends = 3;
        let err = session.send(&address(1), "second").await.unwrap_err();
        assert!(matches!(err, TransportError::DeliveryFailed { attempts: 3, .. }));
        assert_eq!(radio.delivered(), vec![(1, "first".to_string())]);
        assert_eq!(session.stats().sent, 1);
        session.disconnect().await;
    }

    #[tokio::test]
    async fn unanswered_resync_fails_later_sends() {
        let radio = radio();
        {
            let mut s = radio.lock();
            s.late_sends = 1;
            s.mute_device_query = true;
        }
        let mut session = TransportSession::connect(&radio, fast_options()).await.unwrap();

        assert!(session.send(&address(1), "first").await.is_err());
        assert!(session.is_desynced());

        let err = session.send(&address(1), "second").await.unwrap_err();
        assert!(matches!(err, TransportError::DeliveryFailed { .. }));
        assert_eq!(radio.delivered(), vec![(1, "first".to_string())]);
        assert_eq!(session.stats().sent, 0);
        session.disconnect().await;
    }

    #[tokio::test]
    async fn exhausted_send_keeps_session_usable() {
        let radio = radio();
        radio.lock().reject_sends = 3;
        let mut session = TransportSession::connect(&radio, fast_options()).await.unwrap();

        let err = session.send(&address(1), "first").await.unwrap_err();
        assert!(matches!(err, TransportError::DeliveryFailed { attempts: 3, .. }));
        assert_eq!(session.state(), SessionState::Connected);

        session.send(&address(1), "second").await.unwrap();
        assert_eq!(radio.delivered(), vec![(1, "second".to_string())]);
        assert_eq!(session.stats().failed, 1);
        session.disconnect().await;
    }

    #[tokio::test]
    async fn with_session_disconnects() {
        let radio = radio();
        let sent = with_session(&radio, fast_options(), |mut session| async move {
            let r = session.send(&address(0), "x").await;
            (session, r.is_ok())
        })
        .await
        .unwrap();
        assert!(sent);
        assert_eq!(radio.lock().closes, 1);
        assert_eq!(radio.lock().open_links, 0);
    }

    #[tokio::test]
    async fn send_without_link_is_not_connected() {
        let radio = radio();
        let mut session = TransportSession::connect(&radio, fast_options()).await.unwrap();
        session.disconnect().await;
        session.disconnect().await;
        assert!(matches!(
            session.send(&address(0), "x").await,
            Err(TransportError::NotConnected)
        ));
    }
}
