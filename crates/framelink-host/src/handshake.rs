//! Session establishment from the host side.
//!
//! The child's load timing cannot be observed from outside, so the
//! handshake is resent on a fixed interval until the child replies or the
//! attempt budget runs out.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};

use framelink_core::{Channel, ChannelError, Envelope, Message, sanitize};
use futures::StreamExt;
use serde_json::{Map, Value};
use tokio::{sync::oneshot, task::JoinHandle, time::MissedTickBehavior};

use crate::{FrameInfo, HandshakeOptions, HostConfig, HostError, HostHandle};

/// Resends a payload on a fixed interval, up to a maximum attempt count.
pub struct RetryScheduler {
    options: HandshakeOptions,
    attempts: Arc<AtomicU32>,
    task: Option<JoinHandle<()>>,
}

impl RetryScheduler {
    /// Create an idle scheduler.
    #[must_use]
    pub fn new(options: HandshakeOptions) -> Self {
        Self {
            options,
            attempts: Arc::new(AtomicU32::new(0)),
            task: None,
        }
    }

    /// Start sending. The first attempt happens immediately.
    ///
    /// `send` receives the 1-based attempt number. The returned receiver
    /// fires when the next attempt would exceed the budget.
    pub fn start<F>(&mut self, mut send: F) -> oneshot::Receiver<()>
    where
        F: FnMut(u32) + Send + 'static,
    {
        self.cancel();
        self.attempts.store(0, Ordering::SeqCst);

        let (exhausted_tx, exhausted_rx) = oneshot::channel();
        let attempts = Arc::clone(&self.attempts);
        let max_attempts = self.options.max_attempts;
        // tokio intervals reject a zero period
        let period = self.options.interval().max(Duration::from_millis(1));

        self.task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // Overdue attempts keep their spacing instead of bursting.
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let attempt = attempts.load(Ordering::SeqCst);
                if attempt >= max_attempts {
                    let _ = exhausted_tx.send(());
                    return;
                }
                attempts.store(attempt + 1, Ordering::SeqCst);
                send(attempt + 1);
            }
        }));

        exhausted_rx
    }

    /// Stop sending.
    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    /// Attempts made so far.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for RetryScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Handshake progress, traced on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandshakeState {
    Idle,
    Sending,
    Succeeded,
    TimedOut,
    Failed,
}

/// Drives the handshake until the child replies.
pub struct HandshakeInitiator {
    channel: Arc<dyn Channel>,
    target_origin: String,
    model: Map<String, Value>,
    options: HandshakeOptions,
    frame: FrameInfo,
    state: HandshakeState,
}

impl HandshakeInitiator {
    /// Prepare a handshake for `config` over `channel`.
    ///
    /// # Errors
    /// Returns error if the configured URL has no usable origin.
    pub fn new(config: &HostConfig, channel: Arc<dyn Channel>) -> Result<Self, HostError> {
        Ok(Self {
            channel,
            target_origin: config.child_origin()?,
            model: config.model.clone(),
            options: config.handshake,
            frame: config.frame.clone(),
            state: HandshakeState::Idle,
        })
    }

    /// Origin the handshake is addressed to.
    #[must_use]
    pub fn target_origin(&self) -> &str {
        &self.target_origin
    }

    fn transition(&mut self, state: HandshakeState) {
        tracing::debug!(from = ?self.state, to = ?state, "Handshake state");
        self.state = state;
    }

    /// Run the handshake to completion.
    ///
    /// Payloads that fail sanitization are ignored. Any sanitized message
    /// other than a handshake reply fails the handshake.
    ///
    /// # Errors
    /// Returns `HandshakeTimeout` when the attempt budget runs out,
    /// `InvalidHandshakeReply` on an unexpected message, or a channel error
    /// if the inbound stream ends.
    pub async fn run(mut self) -> Result<HostHandle, HostError> {
        // Subscribe before the first send so the reply cannot be missed.
        let mut inbound = self.channel.subscribe();

        let model = (!self.model.is_empty()).then(|| self.model.clone());
        let payload = serde_json::to_value(Envelope::new(Message::Handshake { model }))
            .map_err(ChannelError::from)?;

        let mut scheduler = RetryScheduler::new(self.options);
        let channel = Arc::clone(&self.channel);
        let target = self.target_origin.clone();
        let mut exhausted = scheduler.start(move |attempt| {
            tracing::debug!(attempt, target = %target, "Sending handshake");
            if let Err(e) = channel.post(payload.clone(), &target) {
                tracing::warn!(attempt, "Handshake send failed: {e}");
            }
        });
        self.transition(HandshakeState::Sending);

        let outcome = loop {
            tokio::select! {
                _ = &mut exhausted => break Err(HostError::HandshakeTimeout),
                next = inbound.next() => {
                    let Some(msg) = next else {
                        break Err(HostError::Channel(ChannelError::Closed));
                    };
                    let Some(envelope) = sanitize::parse(&msg, Some(self.target_origin.as_str())) else {
                        continue;
                    };
                    match envelope.message {
                        Message::HandshakeReply => break Ok(msg.origin),
                        other => {
                            tracing::warn!(kind = other.kind().as_str(), "Unexpected message during handshake");
                            break Err(HostError::InvalidHandshakeReply);
                        }
                    }
                }
            }
        };
        scheduler.cancel();

        match outcome {
            Ok(child_origin) => {
                self.transition(HandshakeState::Succeeded);
                tracing::info!(
                    attempts = scheduler.attempts(),
                    child_origin = %child_origin,
                    "Handshake complete"
                );
                Ok(HostHandle::spawn(self.channel, inbound, child_origin, self.frame))
            }
            Err(e) => {
                let state = if matches!(e, HostError::HandshakeTimeout) {
                    HandshakeState::TimedOut
                } else {
                    HandshakeState::Failed
                };
                self.transition(state);
                tracing::warn!(attempts = scheduler.attempts(), "Handshake failed: {e}");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use tokio::time::Instant;

    fn options(interval_ms: u64, max_attempts: u32) -> HandshakeOptions {
        HandshakeOptions {
            interval_ms,
            max_attempts,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduler_sends_then_exhausts() {
        let start = Instant::now();
        let sent = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&sent);

        let mut scheduler = RetryScheduler::new(options(500, 5));
        let exhausted = scheduler.start(move |attempt| {
            log.lock().unwrap().push((attempt, start.elapsed().as_millis()));
        });
        exhausted.await.unwrap();

        assert_eq!(
            *sent.lock().unwrap(),
            vec![(1, 0), (2, 500), (3, 1000), (4, 1500), (5, 2000)]
        );
        assert_eq!(scheduler.attempts(), 5);
        assert_eq!(start.elapsed(), Duration::from_millis(2500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_runtime_keeps_attempts_spaced() {
        let start = Instant::now();
        let sent = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&sent);

        let mut scheduler = RetryScheduler::new(options(500, 5));
        let _exhausted = scheduler.start(move |attempt| {
            log.lock().unwrap().push((attempt, start.elapsed().as_millis()));
        });
        tokio::task::yield_now().await;

        // Three ticks are overdue after the stall; only one fires.
        tokio::time::advance(Duration::from_millis(1600)).await;
        for _ in 0..3 {
            tokio::task::yield_now().await;
        }
        assert_eq!(*sent.lock().unwrap(), vec![(1, 0), (2, 1600)]);

        tokio::time::advance(Duration::from_millis(500)).await;
        for _ in 0..3 {
            tokio::task::yield_now().await;
        }
        assert_eq!(*sent.lock().unwrap(), vec![(1, 0), (2, 1600), (3, 2100)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduler_cancel_stops_sending() {
        let sent = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&sent);

        let mut scheduler = RetryScheduler::new(options(500, 5));
        let _exhausted = scheduler.start(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_millis(750)).await;
        scheduler.cancel();
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(sent.load(Ordering::SeqCst), 2);
        assert!(!scheduler.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_does_not_panic() {
        let mut scheduler = RetryScheduler::new(options(0, 3));
        scheduler.start(|_| {}).await.unwrap();
        assert_eq!(scheduler.attempts(), 3);
    }

    #[test]
    fn test_initiator_rejects_relative_url() {
        let result = HandshakeInitiator::new(&HostConfig::new("child.html"), Arc::new(NullChannel));
        assert!(matches!(result, Err(HostError::InvalidUrl(_))));
    }

    #[test]
    fn test_initiator_targets_url_origin() {
        let initiator = HandshakeInitiator::new(
            &HostConfig::new("https://child.example/a/b.html"),
            Arc::new(NullChannel),
        )
        .unwrap();
        assert_eq!(initiator.target_origin(), "https://child.example");
        assert_eq!(initiator.state, HandshakeState::Idle);
    }

    struct NullChannel;

    impl Channel for NullChannel {
        fn post(&self, _payload: Value, _target_origin: &str) -> Result<(), ChannelError> {
            Ok(())
        }

        fn subscribe(&self) -> framelink_core::InboundStream {
            futures::stream::pending().boxed()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_channel_times_out() {
        let initiator = HandshakeInitiator::new(
            &HostConfig::new("https://child.example"),
            Arc::new(NullChannel),
        )
        .unwrap();
        let result = initiator.run().await;
        assert!(matches!(result, Err(HostError::HandshakeTimeout)));
    }
}
