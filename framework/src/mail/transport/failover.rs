use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::warn;

use super::{DeliveryEnvelope, Transport};
use crate::mail::message::Message;
use crate::mail::sent::TransportReceipt;
use crate::mail::MailError;

pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);

#[derive(Default)]
struct Rotation {
    cursor: usize,
    current: Option<usize>,
    dead: HashMap<usize, Instant>,
}

impl Rotation {
    /// Next live member starting at the cursor. A dead member comes back once
    /// `retry_after` has elapsed since it failed.
    fn advance(&mut self, len: usize, retry_after: Duration) -> Option<usize> {
        let start = self.cursor % len;
        let mut index = start;
        loop {
            match self.dead.get(&index) {
                None => break,
                Some(failed_at) if failed_at.elapsed() >= retry_after => {
                    self.dead.remove(&index);
                    break;
                }
                Some(_) => {
                    index = (index + 1) % len;
                    if index == start {
                        return None;
                    }
                }
            }
        }
        self.cursor = (index + 1) % len;
        Some(index)
    }

    /// Failover keeps using the current member until it fails.
    fn next(&mut self, len: usize, retry_after: Duration, sticky: bool) -> Option<usize> {
        if !sticky {
            return self.advance(len, retry_after);
        }
        match self.current {
            Some(current) if !self.dead.contains_key(&current) => Some(current),
            _ => {
                self.current = self.advance(len, retry_after);
                self.current
            }
        }
    }
}

struct Members {
    kind: &'static str,
    transports: Vec<Arc<dyn Transport>>,
    retry_after: Duration,
    sticky: bool,
    rotation: Mutex<Rotation>,
}

impl Members {
    fn new(kind: &'static str, transports: Vec<Arc<dyn Transport>>, sticky: bool) -> Self {
        Self {
            kind,
            transports,
            retry_after: DEFAULT_RETRY_AFTER,
            sticky,
            rotation: Mutex::new(Rotation::default()),
        }
    }

    fn next(&self) -> Option<usize> {
        if self.transports.is_empty() {
            return None;
        }
        self.rotation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .next(self.transports.len(), self.retry_after, self.sticky)
    }

    fn mark_dead(&self, index: usize) {
        self.rotation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .dead
            .insert(index, Instant::now());
    }

    async fn send(
        &self,
        message: &Message,
        envelope: &DeliveryEnvelope,
    ) -> Result<TransportReceipt, MailError> {
        let mut attempted = HashSet::new();
        let mut failures = Vec::new();

        while let Some(index) = self.next() {
            if !attempted.insert(index) {
                break;
            }
            let transport = &self.transports[index];
            match transport.send(message, envelope).await {
                Ok(receipt) => return Ok(receipt),
                Err(e) => {
                    warn!(
                        kind = self.kind,
                        transport = %transport,
                        error = %e,
                        "transport failed, trying next"
                    );
                    failures.push(format!("{transport}: {e}"));
                    self.mark_dead(index);
                }
            }
        }

        let reason = if failures.is_empty() {
            "no transports available".to_string()
        } else {
            format!("all transports failed: {}", failures.join("; "))
        };
        Err(MailError::transport(self, reason))
    }
}

impl fmt::Display for Members {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.transports.iter().map(ToString::to_string).collect();
        write!(f, "{}({})", self.kind, names.join(" "))
    }
}

/// Sends through the first member until it fails, then moves on to the next.
pub struct FailoverTransport(Members);

impl FailoverTransport {
    pub fn new(transports: Vec<Arc<dyn Transport>>) -> Self {
        Self(Members::new("failover", transports, true))
    }

    /// How long a failed member is skipped (default 60s).
    pub fn retry_after(mut self, period: Duration) -> Self {
        self.0.retry_after = period;
        self
    }
}

/// Spreads successive sends over its members, skipping members that recently failed.
pub struct RoundRobinTransport(Members);

impl RoundRobinTransport {
    pub fn new(transports: Vec<Arc<dyn Transport>>) -> Self {
        Self(Members::new("roundrobin", transports, false))
    }

    /// How long a failed member is skipped (default 60s).
    pub fn retry_after(mut self, period: Duration) -> Self {
        self.0.retry_after = period;
        self
    }
}

impl fmt::Display for FailoverTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl fmt::Display for RoundRobinTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

#[async_trait]
impl Transport for FailoverTransport {
    async fn send(
        &self,
        message: &Message,
        envelope: &DeliveryEnvelope,
    ) -> Result<TransportReceipt, MailError> {
        self.0.send(message, envelope).await
    }
}

#[async_trait]
impl Transport for RoundRobinTransport {
    async fn send(
        &self,
        message: &Message,
        envelope: &DeliveryEnvelope,
    ) -> Result<TransportReceipt, MailError> {
        self.0.send(message, envelope).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mail::transport::ArrayTransport;
    use crate::mail::Address;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Broken {
        calls: AtomicUsize,
    }

    impl fmt::Display for Broken {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("broken")
        }
    }

    #[async_trait]
    impl Transport for Broken {
        async fn send(
            &self,
            _: &Message,
            _: &DeliveryEnvelope,
        ) -> Result<TransportReceipt, MailError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(MailError::transport(self, "connection refused"))
        }
    }

    fn broken() -> Arc<Broken> {
        Arc::new(Broken {
            calls: AtomicUsize::new(0),
        })
    }

    fn envelope() -> (Message, DeliveryEnvelope) {
        let mut message = Message::new();
        message.set_from(Address::new("a@x.com")).add_to(Address::new("b@x.com"));
        let envelope = DeliveryEnvelope::from_message(&message).unwrap();
        (message, envelope)
    }

    #[tokio::test]
    async fn failover_sticks_to_the_working_member() {
        let a = broken();
        let b = Arc::new(ArrayTransport::new());
        let failover = FailoverTransport::new(vec![a.clone(), b.clone()]);
        let (message, envelope) = envelope();

        failover.send(&message, &envelope).await.unwrap();
        failover.send(&message, &envelope).await.unwrap();

        assert_eq!(a.calls.load(Ordering::SeqCst), 1);
        assert_eq!(b.len(), 2);
    }

    #[tokio::test]
    async fn round_robin_alternates() {
        let a = Arc::new(ArrayTransport::new());
        let b = Arc::new(ArrayTransport::new());
        let rr = RoundRobinTransport::new(vec![a.clone(), b.clone()]);
        let (message, envelope) = envelope();

        for _ in 0..3 {
            rr.send(&message, &envelope).await.unwrap();
        }

        assert_eq!((a.len(), b.len()), (2, 1));
    }

    #[tokio::test]
    async fn all_members_failing_is_reported_once_each() {
        let a = broken();
        let b = broken();
        let failover =
            FailoverTransport::new(vec![a.clone(), b.clone()]).retry_after(Duration::ZERO);
        let (message, envelope) = envelope();

        let err = failover.send(&message, &envelope).await.unwrap_err();

        assert!(err.to_string().contains("all transports failed"));
        assert_eq!(a.calls.load(Ordering::SeqCst), 1);
        assert_eq!(b.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dead_member_is_retried_after_the_period() {
        let a = broken();
        let b = Arc::new(ArrayTransport::new());
        let rr = RoundRobinTransport::new(vec![a.clone(), b.clone()]).retry_after(Duration::ZERO);
        let (message, envelope) = envelope();

        rr.send(&message, &envelope).await.unwrap();
        rr.send(&message, &envelope).await.unwrap();

        assert_eq!(a.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn display_lists_members() {
        let failover = FailoverTransport::new(vec![
            Arc::new(ArrayTransport::new()),
            Arc::new(crate::mail::transport::LogTransport::default()),
        ]);

        assert_eq!(failover.to_string(), "failover(array log)");
    }
}
