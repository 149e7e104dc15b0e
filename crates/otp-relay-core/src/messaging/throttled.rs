use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

use crate::{
    domain::{DestinationId, MessageRef},
    messaging::{
        port::MessagingPort,
        types::{MessagingCapabilities, OutboundMessage},
    },
    Result,
};

#[derive(Clone, Copy, Debug)]
pub struct ThrottleConfig {
    /// Minimum spacing between *any* outbound calls (global flood control).
    pub global_min_interval: Duration,
    /// Minimum spacing between calls to the same destination.
    pub per_chat_min_interval: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            global_min_interval: Duration::from_millis(40), // ~25/sec
            per_chat_min_interval: Duration::from_millis(1050), // ~0.95/sec
        }
    }
}

#[derive(Debug)]
struct IntervalLimiter {
    interval: Duration,
    next: Instant,
}

impl IntervalLimiter {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            next: Instant::now(),
        }
    }

    /// Reserve the next slot and return the wait duration required before executing.
    fn reserve(&mut self) -> Duration {
        let now = Instant::now();
        let start = if now >= self.next { now } else { self.next };
        self.next = start + self.interval;
        start.saturating_duration_since(now)
    }
}

/// MessagingPort decorator that rate-limits outbound calls.
///
/// Fan-out sends the same payload to every destination back to back, which is exactly the
/// burst pattern Telegram answers with 429. This spaces calls out; the adapter still retries
/// once on `RetryAfter`.
pub struct ThrottledMessenger {
    inner: Arc<dyn MessagingPort>,
    cfg: ThrottleConfig,
    global: Mutex<IntervalLimiter>,
    per_chat: Mutex<HashMap<DestinationId, Arc<Mutex<IntervalLimiter>>>>,
}

impl ThrottledMessenger {
    pub fn new(inner: Arc<dyn MessagingPort>, cfg: ThrottleConfig) -> Self {
        Self {
            inner,
            cfg,
            global: Mutex::new(IntervalLimiter::new(cfg.global_min_interval)),
            per_chat: Mutex::new(HashMap::new()),
        }
    }

    async fn limiter_for(&self, to: &DestinationId) -> Arc<Mutex<IntervalLimiter>> {
        let mut map = self.per_chat.lock().await;
        map.entry(to.clone())
            .or_insert_with(|| {
                Arc::new(Mutex::new(IntervalLimiter::new(
                    self.cfg.per_chat_min_interval,
                )))
            })
            .clone()
    }

    async fn throttle(&self, to: &DestinationId) {
        let global_wait = { self.global.lock().await.reserve() };
        let chat_wait = {
            let lim = self.limiter_for(to).await;
            let mut guard = lim.lock().await;
            guard.reserve()
        };

        let wait = global_wait.max(chat_wait);
        if wait > Duration::ZERO {
            sleep(wait).await;
        }
    }
}

#[async_trait::async_trait]
impl MessagingPort for ThrottledMessenger {
    fn capabilities(&self) -> MessagingCapabilities {
        self.inner.capabilities()
    }

    async fn send(&self, to: &DestinationId, msg: &OutboundMessage) -> Result<MessageRef> {
        self.throttle(to).await;
        self.inner.send(to, msg).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct Recorder {
        sent: StdMutex<Vec<(DestinationId, Instant)>>,
    }

    #[async_trait::async_trait]
    impl MessagingPort for Recorder {
        fn capabilities(&self) -> MessagingCapabilities {
            MessagingCapabilities {
                supports_html: true,
                supports_inline_buttons: true,
                max_message_len: 4096,
            }
        }

        async fn send(&self, to: &DestinationId, _msg: &OutboundMessage) -> Result<MessageRef> {
            self.sent.lock().unwrap().push((to.clone(), Instant::now()));
            Ok(MessageRef {
                destination: to.clone(),
                message_id: 1,
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn spaces_calls_to_the_same_destination() {
        let inner = Arc::new(Recorder::default());
        let throttled = ThrottledMessenger::new(
            inner.clone(),
            ThrottleConfig {
                global_min_interval: Duration::from_millis(10),
                per_chat_min_interval: Duration::from_millis(500),
            },
        );
        let a = DestinationId::from(-1001);
        let b = DestinationId::from(-1002);

        throttled.send_html(&a, "1").await.unwrap();
        throttled.send_html(&b, "2").await.unwrap();
        throttled.send_html(&a, "3").await.unwrap();

        let sent = inner.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 3);
        // Different destinations only wait for the global slot.
        assert!(sent[1].1 - sent[0].1 < Duration::from_millis(100));
        // Same destination waits for its own interval.
        assert!(sent[2].1 - sent[0].1 >= Duration::from_millis(500));
    }
}
