//! Per-user delivery loops and the registry that owns them.
//!
//! Each active user gets one tokio task that repeatedly waits `interval` and
//! then emits every notification text, in list order, until cancelled. The
//! registry enforces "at most one loop per chat" and keeps start/stop for the
//! same chat linearizable while chats never block one another.

use std::{sync::Arc, time::Duration};

use dashmap::{mapref::entry::Entry, DashMap};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{domain::ChatId, messaging::port::MessagingPort};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    NotRunning,
}

#[derive(Clone)]
pub struct SchedulerRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    messenger: Arc<dyn MessagingPort>,
    loops: DashMap<i64, LoopEntry>,
}

struct LoopEntry {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl SchedulerRegistry {
    pub fn new(messenger: Arc<dyn MessagingPort>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                messenger,
                loops: DashMap::new(),
            }),
        }
    }

    /// Register and spawn a delivery loop for `chat_id`. Idempotent: a second
    /// start while one is running reports `AlreadyRunning` and changes
    /// nothing.
    ///
    /// The loop captures `interval` and `notifications` at start time; later
    /// mutations are only observed after an explicit `restart`.
    pub fn start(
        &self,
        chat_id: ChatId,
        interval: Duration,
        notifications: Vec<String>,
    ) -> StartOutcome {
        match self.inner.loops.entry(chat_id.0) {
            Entry::Occupied(_) => StartOutcome::AlreadyRunning,
            Entry::Vacant(slot) => {
                let cancel = CancellationToken::new();
                let messenger = self.inner.messenger.clone();
                let cancel_clone = cancel.clone();
                let handle = tokio::spawn(async move {
                    delivery_loop(messenger, chat_id, interval, notifications, cancel_clone)
                        .await;
                });
                slot.insert(LoopEntry { cancel, handle });
                debug!(chat_id = chat_id.0, ?interval, "delivery loop started");
                StartOutcome::Started
            }
        }
    }

    /// Cancel and deregister the loop for `chat_id`.
    ///
    /// After this returns, no further delivery tick begins. A tick already
    /// emitting is allowed to finish its batch (at most one extra batch); it
    /// never enters a new wait cycle.
    pub fn stop(&self, chat_id: ChatId) -> StopOutcome {
        match self.inner.loops.remove(&chat_id.0) {
            Some((_, entry)) => {
                entry.cancel.cancel();
                debug!(chat_id = chat_id.0, "delivery loop stopped");
                StopOutcome::Stopped
            }
            None => StopOutcome::NotRunning,
        }
    }

    /// Stop-then-start, used when the interval or notification list changes
    /// while the loop is active. The new loop begins a full wait period at
    /// the new interval.
    pub fn restart(
        &self,
        chat_id: ChatId,
        interval: Duration,
        notifications: Vec<String>,
    ) -> StartOutcome {
        self.stop(chat_id);
        self.start(chat_id, interval, notifications)
    }

    pub fn is_running(&self, chat_id: ChatId) -> bool {
        self.inner.loops.contains_key(&chat_id.0)
    }

    /// Cancel every registered loop (process shutdown). Unlike `stop`, this
    /// also aborts the tasks; the process is going away, nothing is owed an
    /// extra batch.
    pub fn stop_all(&self) {
        let keys: Vec<i64> = self.inner.loops.iter().map(|e| *e.key()).collect();
        for key in keys {
            if let Some((_, entry)) = self.inner.loops.remove(&key) {
                entry.cancel.cancel();
                entry.handle.abort();
            }
        }
    }

    pub fn running_count(&self) -> usize {
        self.inner.loops.len()
    }
}

/// Wait `interval`, then emit every notification in list order; repeat until
/// cancelled. The wait comes BEFORE the first batch so `/run` does not spam
/// the user immediately.
async fn delivery_loop(
    messenger: Arc<dyn MessagingPort>,
    chat_id: ChatId,
    interval: Duration,
    notifications: Vec<String>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = sleep(interval) => {
                for text in &notifications {
                    // Best-effort: a failed send never kills the loop or
                    // blocks the rest of the batch.
                    if let Err(e) = messenger.send_text(chat_id, text).await {
                        warn!(chat_id = chat_id.0, error = %e, "notification send failed");
                    }
                }
            }
        }
    }
    debug!(chat_id = chat_id.0, "delivery loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::types::MessagingCapabilities;
    use crate::{Error, Result};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tokio::task::yield_now;
    use tokio::time::advance;

    #[derive(Default)]
    struct FakeMessenger {
        sends: Mutex<Vec<(i64, String)>>,
        fail: Mutex<bool>,
    }

    impl FakeMessenger {
        fn sent(&self) -> Vec<(i64, String)> {
            self.sends.lock().unwrap().clone()
        }

        fn texts(&self) -> Vec<String> {
            self.sent().into_iter().map(|(_, t)| t).collect()
        }

        fn set_failing(&self, fail: bool) {
            *self.fail.lock().unwrap() = fail;
        }
    }

    #[async_trait]
    impl MessagingPort for FakeMessenger {
        fn capabilities(&self) -> MessagingCapabilities {
            MessagingCapabilities {
                supports_command_menu: false,
                max_message_len: 4096,
            }
        }

        async fn send_text(&self, chat_id: ChatId, text: &str) -> Result<()> {
            if *self.fail.lock().unwrap() {
                return Err(Error::External("send failed".to_string()));
            }
            self.sends.lock().unwrap().push((chat_id.0, text.to_string()));
            Ok(())
        }
    }

    fn registry() -> (SchedulerRegistry, Arc<FakeMessenger>) {
        let messenger = Arc::new(FakeMessenger::default());
        let registry = SchedulerRegistry::new(messenger.clone());
        (registry, messenger)
    }

    /// Let spawned loop tasks process any timers fired by `advance`.
    async fn settle() {
        for _ in 0..8 {
            yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn start_is_idempotent() {
        let (registry, _) = registry();
        let chat = ChatId(1);

        assert_eq!(
            registry.start(chat, Duration::from_secs(60), vec!["A".to_string()]),
            StartOutcome::Started
        );
        assert_eq!(
            registry.start(chat, Duration::from_secs(60), vec!["A".to_string()]),
            StartOutcome::AlreadyRunning
        );
        assert_eq!(registry.running_count(), 1);

        registry.stop(chat);
    }

    #[tokio::test(start_paused = true)]
    async fn second_stop_reports_not_running() {
        let (registry, _) = registry();
        let chat = ChatId(1);

        registry.start(chat, Duration::from_secs(60), vec!["A".to_string()]);
        assert_eq!(registry.stop(chat), StopOutcome::Stopped);
        assert_eq!(registry.stop(chat), StopOutcome::NotRunning);
    }

    #[tokio::test(start_paused = true)]
    async fn waits_a_full_interval_before_first_batch() {
        let (registry, messenger) = registry();
        let chat = ChatId(1);

        registry.start(
            chat,
            Duration::from_secs(60),
            vec!["A".to_string(), "B".to_string()],
        );
        settle().await;

        advance(Duration::from_secs(59)).await;
        settle().await;
        assert!(messenger.sent().is_empty());

        advance(Duration::from_secs(2)).await;
        settle().await;
        assert_eq!(messenger.texts(), vec!["A".to_string(), "B".to_string()]);

        registry.stop(chat);
    }

    #[tokio::test(start_paused = true)]
    async fn emits_batches_repeatedly_in_list_order() {
        let (registry, messenger) = registry();
        let chat = ChatId(9);

        registry.start(
            chat,
            Duration::from_secs(60),
            vec!["A".to_string(), "B".to_string()],
        );
        settle().await;

        for _ in 0..3 {
            advance(Duration::from_secs(61)).await;
            settle().await;
        }

        assert_eq!(
            messenger.texts(),
            vec!["A", "B", "A", "B", "A", "B"]
                .into_iter()
                .map(String::from)
                .collect::<Vec<_>>()
        );

        registry.stop(chat);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_prevents_further_ticks() {
        let (registry, messenger) = registry();
        let chat = ChatId(1);

        registry.start(chat, Duration::from_secs(60), vec!["A".to_string()]);
        settle().await;

        advance(Duration::from_secs(61)).await;
        settle().await;
        assert_eq!(messenger.texts(), vec!["A".to_string()]);

        registry.stop(chat);
        settle().await;

        advance(Duration::from_secs(600)).await;
        settle().await;
        assert_eq!(messenger.texts(), vec!["A".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_begins_a_full_wait_at_the_new_interval() {
        let (registry, messenger) = registry();
        let chat = ChatId(1);

        registry.start(chat, Duration::from_secs(60), vec!["A".to_string()]);
        settle().await;

        advance(Duration::from_secs(61)).await;
        settle().await;
        assert_eq!(messenger.texts().len(), 1);

        assert_eq!(
            registry.restart(chat, Duration::from_secs(120), vec!["A".to_string()]),
            StartOutcome::Started
        );
        settle().await;

        // No double emission in the old cadence; next batch only after the
        // new, longer wait has fully elapsed.
        advance(Duration::from_secs(119)).await;
        settle().await;
        assert_eq!(messenger.texts().len(), 1);

        advance(Duration::from_secs(2)).await;
        settle().await;
        assert_eq!(messenger.texts().len(), 2);

        registry.stop(chat);
    }

    #[tokio::test(start_paused = true)]
    async fn send_failures_do_not_kill_the_loop() {
        let (registry, messenger) = registry();
        let chat = ChatId(1);

        registry.start(chat, Duration::from_secs(60), vec!["A".to_string()]);
        settle().await;

        messenger.set_failing(true);
        advance(Duration::from_secs(61)).await;
        settle().await;
        assert!(messenger.sent().is_empty());

        messenger.set_failing(false);
        advance(Duration::from_secs(61)).await;
        settle().await;
        assert_eq!(messenger.texts(), vec!["A".to_string()]);

        registry.stop(chat);
    }

    #[tokio::test(start_paused = true)]
    async fn loops_for_distinct_chats_are_independent() {
        let (registry, messenger) = registry();

        registry.start(ChatId(1), Duration::from_secs(60), vec!["one".to_string()]);
        registry.start(ChatId(2), Duration::from_secs(120), vec!["two".to_string()]);
        settle().await;

        advance(Duration::from_secs(61)).await;
        settle().await;
        assert_eq!(messenger.sent(), vec![(1, "one".to_string())]);

        registry.stop(ChatId(1));
        advance(Duration::from_secs(60)).await;
        settle().await;
        assert_eq!(
            messenger.sent(),
            vec![(1, "one".to_string()), (2, "two".to_string())]
        );

        registry.stop_all();
        assert_eq!(registry.running_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn racing_start_and_stop_never_leave_two_loops() {
        let (registry, _) = registry();
        let chat = ChatId(1);

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let r = registry.clone();
            tasks.push(tokio::spawn(async move {
                r.start(chat, Duration::from_secs(60), vec!["A".to_string()]);
                yield_now().await;
                r.stop(chat);
            }));
            let r = registry.clone();
            tasks.push(tokio::spawn(async move {
                r.stop(chat);
                yield_now().await;
                r.start(chat, Duration::from_secs(60), vec!["A".to_string()]);
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }

        assert!(registry.running_count() <= 1);
        registry.stop_all();
        assert_eq!(registry.running_count(), 0);
    }
}
