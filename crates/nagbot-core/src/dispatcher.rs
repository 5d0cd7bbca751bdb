//! Top-level command + reply state machine.
//!
//! Every inbound text is either a fixed command (exact, case-sensitive
//! match), a reply to the chat's pending session, or unrecognized. Fixed
//! commands are state-independent and clear any pending session; replies are
//! only consulted when a session exists.

use std::sync::Arc;

use tracing::warn;

use crate::{
    config::Config,
    domain::{ChatId, SessionKind, UserRecord},
    messaging::port::MessagingPort,
    scheduler::{SchedulerRegistry, StartOutcome, StopOutcome},
    session::SessionStore,
    store::UserStore,
    Result,
};

const HELP_TEXT: &str = "Hello! I can send messages with certain interval. You can control me by sending these commands:\n\
/state - show notifications, whether they are running, and the interval.\n\
/run - start sending notifications.\n\
/stop - stop sending notifications.\n\
/add - add a notification (after the call, the bot asks for the notification text).\n\
/delete - delete the notification (after the call, the bot sends a list of notifications and asks you to specify its number).";

const MSG_NO_NOTIFICATIONS: &str = "You don't have any notifications";
const MSG_RUNNING: &str = "Notifications are running";
const MSG_ALREADY_RUNNING: &str = "Notifications are already running";
const MSG_STOPPED: &str = "Notifications are stopped";
const MSG_ALREADY_STOPPED: &str = "Notifications have already been stopped";
const MSG_ACTIVE: &str = "Notifications are active";
const MSG_DISABLED: &str = "Notifications are disabled";
const MSG_ASK_INTERVAL: &str = "Enter the interval time in minutes, please";
const MSG_ASK_NOTIFICATION: &str = "Enter new notification, please";
const MSG_ASK_DELETE_INDEX: &str = "Enter number of one you want to delete, please";
const MSG_INVALID_NUMBER: &str = "Enter valid number, please";
const MSG_ADDED: &str = "You successfully added new notification";
const MSG_DELETED: &str = "You successfully deleted the notification";
const MSG_UNKNOWN: &str = "Sorry, but I don't understand you";

pub struct CommandDispatcher {
    cfg: Arc<Config>,
    store: Arc<dyn UserStore>,
    scheduler: SchedulerRegistry,
    sessions: Arc<SessionStore>,
    messenger: Arc<dyn MessagingPort>,
}

impl CommandDispatcher {
    pub fn new(
        cfg: Arc<Config>,
        store: Arc<dyn UserStore>,
        scheduler: SchedulerRegistry,
        sessions: Arc<SessionStore>,
        messenger: Arc<dyn MessagingPort>,
    ) -> Self {
        Self {
            cfg,
            store,
            scheduler,
            sessions,
            messenger,
        }
    }

    /// Route one inbound text message from `chat_id`.
    ///
    /// Errors from the user store propagate; transport errors are logged and
    /// swallowed (delivery of bot replies is best-effort).
    pub async fn handle_text(&self, chat_id: ChatId, text: &str) -> Result<()> {
        let user = self
            .store
            .load(chat_id)
            .unwrap_or_else(|| UserRecord::new(chat_id, self.cfg.default_interval_minutes));

        match text {
            "/state" => {
                self.sessions.remove(chat_id);
                self.state_command(&user).await;
                Ok(())
            }
            "/start" => {
                self.sessions.remove(chat_id);
                self.start_command(&user).await
            }
            "/run" => {
                self.sessions.remove(chat_id);
                self.run_command(user).await
            }
            "/stop" => {
                self.sessions.remove(chat_id);
                self.stop_command(user).await
            }
            "/set" => {
                self.send(chat_id, MSG_ASK_INTERVAL).await;
                self.sessions.put(chat_id, SessionKind::AwaitingInterval);
                Ok(())
            }
            "/add" => {
                self.send(chat_id, MSG_ASK_NOTIFICATION).await;
                self.sessions
                    .put(chat_id, SessionKind::AwaitingNewNotification);
                Ok(())
            }
            "/delete" => {
                if user.notifications.is_empty() {
                    self.sessions.remove(chat_id);
                    self.send(chat_id, MSG_NO_NOTIFICATIONS).await;
                } else {
                    self.send(chat_id, &notification_list(&user)).await;
                    self.send(chat_id, MSG_ASK_DELETE_INDEX).await;
                    self.sessions.put(chat_id, SessionKind::AwaitingDeleteIndex);
                }
                Ok(())
            }
            _ => match self.sessions.get(chat_id) {
                Some(kind) => self.handle_reply(kind, user, text).await,
                None => {
                    self.send(chat_id, MSG_UNKNOWN).await;
                    Ok(())
                }
            },
        }
    }

    async fn state_command(&self, user: &UserRecord) {
        let chat_id = user.chat_id;
        if self.scheduler.is_running(chat_id) {
            self.send(chat_id, MSG_ACTIVE).await;
        } else {
            self.send(chat_id, MSG_DISABLED).await;
        }

        let minutes = user.interval_minutes;
        self.send(
            chat_id,
            &format!(
                "Your current interval is {minutes} {}",
                minutes_word(minutes)
            ),
        )
        .await;

        if user.notifications.is_empty() {
            self.send(chat_id, MSG_NO_NOTIFICATIONS).await;
        } else {
            self.send(chat_id, &notification_list(user)).await;
        }
    }

    async fn start_command(&self, user: &UserRecord) -> Result<()> {
        // Idempotent registration: an existing record is left untouched.
        if !self.store.exists(user.chat_id) {
            self.store.save(user)?;
        }
        self.send(user.chat_id, HELP_TEXT).await;
        Ok(())
    }

    async fn run_command(&self, mut user: UserRecord) -> Result<()> {
        let chat_id = user.chat_id;
        if user.notifications.is_empty() {
            self.send(chat_id, MSG_NO_NOTIFICATIONS).await;
            return Ok(());
        }

        match self
            .scheduler
            .start(chat_id, user.interval(), user.notifications.clone())
        {
            StartOutcome::Started => {
                user.active = true;
                self.store.save(&user)?;
                self.send(chat_id, MSG_RUNNING).await;
            }
            StartOutcome::AlreadyRunning => {
                self.send(chat_id, MSG_ALREADY_RUNNING).await;
            }
        }
        Ok(())
    }

    async fn stop_command(&self, mut user: UserRecord) -> Result<()> {
        let chat_id = user.chat_id;
        match self.scheduler.stop(chat_id) {
            StopOutcome::Stopped => {
                user.active = false;
                self.store.save(&user)?;
                self.send(chat_id, MSG_STOPPED).await;
            }
            StopOutcome::NotRunning => {
                self.send(chat_id, MSG_ALREADY_STOPPED).await;
            }
        }
        Ok(())
    }

    async fn handle_reply(
        &self,
        kind: SessionKind,
        user: UserRecord,
        text: &str,
    ) -> Result<()> {
        match kind {
            SessionKind::AwaitingInterval => self.reply_interval(user, text).await,
            SessionKind::AwaitingNewNotification => self.reply_add(user, text).await,
            SessionKind::AwaitingDeleteIndex => self.reply_delete(user, text).await,
        }
    }

    async fn reply_interval(&self, mut user: UserRecord, text: &str) -> Result<()> {
        let chat_id = user.chat_id;
        let minutes = match text.trim().parse::<u32>() {
            Ok(n) if n > 0 => n,
            // Re-prompt and keep the session open; the user gets another try.
            _ => {
                self.send(chat_id, MSG_INVALID_NUMBER).await;
                return Ok(());
            }
        };

        user.interval_minutes = minutes;
        self.store.save(&user)?;

        // A running loop captured its interval at start; restart it so a new
        // full wait period begins at the new length.
        if self.scheduler.is_running(chat_id) {
            self.scheduler
                .restart(chat_id, user.interval(), user.notifications.clone());
        }

        self.sessions.remove(chat_id);
        self.send(
            chat_id,
            &format!(
                "Your interval was changed to {minutes} {}",
                minutes_word(minutes)
            ),
        )
        .await;
        Ok(())
    }

    async fn reply_add(&self, mut user: UserRecord, text: &str) -> Result<()> {
        let chat_id = user.chat_id;
        user.add_notification(text.to_string());
        self.store.save(&user)?;
        self.sessions.remove(chat_id);
        self.send(chat_id, MSG_ADDED).await;
        Ok(())
    }

    async fn reply_delete(&self, mut user: UserRecord, text: &str) -> Result<()> {
        let chat_id = user.chat_id;
        let count = user.notifications.len();
        let index = match text.trim().parse::<usize>() {
            Ok(n) if (1..=count).contains(&n) => n - 1,
            _ => {
                self.send(chat_id, MSG_INVALID_NUMBER).await;
                return Ok(());
            }
        };

        user.delete_notification(index);
        self.store.save(&user)?;
        self.sessions.remove(chat_id);
        self.send(chat_id, MSG_DELETED).await;
        Ok(())
    }

    async fn send(&self, chat_id: ChatId, text: &str) {
        if let Err(e) = self.messenger.send_text(chat_id, text).await {
            warn!(chat_id = chat_id.0, error = %e, "unable to send message");
        }
    }
}

fn minutes_word(n: u32) -> &'static str {
    if n == 1 {
        "minute"
    } else {
        "minutes"
    }
}

fn notification_list(user: &UserRecord) -> String {
    let mut lines = vec!["Your notifications:".to_string()];
    for (i, text) in user.notifications.iter().enumerate() {
        lines.push(format!("{}. {}", i + 1, text));
    }
    lines.join("\n")
}
