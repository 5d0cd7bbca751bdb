use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Telegram chat id (numeric). Doubles as the user identity: the bot talks
/// to one user per private chat.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatId(pub i64);

/// Persisted per-user record.
///
/// `notifications` is ordered: insertion order is the delivery order and the
/// 1-based index users reference with `/delete`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub chat_id: ChatId,
    pub active: bool,
    pub interval_minutes: u32,
    pub notifications: Vec<String>,
}

impl UserRecord {
    pub fn new(chat_id: ChatId, interval_minutes: u32) -> Self {
        Self {
            chat_id,
            active: false,
            interval_minutes,
            notifications: Vec::new(),
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.interval_minutes) * 60)
    }

    pub fn add_notification(&mut self, text: String) {
        self.notifications.push(text);
    }

    /// Remove the notification at a 0-based index, shifting later entries
    /// down. Returns false (list untouched) when the index is out of range.
    pub fn delete_notification(&mut self, index: usize) -> bool {
        if index >= self.notifications.len() {
            return false;
        }
        self.notifications.remove(index);
        true
    }
}

/// Which pending prompt the next free-text reply from a chat answers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionKind {
    AwaitingInterval,
    AwaitingNewNotification,
    AwaitingDeleteIndex,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delete_shifts_later_entries_down() {
        let mut user = UserRecord::new(ChatId(1), 45);
        user.add_notification("a".to_string());
        user.add_notification("b".to_string());
        user.add_notification("c".to_string());

        assert!(user.delete_notification(1));
        assert_eq!(user.notifications, vec!["a".to_string(), "c".to_string()]);
    }

    #[test]
    fn delete_out_of_range_leaves_list_unchanged() {
        let mut user = UserRecord::new(ChatId(1), 45);
        user.add_notification("a".to_string());

        assert!(!user.delete_notification(1));
        assert_eq!(user.notifications, vec!["a".to_string()]);
    }

    #[test]
    fn interval_converts_minutes_to_duration() {
        let user = UserRecord::new(ChatId(1), 2);
        assert_eq!(user.interval(), Duration::from_secs(120));
    }
}
