use std::{collections::HashMap, sync::Arc};

use teloxide::{dispatching::Dispatcher, dptree, prelude::*, types::BotCommand};

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{error, info, warn};

use nagbot_core::messaging::throttled::{ThrottleConfig, ThrottledMessenger};
use nagbot_core::{
    config::Config, dispatcher::CommandDispatcher, domain::ChatId,
    messaging::port::MessagingPort, scheduler::SchedulerRegistry, session::SessionStore,
    store::UserStore,
};

use crate::TelegramMessenger;

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub dispatcher: Arc<CommandDispatcher>,
    pub chat_locks: Arc<ChatLocks>,
}

/// Per-chat async locks so inbound messages from one chat are dispatched
/// sequentially while distinct chats proceed concurrently.
#[derive(Default)]
pub struct ChatLocks {
    inner: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl ChatLocks {
    pub async fn lock_chat(&self, chat_id: i64) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            map.entry(chat_id)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

pub async fn run_polling(cfg: Arc<Config>, store: Arc<dyn UserStore>) -> anyhow::Result<()> {
    let bot = Bot::new(cfg.telegram_bot_token.clone());

    if let Ok(me) = bot.get_me().await {
        info!(username = me.username(), "nagbot started");
    }

    register_command_menu(&bot).await;

    // Wrap the raw messenger with a throttling decorator: a delivery tick
    // sends every notification of a user back-to-back.
    let raw_messenger: Arc<dyn MessagingPort> = Arc::new(TelegramMessenger::new(bot.clone()));
    let messenger: Arc<dyn MessagingPort> = Arc::new(ThrottledMessenger::new(
        raw_messenger,
        ThrottleConfig::default(),
    ));

    let scheduler = SchedulerRegistry::new(messenger.clone());
    let sessions = Arc::new(SessionStore::new(cfg.session_ttl));
    let dispatcher = Arc::new(CommandDispatcher::new(
        cfg.clone(),
        store,
        scheduler.clone(),
        sessions,
        messenger,
    ));

    let state = Arc::new(AppState {
        cfg,
        dispatcher,
        chat_locks: Arc::new(ChatLocks::default()),
    });

    let handler = dptree::entry().branch(Update::filter_message().endpoint(handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .build()
        .dispatch()
        .await;

    scheduler.stop_all();
    Ok(())
}

/// One-time registration of the bot command menu (descriptions shown by the
/// Telegram client). Not part of the core state machine; best-effort.
async fn register_command_menu(bot: &Bot) {
    let commands = vec![
        BotCommand::new("state", "notifications, interval and activity"),
        BotCommand::new("run", "run notifications"),
        BotCommand::new("stop", "stop notifications"),
        BotCommand::new("add", "add new notification"),
        BotCommand::new("delete", "delete notification"),
        BotCommand::new("set", "set interval"),
    ];
    if let Err(e) = bot.set_my_commands(commands).await {
        warn!(error = %e, "error setting bot command list");
    }
}

async fn handle_message(msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(text) = msg.text() else {
        return Ok(());
    };
    let chat_id = msg.chat.id.0;

    // Messages from different chats may arrive concurrently; dispatch
    // sequentially per chat.
    let _guard = state.chat_locks.lock_chat(chat_id).await;
    if let Err(e) = state.dispatcher.handle_text(ChatId(chat_id), text).await {
        error!(chat_id, error = %e, "failed to handle message");
    }

    Ok(())
}
