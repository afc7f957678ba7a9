//! Telegram command listener: subscription management and status queries.

use std::sync::Arc;
use std::time;

use svitlo_common::health::HealthHandle;
use svitlo_common::registry::SubscriberRegistry;
use svitlo_common::state::ReachabilityState;
use svitlo_common::subscriber::SubscriberProfile;
use svitlo_common::telegram::{Message, TelegramBot};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::status::current_status;

const HELP: &str = "Commands:\n\
/start - get notified when electricity goes on or off\n\
/stop - stop notifications\n\
/status - current electricity status";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
    Status,
    Help,
}

impl Command {
    /// Reads the command from a message text. Group chats address commands as `/cmd@botname`.
    pub fn parse(text: &str) -> Self {
        let word = text.split_whitespace().next().unwrap_or_default();
        let word = word.split('@').next().unwrap_or_default();
        match word.to_ascii_lowercase().as_str() {
            "/start" => Command::Start,
            "/stop" => Command::Stop,
            "/status" => Command::Status,
            _ => Command::Help,
        }
    }

    fn as_label(&self) -> &'static str {
        match self {
            Command::Start => "start",
            Command::Stop => "stop",
            Command::Status => "status",
            Command::Help => "help",
        }
    }
}

pub struct CommandListener {
    bot: TelegramBot,
    registry: Arc<SubscriberRegistry>,
    state: watch::Receiver<ReachabilityState>,
    poll_timeout: time::Duration,
    retry_interval: time::Duration,
    liveness: Option<HealthHandle>,
}

impl CommandListener {
    pub fn new(
        bot: TelegramBot,
        registry: Arc<SubscriberRegistry>,
        state: watch::Receiver<ReachabilityState>,
        poll_timeout: time::Duration,
        retry_interval: time::Duration,
    ) -> Self {
        Self {
            bot,
            registry,
            state,
            poll_timeout,
            retry_interval,
            liveness: None,
        }
    }

    pub fn with_liveness(mut self, liveness: HealthHandle) -> Self {
        self.liveness = Some(liveness);
        self
    }

    /// Long-polls for commands until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        info!("bot listener started");
        let mut offset: Option<i64> = None;

        loop {
            let result = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                result = self.bot.get_updates(offset, self.poll_timeout) => result,
            };

            // A Telegram outage must not get the whole monitor restarted.
            if let Some(liveness) = &self.liveness {
                liveness.report_healthy();
            }

            match result {
                Ok(updates) => {
                    for update in updates {
                        offset = Some(update.update_id + 1);
                        if let Some(message) = update.message {
                            self.handle(&message).await;
                        }
                    }
                }
                Err(e) => {
                    warn!("failed to fetch bot updates: {}", e);
                    tokio::select! {
                        biased;
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.retry_interval) => {}
                    }
                }
            }
        }

        info!("bot listener stopped");
    }

    pub async fn handle(&self, message: &Message) {
        let Some(text) = message.text.as_deref() else {
            debug!(chat_id = message.chat.id, "ignoring message without text");
            return;
        };

        let command = Command::parse(text);
        metrics::counter!("svitlo_bot_commands_total", "command" => command.as_label())
            .increment(1);

        let reply = self.reply_to(command, message).await;
        if let Err(e) = self.bot.send_message(message.chat.id, &reply).await {
            error!(chat_id = message.chat.id, "failed to reply: {}", e);
        }
    }

    async fn reply_to(&self, command: Command, message: &Message) -> String {
        let chat_id = message.chat.id;
        match command {
            Command::Start => {
                let profile = message
                    .from
                    .as_ref()
                    .map(|user| {
                        SubscriberProfile::new(
                            user.username.as_deref(),
                            Some(user.first_name.as_str()),
                            user.last_name.as_deref(),
                        )
                    })
                    .unwrap_or_default();
                let greeting = if profile.first_name.is_empty() {
                    "Hi!".to_owned()
                } else {
                    format!("Hi {}!", profile.first_name)
                };

                if self
                    .with_registry(move |registry| registry.add(chat_id, profile))
                    .await
                    .unwrap_or(false)
                {
                    format!(
                        "{greeting} You will be notified when electricity goes on or off.\n\n{}",
                        self.status()
                    )
                } else {
                    format!("{greeting} You are already subscribed.\n\n{}", self.status())
                }
            }
            Command::Stop => {
                if self
                    .with_registry(move |registry| registry.deactivate(chat_id))
                    .await
                    .unwrap_or(false)
                {
                    "You will no longer receive notifications. Send /start to subscribe again."
                        .to_owned()
                } else {
                    "You are not subscribed. Send /start to subscribe.".to_owned()
                }
            }
            Command::Status => self.status(),
            Command::Help => HELP.to_owned(),
        }
    }

    fn status(&self) -> String {
        current_status(&self.state.borrow())
    }

    /// Runs blocking registry i/o off the async workers. `None` if the task failed.
    async fn with_registry<T, F>(&self, f: F) -> Option<T>
    where
        F: FnOnce(&SubscriberRegistry) -> T + Send + 'static,
        T: Send + 'static,
    {
        let registry = self.registry.clone();
        match tokio::task::spawn_blocking(move || f(&registry)).await {
            Ok(value) => Some(value),
            Err(e) => {
                error!("subscriber registry task failed: {}", e);
                None
            }
        }
    }
}
