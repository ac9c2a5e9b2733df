// ABOUTME: Telegram bot wrapper using teloxide Long Polling.
// ABOUTME: Sends notices with the main keyboard and resolves user names for the core.

use crate::config::TelegramConfig;
use crate::error::{BridgeError, Result};
use async_trait::async_trait;
use scripthost_core::{Keyboard, NameResolver, Notice, Notifier};
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{Document, KeyboardButton, KeyboardMarkup, Me};
use tracing::{debug, info, warn};

/// Largest document the bot will accept as a script.
pub const MAX_SCRIPT_BYTES: u32 = 1024 * 1024;

/// Telegram bot wrapper for Long Polling communication.
#[derive(Clone)]
pub struct ScriptHostBot {
    bot: Bot,
    me: Me,
}

impl ScriptHostBot {
    /// Create a new Telegram bot client and authenticate.
    pub async fn new(config: &TelegramConfig) -> Result<Self> {
        info!("Initializing Telegram bot");

        let bot = Bot::new(&config.bot_token);

        let me = bot.get_me().await.map_err(|e| {
            BridgeError::Telegram(format!("Failed to authenticate with Telegram: {}", e))
        })?;

        info!(
            bot_id = me.id.0,
            bot_username = ?me.username(),
            "Telegram authentication successful"
        );

        Ok(Self { bot, me })
    }

    /// Get a reference to the underlying teloxide Bot.
    pub fn inner(&self) -> &Bot {
        &self.bot
    }

    pub fn bot_id(&self) -> teloxide::types::UserId {
        self.me.id
    }

    /// Send plain text to a chat, optionally with a keyboard.
    pub async fn send_message(
        &self,
        chat_id: ChatId,
        text: &str,
        keyboard: Option<Keyboard>,
    ) -> Result<Message> {
        debug!(chat_id = chat_id.0, text_len = text.len(), "Sending message to Telegram");

        let mut request = self.bot.send_message(chat_id, text);
        if let Some(keyboard) = keyboard {
            request = request.reply_markup(keyboard_markup(keyboard));
        }

        let message = request.await?;
        debug!(message_id = message.id.0, "Message sent successfully");
        Ok(message)
    }

    /// Download an uploaded document into memory.
    pub async fn download_document(&self, document: &Document) -> Result<Vec<u8>> {
        if document.file.size > MAX_SCRIPT_BYTES {
            return Err(BridgeError::Telegram(format!(
                "File is too large ({} bytes, limit {})",
                document.file.size, MAX_SCRIPT_BYTES
            )));
        }
        let file = self.bot.get_file(document.file.id.clone()).await?;
        let mut contents = Vec::with_capacity(file.size as usize);
        self.bot.download_file(&file.path, &mut contents).await?;
        debug!(bytes = contents.len(), "Document downloaded");
        Ok(contents)
    }
}

/// Reply keyboard for a keyboard hint.
pub fn keyboard_markup(keyboard: Keyboard) -> KeyboardMarkup {
    match keyboard {
        Keyboard::Main => KeyboardMarkup::new(vec![
            vec![KeyboardButton::new("/scripts"), KeyboardButton::new("/help")],
        ]),
    }
}

#[async_trait]
impl Notifier for ScriptHostBot {
    async fn notify(&self, user_id: scripthost_core::UserId, notice: Notice) {
        if let Err(e) = self
            .send_message(ChatId(user_id), &notice.text, notice.keyboard)
            .await
        {
            warn!(user_id, error = %e, "Failed to deliver notice");
        }
    }
}

#[async_trait]
impl NameResolver for ScriptHostBot {
    async fn display_name(&self, user_id: scripthost_core::UserId) -> Option<String> {
        match self.bot.get_chat(ChatId(user_id)).await {
            Ok(chat) => chat.first_name().map(str::to_string),
            Err(e) => {
                debug!(user_id, error = %e, "Could not resolve user name");
                None
            }
        }
    }
}
