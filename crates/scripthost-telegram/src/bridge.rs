// ABOUTME: Routes Telegram messages to the script host core.
// ABOUTME: Authorization gate, document uploads, and command dispatch under one state lock.

use crate::commands::{execute_command, Command, CommandContext};
use crate::error::Result;
use crate::telegram::ScriptHostBot;
use scripthost_core::{AdmissionControl, Keyboard, Supervisor, UserId};
use std::sync::Arc;
use teloxide::types::{ChatId, Message};
use tokio::sync::Mutex;
use tracing::{debug, error, info};

/// Everything that makes supervisory decisions, serialized behind one lock.
pub struct HostState {
    pub supervisor: Supervisor,
    pub admission: AdmissionControl,
}

impl AsMut<Supervisor> for HostState {
    fn as_mut(&mut self) -> &mut Supervisor {
        &mut self.supervisor
    }
}

/// A text or captioned document message, reduced to what the bridge needs.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub chat_id: i64,
    pub user_id: UserId,
    pub text: String,
}

impl IncomingMessage {
    pub fn from_message(msg: &Message) -> Option<Self> {
        let user_id = i64::try_from(msg.from.as_ref()?.id.0).ok()?;
        let text = msg.text().or_else(|| msg.caption())?.to_string();
        Some(Self {
            chat_id: msg.chat.id.0,
            user_id,
            text,
        })
    }
}

pub struct Bridge {
    telegram: ScriptHostBot,
    state: Arc<Mutex<HostState>>,
}

impl Bridge {
    pub fn new(telegram: ScriptHostBot, state: Arc<Mutex<HostState>>) -> Self {
        Self { telegram, state }
    }

    /// Handle an incoming Telegram message.
    pub async fn handle_message(&self, msg: &Message) -> Result<()> {
        let Some(incoming) = IncomingMessage::from_message(msg) else {
            return Ok(());
        };
        let chat_id = ChatId(incoming.chat_id);

        if incoming.user_id == self.telegram.bot_id().0 as i64 {
            return Ok(());
        }

        let Some(command) = Command::from_message(&incoming.text) else {
            debug!(user_id = incoming.user_id, "Ignoring non-command message");
            return Ok(());
        };

        let authorized = self
            .state
            .lock()
            .await
            .admission
            .is_authorized(incoming.user_id);
        if !authorized {
            debug!(user_id = incoming.user_id, "Message from unauthorized user");
            if command == Command::Help {
                self.telegram
                    .send_message(chat_id, "🚫 You're not authorised to use this bot.", None)
                    .await?;
            }
            return Ok(());
        }

        info!(
            chat_id = incoming.chat_id,
            user_id = incoming.user_id,
            ?command,
            "Processing command"
        );

        // Downloads happen before taking the lock
        let upload = match (&command, msg.document()) {
            (Command::Host(_), Some(document)) => {
                match self.telegram.download_document(document).await {
                    Ok(contents) => Some(contents),
                    Err(e) => {
                        error!(user_id = incoming.user_id, error = %e, "Failed to download script");
                        self.telegram
                            .send_message(
                                chat_id,
                                &format!("❌ Sorry, an error occurred while saving the file: {e}"),
                                Some(Keyboard::Main),
                            )
                            .await?;
                        return Ok(());
                    }
                }
            }
            _ => None,
        };

        let response = {
            let mut state = self.state.lock().await;
            let ctx = CommandContext {
                state: &mut *state,
                user_id: incoming.user_id,
                resolver: &self.telegram,
                upload,
            };
            match execute_command(command, ctx).await {
                Ok(resp) => resp,
                Err(e) => {
                    error!(user_id = incoming.user_id, error = %e, "Command failed");
                    Some(format!("❌ Command error: {}", e))
                }
            }
        };

        if let Some(text) = response {
            self.telegram
                .send_message(chat_id, &text, Some(Keyboard::Main))
                .await?;
        }
        Ok(())
    }
}
