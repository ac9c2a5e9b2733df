// ABOUTME: Collaborator traits the core reports through: user notices and name lookup.
// ABOUTME: Implemented by the chat front end; SilentNotifier discards everything.

use crate::UserId;
use async_trait::async_trait;

/// Keyboard the front end should show alongside a notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyboard {
    /// The default command menu
    Main,
}

/// A message for one user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub text: String,
    pub keyboard: Option<Keyboard>,
}

impl Notice {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            keyboard: None,
        }
    }

    pub fn with_main_keyboard(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            keyboard: Some(Keyboard::Main),
        }
    }
}

/// Delivers notices to users. Delivery failures are the implementor's to log.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, user_id: UserId, notice: Notice);
}

/// Best-effort lookup of a user's display name.
#[async_trait]
pub trait NameResolver: Send + Sync {
    async fn display_name(&self, user_id: UserId) -> Option<String>;
}

/// Notifier that drops every notice.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentNotifier;

#[async_trait]
impl Notifier for SilentNotifier {
    async fn notify(&self, _user_id: UserId, _notice: Notice) {}
}
