use std::sync::Arc;

use reqwest::Url;
use tracing::{error, info};

use crate::platform::{
    CommandPattern, EventHub, IncomingCommand, Messenger, TransportFault, WebAppKeyboard,
};

pub const START_COMMAND: &str = "/start";

const WELCOME_TEXT: &str =
    "👋 Welcome to our Mini App!\n\nClick the button below to open the application:";
const OPEN_BUTTON_TEXT: &str = "🚀 Open Web App";
const APOLOGY_TEXT: &str = "❌ Sorry, something went wrong. Please try again later.";

/// The bot side of the relay: answers `/start` with a button into the Mini App.
pub struct BotSession {
    messenger: Arc<dyn Messenger>,
    web_app_url: Url,
}

impl BotSession {
    pub fn new(messenger: Arc<dyn Messenger>, web_app_url: Url) -> Self {
        Self {
            messenger,
            web_app_url,
        }
    }

    /// Subscribe the session's handlers on `hub`
    pub fn register(session: &Arc<Self>, hub: &mut EventHub) {
        let session = Arc::clone(session);
        hub.on_command(CommandPattern::new(START_COMMAND), move |cmd| {
            let session = session.clone();
            async move { session.handle_start(&cmd).await }
        });
        hub.on_transport_fault(log_transport_fault);
    }

    fn welcome_keyboard(&self) -> WebAppKeyboard {
        WebAppKeyboard {
            button_text: OPEN_BUTTON_TEXT.to_string(),
            url: self.web_app_url.clone(),
        }
    }

    /// Send the welcome message; on failure send a single plain-text apology.
    pub async fn handle_start(&self, cmd: &IncomingCommand) {
        let chat_id = cmd.chat_id;
        let keyboard = self.welcome_keyboard();

        match self
            .messenger
            .send_message(chat_id, WELCOME_TEXT, Some(&keyboard))
            .await
        {
            Ok(()) => info!("Start command handled for chat ID: {}", chat_id),
            Err(e) => {
                error!("Error handling /start command for chat {}: {:#}", chat_id, e);
                // Best effort, not retried
                if let Err(e) = self.messenger.send_message(chat_id, APOLOGY_TEXT, None).await {
                    error!("Failed to send apology to chat {}: {:#}", chat_id, e);
                }
            }
        }
    }
}

fn log_transport_fault(fault: &TransportFault) {
    error!("Bot polling error: {}", fault);
}
