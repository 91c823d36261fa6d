use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::future::BoxFuture;
use teloxide::error_handlers::ErrorHandler;
use teloxide::prelude::*;
use teloxide::types::{ButtonRequest, KeyboardButton, KeyboardMarkup, WebAppInfo};
use teloxide::update_listeners;
use teloxide::RequestError;
use tracing::{debug, info, warn};

use crate::platform::{EventHub, Messenger, TransportFault, WebAppKeyboard};

/// Create the bot and confirm the token against the Bot API.
pub async fn connect(token: &str) -> Result<Bot> {
    let bot = Bot::new(token);
    let me = bot
        .get_me()
        .await
        .context("Failed to initialize Telegram bot")?;
    info!("Telegram bot successfully initialized as @{}", me.username());
    Ok(bot)
}

/// Telegram implementation of [`Messenger`]
#[derive(Clone)]
pub struct TelegramMessenger {
    bot: Bot,
}

impl TelegramMessenger {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

fn web_app_markup(keyboard: &WebAppKeyboard) -> KeyboardMarkup {
    let button = KeyboardButton::new(keyboard.button_text.clone()).request(ButtonRequest::WebApp(
        WebAppInfo {
            url: keyboard.url.clone(),
        },
    ));
    KeyboardMarkup::new(vec![vec![button]]).resize_keyboard()
}

#[async_trait]
impl Messenger for TelegramMessenger {
    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: Option<&WebAppKeyboard>,
    ) -> Result<()> {
        let mut request = self.bot.send_message(ChatId(chat_id), text);
        if let Some(keyboard) = keyboard {
            request = request.reply_markup(web_app_markup(keyboard));
        }
        request.await?;
        Ok(())
    }
}

/// Routes polling errors into the hub instead of the dispatcher's default logger
struct FaultForwarder {
    hub: Arc<EventHub>,
}

impl ErrorHandler<RequestError> for FaultForwarder {
    fn handle_error(self: Arc<Self>, error: RequestError) -> BoxFuture<'static, ()> {
        self.hub.dispatch_fault(&TransportFault::new(error.to_string()));
        Box::pin(async {})
    }
}

/// Long-poll Telegram and feed text messages into the hub until the task is dropped.
pub async fn run(bot: Bot, hub: Arc<EventHub>) -> Result<()> {
    info!("Starting Telegram polling...");

    let handler = Update::filter_message().endpoint(handle_message);
    let listener = update_listeners::polling_default(bot.clone()).await;
    let faults = Arc::new(FaultForwarder { hub: hub.clone() });

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![hub])
        .default_handler(|upd| async move {
            warn!("Unhandled update: {:?}", upd.id);
        })
        .error_handler(LoggingErrorHandler::with_custom_text("telegram"))
        .build()
        .dispatch_with_listener(listener, faults)
        .await;

    Ok(())
}

async fn handle_message(msg: Message, hub: Arc<EventHub>) -> ResponseResult<()> {
    let text = match msg.text() {
        Some(t) => t,
        None => return Ok(()),
    };

    let handled = hub.dispatch_message(msg.chat.id.0, text).await;
    if handled == 0 {
        debug!("Ignoring message in chat {}: no matching command", msg.chat.id);
    }

    Ok(())
}
