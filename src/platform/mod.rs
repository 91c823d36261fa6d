pub mod telegram;

use std::future::Future;

use anyhow::Result;
use async_trait::async_trait;
use futures::future::BoxFuture;
use reqwest::Url;

/// A command message received from the messaging platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingCommand {
    /// Platform-specific chat ID the reply goes back to
    pub chat_id: i64,
    /// The full message text, command included
    pub text: String,
}

/// The long-lived platform connection was interrupted
#[derive(Debug, Clone)]
pub struct TransportFault {
    pub message: String,
}

impl TransportFault {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for TransportFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

/// Reply keyboard holding a single button that opens a Web App
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebAppKeyboard {
    pub button_text: String,
    pub url: Url,
}

/// Outbound side of a messaging platform.
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: Option<&WebAppKeyboard>,
    ) -> Result<()>;
}

/// Matches a bot command anywhere in a message, case-sensitively.
///
/// This is a substring test, so `/start payload`, `/start_extra` and
/// `hello /start` all match `/start`.
#[derive(Debug, Clone)]
pub struct CommandPattern {
    command: String,
}

impl CommandPattern {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    pub fn matches(&self, text: &str) -> bool {
        text.contains(self.command.as_str())
    }
}

type CommandHandler = Box<dyn Fn(IncomingCommand) -> BoxFuture<'static, ()> + Send + Sync>;
type FaultHandler = Box<dyn Fn(&TransportFault) + Send + Sync>;

/// Subscription point between a platform transport and the code reacting to it.
/// Transports feed events in; handlers never see the concrete transport.
#[derive(Default)]
pub struct EventHub {
    commands: Vec<(CommandPattern, CommandHandler)>,
    fault_handlers: Vec<FaultHandler>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `handler` for every message whose text matches `pattern`
    pub fn on_command<F, Fut>(&mut self, pattern: CommandPattern, handler: F)
    where
        F: Fn(IncomingCommand) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let boxed: CommandHandler =
            Box::new(move |cmd: IncomingCommand| -> BoxFuture<'static, ()> {
                Box::pin(handler(cmd))
            });
        self.commands.push((pattern, boxed));
    }

    /// Run `handler` whenever the transport reports a connection fault
    pub fn on_transport_fault<F>(&mut self, handler: F)
    where
        F: Fn(&TransportFault) + Send + Sync + 'static,
    {
        self.fault_handlers.push(Box::new(handler));
    }

    /// Deliver a message to all matching command handlers, in registration
    /// order. Returns how many handlers ran.
    pub async fn dispatch_message(&self, chat_id: i64, text: &str) -> usize {
        let mut handled = 0;
        for (pattern, handler) in &self.commands {
            if pattern.matches(text) {
                handler(IncomingCommand {
                    chat_id,
                    text: text.to_string(),
                })
                .await;
                handled += 1;
            }
        }
        handled
    }

    pub fn dispatch_fault(&self, fault: &TransportFault) {
        for handler in &self.fault_handlers {
            handler(fault);
        }
    }
}
