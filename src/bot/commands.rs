use chrono::{DateTime, Utc};
use log::{debug, error, info};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::bot::rate_limit::RateLimitLedger;
use crate::config::DEFAULT_COMMAND_PREFIX;
use crate::types::{CommandFn, CommandHandler, HandlerFuture, OutboundAction};

/// Built-in command that lists every registered command
pub const LIST_COMMAND: &str = "cmd";

/// Work to do once a message has been routed
#[derive(Clone)]
pub enum Dispatch {
    /// Send this text as-is
    Reply(String),
    /// Run a registered function
    Invoke {
        command: String,
        handler: Arc<CommandFn>,
        args: Vec<String>,
        is_moderator: bool,
    },
}

/// Outcome of routing one chat message
#[derive(Clone)]
pub enum RouteOutcome {
    /// No prefix, or nothing after it
    NotCommand,
    /// Identical command ran too recently for a non-moderator
    RateLimited,
    /// Unknown command, or `cmd` with an empty registry
    Ignored,
    Dispatched(Dispatch),
}

impl RouteOutcome {
    pub fn is_dispatched(&self) -> bool {
        matches!(self, RouteOutcome::Dispatched(_))
    }
}

/// Command registry and prefix routing
pub struct CommandSystem {
    commands: HashMap<String, CommandHandler>,
    command_prefix: String,
}

impl Default for CommandSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandSystem {
    pub fn new() -> Self {
        Self {
            commands: HashMap::new(),
            command_prefix: DEFAULT_COMMAND_PREFIX.to_string(),
        }
    }

    /// Set the command prefix (default is "!")
    pub fn set_command_prefix(&mut self, prefix: String) {
        self.command_prefix = prefix;
        info!("Command prefix set to: {}", self.command_prefix);
    }

    pub fn command_prefix(&self) -> &str {
        &self.command_prefix
    }

    /// Register a command. Names are matched case-insensitively.
    pub fn add_command(&mut self, name: &str, handler: CommandHandler) {
        let name = name.to_lowercase();
        info!("Registered command: {}{}", self.command_prefix, name);
        self.commands.insert(name, handler);
    }

    pub fn command_exists(&self, name: &str) -> bool {
        self.commands.contains_key(&name.to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Sorted, prefixed listing of every registered command
    pub fn listing(&self) -> Option<String> {
        if self.commands.is_empty() {
            return None;
        }
        let mut names: Vec<&String> = self.commands.keys().collect();
        names.sort();
        let names: Vec<String> = names
            .into_iter()
            .map(|name| format!("{}{}", self.command_prefix, name))
            .collect();
        Some(format!("Commands: {}", names.join(", ")))
    }

    /// Resolve a message to a dispatch decision, applying the cooldown.
    pub fn route(
        &self,
        sender: &str,
        raw: &str,
        is_moderator: bool,
        ledger: &mut RateLimitLedger,
        now: DateTime<Utc>,
    ) -> RouteOutcome {
        let Some(content) = raw.strip_prefix(self.command_prefix.as_str()) else {
            return RouteOutcome::NotCommand;
        };

        let content = content.trim().to_lowercase();
        let mut parts = content.split_whitespace();
        let Some(command) = parts.next() else {
            return RouteOutcome::NotCommand;
        };
        let command = command.to_string();
        let args: Vec<String> = parts.map(String::from).collect();

        if !ledger.check_and_record(&content, now, is_moderator) {
            debug!("Rate limited '{}' from '{}'", content, sender);
            return RouteOutcome::RateLimited;
        }

        debug!("Routing command '{}' from '{}' ({} args)", command, sender, args.len());

        match self.commands.get(&command) {
            Some(CommandHandler::Static(text)) => RouteOutcome::Dispatched(Dispatch::Reply(text.clone())),
            Some(CommandHandler::Invocable(handler)) => RouteOutcome::Dispatched(Dispatch::Invoke {
                command,
                handler: Arc::clone(handler),
                args,
                is_moderator,
            }),
            None if command == LIST_COMMAND => match self.listing() {
                Some(listing) => RouteOutcome::Dispatched(Dispatch::Reply(listing)),
                None => RouteOutcome::Ignored,
            },
            None => {
                debug!("Unknown command: {}", command);
                RouteOutcome::Ignored
            }
        }
    }
}

/// Deliver a dispatch to the outbound channel.
///
/// Replies are sent before returning. Invocations run on their own task so
/// a slow handler never holds up the event stream; the handle is returned.
pub async fn execute(dispatch: Dispatch, response_sender: &mpsc::Sender<OutboundAction>) -> Option<JoinHandle<()>> {
    match dispatch {
        Dispatch::Reply(text) => {
            send_reply(response_sender, text).await;
            None
        }
        Dispatch::Invoke { command, handler, args, is_moderator } => {
            let response_sender = response_sender.clone();
            Some(tokio::spawn(async move {
                let output = invoke_guarded(&command, move || handler(args, is_moderator)).await;
                if let Some(text) = output {
                    send_reply(&response_sender, text).await;
                }
            }))
        }
    }
}

/// Run a handler on its own task so errors and panics stay contained.
/// Anything other than non-empty text counts as "no output".
pub(crate) async fn invoke_guarded<F>(label: &str, make_future: F) -> Option<String>
where
    F: FnOnce() -> HandlerFuture + Send + 'static,
{
    match tokio::spawn(async move { make_future().await }).await {
        Ok(Ok(Some(text))) if !text.is_empty() => Some(text),
        Ok(Ok(_)) => {
            debug!("Handler '{}' produced no output", label);
            None
        }
        Ok(Err(e)) => {
            error!("Handler '{}' failed: {}", label, e);
            None
        }
        Err(e) => {
            error!("Handler '{}' panicked: {}", label, e);
            None
        }
    }
}

async fn send_reply(response_sender: &mpsc::Sender<OutboundAction>, text: String) {
    if response_sender.send(OutboundAction::say(text)).await.is_err() {
        debug!("Outbound channel closed, dropping reply");
    }
}

/// Convenience for registering many static commands at once
pub fn static_commands(commands: &HashMap<String, String>) -> Vec<(String, CommandHandler)> {
    commands
        .iter()
        .map(|(name, text)| (name.clone(), CommandHandler::text(text.clone())))
        .collect()
}
