//! Telegram long-polling loop.

use std::sync::Arc;

use teloxide::prelude::*;
use tracing::{debug, info};

use crate::relay::Relay;
use crate::telegram::TelegramSink;

const WELCOME: &str = "Hi! Send me a message and I will answer as I think. \
                       Use /reset to start a new conversation.";
const RESET_DONE: &str = "Conversation cleared.";

/// Slash commands the bot reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlashCommand {
    Start,
    Reset,
    /// Any other command; ignored.
    Other,
}

/// Parse a leading `/command` or `/command@botname`.
pub fn parse_slash_command(text: &str) -> Option<SlashCommand> {
    let word = text.trim_start().strip_prefix('/')?.split_whitespace().next()?;
    let name = word.split('@').next().unwrap_or(word);
    Some(match name.to_ascii_lowercase().as_str() {
        "start" => SlashCommand::Start,
        "reset" => SlashCommand::Reset,
        _ => SlashCommand::Other,
    })
}

/// Run the dispatcher until Ctrl-C.
pub async fn run(bot: Bot, relay: Arc<Relay>) {
    let shutdown = relay.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested, finalizing in-flight replies");
            shutdown.cancel();
        }
    });

    let handler = Update::filter_message().endpoint(handle_message);

    info!("Bot started. Press Ctrl+C to stop.");
    Dispatcher::builder(bot, handler)
        .default_handler(|_| async {})
        .dependencies(dptree::deps![relay])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
    info!("Bot stopped");
}

async fn handle_message(bot: Bot, msg: Message, relay: Arc<Relay>) -> ResponseResult<()> {
    let Some(text) = msg.text() else {
        debug!(chat_id = %msg.chat.id, "Ignoring non-text message");
        return Ok(());
    };
    let Some(user) = msg.from.as_ref() else {
        return Ok(());
    };
    let user_id = user.id.to_string();

    if let Some(command) = parse_slash_command(text) {
        match command {
            SlashCommand::Start => {
                bot.send_message(msg.chat.id, WELCOME).await?;
            }
            SlashCommand::Reset => {
                relay.reset(&user_id).await;
                bot.send_message(msg.chat.id, RESET_DONE).await?;
            }
            SlashCommand::Other => {
                debug!(user_id = %user_id, command = text, "Ignoring unknown command");
            }
        }
        return Ok(());
    }

    info!(user_id = %user_id, chat_id = %msg.chat.id, chars = text.chars().count(), "Received message");
    let sink = TelegramSink::new(bot, msg.chat.id);
    // Failures were already shown to the user and logged per turn.
    relay.handle_text(&user_id, text, &sink).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_commands() {
        assert_eq!(parse_slash_command("/start"), Some(SlashCommand::Start));
        assert_eq!(parse_slash_command("/reset"), Some(SlashCommand::Reset));
        assert_eq!(parse_slash_command("/Reset@relay_bot"), Some(SlashCommand::Reset));
        assert_eq!(parse_slash_command("  /start now"), Some(SlashCommand::Start));
    }

    #[test]
    fn test_parse_unknown_command() {
        assert_eq!(parse_slash_command("/help"), Some(SlashCommand::Other));
    }

    #[test]
    fn test_plain_text_is_not_a_command() {
        assert_eq!(parse_slash_command("hello /reset"), None);
        assert_eq!(parse_slash_command("/"), None);
        assert_eq!(parse_slash_command(""), None);
    }
}
