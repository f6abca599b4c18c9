//! Telegram message sink.

use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::MessageId;
use teloxide::{ApiError, RequestError};
use tracing::trace;

use relay_core::{MessageSink, SinkError, SlotHandle};

use crate::config::TELEGRAM_MAX_MESSAGE_LENGTH;

/// Messages of one chat, addressed by Telegram message id.
pub struct TelegramSink {
    bot: Bot,
    chat_id: ChatId,
}

impl TelegramSink {
    pub fn new(bot: Bot, chat_id: ChatId) -> Self {
        Self { bot, chat_id }
    }
}

fn message_id(handle: &SlotHandle) -> Result<MessageId, SinkError> {
    i32::try_from(handle.0)
        .map(MessageId)
        .map_err(|_| SinkError::NotFound)
}

/// Telegram measures message length in UTF-16 code units, not chars.
fn check_length(text: &str) -> Result<(), SinkError> {
    let units = text.encode_utf16().count();
    if units > TELEGRAM_MAX_MESSAGE_LENGTH {
        return Err(SinkError::rejected(format!(
            "message is {units} UTF-16 units, limit is {TELEGRAM_MAX_MESSAGE_LENGTH}"
        )));
    }
    Ok(())
}

/// Classify a Bot API failure for the reconciler.
pub fn map_request_error(err: RequestError) -> SinkError {
    match err {
        RequestError::RetryAfter(secs) => SinkError::rate_limited(Some(secs.duration())),
        RequestError::Api(ApiError::MessageNotModified) => SinkError::NotModified,
        RequestError::Api(
            ApiError::MessageToEditNotFound
            | ApiError::MessageToDeleteNotFound
            | ApiError::MessageIdInvalid,
        ) => SinkError::NotFound,
        RequestError::Network(e) => SinkError::transport(e.to_string()),
        RequestError::Io(e) => SinkError::transport(e.to_string()),
        other => SinkError::rejected(other.to_string()),
    }
}

#[async_trait]
impl MessageSink for TelegramSink {
    async fn send(&self, text: &str) -> Result<SlotHandle, SinkError> {
        check_length(text)?;
        let message = self
            .bot
            .send_message(self.chat_id, text)
            .await
            .map_err(map_request_error)?;
        trace!(chat_id = %self.chat_id, message_id = message.id.0, "Sent message");
        Ok(SlotHandle(i64::from(message.id.0)))
    }

    async fn edit(&self, handle: &SlotHandle, text: &str) -> Result<(), SinkError> {
        check_length(text)?;
        self.bot
            .edit_message_text(self.chat_id, message_id(handle)?, text)
            .await
            .map_err(map_request_error)?;
        trace!(chat_id = %self.chat_id, message_id = handle.0, "Edited message");
        Ok(())
    }

    async fn delete(&self, handle: &SlotHandle) -> Result<(), SinkError> {
        self.bot
            .delete_message(self.chat_id, message_id(handle)?)
            .await
            .map_err(map_request_error)?;
        trace!(chat_id = %self.chat_id, message_id = handle.0, "Deleted message");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use teloxide::types::Seconds;

    use super::*;

    #[test]
    fn test_retry_after_becomes_rate_limited() {
        let err = map_request_error(RequestError::RetryAfter(Seconds::from_seconds(7)));
        assert_eq!(err, SinkError::rate_limited(Some(Duration::from_secs(7))));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_not_modified() {
        assert_eq!(
            map_request_error(RequestError::Api(ApiError::MessageNotModified)),
            SinkError::NotModified
        );
    }

    #[test]
    fn test_missing_message_variants_are_not_found() {
        for api in [
            ApiError::MessageToEditNotFound,
            ApiError::MessageToDeleteNotFound,
            ApiError::MessageIdInvalid,
        ] {
            assert_eq!(map_request_error(RequestError::Api(api)), SinkError::NotFound);
        }
    }

    #[test]
    fn test_other_api_errors_are_rejected() {
        let err = map_request_error(RequestError::Api(ApiError::BotBlocked));
        assert!(matches!(err, SinkError::Rejected(_)));
        assert!(!err.is_retryable());

        let err = map_request_error(RequestError::MigrateToChatId(ChatId(-100)));
        assert!(matches!(err, SinkError::Rejected(_)));
    }

    #[test]
    fn test_length_counts_utf16_units() {
        assert_eq!(check_length(&"思".repeat(4000)), Ok(()));
        // 2049 emoji are 4098 UTF-16 units
        let err = check_length(&"😀".repeat(2049)).unwrap_err();
        assert!(matches!(err, SinkError::Rejected(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_handle_out_of_range() {
        assert_eq!(message_id(&SlotHandle(42)), Ok(MessageId(42)));
        assert_eq!(message_id(&SlotHandle(i64::MAX)), Err(SinkError::NotFound));
    }
}
