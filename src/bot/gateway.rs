//! Direct messages through Discord's HTTP API.

use std::sync::Arc;

use async_trait::async_trait;
use log::debug;
use serenity::all::CreateAttachment;
use serenity::all::CreateMessage;
use serenity::all::Http;
use serenity::all::UserId;

use crate::notifier::Attachment;
use crate::notifier::DeliveryError;
use crate::notifier::MessageGateway;

pub struct DiscordGateway {
    http: Arc<Http>,
}

impl DiscordGateway {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl MessageGateway for DiscordGateway {
    async fn send_direct_message(
        &self,
        user_id: u64,
        text: &str,
        attachment: Option<Attachment>,
    ) -> Result<(), DeliveryError> {
        if user_id == 0 {
            return Err(DeliveryError::UnknownUser { user_id });
        }

        let mut message = CreateMessage::new().content(text);
        if let Some(attachment) = attachment {
            message = message.add_file(CreateAttachment::bytes(
                attachment.bytes,
                attachment.filename,
            ));
        }

        UserId::new(user_id)
            .direct_message(&self.http, message)
            .await
            .map_err(|e| classify(user_id, e))?;
        debug!("Sent direct message to {user_id}.");
        Ok(())
    }
}

fn classify(user_id: u64, error: serenity::Error) -> DeliveryError {
    if let serenity::Error::Http(http_error) = &error
        && let Some(status) = http_error.status_code()
        && let Some(mapped) = classify_status(user_id, status.as_u16())
    {
        return mapped;
    }
    DeliveryError::Gateway(error.to_string())
}

fn classify_status(user_id: u64, status: u16) -> Option<DeliveryError> {
    match status {
        403 => Some(DeliveryError::Forbidden { user_id }),
        404 => Some(DeliveryError::UnknownUser { user_id }),
        429 => Some(DeliveryError::RateLimited),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_status() {
        assert!(matches!(
            classify_status(1, 403),
            Some(DeliveryError::Forbidden { user_id: 1 })
        ));
        assert!(matches!(
            classify_status(1, 404),
            Some(DeliveryError::UnknownUser { user_id: 1 })
        ));
        assert!(matches!(
            classify_status(1, 429),
            Some(DeliveryError::RateLimited)
        ));
        assert!(classify_status(1, 500).is_none());
    }

    #[test]
    fn test_non_http_error_is_gateway_error() {
        let error = serenity::Error::Other("boom");
        assert!(matches!(classify(1, error), DeliveryError::Gateway(_)));
    }
}
