//! Error handling for Discord bot commands.

use log::error;
use poise::CreateReply;
use poise::FrameworkError;

use crate::bot::Data;
use crate::bot::commands::Context;
use crate::bot::commands::Error;
use crate::bot::error::BotError;
use crate::error::AppError;
use crate::service::error::ServiceError;

/// Handles framework errors and sends appropriate responses to users.
pub struct ErrorHandler;

impl ErrorHandler {
    /// Handles a framework error by classifying and responding appropriately.
    pub async fn handle(error: FrameworkError<'_, Data, Error>) {
        match error {
            FrameworkError::Command { error, ctx, .. } => {
                let (title, description) = Self::classify_error(&error, &ctx);
                let message = format!(
                    "**{}**\nКоманда: `/{}`\n{}",
                    title,
                    ctx.command().qualified_name,
                    description
                );
                Self::reply(&ctx, &message).await;
            }
            FrameworkError::ArgumentParse { error, ctx, .. } => {
                let message = format!(
                    "**⚠️ Некоректні аргументи**\nКоманда: `/{}`\n{}\n\nСкористайтеся `/help`, щоб побачити приклади.",
                    ctx.command().name,
                    error
                );
                Self::reply(&ctx, &message).await;
            }
            error => {
                if let Err(e) = poise::builtins::on_error(error).await {
                    error!("Error while handling error: {}", e);
                }
            }
        }
    }

    /// Classifies an error and returns user-friendly title and description.
    fn classify_error(error: &Error, ctx: &Context<'_>) -> (&'static str, String) {
        if let Some(bot_error) = error.downcast_ref::<BotError>() {
            ("❌ Дію не виконано", bot_error.to_string())
        } else if let Some(ServiceError::InvalidAddress { message }) =
            error.downcast_ref::<ServiceError>()
        {
            (
                "❌ Неповна адреса",
                format!("Вкажіть місто, вулицю та номер будинку. Отримано: {message}"),
            )
        } else {
            let ref_id = AppError::log_with_ref(error);
            error!(
                "Unexpected error in command `{}`: {:?}",
                ctx.command().name,
                error
            );
            (
                "❌ Внутрішня помилка",
                format!("Сталася неочікувана помилка. Спробуйте пізніше.\n-# Код: {ref_id}"),
            )
        }
    }

    async fn reply(ctx: &Context<'_>, message: &str) {
        let _ = ctx
            .send(CreateReply::default().content(message).ephemeral(true))
            .await;
    }
}
