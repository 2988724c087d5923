//! Commands available to every user: subscribe, unsubscribe, list, help.

use log::info;
use log::warn;
use poise::Command;
use poise::CreateReply;

use crate::bot::Data;
use crate::bot::commands::Cog;
use crate::bot::commands::Context;
use crate::bot::commands::Error;
use crate::entity::SubscriptionModel;
use crate::service::subscription_service::SubscribeResult;

const HELP_TEXT: &str = "\
**Бот графіків відключень**
Я перевіряю графік відключень для ваших адрес і надсилаю особисте повідомлення, щойно він зміниться.

`/start місто вулиця будинок` підписатися на адресу
`/stop` скасувати всі підписки
`/list` показати ваші підписки
`/help` ця довідка

Приклад: `/start Кременчук Соборна 10`";

/// Cog for subscription management.
pub struct SubscriptionCog;

impl SubscriptionCog {
    /// Підписатися на оновлення графіку відключень для адреси
    #[poise::command(slash_command)]
    pub async fn start(
        ctx: Context<'_>,
        #[description = "Місто"]
        #[autocomplete = "autocomplete_city"]
        city: String,
        #[description = "Вулиця"]
        #[autocomplete = "autocomplete_street"]
        street: String,
        #[description = "Номер будинку"] house: String,
    ) -> Result<(), Error> {
        let owner_id = ctx.author().id.get();
        let result = ctx
            .data()
            .service
            .subscription
            .subscribe(owner_id, &city, &street, &house)
            .await?;

        let message = match result {
            SubscribeResult::Created { address } => {
                info!("User {owner_id} subscribed to {address}.");
                format!(
                    "✅ Підписку оформлено: **{address}**\nЯ надішлю повідомлення, щойно графік зміниться."
                )
            }
            SubscribeResult::AlreadySubscribed { address } => {
                format!("ℹ️ Ви вже підписані на **{address}**.")
            }
        };
        ctx.send(CreateReply::default().content(message).ephemeral(true))
            .await?;
        Ok(())
    }

    /// Скасувати всі підписки
    #[poise::command(slash_command)]
    pub async fn stop(ctx: Context<'_>) -> Result<(), Error> {
        let owner_id = ctx.author().id.get();
        let removed = ctx
            .data()
            .service
            .subscription
            .unsubscribe_all(owner_id)
            .await?;

        let message = if removed == 0 {
            "У вас немає активних підписок.".to_string()
        } else {
            info!("User {owner_id} removed {removed} subscriptions.");
            format!("🗑️ Скасовано підписок: {removed}.")
        };
        ctx.send(CreateReply::default().content(message).ephemeral(true))
            .await?;
        Ok(())
    }

    /// Показати ваші підписки
    #[poise::command(slash_command)]
    pub async fn list(ctx: Context<'_>) -> Result<(), Error> {
        let service = &ctx.data().service.subscription;
        let subscriptions = service.list(ctx.author().id.get()).await?;
        let threshold = service.db.subscription.error_threshold();

        ctx.send(
            CreateReply::default()
                .content(format_subscriptions(&subscriptions, threshold))
                .ephemeral(true),
        )
        .await?;
        Ok(())
    }

    /// Довідка про команди бота
    #[poise::command(slash_command)]
    pub async fn help(ctx: Context<'_>) -> Result<(), Error> {
        ctx.send(CreateReply::default().content(HELP_TEXT).ephemeral(true))
            .await?;
        Ok(())
    }
}

impl Cog for SubscriptionCog {
    fn commands(&self) -> Vec<Command<Data, Error>> {
        vec![Self::start(), Self::stop(), Self::list(), Self::help()]
    }
}

async fn autocomplete_city(ctx: Context<'_>, partial: &str) -> impl Iterator<Item = String> {
    let suggestions = match ctx
        .data()
        .service
        .subscription
        .city_suggestions(partial)
        .await
    {
        Ok(suggestions) => suggestions,
        Err(e) => {
            warn!("City autocomplete failed: {e}");
            Vec::new()
        }
    };
    suggestions.into_iter()
}

async fn autocomplete_street(ctx: Context<'_>, partial: &str) -> impl Iterator<Item = String> {
    let city = entered_option(ctx, "city").unwrap_or_default();
    let suggestions = match ctx
        .data()
        .service
        .subscription
        .street_suggestions(&city, partial)
        .await
    {
        Ok(suggestions) => suggestions,
        Err(e) => {
            warn!("Street autocomplete failed: {e}");
            Vec::new()
        }
    };
    suggestions.into_iter()
}

/// Value the user already entered for another option of the command being completed.
fn entered_option(ctx: Context<'_>, name: &str) -> Option<String> {
    let poise::Context::Application(app) = ctx else {
        return None;
    };
    app.interaction
        .data
        .options
        .iter()
        .find(|option| option.name == name)
        .and_then(|option| option.value.as_str())
        .map(str::to_string)
}

/// One line per subscription with its check status.
pub fn format_subscriptions(subscriptions: &[SubscriptionModel], error_threshold: u32) -> String {
    if subscriptions.is_empty() {
        return "У вас немає підписок. Скористайтеся `/start`, щоб додати адресу.".to_string();
    }

    let mut lines = vec![format!("📋 **Ваші підписки ({}):**", subscriptions.len())];
    for sub in subscriptions {
        let status = if sub.error_count >= error_threshold {
            "⏸️ перевірку призупинено".to_string()
        } else if let Some(checked_at) = sub.last_checked_at {
            format!("перевірено <t:{}:R>", checked_at.timestamp())
        } else {
            "ще не перевірялась".to_string()
        };
        lines.push(format!("• {} ({status})", sub.address()));
    }
    lines.join("\n")
}
