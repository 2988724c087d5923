//! Admin-only commands for watching the checker and lifting quarantine.

use std::time::Duration;

use log::info;
use poise::Command;
use poise::CreateReply;
use serenity::all::User;

use crate::bot::Data;
use crate::bot::checks::check_admin;
use crate::bot::commands::Cog;
use crate::bot::commands::Context;
use crate::bot::commands::Error;
use crate::service::subscription_service::StatsReport;

/// Cog of admin commands.
pub struct AdminCog;

impl AdminCog {
    /// Статистика підписок і перевірок
    #[poise::command(slash_command)]
    pub async fn stats(ctx: Context<'_>) -> Result<(), Error> {
        check_admin(ctx)?;
        let report = ctx.data().service.subscription.stats().await?;
        let uptime = ctx.data().start_time.elapsed();

        ctx.send(
            CreateReply::default()
                .content(format_stats(&report, uptime))
                .ephemeral(true),
        )
        .await?;
        Ok(())
    }

    /// Зняти призупинення перевірок для адреси
    #[poise::command(slash_command)]
    pub async fn reset_errors(
        ctx: Context<'_>,
        #[description = "Місто"] city: String,
        #[description = "Вулиця"] street: String,
        #[description = "Номер будинку"] house: String,
    ) -> Result<(), Error> {
        check_admin(ctx)?;
        let reset = ctx
            .data()
            .service
            .subscription
            .reset_errors(&city, &street, &house)
            .await?;

        let message = if reset == 0 {
            "Підписок на цю адресу не знайдено.".to_string()
        } else {
            info!(
                "Admin {} reset errors for {reset} subscriptions at {city}, {street}, {house}.",
                ctx.author().id
            );
            format!("✅ Лічильник помилок скинуто для {reset} підписок.")
        };
        ctx.send(CreateReply::default().content(message).ephemeral(true))
            .await?;
        Ok(())
    }

    /// Зняти призупинення з усіх підписок користувача
    #[poise::command(slash_command)]
    pub async fn reset_user(
        ctx: Context<'_>,
        #[description = "Користувач"] user: User,
    ) -> Result<(), Error> {
        check_admin(ctx)?;
        let reset = ctx
            .data()
            .service
            .subscription
            .reset_errors_for_owner(user.id.get())
            .await?;

        let message = if reset == 0 {
            format!("У <@{}> немає підписок.", user.id)
        } else {
            info!(
                "Admin {} reset errors for {reset} subscriptions of user {}.",
                ctx.author().id,
                user.id
            );
            format!("✅ Лічильник помилок скинуто для {reset} підписок <@{}>.", user.id)
        };
        ctx.send(CreateReply::default().content(message).ephemeral(true))
            .await?;
        Ok(())
    }
}

impl Cog for AdminCog {
    fn commands(&self) -> Vec<Command<Data, Error>> {
        vec![Self::stats(), Self::reset_errors(), Self::reset_user()]
    }
}

fn format_uptime(uptime: Duration) -> String {
    let secs = uptime.as_secs();
    let (days, hours, minutes) = (secs / 86_400, secs % 86_400 / 3_600, secs % 3_600 / 60);
    if days > 0 {
        format!("{days}д {hours}г {minutes}хв")
    } else {
        format!("{hours}г {minutes}хв")
    }
}

pub fn format_stats(report: &StatsReport, uptime: Duration) -> String {
    let stats = &report.stats;
    let mut lines = vec![
        "📊 **Статистика**".to_string(),
        format!("Час роботи: {}", format_uptime(uptime)),
        format!("Користувачів: {}", stats.users),
        format!("Активних підписок: {}", stats.active),
        format!(
            "Призупинених (≥ {} помилок): {}",
            report.error_threshold, stats.quarantined
        ),
        format!("Середня кількість помилок: {:.2}", stats.average_errors),
    ];

    if !report.most_failing.is_empty() {
        lines.push(String::new());
        lines.push("**Найбільше помилок:**".to_string());
        for sub in &report.most_failing {
            lines.push(format!(
                "• {} ({} помилок, <@{}>)",
                sub.address(),
                sub.error_count,
                sub.owner_id
            ));
        }
    }
    lines.join("\n")
}
