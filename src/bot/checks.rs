use crate::bot::commands::Context;
use crate::bot::commands::Error;
use crate::bot::error::BotError;

/// Fails the command unless the author is one of the configured admins.
pub fn check_admin(ctx: Context<'_>) -> Result<(), Error> {
    Ok(check_admin_inner(
        ctx.author().id.get(),
        &ctx.data().config.admin_ids,
    )?)
}

fn check_admin_inner(user_id: u64, admin_ids: &[u64]) -> Result<(), BotError> {
    if admin_ids.contains(&user_id) {
        return Ok(());
    }
    Err(BotError::PermissionDenied(
        "Ця команда доступна лише адміністраторам бота.".to_string(),
    ))
}
