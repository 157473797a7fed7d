// Access-control commands - approval grants and the suspicious-flag reset.
// Thin layer: extract ids, call the core, format the response.

use super::{require_operator, Context, Error};
use chrono::Utc;
use poise::serenity_prelude as serenity;

/// Grant a user access to the private-chat relay.
#[poise::command(slash_command)]
pub async fn grant(
    ctx: Context<'_>,
    #[description = "User to approve"] user: serenity::User,
) -> Result<(), Error> {
    if !require_operator(&ctx).await? {
        return Ok(());
    }

    let user_id = user.id.get() as i64;
    // Approval also lifts any ban and clears the suspicious flag - one
    // admin gesture, not three.
    ctx.data().registry.approve(user_id);
    ctx.data().trust.mark_safe(user_id);

    if let Err(err) = ctx.data().checkpoint("manual") {
        tracing::error!(%err, "checkpoint after grant failed");
    }

    ctx.say(format!("Access granted to <@{}>.", user.id)).await?;
    Ok(())
}

/// Revoke a user's access to the private-chat relay.
#[poise::command(slash_command)]
pub async fn revoke(
    ctx: Context<'_>,
    #[description = "User to revoke"] user: serenity::User,
) -> Result<(), Error> {
    if !require_operator(&ctx).await? {
        return Ok(());
    }

    let user_id = user.id.get() as i64;
    ctx.data().registry.revoke(user_id);

    if let Err(err) = ctx.data().checkpoint("manual") {
        tracing::error!(%err, "checkpoint after revoke failed");
    }

    ctx.say(format!("Access revoked from <@{}>.", user.id)).await?;
    Ok(())
}

/// Clear a user's suspicious flag and zero their violation counters.
#[poise::command(slash_command)]
pub async fn marksafe(
    ctx: Context<'_>,
    #[description = "User to mark safe"] user: serenity::User,
) -> Result<(), Error> {
    if !require_operator(&ctx).await? {
        return Ok(());
    }

    let user_id = user.id.get() as i64;
    ctx.data().trust.mark_safe(user_id);
    ctx.data().registry.mark_safe(user_id, Utc::now());

    if let Err(err) = ctx.data().checkpoint("manual") {
        tracing::error!(%err, "checkpoint after marksafe failed");
    }

    ctx.say(format!("<@{}> marked safe.", user.id)).await?;
    Ok(())
}
