// Moderation commands - manual bans, mutes and limit resets. Each maps 1:1
// to a core mutation; the transport call afterwards is best effort.

use super::{require_operator, Context, Error};
use crate::core::moderation::ChatUserKey;
use crate::relay::enforcement;
use chrono::{Duration, Utc};
use poise::serenity_prelude as serenity;

/// Ban a user, optionally for a number of days (omit for permanent).
#[poise::command(slash_command)]
pub async fn ban(
    ctx: Context<'_>,
    #[description = "User to ban"] user: serenity::User,
    #[description = "Ban length in days (omit or 0 for permanent)"] days: Option<u32>,
) -> Result<(), Error> {
    if !require_operator(&ctx).await? {
        return Ok(());
    }

    let user_id = user.id.get() as i64;
    let until = match days {
        Some(days) if days > 0 => Some(Utc::now() + Duration::days(i64::from(days))),
        _ => None,
    };
    ctx.data().registry.ban(user_id, until);

    // Also remove them from the current guild when invoked there.
    if let Some(guild_id) = ctx.guild_id() {
        let http = &ctx.serenity_context().http;
        if let Err(err) = guild_id
            .ban_with_reason(http, user.id, 0, "banned by operator")
            .await
        {
            tracing::warn!(user_id, %err, "guild ban call failed");
        }
    }

    if let Err(err) = ctx.data().checkpoint("manual") {
        tracing::error!(%err, "checkpoint after ban failed");
    }

    let scope = match days {
        Some(days) if days > 0 => format!("for {days} day(s)"),
        _ => "permanently".to_string(),
    };
    ctx.say(format!("<@{}> banned {scope}.", user.id)).await?;
    Ok(())
}

/// Lift a ban.
#[poise::command(slash_command)]
pub async fn unban(
    ctx: Context<'_>,
    #[description = "User to unban"] user: serenity::User,
) -> Result<(), Error> {
    if !require_operator(&ctx).await? {
        return Ok(());
    }

    let user_id = user.id.get() as i64;
    let existed = ctx.data().registry.unban(user_id);

    if let Some(guild_id) = ctx.guild_id() {
        let http = &ctx.serenity_context().http;
        if let Err(err) = guild_id.unban(http, user.id).await {
            tracing::warn!(user_id, %err, "guild unban call failed");
        }
    }

    if existed {
        if let Err(err) = ctx.data().checkpoint("manual") {
            tracing::error!(%err, "checkpoint after unban failed");
        }
        ctx.say(format!("<@{}> unbanned.", user.id)).await?;
    } else {
        ctx.say(format!("<@{}> was not banned.", user.id)).await?;
    }
    Ok(())
}

/// Mute a user in this chat for a number of minutes.
#[poise::command(slash_command, guild_only)]
pub async fn mute(
    ctx: Context<'_>,
    #[description = "User to mute"] user: serenity::User,
    #[description = "Mute length in minutes (default 60)"] minutes: Option<u32>,
) -> Result<(), Error> {
    if !require_operator(&ctx).await? {
        return Ok(());
    }
    let guild_id = ctx.guild_id().ok_or("This command only works in servers")?;

    let minutes = i64::from(minutes.unwrap_or(60));
    let key = ChatUserKey::new(guild_id.get() as i64, user.id.get() as i64);
    let until = ctx.data().moderation.impose_mute(key, minutes, Utc::now());

    enforcement::timeout_member(
        &ctx.serenity_context().http,
        guild_id,
        user.id,
        until,
    )
    .await;

    ctx.say(format!("<@{}> muted for {minutes} minute(s).", user.id))
        .await?;
    Ok(())
}

/// Lift a mute in this chat.
#[poise::command(slash_command, guild_only)]
pub async fn unmute(
    ctx: Context<'_>,
    #[description = "User to unmute"] user: serenity::User,
) -> Result<(), Error> {
    if !require_operator(&ctx).await? {
        return Ok(());
    }
    let guild_id = ctx.guild_id().ok_or("This command only works in servers")?;

    let key = ChatUserKey::new(guild_id.get() as i64, user.id.get() as i64);
    let existed = ctx.data().moderation.lift_mute(key);

    enforcement::clear_timeout(&ctx.serenity_context().http, guild_id, user.id).await;

    if existed {
        ctx.say(format!("<@{}> unmuted.", user.id)).await?;
    } else {
        ctx.say(format!(
            "<@{}> had no mute on record; permissions restored anyway.",
            user.id
        ))
        .await?;
    }
    Ok(())
}

/// Reset a user's rate limits and spam tracking.
#[poise::command(slash_command)]
pub async fn resetlimits(
    ctx: Context<'_>,
    #[description = "User to reset"] user: serenity::User,
) -> Result<(), Error> {
    if !require_operator(&ctx).await? {
        return Ok(());
    }

    let user_id = user.id.get() as i64;
    ctx.data().limiter.reset_user(user_id);
    ctx.data().scorer.reset_user(user_id);

    ctx.say(format!(
        "Rate limits and spam tracking reset for <@{}>.",
        user.id
    ))
    .await?;
    Ok(())
}

/// Show a user's warning count in this chat.
#[poise::command(slash_command, guild_only)]
pub async fn warnings(
    ctx: Context<'_>,
    #[description = "User to inspect"] user: serenity::User,
) -> Result<(), Error> {
    if !require_operator(&ctx).await? {
        return Ok(());
    }
    let guild_id = ctx.guild_id().ok_or("This command only works in servers")?;

    let key = ChatUserKey::new(guild_id.get() as i64, user.id.get() as i64);
    let count = ctx.data().moderation.warning_count(key);
    let muted = ctx.data().moderation.is_muted(key, Utc::now());

    ctx.say(format!(
        "<@{}>: {count} warning(s) in this chat{}.",
        user.id,
        if muted { ", currently muted" } else { "" }
    ))
    .await?;
    Ok(())
}

/// Clear a user's warnings in this chat.
#[poise::command(slash_command, guild_only)]
pub async fn clearwarnings(
    ctx: Context<'_>,
    #[description = "User to clear"] user: serenity::User,
) -> Result<(), Error> {
    if !require_operator(&ctx).await? {
        return Ok(());
    }
    let guild_id = ctx.guild_id().ok_or("This command only works in servers")?;

    let key = ChatUserKey::new(guild_id.get() as i64, user.id.get() as i64);
    ctx.data().moderation.clear_warnings(key);

    ctx.say(format!("Warnings cleared for <@{}>.", user.id)).await?;
    Ok(())
}
