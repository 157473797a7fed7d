// Status, persistence and session commands.

use super::{require_operator, Context, Error};
use crate::core::registry::PLACEHOLDER_NAME;
use chrono::Utc;

/// Show your own usage and trust status.
#[poise::command(slash_command)]
pub async fn status(ctx: Context<'_>) -> Result<(), Error> {
    let now = Utc::now();
    let user_id = ctx.author().id.get() as i64;
    let data = ctx.data();

    let record = data
        .registry
        .get_or_create(user_id, &ctx.author().name, now);
    let usage = data.limiter.usage(user_id, now);
    let config = &data.config;

    let name = if record.username == PLACEHOLDER_NAME {
        ctx.author().name.clone()
    } else {
        record.username.clone()
    };

    ctx.say(format!(
        "Status for {name}\n\
         Messages: {} | Violations: {} | Warnings: {}\n\
         Verification: {:?}\n\
         Rate: {}/{} per minute, {}/{} per hour, cooldown {}s\n\
         First seen: {}",
        record.message_count,
        record.spam_score,
        record.warnings,
        record.verification_status,
        usage.messages_last_minute,
        config.max_messages_per_minute,
        usage.messages_last_hour,
        config.max_messages_per_hour,
        usage.cooldown_secs,
        record.first_seen.format("%Y-%m-%d"),
    ))
    .await?;
    Ok(())
}

/// Operator overview: users, groups, spam indexes, backups.
#[poise::command(slash_command)]
pub async fn adminstatus(ctx: Context<'_>) -> Result<(), Error> {
    if !require_operator(&ctx).await? {
        return Ok(());
    }

    let data = ctx.data();
    let registry = data.registry.stats();
    let spam = data.scorer.stats();
    let backups = data.store.list_backups().map(|b| b.len()).unwrap_or(0);
    let uptime = Utc::now() - data.registry.session_start();

    ctx.say(format!(
        "Session {} | up {}h {}m\n\
         Users: {} known, {} approved, {} banned, {} suspicious\n\
         Groups: {} ({} active)\n\
         Spam: {} fingerprints, {} cadence entries, {} patterns\n\
         Violations in window: {} | History: {}\n\
         Backups: {} | Last: {}",
        data.registry.session_id(),
        uptime.num_hours(),
        uptime.num_minutes() % 60,
        registry.known_users,
        registry.approved_users,
        registry.banned_users,
        data.trust.suspicious_count(),
        registry.total_groups,
        registry.active_groups,
        spam.tracked_fingerprints,
        spam.tracked_users,
        spam.pattern_count,
        registry.violation_entries,
        registry.history_entries,
        backups,
        data.registry
            .last_backup()
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "never".to_string()),
    ))
    .await?;
    Ok(())
}

/// Write a manual backup now.
#[poise::command(slash_command)]
pub async fn backup(ctx: Context<'_>) -> Result<(), Error> {
    if !require_operator(&ctx).await? {
        return Ok(());
    }

    let data = ctx.data();
    let snapshot = data.capture_snapshot("manual");
    match data.store.write_backup(&snapshot) {
        Ok(path) => {
            data.registry.set_last_backup(Utc::now());
            let filename = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());
            ctx.say(format!("Backup created: {filename}")).await?;
        }
        Err(err) => {
            tracing::error!(%err, "manual backup failed");
            ctx.say("Backup failed; see logs.").await?;
        }
    }
    Ok(())
}

/// Rotate the session identifier.
#[poise::command(slash_command)]
pub async fn rotatesession(ctx: Context<'_>) -> Result<(), Error> {
    if !require_operator(&ctx).await? {
        return Ok(());
    }

    let (old, new) = ctx.data().registry.rotate_session();
    if let Err(err) = ctx.data().checkpoint("manual") {
        tracing::error!(%err, "checkpoint after session rotation failed");
    }

    ctx.say(format!("Session id rotated: {old} -> {new}")).await?;
    Ok(())
}

/// Enable or disable the relay in this group.
#[poise::command(slash_command, guild_only, subcommands("enable", "disable"))]
pub async fn relay(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

/// Enable the relay in this group.
#[poise::command(slash_command, guild_only)]
pub async fn enable(ctx: Context<'_>) -> Result<(), Error> {
    set_group_state(ctx, true).await
}

/// Disable the relay in this group.
#[poise::command(slash_command, guild_only)]
pub async fn disable(ctx: Context<'_>) -> Result<(), Error> {
    set_group_state(ctx, false).await
}

async fn set_group_state(ctx: Context<'_>, enabled: bool) -> Result<(), Error> {
    if !require_operator(&ctx).await? {
        return Ok(());
    }
    let guild_id = ctx.guild_id().ok_or("This command only works in servers")?;

    ctx.data()
        .registry
        .set_group_enabled(guild_id.get() as i64, enabled);
    if let Err(err) = ctx.data().checkpoint("manual") {
        tracing::error!(%err, "checkpoint after group toggle failed");
    }

    ctx.say(if enabled {
        "Relay enabled in this group."
    } else {
        "Relay disabled in this group."
    })
    .await?;
    Ok(())
}
