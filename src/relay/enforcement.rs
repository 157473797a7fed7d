// Translates core decisions into transport calls. Every call here is fire
// and forget with a logged failure: the core has already recorded its state,
// and a failed delete or restrict never unwinds it. The periodic sweep is
// the reconciliation path.

use crate::core::gate::DenyReason;
use crate::core::moderation::{ChatUserKey, ModAction, ModerationDecision};
use chrono::{DateTime, Utc};
use poise::serenity_prelude as serenity;

const WARNINGS_BEFORE_MUTE: u32 = 3;

/// Apply a moderation decision to the message that triggered it.
pub async fn apply_decision(
    ctx: &serenity::Context,
    msg: &serenity::Message,
    decision: &ModerationDecision,
) {
    let user_id = msg.author.id.get() as i64;

    if decision.delete_message {
        if let Err(err) = msg.delete(&ctx.http).await {
            tracing::warn!(user_id, %err, "failed to delete flagged message");
        }
    }

    match &decision.action {
        ModAction::Warn { count } => {
            let remaining = WARNINGS_BEFORE_MUTE.saturating_sub(*count);
            let notice = format!(
                "<@{}> warning #{count}: {}. {remaining} warning(s) left before a mute.",
                msg.author.id, decision.reason
            );
            if let Err(err) = msg.channel_id.say(&ctx.http, notice).await {
                tracing::warn!(user_id, %err, "failed to send warning notice");
            }
        }

        ModAction::Mute { until, minutes } => {
            if let Some(guild_id) = msg.guild_id {
                timeout_member(&ctx.http, guild_id, msg.author.id, *until).await;

                let notice = format!(
                    "<@{}> muted for {minutes} minute(s): {}",
                    msg.author.id, decision.reason
                );
                if let Err(err) = msg.channel_id.say(&ctx.http, notice).await {
                    tracing::warn!(user_id, %err, "failed to send mute notice");
                }
            }
        }

        ModAction::Ban => {
            if let Some(guild_id) = msg.guild_id {
                if let Err(err) = guild_id
                    .ban_with_reason(&ctx.http, msg.author.id, 0, &decision.reason)
                    .await
                {
                    tracing::error!(user_id, %err, "guild ban call failed");
                }

                let notice = format!("<@{}> banned: {}", msg.author.id, decision.reason);
                if let Err(err) = msg.channel_id.say(&ctx.http, notice).await {
                    tracing::warn!(user_id, %err, "failed to send ban notice");
                }
            }
        }
    }
}

/// Restrict a member until the given time.
pub async fn timeout_member(
    http: &serenity::Http,
    guild_id: serenity::GuildId,
    user_id: serenity::UserId,
    until: DateTime<Utc>,
) {
    let timestamp = match serenity::Timestamp::from_unix_timestamp(until.timestamp()) {
        Ok(ts) => ts,
        Err(err) => {
            tracing::error!(%err, "mute end time out of range");
            return;
        }
    };

    if let Err(err) = guild_id
        .edit_member(
            http,
            user_id,
            serenity::EditMember::new().disable_communication_until_datetime(timestamp),
        )
        .await
    {
        tracing::error!(user_id = user_id.get(), %err, "failed to restrict member");
    }
}

/// Restore a member's normal permissions.
pub async fn clear_timeout(
    http: &serenity::Http,
    guild_id: serenity::GuildId,
    user_id: serenity::UserId,
) {
    if let Err(err) = guild_id
        .edit_member(
            http,
            user_id,
            serenity::EditMember::new().enable_communication(),
        )
        .await
    {
        tracing::error!(user_id = user_id.get(), %err, "failed to restore member permissions");
    }
}

/// Sweep path: restore permissions for an expired chat-scoped mute.
pub async fn restore_expired_mute(http: &serenity::Http, key: ChatUserKey) {
    let guild_id = serenity::GuildId::new(key.chat_id as u64);
    let user_id = serenity::UserId::new(key.user_id as u64);
    clear_timeout(http, guild_id, user_id).await;
    tracing::info!(
        chat_id = key.chat_id,
        user_id = key.user_id,
        "expired mute cleared"
    );
}

/// User-facing text for a gate denial.
pub fn deny_reply(reason: &DenyReason) -> String {
    match reason {
        DenyReason::Banned { until: None } => {
            "You are permanently banned from using this relay.".to_string()
        }
        DenyReason::Banned { until: Some(until) } => {
            let remaining = *until - Utc::now();
            format!(
                "You are banned from using this relay. Time remaining: {}d {}h.",
                remaining.num_days().max(0),
                (remaining.num_hours() % 24).max(0)
            )
        }
        DenyReason::RateLimited {
            cooldown_secs: Some(secs),
        } => format!("You are rate limited. Try again in {secs} second(s)."),
        DenyReason::RateLimited {
            cooldown_secs: None,
        } => "You are sending messages too quickly. Wait a moment.".to_string(),
        DenyReason::Suspicious => {
            "Your account is flagged as suspicious. Contact the operator for review.".to_string()
        }
        DenyReason::VerificationFailed { reasons } => format!(
            "Account verification failed: {reasons}. Contact the operator for access."
        ),
        DenyReason::NotApproved => {
            "You do not have access yet. Contact the operator.".to_string()
        }
    }
}
