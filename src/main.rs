// Entry point for the relay warden.
//
// **Architecture overview:**
// - `core/` = policy and trust logic (platform-agnostic)
// - `infra/` = implementations of core ports (snapshot store, HTTP client)
// - `relay/` = transport-specific adapters (commands, enforcement)
//
// This file's job is to:
// 1. Load configuration and restore the last snapshot
// 2. Initialize services (dependency injection)
// 3. Wire up the chat framework and the message pipeline
// 4. Run the periodic sweep and the shutdown checkpoint

// These attrs point each module declaration at a more descriptive root file
// so we don't end up with half a dozen mod.rs files that all look the same.
#[path = "core/core_layer.rs"]
mod core;
#[path = "infra/infra_layer.rs"]
mod infra;
#[path = "relay/relay_layer.rs"]
mod relay;

use crate::core::assistant::AssistantService;
use crate::core::gate::{ChatKind, GateOutcome, InboundMessage, MessageGate};
use crate::core::moderation::ModerationEngine;
use crate::core::policy::PolicyConfig;
use crate::core::ratelimit::RateLimiter;
use crate::core::registry::UserRegistry;
use crate::core::spam::SpamScorer;
use crate::core::trust::{AccountTrust, Identity};
use crate::infra::assistant::HttpCompletionClient;
use crate::infra::state::JsonSnapshotStore;
use crate::relay::{enforcement, Data, Error};
use anyhow::Context as _;
use chrono::Utc;
use poise::serenity_prelude as serenity;
use std::sync::Arc;

/// Event handler for non-command events; the message pipeline starts here.
async fn event_handler(
    ctx: &serenity::Context,
    event: &serenity::FullEvent,
    _framework: poise::FrameworkContext<'_, Data, Error>,
    data: &Data,
) -> Result<(), Error> {
    if let serenity::FullEvent::Message { new_message } = event {
        // Ignore bot messages (including our own).
        if new_message.author.bot {
            return Ok(());
        }
        handle_message(ctx, new_message, data).await?;
    }
    Ok(())
}

async fn handle_message(
    ctx: &serenity::Context,
    msg: &serenity::Message,
    data: &Data,
) -> Result<(), Error> {
    let user_id = msg.author.id.get() as i64;

    let (chat_kind, chat_id, chat_title) = match msg.guild_id {
        Some(guild_id) => {
            let title = ctx.cache.guild(guild_id).map(|g| g.name.clone());
            (ChatKind::Group, guild_id.get() as i64, title)
        }
        None => (ChatKind::Private, msg.channel_id.get() as i64, None),
    };

    let mut text = msg.content.clone();

    if chat_kind == ChatKind::Group {
        // Groups are opt-in, and the warden only answers when addressed.
        if !data.registry.group_enabled(chat_id) {
            return Ok(());
        }
        let bot_id = ctx.cache.current_user().id;
        if !msg.mentions.iter().any(|u| u.id == bot_id) {
            return Ok(());
        }
        text = text
            .replace(&format!("<@{bot_id}>"), " ")
            .replace(&format!("<@!{bot_id}>"), " ")
            .trim()
            .to_string();
    }

    let image_url = msg
        .attachments
        .iter()
        .find(|a| {
            let name = a.filename.to_lowercase();
            name.ends_with(".png")
                || name.ends_with(".jpg")
                || name.ends_with(".jpeg")
                || name.ends_with(".gif")
                || name.ends_with(".webp")
        })
        .map(|a| a.url.clone());

    if text.is_empty() && image_url.is_some() {
        text = "Describe this image.".to_string();
    }

    let inbound = InboundMessage {
        sender: Identity {
            id: user_id,
            username: Some(msg.author.name.clone()),
            display_name: msg.author.global_name.clone(),
        },
        chat_id,
        chat_kind,
        chat_title,
        text,
    };

    let outcome = data.gate.process(&inbound, Utc::now());

    match outcome {
        GateOutcome::Accepted { auto_approved, .. } => {
            if auto_approved {
                let _ = msg
                    .reply(&ctx.http, "Account verified; you now have access.")
                    .await;
            }

            // The completion call has its own throttle class.
            if data.gate.api_limited(user_id, Utc::now()) {
                let _ = msg
                    .reply(&ctx.http, "Too many assistant requests. Try again later.")
                    .await;
                return Ok(());
            }
            data.gate.record_api(user_id, Utc::now());

            let _ = msg.channel_id.broadcast_typing(&ctx.http).await;
            let reply = data
                .assistant
                .reply(&inbound.text, user_id, image_url.as_deref())
                .await;

            // Split the reply if it exceeds the platform message limit.
            for chunk in reply.chars().collect::<Vec<char>>().chunks(2000) {
                let chunk_str: String = chunk.iter().collect();
                if let Err(err) = msg.channel_id.say(&ctx.http, chunk_str).await {
                    tracing::error!(user_id, %err, "failed to send assistant reply");
                }
            }
        }

        GateOutcome::Moderate { decision, score } => {
            tracing::info!(user_id, chat_id, score, "applying moderation decision");
            enforcement::apply_decision(ctx, msg, &decision).await;
        }

        GateOutcome::SpamDropped { score, reasons } => {
            tracing::info!(user_id, score, %reasons, "private spam dropped");
        }

        GateOutcome::Denied(reason) => {
            let _ = msg.reply(&ctx.http, enforcement::deny_reply(&reason)).await;
        }

        GateOutcome::Invalid(fault) => {
            let _ = msg
                .reply(&ctx.http, format!("Message rejected: {}", fault.tag()))
                .await;
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging so we can see what's happening.
    tracing_subscriber::fmt::init();

    // Load environment variables from .env file (if it exists).
    dotenv::dotenv().ok();

    let token = std::env::var("DISCORD_TOKEN")
        .context("missing DISCORD_TOKEN environment variable; set it in the environment or a .env file")?;

    let config = Arc::new(PolicyConfig::from_env());

    // ========================================================================
    // DEPENDENCY INJECTION
    // ========================================================================
    // Create our services with their dependencies.
    // This is the "composition root" where we wire everything together.

    let store = Arc::new(JsonSnapshotStore::new(
        config.data_file.clone(),
        config.backup_dir.clone(),
        config.max_backup_files,
    ));

    let registry = Arc::new(UserRegistry::new(Utc::now()));
    let trust = Arc::new(AccountTrust::new(&config));

    match store.load() {
        Ok(Some(snapshot)) => {
            let suspicious = registry.apply_snapshot(&snapshot);
            trust.restore_suspicious(suspicious);
            tracing::info!(session = %registry.session_id(), "state restored from snapshot");
        }
        Ok(None) => tracing::info!("no snapshot found, starting with empty state"),
        Err(err) => tracing::error!(%err, "snapshot load failed, starting with empty state"),
    }

    let limiter = Arc::new(RateLimiter::new(&config));
    let scorer = Arc::new(SpamScorer::new(&config));
    let moderation = Arc::new(ModerationEngine::new(&config));

    let gate = Arc::new(MessageGate::new(
        Arc::clone(&config),
        Arc::clone(&registry),
        Arc::clone(&trust),
        Arc::clone(&limiter),
        Arc::clone(&scorer),
        Arc::clone(&moderation),
    ));

    let assistant = Arc::new(AssistantService::new(
        HttpCompletionClient::new(config.completion_url.clone()),
        config.completion_persona.clone(),
        config.max_reply_length,
    ));

    let data = Data {
        config: Arc::clone(&config),
        registry: Arc::clone(&registry),
        trust: Arc::clone(&trust),
        limiter: Arc::clone(&limiter),
        scorer: Arc::clone(&scorer),
        moderation: Arc::clone(&moderation),
        gate: Arc::clone(&gate),
        assistant: Arc::clone(&assistant),
        store: Arc::clone(&store),
    };

    // ========================================================================
    // FRAMEWORK SETUP
    // ========================================================================

    let intents = serenity::GatewayIntents::GUILD_MESSAGES
        | serenity::GatewayIntents::MESSAGE_CONTENT // Required to read message content
        | serenity::GatewayIntents::DIRECT_MESSAGES
        | serenity::GatewayIntents::GUILDS
        | serenity::GatewayIntents::GUILD_MEMBERS;

    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: vec![
                relay::commands::access::grant(),
                relay::commands::access::revoke(),
                relay::commands::access::marksafe(),
                relay::commands::moderation::ban(),
                relay::commands::moderation::unban(),
                relay::commands::moderation::mute(),
                relay::commands::moderation::unmute(),
                relay::commands::moderation::resetlimits(),
                relay::commands::moderation::warnings(),
                relay::commands::moderation::clearwarnings(),
                relay::commands::status::status(),
                relay::commands::status::adminstatus(),
                relay::commands::status::backup(),
                relay::commands::status::rotatesession(),
                relay::commands::status::relay(),
            ],
            event_handler: |ctx, event, framework, data| {
                Box::pin(event_handler(ctx, event, framework, data))
            },
            ..Default::default()
        })
        .setup(move |ctx, _ready, framework| {
            Box::pin(async move {
                poise::builtins::register_globally(ctx, &framework.options().commands).await?;
                tracing::info!(session = %data.registry.session_id(), "warden is ready");

                // Periodic sweep: expired mutes, index pruning, auto backup,
                // checkpoint. Same locks as the request path; decisions are
                // copied out before any transport call.
                let sweep_http = ctx.http.clone();
                let sweep_registry = Arc::clone(&data.registry);
                let sweep_trust = Arc::clone(&data.trust);
                let sweep_moderation = Arc::clone(&data.moderation);
                let sweep_scorer = Arc::clone(&data.scorer);
                let sweep_store = Arc::clone(&data.store);
                let sweep_interval = data.config.sweep_interval_secs;
                let backup_interval = data.config.auto_backup_interval_secs;
                tokio::spawn(async move {
                    use std::time::Duration as StdDuration;
                    use tokio::time::sleep;

                    loop {
                        sleep(StdDuration::from_secs(sweep_interval)).await;
                        let now = Utc::now();

                        for key in sweep_moderation.take_expired_mutes(now) {
                            enforcement::restore_expired_mute(&sweep_http, key).await;
                        }

                        sweep_registry.prune(now);
                        sweep_scorer.prune(now);

                        let backup_due = sweep_registry
                            .last_backup()
                            .map(|t| (now - t).num_seconds() >= backup_interval as i64)
                            .unwrap_or(true);
                        if backup_due {
                            let snapshot = sweep_registry.capture_snapshot(
                                sweep_trust.suspicious_ids(),
                                "auto",
                                now,
                            );
                            match sweep_store.write_backup(&snapshot) {
                                Ok(_) => sweep_registry.set_last_backup(now),
                                Err(err) => tracing::error!(%err, "auto backup failed"),
                            }
                        }

                        let snapshot = sweep_registry.capture_snapshot(
                            sweep_trust.suspicious_ids(),
                            "checkpoint",
                            now,
                        );
                        if let Err(err) = sweep_store.save(&snapshot) {
                            tracing::error!(%err, "periodic checkpoint failed");
                        }

                        tracing::debug!("sweep completed");
                    }
                });

                // Checkpoint once more on shutdown.
                let stop_registry = Arc::clone(&data.registry);
                let stop_trust = Arc::clone(&data.trust);
                let stop_store = Arc::clone(&data.store);
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        let snapshot = stop_registry.capture_snapshot(
                            stop_trust.suspicious_ids(),
                            "shutdown",
                            Utc::now(),
                        );
                        if let Err(err) = stop_store.save(&snapshot) {
                            tracing::error!(%err, "shutdown checkpoint failed");
                        } else {
                            tracing::info!("shutdown checkpoint written");
                        }
                        std::process::exit(0);
                    }
                });

                Ok(data)
            })
        })
        .build();

    let mut client = serenity::ClientBuilder::new(token, intents)
        .framework(framework)
        .await
        .context("failed to create transport client")?;

    client.start().await.context("transport client stopped")?;
    Ok(())
}
