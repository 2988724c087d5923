//! Discord bot implementation and command handling.

pub mod checks;
pub mod commands;
pub mod error;
pub mod error_handler;
pub mod gateway;

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use anyhow::anyhow;
use log::error;
use log::info;
use poise::Framework;
use poise::FrameworkOptions;
use serenity::all::ClientBuilder;
use serenity::all::GatewayIntents;
use serenity::all::Http;
use tokio::task::JoinHandle;

use crate::bot::commands::Cog;
use crate::bot::commands::Cogs;
use crate::bot::commands::Error;
use crate::bot::error_handler::ErrorHandler;
use crate::config::Config;
use crate::service::Services;

/// Data shared across bot commands and contexts.
pub struct Data {
    pub config: Arc<Config>,
    pub service: Arc<Services>,
    pub start_time: Instant,
}

/// Discord bot client and framework.
pub struct Bot {
    pub http: Arc<Http>,
    client_builder: Option<ClientBuilder>,
}

impl Bot {
    /// Creates a new bot instance with all required components.
    pub fn new(config: Arc<Config>, service: Arc<Services>) -> Self {
        info!("Initializing bot...");

        let data = Data {
            config: config.clone(),
            service,
            start_time: Instant::now(),
        };
        let framework = Self::create_framework(data);
        let client_builder =
            ClientBuilder::new(&config.discord_token, GatewayIntents::non_privileged())
                .framework(framework);

        Self {
            http: Arc::new(Http::new(&config.discord_token)),
            client_builder: Some(client_builder),
        }
    }

    /// Starts the bot client in a background task.
    pub fn start(&mut self) -> Result<JoinHandle<()>> {
        info!("Starting bot client...");
        let client_builder = self
            .client_builder
            .take()
            .ok_or_else(|| anyhow!("Bot client was already started"))?;

        Ok(tokio::spawn(async move {
            info!("Connecting bot to Discord...");
            let mut client = match client_builder.await {
                Ok(client) => client,
                Err(e) => {
                    error!("Failed to build Discord client: {e}");
                    return;
                }
            };
            if let Err(e) = client.start().await {
                error!("Bot client stopped: {e}");
            }
        }))
    }

    /// Creates the Poise framework with commands and configuration.
    fn create_framework(data: Data) -> Framework<Data, Error> {
        let options = FrameworkOptions::<Data, Error> {
            commands: Cogs.commands(),
            on_error: |error| Box::pin(Self::on_error(error)),
            ..Default::default()
        };

        Framework::builder()
            .options(options)
            .setup(|ctx, ready, framework| {
                Box::pin(async move {
                    info!("Logged in as {}.", ready.user.name);
                    poise::builtins::register_globally(ctx, &framework.options().commands).await?;
                    info!(
                        "Registered {} slash commands.",
                        framework.options().commands.len()
                    );
                    Ok(data)
                })
            })
            .build()
    }

    /// Handles framework errors by delegating to the error handler.
    async fn on_error(error: poise::FrameworkError<'_, Data, Error>) {
        ErrorHandler::handle(error).await;
    }
}
