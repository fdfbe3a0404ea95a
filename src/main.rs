use std::{env, sync::Arc};

use poise::serenity_prelude::{self as serenity};
use reloc::discord::DiscordPlatform;
use reloc::relocation::SystemClock;
use reloc::{BotConfig, Data, Error, commands, handlers, logging};
use serenity::GatewayIntents;
use tracing::{error, info};

/// Main function to run the bot
async fn async_main() -> Result<(), Error> {
    logging::init()?;

    let config = BotConfig::load().await;
    let token = env::var("DISCORD_TOKEN").map_err(|_| "DISCORD_TOKEN must be set")?;

    let tree = commands::commands(&config.base_command);
    info!(
        "Serving /{} with {} subcommands",
        config.base_command,
        tree.iter().map(|c| c.subcommands.len()).sum::<usize>()
    );

    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: tree,
            pre_command: |ctx| {
                Box::pin(async move {
                    logging::log_command_start(ctx);
                })
            },
            post_command: |ctx| {
                Box::pin(async move {
                    logging::log_command_end(ctx);
                })
            },
            on_error: |error| {
                Box::pin(async move {
                    logging::log_command_error(&error);
                    // Permission and check failures still get a reply
                    if let Err(e) = poise::builtins::on_error(error).await {
                        error!(target: reloc::ERROR_TARGET, "Error while handling error: {e}");
                    }
                })
            },
            ..Default::default()
        })
        .setup(move |ctx, _ready, framework| {
            Box::pin(async move {
                logging::log_console("Registering commands globally");
                poise::builtins::register_globally(ctx, &framework.options().commands).await?;

                let platform =
                    Arc::new(DiscordPlatform::new(ctx.http.clone(), ctx.cache.clone()));
                let data = Data::new(config, platform, Arc::new(SystemClock));
                // Runs for the lifetime of the process
                drop(data.start_sweeper());
                Ok(data)
            })
        })
        .build();

    let intents = GatewayIntents::non_privileged();
    let mut client = serenity::ClientBuilder::new(token, intents)
        .event_handler(handlers::Handler)
        .framework(framework)
        .await?;

    info!("Starting bot...");
    client.start().await?;

    Ok(())
}

fn main() {
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("Error building runtime: {err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = runtime.block_on(async_main()) {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}
