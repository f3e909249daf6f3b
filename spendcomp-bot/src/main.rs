mod config;
mod dispatch;
mod telegram;

use anyhow::Context;
use clap::{Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL, Table};
use config::BotConfig;
use dispatch::Dispatcher;
use spendcomp_core::{CoreError, Storage, WalletPool, XrplClient};
use spendcomp_engine::{ControllerSettings, LifecycleController, MonitorSettings};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use telegram::TelegramClient;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "spendcomp")]
#[command(about = "Telegram bot for XRPL token spending competitions")]
#[command(version)]
struct Cli {
    /// Data directory for the competition database
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Keep competitions in memory only
    #[arg(long, global = true)]
    no_persist: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bot (default)
    Run,
    /// List configured prize wallets
    Wallets,
    /// Validate the environment configuration and exit
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(format!(
            "spendcomp={0},spendcomp_engine={0},spendcomp_core={0}",
            log_level
        )))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Values already in the process environment win over `.env`.
    match dotenvy::dotenv() {
        Ok(path) => tracing::debug!("Loaded environment from {}", path.display()),
        Err(e) if e.not_found() => {}
        Err(e) => tracing::warn!("Ignoring unreadable .env file: {}", e),
    }

    let data_dir = cli.data_dir.clone().unwrap_or_else(config::default_data_dir);

    let result = match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(data_dir, cli.no_persist).await,
        Commands::Wallets => show_wallets(),
        Commands::CheckConfig => check_config(),
    };

    if let Err(e) = result {
        match e.downcast_ref::<CoreError>() {
            Some(CoreError::Config(msg)) => {
                eprintln!("Error: Invalid configuration: {}", msg);
                eprintln!("Use 'spendcomp check-config' after fixing the environment");
            }
            _ => {
                eprintln!("Error: {:#}", e);
            }
        }
        std::process::exit(1);
    }

    Ok(())
}

fn show_wallets() -> anyhow::Result<()> {
    let config = BotConfig::from_env()?;

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["#", "Role", "Address", "Secret"]);
    table.add_row(vec![
        "-".to_string(),
        "fee".to_string(),
        config.fee_wallet.address.clone(),
        if config.fee_wallet.credential.is_some() { "set" } else { "-" }.to_string(),
    ]);
    for (n, wallet) in config.prize_wallets.iter().enumerate() {
        table.add_row(vec![
            (n + 1).to_string(),
            "prize".to_string(),
            wallet.address.clone(),
            "set".to_string(),
        ]);
    }

    println!("{}", table);
    println!(
        "Up to {} competitions can await deposit or run at once.",
        config.prize_wallets.len()
    );
    Ok(())
}

fn check_config() -> anyhow::Result<()> {
    let config = BotConfig::from_env()?;
    WalletPool::new(config.prize_wallets.clone())?;

    println!("Configuration OK");
    println!("  Admin: {}", config.admin_id);
    println!("  Prize wallets: {}", config.prize_wallets.len());
    println!("  Ledger: {}", config.xrpl_rpc_url);
    println!("  Deposit poll: {}s", config.poll_interval.as_secs());
    println!("  Deposit window: {} min", config.deposit_timeout.num_minutes());
    Ok(())
}

async fn run(data_dir: PathBuf, no_persist: bool) -> anyhow::Result<()> {
    let config = BotConfig::from_env()?;

    let storage = if no_persist {
        tracing::warn!("Persistence disabled; competitions are lost on restart");
        None
    } else {
        tokio::fs::create_dir_all(&data_dir)
            .await
            .with_context(|| format!("creating {}", data_dir.display()))?;
        let db_path = data_dir.join("spendcomp.db");
        tracing::info!("Using database {}", db_path.display());
        Some(Arc::new(Storage::new(&db_path).await?))
    };

    let pool = Arc::new(WalletPool::new(config.prize_wallets.clone())?);
    let ledger = Arc::new(XrplClient::new(&config.xrpl_rpc_url)?);
    let telegram = TelegramClient::new(&config.telegram_api_url, &config.token)?;
    let me = telegram
        .get_me()
        .await
        .context("connecting to the Telegram Bot API")?;

    let settings = ControllerSettings {
        deposit_timeout: config.deposit_timeout,
        retention: config.retention,
        monitor: MonitorSettings {
            poll_interval: config.poll_interval,
            ..MonitorSettings::default()
        },
        ..ControllerSettings::new(config.admin_id)
    };

    let controller = LifecycleController::new(
        settings,
        pool.clone(),
        ledger,
        Arc::new(telegram.clone()),
        storage,
    );
    controller.restore().await?;
    let sweeper = controller.spawn_sweeper(config.sweep_interval);
    let dispatcher = Dispatcher::new(controller.clone(), me.username.clone());

    tracing::info!(
        "Bot @{} is running with {} prize wallet(s)",
        me.username.as_deref().unwrap_or("unknown"),
        pool.capacity()
    );

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let mut offset = 0;
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("Shutting down");
                break;
            }
            updates = telegram.get_updates(offset) => match updates {
                Ok(updates) => {
                    for update in updates {
                        offset = offset.max(update.update_id + 1);
                        let dispatcher = dispatcher.clone();
                        let telegram = telegram.clone();
                        tokio::spawn(async move {
                            let effects = dispatcher.handle(&update).await;
                            telegram.apply(effects).await;
                        });
                    }
                }
                Err(e) => {
                    tracing::warn!("Failed to fetch updates: {}", e);
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
            }
        }
    }

    sweeper.abort();
    controller.shutdown().await;
    Ok(())
}
