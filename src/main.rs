use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{error, info};

use mosyle2snipe::config::Settings;
use mosyle2snipe::mosyle::Mosyle;
use mosyle2snipe::snipe::Snipe;
use mosyle2snipe::sync::{fix_model_images, SyncEngine};
use mosyle2snipe::tracing::init_tracing;
use mosyle2snipe::util::env::init_env;
use mosyle2snipe::appledb::AppleDb;

#[derive(Parser, Debug)]
#[command(name = "mosyle2snipe", version, about = "Sync Mosyle MDM devices into Snipe-IT")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
enum Commands {
    /// Full reconciliation pass: Mosyle devices -> Snipe models/assets/users
    Sync,
    /// Attach AppleDB photos to Apple models that have none
    FixImages,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_env();
    init_tracing("info")?;

    let cli = Cli::parse();
    let settings = Settings::from_env()?;

    match cli.command.unwrap_or(Commands::Sync) {
        Commands::Sync => {
            let mosyle = Mosyle::connect(&settings.mosyle).await?;
            let appledb = AppleDb::new(&settings.appledb, settings.snipe.apple_image_check)?;
            let snipe = Snipe::new(settings.snipe.clone(), appledb)?;

            let mut engine = SyncEngine::new(mosyle, snipe);
            let stats = engine.run(&settings.mosyle).await?;
            if stats.failed > 0 {
                error!(failed = stats.failed, "some devices could not be reconciled");
            }
            info!(
                processed = stats.processed,
                skipped = stats.skipped,
                failed = stats.failed,
                "sync finished"
            );
        }
        Commands::FixImages => {
            let appledb = AppleDb::new(&settings.appledb, true)?;
            let mut snipe = Snipe::new(settings.snipe.clone(), appledb)?;
            let updated = fix_model_images(&mut snipe).await?;
            info!(updated, "image backfill finished");
        }
    }

    Ok(())
}
