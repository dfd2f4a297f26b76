use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use digit_predictor::config::Settings;
use digit_predictor::database::Database;
use digit_predictor::engine::PredictionEngine;
use digit_predictor::feed::{FeedClient, FeedUpdater};
use digit_predictor::types::{Context, Digit};
use digit_predictor::web::{start_api_server, AppState};

#[derive(Parser)]
#[command(name = "digit-predictor")]
#[command(version = "0.1.0")]
#[command(about = "Hybrid Markov/regression predictor for the WinGo 30s digit feed", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll the feed, learn continuously, and serve the prediction API
    Serve {
        /// Port override for the API server
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Run one prediction cycle against the local database
    Predict {
        #[arg(long)]
        n1: i64,
        #[arg(long)]
        n2: i64,
        #[arg(long)]
        n3: i64,
        /// When given, feed the outcome back into the engine
        #[arg(short, long)]
        actual: Option<i64>,
    },
    /// Print the persisted stats
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Digit Predictor v0.1.0");
    let settings = Settings::load(&cli.config)?;

    match cli.command {
        Commands::Serve { port } => {
            run_server(settings, port).await?;
        }
        Commands::Predict { n1, n2, n3, actual } => {
            run_prediction(settings, n1, n2, n3, actual).await?;
        }
        Commands::Stats => {
            show_stats(settings).await?;
        }
    }

    Ok(())
}

async fn build_engine(settings: &Settings) -> Result<(Arc<PredictionEngine>, Arc<Database>)> {
    let db = Arc::new(Database::new(&settings.database_url).await?);
    let engine = Arc::new(PredictionEngine::new(
        db.clone(),
        db.clone(),
        settings.engine.clone(),
    ));
    engine.init().await?;
    Ok((engine, db))
}

async fn run_server(settings: Settings, port_override: Option<u16>) -> Result<()> {
    let port = port_override.unwrap_or(settings.port);
    let (engine, db) = build_engine(&settings).await?;

    let app_state = AppState {
        engine: engine.clone(),
        db: db.clone(),
    };
    tokio::spawn(async move {
        if let Err(e) = start_api_server(app_state, port).await {
            error!("API server error: {}", e);
        }
    });
    info!("Prediction API available at http://localhost:{}", port);

    let client = FeedClient::new(settings.feed_url.clone());
    let updater = FeedUpdater::new(client, engine, db).await?;
    updater.run(Duration::from_secs(settings.poll_interval_secs)).await;

    Ok(())
}

async fn run_prediction(
    settings: Settings,
    n1: i64,
    n2: i64,
    n3: i64,
    actual: Option<i64>,
) -> Result<()> {
    let (engine, _db) = build_engine(&settings).await?;
    let context = Context::from_values(n1, n2, n3)?;

    match actual {
        None => {
            let prediction = engine.predict_only(&context).await?;
            info!(
                "Prediction: {} (raw estimate {:.3}, markov {:?})",
                prediction.predicted, prediction.raw_estimate, prediction.markov_guess
            );
        }
        Some(actual) => {
            let outcome = engine.predict_and_learn(&context, Digit::new(actual)?).await?;
            info!(
                "Predicted: {} | Actual: {} | correct={} streak={} accuracy={:.2}% confidence={}",
                outcome.predicted,
                outcome.actual,
                outcome.correct,
                outcome.current_streak,
                outcome.rolling_accuracy,
                outcome.confidence
            );
        }
    }

    Ok(())
}

async fn show_stats(settings: Settings) -> Result<()> {
    let (engine, db) = build_engine(&settings).await?;

    let summary = engine.summary().await;
    info!(
        "Engine (exact match): {} correct / {} incorrect, streak {}, rolling accuracy {:.2}%, confidence {}",
        summary.correct_count,
        summary.incorrect_count,
        summary.current_streak,
        summary.rolling_accuracy,
        summary.confidence
    );

    let feed_stats = db.load_feed_stats().await?.unwrap_or_default();
    info!(
        "Feed (big/small): {} correct / {} incorrect, streaks +{}/-{} (max +{}/-{})",
        feed_stats.correct_count,
        feed_stats.incorrect_count,
        feed_stats.correct_streak,
        feed_stats.incorrect_streak,
        feed_stats.max_correct_streak,
        feed_stats.max_incorrect_streak
    );

    Ok(())
}
