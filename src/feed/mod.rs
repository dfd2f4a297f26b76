use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, error, info};

use crate::database::Database;
use crate::engine::{FeedStats, PredictionEngine};
use crate::types::{Context, Digit};

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
    (KHTML, like Gecko) Chrome/114.0.0.0 Safari/537.36";

#[derive(Debug, Deserialize)]
struct HistoryResponse {
    data: HistoryData,
}

#[derive(Debug, Deserialize)]
struct HistoryData {
    list: Vec<HistoryEntry>,
}

#[derive(Debug, Deserialize)]
struct HistoryEntry {
    #[serde(rename = "issueNumber")]
    issue_number: String,
    number: String,
}

/// One accepted draw from the feed.
#[derive(Debug, Clone)]
pub struct FeedDraw {
    pub issue: String,
    pub num: Digit,
}

/// Client for the WinGo 30s draw history endpoint.
#[derive(Clone)]
pub struct FeedClient {
    client: Client,
    url: String,
}

impl FeedClient {
    pub fn new(url: String) -> Self {
        Self {
            client: Client::new(),
            url,
        }
    }

    /// Fetch the most recent draw. The feed reports digits as strings.
    pub async fn fetch_latest(&self) -> Result<FeedDraw> {
        let response: HistoryResponse = self
            .client
            .get(&self.url)
            .query(&[("ts", Utc::now().timestamp_millis().to_string())])
            .header("User-Agent", USER_AGENT)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let latest = response
            .data
            .list
            .first()
            .ok_or_else(|| anyhow!("feed returned an empty draw list"))?;

        let value: i64 = latest
            .number
            .trim()
            .parse()
            .map_err(|_| anyhow!("feed returned a non-numeric draw: {:?}", latest.number))?;

        Ok(FeedDraw {
            issue: latest.issue_number.clone(),
            num: Digit::new(value)?,
        })
    }
}

/// Drives learning cycles from the feed: dedupes draws by issue id, seeds
/// the first three draws without predicting, then runs a predict-and-learn
/// cycle per new draw. Keeps the feed's own big/small correctness stats.
pub struct FeedUpdater {
    client: FeedClient,
    engine: Arc<PredictionEngine>,
    db: Arc<Database>,
    seen_issues: HashSet<String>,
    stats: FeedStats,
}

impl FeedUpdater {
    pub async fn new(
        client: FeedClient,
        engine: Arc<PredictionEngine>,
        db: Arc<Database>,
    ) -> Result<Self> {
        let stats = db.load_feed_stats().await?.unwrap_or_default();
        Ok(Self {
            client,
            engine,
            db,
            seen_issues: HashSet::new(),
            stats,
        })
    }

    /// Poll forever. Individual tick failures are logged; the loop goes on.
    pub async fn run(mut self, interval: Duration) {
        info!("Feed poller started ({}s interval)", interval.as_secs());
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if let Err(e) = self.tick().await {
                error!("Feed update failed: {}", e);
            }
        }
    }

    /// One poll cycle. Returns Ok(true) when a new draw was processed.
    pub async fn tick(&mut self) -> Result<bool> {
        let draw = self.client.fetch_latest().await?;

        if self.seen_issues.contains(&draw.issue) {
            debug!("Issue {} already seen, skipping", draw.issue);
            return Ok(false);
        }
        self.seen_issues.insert(draw.issue.clone());

        self.process_draw(&draw).await?;
        Ok(true)
    }

    async fn process_draw(&mut self, draw: &FeedDraw) -> Result<()> {
        let history = self.db.last_three().await?;

        let Some([n1, n2, n3]) = history else {
            info!("Not enough history yet, inserting initial entry {}", draw.issue);
            self.db
                .insert_draw(&draw.issue, draw.num.value(), None)
                .await?;
            return Ok(());
        };

        let context = Context::from_values(n1 as i64, n2 as i64, n3 as i64)?;
        let outcome = self.engine.predict_and_learn(&context, draw.num).await?;

        if !self
            .db
            .insert_draw(&draw.issue, draw.num.value(), Some(outcome.predicted))
            .await?
        {
            debug!("Duplicate draw row for issue {}, skipping insert", draw.issue);
        }

        // The feed's correctness metric is the big/small bucket, tracked
        // independently of the engine's exact-match stats.
        let predicted_big = outcome.predicted >= 5;
        let bucket_correct = predicted_big == draw.num.is_big();
        self.stats.apply(bucket_correct);
        self.db.upsert_feed_stats(&self.stats).await?;

        info!(
            "Predicted: {} | Actual: {} | exact={} bucket={} | streak={} acc={:.2}%",
            outcome.predicted,
            outcome.actual,
            outcome.correct,
            bucket_correct,
            outcome.current_streak,
            outcome.rolling_accuracy
        );

        Ok(())
    }
}
