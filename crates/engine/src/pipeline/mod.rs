//! Graph construction pipeline.
//!
//! Stages run strictly in order: schema, movies, roles, ratings, tags,
//! stats. Each stage only reads graph state committed by earlier stages, and
//! the first fatal error aborts the remaining stages with a partial
//! [`RunReport`].

mod batch;
mod movies;
pub mod parse;
mod ratings;
mod roles;
pub mod schema;
mod stats;
mod tags;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::Instrument;

use cinegraph_common::config::{ParsePolicy, SystemConfig};
use cinegraph_common::types::{Label, MovieRow, RatingRow, RelType, TagRow};
use cinegraph_common::RunId;

use crate::sources::{FeedRows, SourceError, SourceReader, SourceRow};
use crate::store::{GraphStore, StoreError};

pub use batch::{Batch, BatchTotals};
use parse::FieldError;

/// Pipeline stages in execution order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Schema,
    Movies,
    Roles,
    Ratings,
    Tags,
    Stats,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::Schema,
        Stage::Movies,
        Stage::Roles,
        Stage::Ratings,
        Stage::Tags,
        Stage::Stats,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Schema => "schema",
            Stage::Movies => "movies",
            Stage::Roles => "roles",
            Stage::Ratings => "ratings",
            Stage::Tags => "tags",
            Stage::Stats => "stats",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Row counts and timing for one stage.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StageReport {
    pub stage: Stage,
    /// Rows (or schema objects, or nodes) whose writes were committed.
    pub processed: u64,
    /// Rows dropped without error, e.g. naming a movie that does not exist.
    pub skipped: u64,
    /// Rows rejected as malformed, or declarations that failed.
    pub failed: u64,
    pub elapsed_ms: u64,
    /// Stage-specific counters.
    pub notes: BTreeMap<String, u64>,
}

impl StageReport {
    pub fn new(stage: Stage) -> Self {
        Self {
            stage,
            processed: 0,
            skipped: 0,
            failed: 0,
            elapsed_ms: 0,
            notes: BTreeMap::new(),
        }
    }

    pub fn note(&mut self, key: &str, value: u64) {
        *self.notes.entry(key.to_string()).or_insert(0) += value;
    }

    /// Fold committed batch totals into the row counts.
    pub fn absorb(&mut self, totals: &BatchTotals) {
        self.processed += totals.rows.saturating_sub(totals.skipped);
        self.skipped += totals.skipped;
    }
}

/// Node and edge counts after a run.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct GraphSummary {
    pub nodes: BTreeMap<String, u64>,
    pub edges: BTreeMap<String, u64>,
}

impl GraphSummary {
    pub async fn collect(store: &dyn GraphStore) -> Result<Self, StoreError> {
        let mut summary = GraphSummary::default();
        for label in [
            Label::Movie,
            Label::Person,
            Label::Actor,
            Label::Director,
            Label::Genre,
            Label::User,
            Label::Tag,
        ] {
            let count = store.count_nodes(label).await?;
            summary.nodes.insert(label.as_str().to_string(), count);
        }
        for rel in RelType::ALL {
            let count = store.count_edges(rel).await?;
            summary.edges.insert(rel.as_str().to_string(), count);
        }
        Ok(summary)
    }
}

/// Outcome of a pipeline run, complete or partial.
#[derive(Clone, Debug, Serialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub stages: Vec<StageReport>,
    /// Present when every stage completed.
    pub summary: Option<GraphSummary>,
}

impl RunReport {
    fn new(run_id: RunId) -> Self {
        Self {
            run_id,
            started_at: Utc::now(),
            elapsed_ms: 0,
            stages: Vec::new(),
            summary: None,
        }
    }

    pub fn stage(&self, stage: Stage) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.stage == stage)
    }

    fn record(&mut self, mut stage: StageReport, start: Instant, result: &Result<(), PipelineError>) {
        stage.elapsed_ms = start.elapsed().as_millis() as u64;

        let name = stage.stage.as_str();
        metrics::histogram!("pipeline.stage.latency", "stage" => name)
            .record(start.elapsed().as_secs_f64());
        metrics::counter!("pipeline.rows", "stage" => name, "outcome" => "processed")
            .increment(stage.processed);
        metrics::counter!("pipeline.rows", "stage" => name, "outcome" => "skipped")
            .increment(stage.skipped);
        metrics::counter!("pipeline.rows", "stage" => name, "outcome" => "failed")
            .increment(stage.failed);

        match result {
            Ok(()) => tracing::info!(
                stage = name,
                processed = stage.processed,
                skipped = stage.skipped,
                failed = stage.failed,
                elapsed_ms = stage.elapsed_ms,
                "Stage complete"
            ),
            Err(e) => tracing::error!(
                stage = name,
                processed = stage.processed,
                skipped = stage.skipped,
                failed = stage.failed,
                error = %e,
                "Stage failed"
            ),
        }

        self.stages.push(stage);
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("Malformed {stage} row at line {line}: {source}")]
    Parse {
        stage: Stage,
        line: u64,
        #[source]
        source: FieldError,
    },

    #[error("{stage} batch failed after {attempts} attempt(s): {detail}")]
    BatchCommit {
        stage: Stage,
        attempts: u32,
        detail: String,
    },

    #[error("Batch worker failed: {0}")]
    Worker(String),
}

impl From<PipelineError> for cinegraph_common::CinegraphError {
    fn from(e: PipelineError) -> Self {
        use cinegraph_common::CinegraphError;
        match e {
            PipelineError::Store(inner) => inner.into(),
            PipelineError::Source(inner) => inner.into(),
            PipelineError::Parse { .. } => CinegraphError::Parse(e.to_string()),
            PipelineError::BatchCommit { .. } => CinegraphError::BatchCommit(e.to_string()),
            PipelineError::Worker(_) => CinegraphError::Internal(e.to_string()),
        }
    }
}

/// A run that stopped early. `report` holds every stage that ran,
/// including the one that failed.
#[derive(Debug, thiserror::Error)]
#[error("Pipeline aborted: {error}")]
pub struct PipelineAbort {
    pub report: RunReport,
    #[source]
    pub error: PipelineError,
}

/// Raw rows for all three feeds, for runs that do not read from the
/// configured locations.
#[derive(Clone, Debug, Default)]
pub struct Inputs {
    pub movies: Vec<SourceRow<MovieRow>>,
    pub ratings: Vec<SourceRow<RatingRow>>,
    pub tags: Vec<SourceRow<TagRow>>,
}

enum Feed<T> {
    Location(String),
    Rows(Vec<SourceRow<T>>),
}

struct Feeds {
    movies: Feed<MovieRow>,
    ratings: Feed<RatingRow>,
    tags: Feed<TagRow>,
}

/// Runs the construction stages against one store.
pub struct Pipeline {
    store: Arc<dyn GraphStore>,
    config: SystemConfig,
    reader: SourceReader,
}

impl Pipeline {
    pub fn new(store: Arc<dyn GraphStore>, config: SystemConfig) -> Self {
        Self {
            store,
            config,
            reader: SourceReader::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn GraphStore> {
        &self.store
    }

    pub fn config(&self) -> &SystemConfig {
        &self.config
    }

    /// Bring the graph to its canonical state from the configured feeds.
    pub async fn build(&self) -> Result<RunReport, PipelineAbort> {
        let sources = &self.config.sources;
        self.run(Feeds {
            movies: Feed::Location(sources.movies.clone()),
            ratings: Feed::Location(sources.ratings.clone()),
            tags: Feed::Location(sources.tags.clone()),
        })
        .await
    }

    /// Same as [`Pipeline::build`], with rows supplied by the caller.
    pub async fn build_from(&self, inputs: Inputs) -> Result<RunReport, PipelineAbort> {
        self.run(Feeds {
            movies: Feed::Rows(inputs.movies),
            ratings: Feed::Rows(inputs.ratings),
            tags: Feed::Rows(inputs.tags),
        })
        .await
    }

    pub async fn ensure_schema(&self) -> Result<StageReport, PipelineError> {
        let mut report = StageReport::new(Stage::Schema);
        schema::run(self, &mut report).await?;
        Ok(report)
    }

    pub async fn load_movies(
        &self,
        rows: Vec<SourceRow<MovieRow>>,
    ) -> Result<StageReport, PipelineError> {
        let mut report = StageReport::new(Stage::Movies);
        movies::run(self, rows.into(), &mut report).await?;
        Ok(report)
    }

    pub async fn classify_roles(&self) -> Result<StageReport, PipelineError> {
        let mut report = StageReport::new(Stage::Roles);
        roles::run(self, &mut report).await?;
        Ok(report)
    }

    pub async fn load_ratings(
        &self,
        rows: Vec<SourceRow<RatingRow>>,
    ) -> Result<StageReport, PipelineError> {
        let mut report = StageReport::new(Stage::Ratings);
        ratings::run(self, rows.into(), &mut report).await?;
        Ok(report)
    }

    pub async fn load_tags(&self, rows: Vec<SourceRow<TagRow>>) -> Result<StageReport, PipelineError> {
        let mut report = StageReport::new(Stage::Tags);
        tags::run(self, rows.into(), &mut report).await?;
        Ok(report)
    }

    pub async fn compute_stats(&self) -> Result<StageReport, PipelineError> {
        let mut report = StageReport::new(Stage::Stats);
        stats::run(self, &mut report).await?;
        Ok(report)
    }

    async fn run(&self, feeds: Feeds) -> Result<RunReport, PipelineAbort> {
        let run_id = RunId::new();
        let span = tracing::info_span!("pipeline", run_id = %run_id);

        async move {
            let start = Instant::now();
            let mut report = RunReport::new(run_id);
            tracing::info!("Pipeline run starting");

            let result = self.run_stages(feeds, &mut report).await;
            report.elapsed_ms = start.elapsed().as_millis() as u64;

            match result {
                Ok(()) => {
                    tracing::info!(elapsed_ms = report.elapsed_ms, "Pipeline run complete");
                    Ok(report)
                }
                Err(error) => {
                    metrics::counter!("pipeline.runs.aborted").increment(1);
                    tracing::error!(error = %error, "Pipeline run aborted");
                    Err(PipelineAbort { report, error })
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn run_stages(&self, feeds: Feeds, report: &mut RunReport) -> Result<(), PipelineError> {
        let Feeds {
            movies: movie_feed,
            ratings: rating_feed,
            tags: tag_feed,
        } = feeds;

        let mut stage = StageReport::new(Stage::Schema);
        let start = Instant::now();
        let result = schema::run(self, &mut stage).await;
        report.record(stage, start, &result);
        result?;

        let mut stage = StageReport::new(Stage::Movies);
        let start = Instant::now();
        let result = match self.take(movie_feed).await {
            Ok(rows) => movies::run(self, rows, &mut stage).await,
            Err(e) => Err(e),
        };
        report.record(stage, start, &result);
        result?;

        let mut stage = StageReport::new(Stage::Roles);
        let start = Instant::now();
        let result = roles::run(self, &mut stage).await;
        report.record(stage, start, &result);
        result?;

        let mut stage = StageReport::new(Stage::Ratings);
        let start = Instant::now();
        let result = match self.take(rating_feed).await {
            Ok(rows) => ratings::run(self, rows, &mut stage).await,
            Err(e) => Err(e),
        };
        report.record(stage, start, &result);
        result?;

        let mut stage = StageReport::new(Stage::Tags);
        let start = Instant::now();
        let result = match self.take(tag_feed).await {
            Ok(rows) => tags::run(self, rows, &mut stage).await,
            Err(e) => Err(e),
        };
        report.record(stage, start, &result);
        result?;

        let mut stage = StageReport::new(Stage::Stats);
        let start = Instant::now();
        let result = stats::run(self, &mut stage).await;
        report.record(stage, start, &result);
        result?;

        report.summary = Some(GraphSummary::collect(self.store.as_ref()).await?);
        Ok(())
    }

    async fn take<T: DeserializeOwned>(
        &self,
        feed: Feed<T>,
    ) -> Result<FeedRows<T>, PipelineError> {
        match feed {
            Feed::Location(location) => Ok(self.reader.read(&location).await?),
            Feed::Rows(rows) => Ok(rows.into()),
        }
    }

    /// Parse raw rows, applying the configured policy to malformed ones.
    /// Rows the feed could not decode count as malformed, in line order.
    fn parse_rows<R, T>(
        &self,
        stage: Stage,
        feed: FeedRows<R>,
        report: &mut StageReport,
        parse: fn(&R) -> Result<T, FieldError>,
    ) -> Result<Vec<T>, PipelineError> {
        let FeedRows { rows, rejected } = feed;
        let mut outcomes: Vec<(u64, Result<T, FieldError>)> = rows
            .iter()
            .map(|SourceRow { line, row }| (*line, parse(row)))
            .chain(
                rejected
                    .into_iter()
                    .map(|r| (r.line, Err(FieldError::Undecodable(r.detail)))),
            )
            .collect();
        outcomes.sort_by_key(|(line, _)| *line);

        let mut parsed = Vec::with_capacity(outcomes.len());
        for (line, outcome) in outcomes {
            match outcome {
                Ok(record) => parsed.push(record),
                Err(source) => {
                    report.failed += 1;
                    match self.config.loader.on_parse_error {
                        ParsePolicy::Abort => {
                            return Err(PipelineError::Parse { stage, line, source });
                        }
                        ParsePolicy::Skip => {
                            tracing::warn!(
                                stage = stage.as_str(),
                                line,
                                error = %source,
                                "Skipping malformed row"
                            );
                        }
                    }
                }
            }
        }
        Ok(parsed)
    }

    fn batch_size(&self) -> usize {
        self.config.loader.batch_size.max(1)
    }
}

/// Bring the graph to its canonical state using the configured feeds.
pub async fn build(
    store: Arc<dyn GraphStore>,
    config: &SystemConfig,
) -> Result<RunReport, PipelineAbort> {
    Pipeline::new(store, config.clone()).build().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn rating_row(line: u64, user: &str, movie: &str, rating: &str) -> SourceRow<RatingRow> {
        SourceRow {
            line,
            row: RatingRow {
                user_id: user.into(),
                movie_id: movie.into(),
                rating: rating.into(),
                timestamp: "964982703".into(),
            },
        }
    }

    fn pipeline_with(policy: ParsePolicy) -> Pipeline {
        let mut config = SystemConfig::default();
        config.loader.on_parse_error = policy;
        Pipeline::new(Arc::new(MemoryStore::new()), config)
    }

    #[test]
    fn test_parse_rows_abort_policy() {
        let pipeline = pipeline_with(ParsePolicy::Abort);
        let mut report = StageReport::new(Stage::Ratings);
        let rows = vec![rating_row(2, "1", "1", "4.0"), rating_row(3, "1", "2", "x")];

        let err = pipeline
            .parse_rows(Stage::Ratings, rows.into(), &mut report, parse::parse_rating)
            .unwrap_err();
        assert!(matches!(err, PipelineError::Parse { line: 3, .. }));
        assert_eq!(report.failed, 1);
    }

    #[test]
    fn test_parse_rows_skip_policy() {
        let pipeline = pipeline_with(ParsePolicy::Skip);
        let mut report = StageReport::new(Stage::Ratings);
        let rows = vec![
            rating_row(2, "1", "1", "4.0"),
            rating_row(3, "1", "2", "x"),
            rating_row(4, "", "2", "3.0"),
        ];

        let parsed = pipeline
            .parse_rows(Stage::Ratings, rows.into(), &mut report, parse::parse_rating)
            .unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(report.failed, 2);
    }

    #[test]
    fn test_undecodable_rows_follow_the_policy_in_line_order() {
        let feed = FeedRows {
            rows: vec![rating_row(2, "1", "1", "4.0"), rating_row(4, "1", "2", "x")],
            rejected: vec![crate::sources::RejectedRow {
                line: 3,
                detail: "invalid utf-8".into(),
            }],
        };

        let mut report = StageReport::new(Stage::Ratings);
        let err = pipeline_with(ParsePolicy::Abort)
            .parse_rows(Stage::Ratings, feed.clone(), &mut report, parse::parse_rating)
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Parse {
                line: 3,
                source: FieldError::Undecodable(_),
                ..
            }
        ));
        assert_eq!(report.failed, 1);

        let mut report = StageReport::new(Stage::Ratings);
        let parsed = pipeline_with(ParsePolicy::Skip)
            .parse_rows(Stage::Ratings, feed, &mut report, parse::parse_rating)
            .unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(report.failed, 2);
    }

    #[test]
    fn test_absorb_counts_rows() {
        let mut report = StageReport::new(Stage::Ratings);
        report.absorb(&BatchTotals {
            rows: 10,
            applied: 17,
            skipped: 3,
        });
        assert_eq!(report.processed, 7);
        assert_eq!(report.skipped, 3);
    }

    #[tokio::test]
    async fn test_missing_feed_aborts_with_partial_report() {
        let mut config = SystemConfig::default();
        config.sources.movies = "/nonexistent/movies.csv".into();
        let pipeline = Pipeline::new(Arc::new(MemoryStore::new()), config);

        let abort = pipeline.build().await.unwrap_err();
        assert!(matches!(abort.error, PipelineError::Source(_)));
        assert!(abort.report.stage(Stage::Schema).is_some());
        assert!(abort.report.stage(Stage::Movies).is_some());
        assert!(abort.report.stage(Stage::Ratings).is_none());
        assert!(abort.report.summary.is_none());
    }
}
