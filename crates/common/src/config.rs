use serde::{Deserialize, Serialize};

use crate::types::RecommendationParams;

const DEFAULT_MOVIES_URL: &str =
    "https://raw.githubusercontent.com/tomasonjo/blog-datasets/main/movies/movies_small.csv";
const DEFAULT_RATINGS_URL: &str =
    "https://raw.githubusercontent.com/provezano/movielens/refs/heads/main/ratings.csv";
const DEFAULT_TAGS_URL: &str =
    "https://raw.githubusercontent.com/provezano/movielens/refs/heads/main/tags.csv";

/// Top-level system configuration, deserialized from system.toml.
///
/// Every section is optional; a missing section falls back to its defaults.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    pub sources: SourceConfig,
    pub loader: LoaderConfig,
    pub tags: TagConfig,
    pub recommendation: RecommendationParams,
    pub retry: RetryDefaults,
    pub server: ServerConfig,
    pub metrics: MetricsConfig,
}

impl SystemConfig {
    /// Parse a TOML document into a configuration.
    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}

/// Locations of the three tabular feeds. Each entry is a file path or an
/// http(s) URL.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub movies: String,
    pub ratings: String,
    pub tags: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            movies: DEFAULT_MOVIES_URL.into(),
            ratings: DEFAULT_RATINGS_URL.into(),
            tags: DEFAULT_TAGS_URL.into(),
        }
    }
}

/// What a loader does with a row whose scalar fields fail to parse.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParsePolicy {
    /// Stop the run at the first malformed row.
    #[default]
    Abort,
    /// Count the row as failed and keep going.
    Skip,
}

/// Batching and row-level policy shared by all loaders.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Rows per atomic batch.
    pub batch_size: usize,
    /// Batches of the same stage allowed in flight at once.
    pub workers: usize,
    pub on_parse_error: ParsePolicy,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            workers: 1,
            on_parse_error: ParsePolicy::Abort,
        }
    }
}

/// Tag normalization parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TagConfig {
    /// HAS_TAG weight contributed by each application of a tag to a movie.
    pub weight_per_application: f64,
}

impl Default for TagConfig {
    fn default() -> Self {
        Self {
            weight_per_application: 0.1,
        }
    }
}

/// Retry parameters per target.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryDefaults {
    /// Initial connection to the graph store.
    pub database: RetryConfig,
    /// Re-submission of a batch whose commit failed. One attempt means no retry.
    pub batches: RetryConfig,
}

impl Default for RetryDefaults {
    fn default() -> Self {
        Self {
            database: RetryConfig {
                max_attempts: 4,
                initial_backoff_ms: 1000,
                max_backoff_ms: 8000,
                backoff_multiplier: 2.0,
                jitter: false,
            },
            batches: RetryConfig {
                max_attempts: 1,
                initial_backoff_ms: 500,
                max_backoff_ms: 5000,
                backoff_multiplier: 2.0,
                jitter: true,
            },
        }
    }
}

/// Retry configuration for a specific target.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter: bool,
}

/// HTTP server settings for `serve` mode.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 8080 }
    }
}

/// Prometheus exporter settings for batch runs.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Address for a standalone scrape endpoint while `build` runs
    /// (e.g. "0.0.0.0:9000"). Unset disables it.
    pub listen_addr: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = SystemConfig::from_toml_str("").unwrap();
        assert_eq!(config.loader.batch_size, 1000);
        assert_eq!(config.loader.workers, 1);
        assert_eq!(config.loader.on_parse_error, ParsePolicy::Abort);
        assert!((config.tags.weight_per_application - 0.1).abs() < f64::EPSILON);
        assert_eq!(config.retry.batches.max_attempts, 1);
        assert!(config.sources.movies.ends_with("movies_small.csv"));
    }

    #[test]
    fn test_partial_sections_override() {
        let config = SystemConfig::from_toml_str(
            r#"
            [loader]
            batch_size = 250
            on_parse_error = "skip"

            [recommendation]
            top_genres = 2
            "#,
        )
        .unwrap();
        assert_eq!(config.loader.batch_size, 250);
        assert_eq!(config.loader.workers, 1);
        assert_eq!(config.loader.on_parse_error, ParsePolicy::Skip);
        assert_eq!(config.recommendation.top_genres, 2);
        assert_eq!(config.recommendation.result_limit, 5);
    }

    #[test]
    fn test_unknown_policy_rejected() {
        let result = SystemConfig::from_toml_str("[loader]\non_parse_error = \"ignore\"");
        assert!(result.is_err());
    }
}
