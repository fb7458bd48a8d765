//! Tabular feed retrieval.
//!
//! A feed location is either a local file path or an http(s) URL. Rows are
//! deserialized into raw string records keyed by header name; scalar parsing
//! is left to the loaders. A row that cannot be decoded at all (bad UTF-8,
//! a field of the wrong shape) is handed back with its line so the loader's
//! parse policy decides what happens to it.

use std::path::PathBuf;

use csv::{ByteRecord, ReaderBuilder, Trim};
use serde::de::DeserializeOwned;

/// A raw row together with its line in the feed (header is line 1).
#[derive(Clone, Debug, PartialEq)]
pub struct SourceRow<T> {
    pub line: u64,
    pub row: T,
}

/// A row the CSV layer could not decode.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RejectedRow {
    pub line: u64,
    pub detail: String,
}

/// Every row of one feed: the decoded ones and the rejected ones.
#[derive(Clone, Debug, PartialEq)]
pub struct FeedRows<T> {
    pub rows: Vec<SourceRow<T>>,
    pub rejected: Vec<RejectedRow>,
}

impl<T> FeedRows<T> {
    pub fn len(&self) -> usize {
        self.rows.len() + self.rejected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> From<Vec<SourceRow<T>>> for FeedRows<T> {
    fn from(rows: Vec<SourceRow<T>>) -> Self {
        Self {
            rows,
            rejected: Vec::new(),
        }
    }
}

/// Where a feed lives.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Location {
    File(PathBuf),
    Url(String),
}

impl Location {
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            Location::Url(trimmed.to_string())
        } else {
            Location::File(PathBuf::from(trimmed))
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Location::File(_) => "file",
            Location::Url(_) => "http",
        }
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Location::File(path) => write!(f, "{}", path.display()),
            Location::Url(url) => f.write_str(url),
        }
    }
}

/// Reads feeds from disk or over HTTP.
#[derive(Clone, Debug, Default)]
pub struct SourceReader {
    http: reqwest::Client,
}

impl SourceReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch a feed and deserialize every row.
    pub async fn read<T: DeserializeOwned>(
        &self,
        location: &str,
    ) -> Result<FeedRows<T>, SourceError> {
        let location = Location::parse(location);
        let bytes = self.fetch(&location).await?;
        let feed = parse_rows(&location, &bytes)?;

        metrics::counter!("source.rows", "kind" => location.kind())
            .increment(feed.rows.len() as u64);
        if !feed.rejected.is_empty() {
            metrics::counter!("source.rows.rejected", "kind" => location.kind())
                .increment(feed.rejected.len() as u64);
        }
        tracing::info!(
            location = %location,
            rows = feed.rows.len(),
            rejected = feed.rejected.len(),
            "Feed loaded"
        );

        Ok(feed)
    }

    async fn fetch(&self, location: &Location) -> Result<Vec<u8>, SourceError> {
        let start = std::time::Instant::now();

        let bytes = match location {
            Location::File(path) => {
                tokio::fs::read(path)
                    .await
                    .map_err(|e| SourceError::Read {
                        location: location.to_string(),
                        detail: e.to_string(),
                    })?
            }
            Location::Url(url) => {
                let response = self
                    .http
                    .get(url)
                    .send()
                    .await
                    .map_err(|e| SourceError::Read {
                        location: location.to_string(),
                        detail: e.to_string(),
                    })?;

                let status = response.status();
                if !status.is_success() {
                    return Err(SourceError::Status {
                        location: location.to_string(),
                        status: status.as_u16(),
                    });
                }

                response
                    .bytes()
                    .await
                    .map_err(|e| SourceError::Read {
                        location: location.to_string(),
                        detail: e.to_string(),
                    })?
                    .to_vec()
            }
        };

        metrics::histogram!("source.fetch.latency", "kind" => location.kind())
            .record(start.elapsed().as_secs_f64());

        Ok(bytes)
    }
}

/// Deserialize CSV bytes with a header row. Columns missing from the header
/// or from a short row come through as empty strings.
///
/// Only an unreadable header or stream is an error; rows that fail to decode
/// are collected in [`FeedRows::rejected`].
pub fn parse_rows<T: DeserializeOwned>(
    location: &Location,
    bytes: &[u8],
) -> Result<FeedRows<T>, SourceError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(Trim::Headers)
        .from_reader(bytes);

    // Header names must be valid UTF-8 to match record fields.
    reader.headers().map_err(|e| csv_error(location, &e))?;
    let headers = reader
        .byte_headers()
        .map_err(|e| csv_error(location, &e))?
        .clone();

    let mut feed = FeedRows {
        rows: Vec::new(),
        rejected: Vec::new(),
    };
    let mut record = ByteRecord::new();
    loop {
        match reader.read_byte_record(&mut record) {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => return Err(csv_error(location, &e)),
        }

        let line = record.position().map(|p| p.line()).unwrap_or_default();
        match record.deserialize::<T>(Some(&headers)) {
            Ok(row) => feed.rows.push(SourceRow { line, row }),
            Err(e) => feed.rejected.push(RejectedRow {
                line,
                detail: e.to_string(),
            }),
        }
    }

    Ok(feed)
}

fn csv_error(location: &Location, e: &csv::Error) -> SourceError {
    SourceError::Csv {
        location: location.to_string(),
        line: e.position().map(|p| p.line()).unwrap_or_default(),
        detail: e.to_string(),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Failed to read feed {location}: {detail}")]
    Read { location: String, detail: String },

    #[error("Feed {location} returned HTTP {status}")]
    Status { location: String, status: u16 },

    #[error("Malformed CSV in {location} at line {line}: {detail}")]
    Csv {
        location: String,
        line: u64,
        detail: String,
    },
}

impl From<SourceError> for cinegraph_common::CinegraphError {
    fn from(e: SourceError) -> Self {
        cinegraph_common::CinegraphError::Source(e.to_string())
    }
}
