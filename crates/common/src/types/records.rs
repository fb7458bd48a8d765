use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// Raw feed rows. Every field is kept as text; turning text into typed
// values belongs to the loaders, which own the parse-error policy.

/// One row of the movies feed.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MovieRow {
    #[serde(rename = "movieId", default)]
    pub movie_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub tagline: String,
    #[serde(default)]
    pub released: String,
    #[serde(rename = "imdbRating", default)]
    pub imdb_rating: String,
    /// Pipe-delimited director names.
    #[serde(default)]
    pub director: String,
    /// Pipe-delimited actor names.
    #[serde(default)]
    pub actors: String,
    /// Pipe-delimited genre names.
    #[serde(default)]
    pub genres: String,
}

/// One row of the ratings feed.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RatingRow {
    #[serde(rename = "userId", default)]
    pub user_id: String,
    #[serde(rename = "movieId", default)]
    pub movie_id: String,
    #[serde(default)]
    pub rating: String,
    /// Seconds since the Unix epoch.
    #[serde(default)]
    pub timestamp: String,
}

/// One row of the tag-applications feed.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TagRow {
    #[serde(rename = "userId", default)]
    pub user_id: String,
    #[serde(rename = "movieId", default)]
    pub movie_id: String,
    #[serde(default)]
    pub tag: String,
    /// Seconds since the Unix epoch.
    #[serde(default)]
    pub timestamp: String,
}

/// A movie row after validation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MovieRecord {
    pub id: String,
    pub title: Option<String>,
    pub tagline: Option<String>,
    pub released: Option<NaiveDate>,
    pub imdb_rating: Option<f64>,
    pub directors: Vec<String>,
    pub actors: Vec<String>,
    pub genres: Vec<String>,
}

/// A rating row after validation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RatingRecord {
    pub user_id: String,
    pub movie_id: String,
    pub rating: f64,
    pub timestamp: DateTime<Utc>,
}

/// A tag application after validation. `tag` is the raw text as applied.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TagRecord {
    pub user_id: String,
    pub movie_id: String,
    pub tag: String,
    pub timestamp: DateTime<Utc>,
}
