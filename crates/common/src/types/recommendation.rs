use serde::{Deserialize, Serialize};

/// Knobs of the genre-affinity recommendation query.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecommendationParams {
    /// A rating strictly above this marks a movie as liked.
    pub liked_threshold: f64,
    /// Candidates need an imdbRating strictly above this.
    pub quality_threshold: f64,
    /// How many of the user's strongest genres to draw candidates from.
    pub top_genres: usize,
    /// Maximum number of recommendations returned.
    pub result_limit: usize,
}

impl Default for RecommendationParams {
    fn default() -> Self {
        Self {
            liked_threshold: 4.0,
            quality_threshold: 7.0,
            top_genres: 3,
            result_limit: 5,
        }
    }
}

/// A recommended movie.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub movie_id: String,
    pub title: String,
    pub imdb_rating: f64,
    /// Which of the user's top genres this movie belongs to, strongest first.
    pub genres: Vec<String>,
}
