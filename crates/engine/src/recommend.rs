//! Genre-affinity recommendations.
//!
//! A user's liked movies (rated strictly above the liked threshold) vote for
//! their genres; the strongest genres supply unseen movies whose IMDb rating
//! is strictly above the quality threshold.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use cinegraph_common::types::{prop, NodeKey, Recommendation, RecommendationParams, RelType};

use serde::Deserialize;

use crate::store::{Direction, GraphStore, StoreError};

/// Per-call adjustments to the configured recommendation parameters.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ParamOverrides {
    pub liked: Option<f64>,
    pub quality: Option<f64>,
    pub genres: Option<usize>,
    pub limit: Option<usize>,
}

impl ParamOverrides {
    pub fn apply(&self, base: &RecommendationParams) -> RecommendationParams {
        RecommendationParams {
            liked_threshold: self.liked.unwrap_or(base.liked_threshold),
            quality_threshold: self.quality.unwrap_or(base.quality_threshold),
            top_genres: self.genres.unwrap_or(base.top_genres),
            result_limit: self.limit.unwrap_or(base.result_limit),
        }
    }
}

pub async fn recommend(
    store: &dyn GraphStore,
    user_id: &str,
    params: &RecommendationParams,
) -> Result<Vec<Recommendation>, StoreError> {
    let start = std::time::Instant::now();
    let user = NodeKey::user(user_id);

    let rated = store
        .neighbors(&user, RelType::Rated, Direction::Outgoing)
        .await?;
    if rated.is_empty() {
        tracing::debug!(user_id, "No ratings for user");
        return Ok(Vec::new());
    }

    let seen: BTreeSet<NodeKey> = rated.iter().map(|n| n.node.clone()).collect();
    let liked: BTreeSet<&NodeKey> = rated
        .iter()
        .filter(|n| {
            n.edge_properties
                .get(prop::RATING)
                .and_then(|v| v.as_f64())
                .is_some_and(|r| r > params.liked_threshold)
        })
        .map(|n| &n.node)
        .collect();

    let mut genre_strength: HashMap<String, u64> = HashMap::new();
    for movie in liked {
        for genre in store
            .neighbors(movie, RelType::InGenre, Direction::Outgoing)
            .await?
        {
            *genre_strength.entry(genre.node.key).or_insert(0) += 1;
        }
    }

    let top_genres = rank_genres(genre_strength, params.top_genres);
    if top_genres.is_empty() {
        return Ok(Vec::new());
    }

    let mut candidates: BTreeMap<NodeKey, Recommendation> = BTreeMap::new();
    for genre in &top_genres {
        let members = store
            .neighbors(&NodeKey::genre(genre.as_str()), RelType::InGenre, Direction::Incoming)
            .await?;

        for movie in members {
            if seen.contains(&movie.node) {
                continue;
            }
            let Some(imdb_rating) = movie
                .node_properties
                .get(prop::IMDB_RATING)
                .and_then(|v| v.as_f64())
            else {
                continue;
            };
            if imdb_rating <= params.quality_threshold {
                continue;
            }

            candidates
                .entry(movie.node.clone())
                .or_insert_with(|| Recommendation {
                    movie_id: movie.node.key.clone(),
                    title: movie
                        .node_properties
                        .get(prop::TITLE)
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    imdb_rating,
                    genres: Vec::new(),
                })
                .genres
                .push(genre.clone());
        }
    }

    let mut results: Vec<Recommendation> = candidates.into_values().collect();
    results.sort_by(|a, b| {
        b.imdb_rating
            .partial_cmp(&a.imdb_rating)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.title.cmp(&b.title))
            .then_with(|| a.movie_id.cmp(&b.movie_id))
    });
    results.truncate(params.result_limit);

    metrics::histogram!("recommend.query.latency").record(start.elapsed().as_secs_f64());
    tracing::debug!(user_id, genres = ?top_genres, results = results.len(), "Recommendations computed");

    Ok(results)
}

/// Strongest genres first; equal strength falls back to name order.
fn rank_genres(strength: HashMap<String, u64>, top: usize) -> Vec<String> {
    let mut ranked: Vec<(String, u64)> = strength.into_iter().collect();
    ranked.sort_by(|(a_name, a_count), (b_name, b_count)| {
        b_count.cmp(a_count).then_with(|| a_name.cmp(b_name))
    });
    ranked.into_iter().take(top).map(|(name, _)| name).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, WriteOp};
    use cinegraph_common::types::{Properties, PropertyValue};

    fn movie(id: &str, title: &str, imdb: f64, genres: &[&str]) -> Vec<WriteOp> {
        let mut props = Properties::new();
        props.insert(prop::TITLE.into(), title.into());
        props.insert(prop::IMDB_RATING.into(), imdb.into());
        let mut ops = vec![WriteOp::upsert_node(NodeKey::movie(id), props)];
        for genre in genres {
            ops.push(WriteOp::upsert_node(NodeKey::genre(*genre), Properties::new()));
            ops.push(WriteOp::upsert_edge(
                NodeKey::movie(id),
                RelType::InGenre,
                NodeKey::genre(*genre),
                Properties::new(),
            ));
        }
        ops
    }

    fn rating(user: &str, movie: &str, value: f64) -> Vec<WriteOp> {
        let mut props = Properties::new();
        props.insert(prop::RATING.into(), PropertyValue::Float(value));
        vec![
            WriteOp::upsert_node(NodeKey::user(user), Properties::new()),
            WriteOp::upsert_edge(NodeKey::user(user), RelType::Rated, NodeKey::movie(movie), props),
        ]
    }

    async fn fixture() -> MemoryStore {
        let store = MemoryStore::new();
        let mut ops = Vec::new();
        ops.extend(movie("1", "Die Hard", 8.2, &["Action"]));
        ops.extend(movie("2", "Speed", 7.3, &["Action"]));
        ops.extend(movie("3", "Heat", 8.3, &["Action", "Crime"]));
        ops.extend(movie("4", "Notebook", 7.8, &["Drama"]));
        ops.extend(movie("5", "Ronin", 7.2, &["Action"]));
        ops.extend(movie("6", "Mad Max: Fury Road", 8.1, &["Action"]));
        ops.extend(movie("7", "Commando", 6.7, &["Action"]));
        ops.extend(movie("8", "Casablanca", 8.5, &["Drama"]));
        ops.extend(movie("9", "Se7en", 8.6, &["Crime", "Drama"]));
        ops.extend(rating("1", "1", 5.0));
        ops.extend(rating("1", "2", 4.5));
        ops.extend(rating("1", "3", 4.5));
        ops.extend(rating("1", "4", 4.5));
        store.execute_batch(ops).await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_prefers_strongest_genre_and_hides_rated() {
        let store = fixture().await;
        let params = RecommendationParams {
            top_genres: 1,
            ..RecommendationParams::default()
        };

        let results = recommend(&store, "1", &params).await.unwrap();
        let titles: Vec<&str> = results.iter().map(|r| r.title.as_str()).collect();

        // Action only; Commando is below the quality bar.
        assert_eq!(titles, vec!["Mad Max: Fury Road", "Ronin"]);
        assert!(results.iter().all(|r| r.genres == vec!["Action".to_string()]));
    }

    #[tokio::test]
    async fn test_genres_listed_in_rank_order() {
        let store = fixture().await;
        let results = recommend(&store, "1", &RecommendationParams::default())
            .await
            .unwrap();

        // Action (3) > Crime (1) = Drama (1), ties by name.
        let se7en = results.iter().find(|r| r.movie_id == "9").unwrap();
        assert_eq!(se7en.genres, vec!["Crime".to_string(), "Drama".to_string()]);
        assert_eq!(results[0].title, "Se7en");
        assert!(results.iter().all(|r| !["1", "2", "3", "4"].contains(&r.movie_id.as_str())));
    }

    #[tokio::test]
    async fn test_limit_and_thresholds() {
        let store = fixture().await;
        let params = RecommendationParams {
            liked_threshold: 4.0,
            quality_threshold: 8.2,
            top_genres: 3,
            result_limit: 1,
        };
        let results = recommend(&store, "1", &params).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].movie_id, "9");
    }

    #[tokio::test]
    async fn test_unknown_or_unimpressed_user_gets_nothing() {
        let store = fixture().await;
        let params = RecommendationParams::default();
        assert!(recommend(&store, "404", &params).await.unwrap().is_empty());

        store.execute_batch(rating("2", "1", 4.0)).await.unwrap();
        assert!(recommend(&store, "2", &params).await.unwrap().is_empty());
    }

    #[test]
    fn test_overrides_only_replace_given_fields() {
        let base = RecommendationParams::default();
        let overrides = ParamOverrides {
            quality: Some(8.0),
            limit: Some(10),
            ..ParamOverrides::default()
        };
        let params = overrides.apply(&base);
        assert_eq!(params.liked_threshold, 4.0);
        assert_eq!(params.quality_threshold, 8.0);
        assert_eq!(params.top_genres, 3);
        assert_eq!(params.result_limit, 10);
    }

    #[test]
    fn test_rank_genres_breaks_ties_by_name() {
        let strength = HashMap::from([
            ("Drama".to_string(), 2),
            ("Comedy".to_string(), 2),
            ("Action".to_string(), 5),
            ("War".to_string(), 1),
        ]);
        assert_eq!(rank_genres(strength, 3), vec!["Action", "Comedy", "Drama"]);
    }
}
