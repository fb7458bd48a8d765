use std::collections::BTreeSet;

use cinegraph_common::types::{prop, NodeKey, Properties, RatingRecord, RatingRow, RelType};

use super::parse::parse_rating;
use super::{Batch, BatchTotals, Pipeline, PipelineError, Stage, StageReport};
use crate::sources::FeedRows;
use crate::store::WriteOp;

/// Load ratings. Users are always upserted; a rating naming an unknown
/// movie is skipped by the store's endpoint guard.
pub(crate) async fn run(
    pipeline: &Pipeline,
    rows: FeedRows<RatingRow>,
    report: &mut StageReport,
) -> Result<(), PipelineError> {
    let records = pipeline.parse_rows(Stage::Ratings, rows, report, parse_rating)?;
    let batches: Vec<Batch> = records
        .chunks(pipeline.batch_size())
        .map(rating_batch)
        .collect();

    let mut totals = BatchTotals::default();
    let result = pipeline.commit(Stage::Ratings, batches, &mut totals).await;
    report.absorb(&totals);
    if totals.skipped > 0 {
        tracing::info!(skipped = totals.skipped, "Ratings for unknown movies skipped");
    }
    result
}

fn rating_batch(records: &[RatingRecord]) -> Batch {
    let users: BTreeSet<&str> = records.iter().map(|r| r.user_id.as_str()).collect();

    let mut ops: Vec<WriteOp> = users
        .into_iter()
        .map(|id| WriteOp::upsert_node(NodeKey::user(id), Properties::new()))
        .collect();

    ops.extend(records.iter().map(|record| {
        let mut props = Properties::new();
        props.insert(prop::RATING.into(), record.rating.into());
        props.insert(prop::TIMESTAMP.into(), record.timestamp.into());
        WriteOp::upsert_edge(
            NodeKey::user(&record.user_id),
            RelType::Rated,
            NodeKey::movie(&record.movie_id),
            props,
        )
    }));

    Batch {
        rows: records.len() as u64,
        ops,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::sources::SourceRow;
    use crate::store::{Direction, GraphStore, MemoryStore};
    use cinegraph_common::config::SystemConfig;
    use cinegraph_common::types::{Label, PropertyValue};

    fn rating(line: u64, user: &str, movie: &str, value: &str) -> SourceRow<RatingRow> {
        SourceRow {
            line,
            row: RatingRow {
                user_id: user.into(),
                movie_id: movie.into(),
                rating: value.into(),
                timestamp: "1260759144".into(),
            },
        }
    }

    async fn store_with_movie(id: &str) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store
            .execute_batch(vec![WriteOp::upsert_node(NodeKey::movie(id), Properties::new())])
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_unknown_movie_is_skipped_not_failed() {
        let store = store_with_movie("1").await;
        let pipeline = Pipeline::new(store.clone(), SystemConfig::default());

        let report = pipeline
            .load_ratings(vec![rating(2, "1", "1", "4.0"), rating(3, "2", "999", "5.0")])
            .await
            .unwrap();

        assert_eq!(report.processed, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.failed, 0);
        assert_eq!(store.count_edges(RelType::Rated).await.unwrap(), 1);
        // The user behind the skipped rating still exists.
        assert_eq!(store.count_nodes(Label::User).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_rerun_overwrites_instead_of_duplicating() {
        let store = store_with_movie("1").await;
        let mut config = SystemConfig::default();
        config.loader.batch_size = 1;
        let pipeline = Pipeline::new(store.clone(), config);

        pipeline.load_ratings(vec![rating(2, "1", "1", "3.0")]).await.unwrap();
        pipeline.load_ratings(vec![rating(2, "1", "1", "4.5")]).await.unwrap();

        let rated = store
            .neighbors(&NodeKey::user("1"), RelType::Rated, Direction::Outgoing)
            .await
            .unwrap();
        assert_eq!(rated.len(), 1);
        assert_eq!(rated[0].edge_properties[prop::RATING], PropertyValue::Float(4.5));
        assert_eq!(
            rated[0].edge_properties[prop::TIMESTAMP]
                .as_datetime()
                .map(|t| t.timestamp()),
            Some(1_260_759_144)
        );
    }
}
