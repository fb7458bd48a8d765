use cinegraph_common::types::{prop, Label, Properties, RelType};

use super::{Batch, BatchTotals, Pipeline, PipelineError, Stage, StageReport};
use crate::store::{AggregateRow, AggregateValue, EdgeAggregation, GroupBy, WriteOp};

/// One derived-attribute pass: an aggregation and how its rows map onto
/// node properties.
struct StatPass {
    name: &'static str,
    aggregation: EdgeAggregation,
    write: fn(&AggregateRow) -> WriteOp,
}

const PASSES: [StatPass; 4] = [
    StatPass {
        name: "users",
        aggregation: EdgeAggregation {
            rel: RelType::Rated,
            group_by: GroupBy::Source,
            group_label: Label::User,
            value: Some(AggregateValue::EdgeProperty(prop::RATING)),
        },
        write: user_stats,
    },
    StatPass {
        name: "directors",
        aggregation: EdgeAggregation {
            rel: RelType::Directed,
            group_by: GroupBy::Source,
            group_label: Label::Director,
            value: Some(AggregateValue::OtherEndProperty(prop::IMDB_RATING)),
        },
        write: director_stats,
    },
    StatPass {
        name: "actors",
        aggregation: EdgeAggregation {
            rel: RelType::ActedIn,
            group_by: GroupBy::Source,
            group_label: Label::Actor,
            value: None,
        },
        write: actor_stats,
    },
    StatPass {
        name: "tags",
        aggregation: EdgeAggregation {
            rel: RelType::HasTag,
            group_by: GroupBy::Target,
            group_label: Label::Tag,
            value: Some(AggregateValue::EdgeProperty(prop::FREQUENCY)),
        },
        write: tag_stats,
    },
];

/// Recompute every derived attribute from the current edge set.
pub(crate) async fn run(pipeline: &Pipeline, report: &mut StageReport) -> Result<(), PipelineError> {
    for pass in &PASSES {
        let rows = pipeline.store().aggregate_edges(pass.aggregation).await?;
        let ops: Vec<WriteOp> = rows.iter().map(pass.write).collect();
        let batches: Vec<Batch> = ops
            .chunks(pipeline.batch_size())
            .map(|chunk| Batch {
                rows: chunk.len() as u64,
                ops: chunk.to_vec(),
            })
            .collect();

        let mut totals = BatchTotals::default();
        let result = pipeline.commit(Stage::Stats, batches, &mut totals).await;
        report.absorb(&totals);
        report.note(pass.name, totals.applied);
        result?;

        tracing::debug!(pass = pass.name, nodes = totals.applied, "Derived attributes written");
    }
    Ok(())
}

fn update(row: &AggregateRow, properties: Properties, unset: Vec<String>) -> WriteOp {
    WriteOp::UpdateNode {
        node: row.node.clone(),
        properties,
        unset,
    }
}

/// Mean into `key`, or remove `key` when every value was missing.
fn mean_or_unset(row: &AggregateRow, key: &str, props: &mut Properties) -> Vec<String> {
    match row.mean {
        Some(mean) => {
            props.insert(key.into(), mean.into());
            Vec::new()
        }
        None => vec![key.to_string()],
    }
}

fn user_stats(row: &AggregateRow) -> WriteOp {
    let mut props = Properties::new();
    props.insert(prop::TOTAL_RATINGS.into(), (row.count as i64).into());
    let unset = mean_or_unset(row, prop::AVG_RATING, &mut props);
    update(row, props, unset)
}

fn director_stats(row: &AggregateRow) -> WriteOp {
    let mut props = Properties::new();
    props.insert(prop::MOVIE_COUNT.into(), (row.count as i64).into());
    let unset = mean_or_unset(row, prop::AVG_RATING, &mut props);
    update(row, props, unset)
}

fn actor_stats(row: &AggregateRow) -> WriteOp {
    let mut props = Properties::new();
    props.insert(prop::MOVIE_COUNT.into(), (row.count as i64).into());
    update(row, props, Vec::new())
}

fn tag_stats(row: &AggregateRow) -> WriteOp {
    let mut props = Properties::new();
    props.insert(prop::USAGE_COUNT.into(), (row.count as i64).into());
    props.insert(
        prop::APPLICATION_COUNT.into(),
        (row.sum.round() as i64).into(),
    );
    update(row, props, Vec::new())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::store::{GraphStore, MemoryStore};
    use cinegraph_common::config::SystemConfig;
    use cinegraph_common::types::{NodeKey, PropertyValue};

    fn rated(user: &str, movie: &str, rating: f64) -> Vec<WriteOp> {
        let mut props = Properties::new();
        props.insert(prop::RATING.into(), rating.into());
        vec![
            WriteOp::upsert_node(NodeKey::user(user), Properties::new()),
            WriteOp::upsert_node(NodeKey::movie(movie), Properties::new()),
            WriteOp::upsert_edge(NodeKey::user(user), RelType::Rated, NodeKey::movie(movie), props),
        ]
    }

    async fn user_prop(store: &MemoryStore, key: &str) -> Option<PropertyValue> {
        store
            .get_node(&NodeKey::user("1"))
            .await
            .unwrap()
            .and_then(|n| n.properties.get(key).cloned())
    }

    #[tokio::test]
    async fn test_user_stats_reflect_current_edges() {
        let store = Arc::new(MemoryStore::new());
        let pipeline = Pipeline::new(store.clone(), SystemConfig::default());

        store.execute_batch(rated("1", "1", 3.0)).await.unwrap();
        store.execute_batch(rated("1", "2", 5.0)).await.unwrap();
        pipeline.compute_stats().await.unwrap();
        pipeline.compute_stats().await.unwrap();

        assert_eq!(user_prop(&store, prop::AVG_RATING).await, Some(PropertyValue::Float(4.0)));
        assert_eq!(user_prop(&store, prop::TOTAL_RATINGS).await, Some(PropertyValue::Integer(2)));

        store.execute_batch(rated("1", "3", 4.0)).await.unwrap();
        pipeline.compute_stats().await.unwrap();

        assert_eq!(user_prop(&store, prop::AVG_RATING).await, Some(PropertyValue::Float(4.0)));
        assert_eq!(user_prop(&store, prop::TOTAL_RATINGS).await, Some(PropertyValue::Integer(3)));
    }

    #[tokio::test]
    async fn test_director_mean_ignores_unrated_movies() {
        let store = Arc::new(MemoryStore::new());
        let pipeline = Pipeline::new(store.clone(), SystemConfig::default());

        let mut rated_movie = Properties::new();
        rated_movie.insert(prop::IMDB_RATING.into(), 8.0.into());
        let director = NodeKey::person("Ann");
        store
            .execute_batch(vec![
                WriteOp::upsert_node(director.clone(), Properties::new()),
                WriteOp::upsert_node(NodeKey::movie("1"), rated_movie),
                WriteOp::upsert_node(NodeKey::movie("2"), Properties::new()),
                WriteOp::upsert_edge(director.clone(), RelType::Directed, NodeKey::movie("1"), Properties::new()),
                WriteOp::upsert_edge(director.clone(), RelType::Directed, NodeKey::movie("2"), Properties::new()),
            ])
            .await
            .unwrap();
        pipeline.classify_roles().await.unwrap();
        pipeline.compute_stats().await.unwrap();

        let node = store.get_node(&director).await.unwrap().unwrap();
        assert_eq!(node.properties[prop::AVG_RATING], PropertyValue::Float(8.0));
        assert_eq!(node.properties[prop::MOVIE_COUNT], PropertyValue::Integer(2));
    }

    #[test]
    fn test_all_missing_values_unset_the_mean() {
        let row = AggregateRow {
            node: NodeKey::person("Ann"),
            count: 2,
            mean: None,
            sum: 0.0,
        };
        match director_stats(&row) {
            WriteOp::UpdateNode { properties, unset, .. } => {
                assert_eq!(unset, vec![prop::AVG_RATING.to_string()]);
                assert_eq!(properties[prop::MOVIE_COUNT], PropertyValue::Integer(2));
            }
            other => panic!("unexpected write {:?}", other),
        }
    }

    #[test]
    fn test_tag_stats_counts_edges_and_applications() {
        let row = AggregateRow {
            node: NodeKey::tag("funny"),
            count: 2,
            mean: Some(2.5),
            sum: 5.0,
        };
        match tag_stats(&row) {
            WriteOp::UpdateNode { properties, .. } => {
                assert_eq!(properties[prop::USAGE_COUNT], PropertyValue::Integer(2));
                assert_eq!(properties[prop::APPLICATION_COUNT], PropertyValue::Integer(5));
            }
            other => panic!("unexpected write {:?}", other),
        }
    }
}
