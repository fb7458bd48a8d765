use cinegraph_common::types::{prop, Label, RelType};

use super::{Pipeline, PipelineError, StageReport};
use crate::store::{Constraint, Index, IndexTarget};

/// One uniqueness constraint per node key.
pub const CONSTRAINTS: [Constraint; 5] = [
    Constraint {
        name: "unique_user_id",
        label: Label::User,
        property: "userId",
    },
    Constraint {
        name: "unique_movie_id",
        label: Label::Movie,
        property: "id",
    },
    Constraint {
        name: "unique_person_name",
        label: Label::Person,
        property: "name",
    },
    Constraint {
        name: "unique_tag_name",
        label: Label::Tag,
        property: "name",
    },
    Constraint {
        name: "unique_genre_name",
        label: Label::Genre,
        property: "name",
    },
];

/// Lookup indexes on attributes the recommendation query filters by.
pub const INDEXES: [Index; 3] = [
    Index {
        name: "movie_imdb_rating_index",
        target: IndexTarget::Node(Label::Movie),
        property: prop::IMDB_RATING,
    },
    Index {
        name: "movie_release_year_index",
        target: IndexTarget::Node(Label::Movie),
        property: prop::RELEASE_YEAR,
    },
    Index {
        name: "rated_rating_index",
        target: IndexTarget::Relationship(RelType::Rated),
        property: prop::RATING,
    },
];

/// Plain key indexes from older deployments. They shadow the uniqueness
/// constraints on the same properties, so they are always retracted.
pub const LEGACY_INDEXES: [&str; 5] = [
    "movie_id_index",
    "user_id_index",
    "person_name_index",
    "tag_name_index",
    "genre_name_index",
];

/// Drop, then recreate, every constraint and index.
pub(crate) async fn run(pipeline: &Pipeline, report: &mut StageReport) -> Result<(), PipelineError> {
    let store = pipeline.store();

    for constraint in &CONSTRAINTS {
        store.drop_constraint(constraint.name).await?;
    }

    for name in LEGACY_INDEXES
        .iter()
        .copied()
        .chain(INDEXES.iter().map(|i| i.name))
    {
        if let Err(e) = store.drop_index(name).await {
            tracing::warn!(index = name, error = %e, "Failed to drop index");
        }
    }

    for constraint in &CONSTRAINTS {
        store.create_constraint(constraint).await?;
        report.processed += 1;
        report.note("constraints", 1);
    }

    for index in &INDEXES {
        match store.create_index(index).await {
            Ok(()) => {
                report.processed += 1;
                report.note("indexes", 1);
            }
            Err(e) => {
                report.failed += 1;
                tracing::warn!(
                    index = index.name,
                    error = %e,
                    "Failed to create index, continuing without it"
                );
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::store::{GraphStore, MemoryStore, StoreError};
    use cinegraph_common::config::SystemConfig;

    fn pipeline(store: Arc<MemoryStore>) -> Pipeline {
        Pipeline::new(store, SystemConfig::default())
    }

    #[tokio::test]
    async fn test_schema_is_rerunnable() {
        let store = Arc::new(MemoryStore::new());
        let pipeline = pipeline(store.clone());

        let first = pipeline.ensure_schema().await.unwrap();
        let second = pipeline.ensure_schema().await.unwrap();

        assert_eq!(first.processed, 8);
        assert_eq!(second.processed, 8);
        assert_eq!(store.constraint_names().len(), 5);
        assert_eq!(store.index_names().len(), 3);
    }

    #[tokio::test]
    async fn test_legacy_indexes_retracted() {
        let store = Arc::new(MemoryStore::new());
        let legacy = Index {
            name: "movie_id_index",
            target: IndexTarget::Node(Label::Movie),
            property: "id",
        };
        store.create_index(&legacy).await.unwrap();

        pipeline(store.clone()).ensure_schema().await.unwrap();
        assert!(!store.index_names().contains(&"movie_id_index".to_string()));
    }

    #[tokio::test]
    async fn test_constraint_failure_is_fatal() {
        let store = Arc::new(MemoryStore::new());
        store.reject_schema_object("unique_tag_name");

        let err = pipeline(store).ensure_schema().await.unwrap_err();
        assert!(matches!(err, PipelineError::Store(StoreError::Schema { .. })));
    }

    #[tokio::test]
    async fn test_index_failure_is_not_fatal() {
        let store = Arc::new(MemoryStore::new());
        store.reject_schema_object("rated_rating_index");

        let report = pipeline(store.clone()).ensure_schema().await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.notes["indexes"], 2);
        assert_eq!(store.index_names().len(), 2);
    }
}
