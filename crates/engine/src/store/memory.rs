use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use cinegraph_common::types::{Label, NodeKey, Properties, PropertyValue, RelType};

use super::{
    AggregateRow, AggregateValue, BatchOutcome, Constraint, Direction, EdgeAggregation,
    EdgeRecord, GraphStore, GroupBy, Index, Neighbor, NodeRecord, StoreError, StoreFuture,
    WriteOp,
};

#[derive(Clone, Debug, Default)]
struct MemNode {
    labels: BTreeSet<Label>,
    properties: Properties,
}

type EdgeSlot = (RelType, NodeKey, NodeKey);

#[derive(Clone, Debug, Default)]
struct MemoryGraph {
    nodes: BTreeMap<NodeKey, MemNode>,
    /// Parallel edges of one type between the same endpoints share a slot.
    edges: BTreeMap<EdgeSlot, Vec<Properties>>,
    constraints: BTreeMap<String, Constraint>,
    indexes: BTreeMap<String, Index>,
}

impl MemoryGraph {
    /// Apply one write. Returns false when the write was skipped.
    fn apply(&mut self, op: WriteOp) -> bool {
        match op {
            WriteOp::UpsertNode { node, properties } => {
                let key_property = node.label.key_property().to_string();
                let key_value = PropertyValue::String(node.key.clone());
                let label = node.label;
                let entry = self.nodes.entry(node).or_insert_with(|| MemNode {
                    labels: BTreeSet::from([label]),
                    properties: Properties::new(),
                });
                entry.properties.extend(properties);
                entry.properties.insert(key_property, key_value);
                true
            }
            WriteOp::UpdateNode {
                node,
                properties,
                unset,
            } => match self.nodes.get_mut(&node) {
                Some(existing) => {
                    existing.properties.extend(properties);
                    for key in unset {
                        existing.properties.remove(&key);
                    }
                    true
                }
                None => false,
            },
            WriteOp::UpsertEdge {
                from,
                rel,
                to,
                properties,
            } => {
                if !self.nodes.contains_key(&from) || !self.nodes.contains_key(&to) {
                    return false;
                }
                let slot = self.edges.entry((rel, from, to)).or_default();
                if slot.is_empty() {
                    slot.push(properties);
                } else {
                    for existing in slot.iter_mut() {
                        existing.extend(properties.clone());
                    }
                }
                true
            }
            WriteOp::AppendEdge {
                from,
                rel,
                to,
                properties,
            } => {
                if !self.nodes.contains_key(&from) || !self.nodes.contains_key(&to) {
                    return false;
                }
                self.edges.entry((rel, from, to)).or_default().push(properties);
                true
            }
        }
    }

    fn edges_of(&self, rel: RelType) -> impl Iterator<Item = (&NodeKey, &NodeKey, &Properties)> {
        self.edges
            .iter()
            .filter(move |((r, _, _), _)| *r == rel)
            .flat_map(|((_, from, to), slot)| slot.iter().map(move |props| (from, to, props)))
    }

    fn node_has_label(&self, key: &NodeKey, label: Label) -> bool {
        self.nodes
            .get(key)
            .is_some_and(|node| node.labels.contains(&label))
    }
}

#[derive(Debug, Default)]
struct Faults {
    /// The next batch fails after this many writes and is rolled back.
    fail_batch_after: Option<usize>,
    /// Schema object names whose declaration is refused.
    rejected_schema: BTreeSet<String>,
    /// The next batch waits this long before it takes the graph lock.
    delay_batch: Option<Duration>,
}

/// In-memory graph store with the same contract as the Neo4j backend.
///
/// Used by unit and integration tests and by `--dry-run` builds.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryGraph>,
    faults: Mutex<Faults>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next batch fail after `writes` of its writes were applied.
    pub fn fail_next_batch_after(&self, writes: usize) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.fail_batch_after = Some(writes);
        }
    }

    /// Hold the next batch back for `delay`, letting later batches overtake it.
    pub fn delay_next_batch(&self, delay: Duration) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.delay_batch = Some(delay);
        }
    }

    /// Refuse to declare the named constraint or index.
    pub fn reject_schema_object(&self, name: &str) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.rejected_schema.insert(name.to_string());
        }
    }

    /// Names of the declared constraints, sorted.
    pub fn constraint_names(&self) -> Vec<String> {
        self.lock()
            .map(|g| g.constraints.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Names of the declared indexes, sorted.
    pub fn index_names(&self) -> Vec<String> {
        self.lock()
            .map(|g| g.indexes.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryGraph>, StoreError> {
        self.state.lock().map_err(|_| StoreError::Poisoned)
    }

    fn faults(&self) -> Result<MutexGuard<'_, Faults>, StoreError> {
        self.faults.lock().map_err(|_| StoreError::Poisoned)
    }

    fn check_schema_allowed(&self, name: &str) -> Result<(), StoreError> {
        if self.faults()?.rejected_schema.contains(name) {
            return Err(StoreError::Schema {
                name: name.to_string(),
                detail: "declaration refused".into(),
            });
        }
        Ok(())
    }
}

impl GraphStore for MemoryStore {
    fn health_check(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            self.lock().map(|_| ())
        })
    }

    fn create_constraint<'a>(&'a self, constraint: &'a Constraint) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.check_schema_allowed(constraint.name)?;
            self.lock()?
                .constraints
                .entry(constraint.name.to_string())
                .or_insert_with(|| constraint.clone());
            Ok(())
        })
    }

    fn drop_constraint<'a>(&'a self, name: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.lock()?.constraints.remove(name);
            Ok(())
        })
    }

    fn create_index<'a>(&'a self, index: &'a Index) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.check_schema_allowed(index.name)?;
            self.lock()?
                .indexes
                .entry(index.name.to_string())
                .or_insert_with(|| index.clone());
            Ok(())
        })
    }

    fn drop_index<'a>(&'a self, name: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.lock()?.indexes.remove(name);
            Ok(())
        })
    }

    fn execute_batch(&self, batch: Vec<WriteOp>) -> StoreFuture<'_, BatchOutcome> {
        Box::pin(async move {
            let delay = self.faults()?.delay_batch.take();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            let fail_after = self.faults()?.fail_batch_after.take();
            let mut graph = self.lock()?;

            // Writes cannot fail on their own here, so a snapshot is only
            // needed when a failure has been injected.
            let snapshot = fail_after.map(|_| graph.clone());
            let mut outcome = BatchOutcome::default();

            for (applied_so_far, op) in batch.into_iter().enumerate() {
                if fail_after == Some(applied_so_far) {
                    if let Some(snapshot) = snapshot {
                        *graph = snapshot;
                    }
                    metrics::counter!("store.batch.rollbacks", "store" => "memory").increment(1);
                    return Err(StoreError::BatchRolledBack(format!(
                        "injected failure after {} writes",
                        applied_so_far
                    )));
                }
                if graph.apply(op) {
                    outcome.applied += 1;
                } else {
                    outcome.skipped += 1;
                }
            }

            Ok(outcome)
        })
    }

    fn label_nodes_with_edge(
        &self,
        label: Label,
        rel: RelType,
        add: Label,
    ) -> StoreFuture<'_, u64> {
        Box::pin(async move {
            let mut graph = self.lock()?;

            let sources: BTreeSet<NodeKey> = graph
                .edges_of(rel)
                .map(|(from, _, _)| from.clone())
                .collect();

            let mut labelled = 0;
            for key in sources {
                if let Some(node) = graph.nodes.get_mut(&key) {
                    if node.labels.contains(&label) && node.labels.insert(add) {
                        labelled += 1;
                    }
                }
            }
            Ok(labelled)
        })
    }

    fn aggregate_edges(
        &self,
        aggregation: EdgeAggregation,
    ) -> StoreFuture<'_, Vec<AggregateRow>> {
        Box::pin(async move {
            let graph = self.lock()?;

            // (count, sum, number of present values)
            let mut groups: BTreeMap<NodeKey, (u64, f64, u64)> = BTreeMap::new();

            for (from, to, props) in graph.edges_of(aggregation.rel) {
                let (group, other) = match aggregation.group_by {
                    GroupBy::Source => (from, to),
                    GroupBy::Target => (to, from),
                };
                if !graph.node_has_label(group, aggregation.group_label) {
                    continue;
                }

                let value = match aggregation.value {
                    Some(AggregateValue::EdgeProperty(key)) => {
                        props.get(key).and_then(PropertyValue::as_f64)
                    }
                    Some(AggregateValue::OtherEndProperty(key)) => graph
                        .nodes
                        .get(other)
                        .and_then(|n| n.properties.get(key))
                        .and_then(PropertyValue::as_f64),
                    None => None,
                };

                let entry = groups.entry(group.clone()).or_insert((0, 0.0, 0));
                entry.0 += 1;
                if let Some(v) = value {
                    entry.1 += v;
                    entry.2 += 1;
                }
            }

            Ok(groups
                .into_iter()
                .map(|(node, (count, sum, present))| AggregateRow {
                    node,
                    count,
                    mean: (present > 0).then(|| sum / present as f64),
                    sum,
                })
                .collect())
        })
    }

    fn scan_edges(&self, rel: RelType) -> StoreFuture<'_, Vec<EdgeRecord>> {
        Box::pin(async move {
            let graph = self.lock()?;
            Ok(graph
                .edges_of(rel)
                .map(|(from, to, props)| EdgeRecord {
                    from: from.clone(),
                    rel,
                    to: to.clone(),
                    properties: props.clone(),
                })
                .collect())
        })
    }

    fn neighbors<'a>(
        &'a self,
        node: &'a NodeKey,
        rel: RelType,
        direction: Direction,
    ) -> StoreFuture<'a, Vec<Neighbor>> {
        Box::pin(async move {
            let graph = self.lock()?;
            let mut found = Vec::new();

            for (from, to, props) in graph.edges_of(rel) {
                let other = match direction {
                    Direction::Outgoing if from == node => to,
                    Direction::Incoming if to == node => from,
                    _ => continue,
                };
                found.push(Neighbor {
                    node: other.clone(),
                    node_properties: graph
                        .nodes
                        .get(other)
                        .map(|n| n.properties.clone())
                        .unwrap_or_default(),
                    edge_properties: props.clone(),
                });
            }
            Ok(found)
        })
    }

    fn delete_edges(&self, rel: RelType) -> StoreFuture<'_, u64> {
        Box::pin(async move {
            let mut graph = self.lock()?;
            let mut deleted = 0u64;
            graph.edges.retain(|(r, _, _), slot| {
                if *r == rel {
                    deleted += slot.len() as u64;
                    false
                } else {
                    true
                }
            });
            Ok(deleted)
        })
    }

    fn get_node<'a>(&'a self, key: &'a NodeKey) -> StoreFuture<'a, Option<NodeRecord>> {
        Box::pin(async move {
            let graph = self.lock()?;
            Ok(graph.nodes.get(key).map(|node| NodeRecord {
                key: key.clone(),
                labels: node.labels.iter().copied().collect(),
                properties: node.properties.clone(),
            }))
        })
    }

    fn count_nodes(&self, label: Label) -> StoreFuture<'_, u64> {
        Box::pin(async move {
            let graph = self.lock()?;
            Ok(graph
                .nodes
                .values()
                .filter(|node| node.labels.contains(&label))
                .count() as u64)
        })
    }

    fn count_edges(&self, rel: RelType) -> StoreFuture<'_, u64> {
        Box::pin(async move {
            let graph = self.lock()?;
            Ok(graph.edges_of(rel).count() as u64)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(pairs: &[(&str, PropertyValue)]) -> Properties {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn test_upsert_node_merges_by_key() {
        let store = MemoryStore::new();
        let movie = NodeKey::movie("1");

        store
            .execute_batch(vec![
                WriteOp::upsert_node(movie.clone(), props(&[("title", "Old".into())])),
                WriteOp::upsert_node(movie.clone(), props(&[("title", "New".into())])),
            ])
            .await
            .unwrap();

        assert_eq!(store.count_nodes(Label::Movie).await.unwrap(), 1);
        let node = store.get_node(&movie).await.unwrap().unwrap();
        assert_eq!(node.properties["title"], PropertyValue::from("New"));
        assert_eq!(node.properties["id"], PropertyValue::from("1"));
    }

    #[tokio::test]
    async fn test_edge_to_missing_endpoint_is_skipped() {
        let store = MemoryStore::new();
        let outcome = store
            .execute_batch(vec![
                WriteOp::upsert_node(NodeKey::user("1"), Properties::new()),
                WriteOp::upsert_edge(
                    NodeKey::user("1"),
                    RelType::Rated,
                    NodeKey::movie("999"),
                    Properties::new(),
                ),
            ])
            .await
            .unwrap();

        assert_eq!(outcome, BatchOutcome { applied: 1, skipped: 1 });
        assert_eq!(store.count_edges(RelType::Rated).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_upsert_edge_does_not_duplicate_but_append_does() {
        let store = MemoryStore::new();
        let user = NodeKey::user("1");
        let movie = NodeKey::movie("1");
        let setup = vec![
            WriteOp::upsert_node(user.clone(), Properties::new()),
            WriteOp::upsert_node(movie.clone(), Properties::new()),
        ];
        store.execute_batch(setup).await.unwrap();

        for _ in 0..3 {
            store
                .execute_batch(vec![
                    WriteOp::upsert_edge(user.clone(), RelType::Rated, movie.clone(), Properties::new()),
                    WriteOp::append_edge(user.clone(), RelType::Tagged, movie.clone(), Properties::new()),
                ])
                .await
                .unwrap();
        }

        assert_eq!(store.count_edges(RelType::Rated).await.unwrap(), 1);
        assert_eq!(store.count_edges(RelType::Tagged).await.unwrap(), 3);
        assert_eq!(store.delete_edges(RelType::Tagged).await.unwrap(), 3);
        assert_eq!(store.count_edges(RelType::Tagged).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_injected_failure_rolls_back_whole_batch() {
        let store = MemoryStore::new();
        store.fail_next_batch_after(2);

        let result = store
            .execute_batch(vec![
                WriteOp::upsert_node(NodeKey::user("1"), Properties::new()),
                WriteOp::upsert_node(NodeKey::user("2"), Properties::new()),
                WriteOp::upsert_node(NodeKey::user("3"), Properties::new()),
            ])
            .await;

        assert!(matches!(result, Err(StoreError::BatchRolledBack(_))));
        assert_eq!(store.count_nodes(Label::User).await.unwrap(), 0);

        // The fault fires once.
        store
            .execute_batch(vec![WriteOp::upsert_node(NodeKey::user("1"), Properties::new())])
            .await
            .unwrap();
        assert_eq!(store.count_nodes(Label::User).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_update_node_unsets_and_skips_missing() {
        let store = MemoryStore::new();
        let person = NodeKey::person("Ann");
        store
            .execute_batch(vec![WriteOp::upsert_node(
                person.clone(),
                props(&[("avgRating", 7.5.into())]),
            )])
            .await
            .unwrap();

        let outcome = store
            .execute_batch(vec![
                WriteOp::UpdateNode {
                    node: person.clone(),
                    properties: props(&[("movieCount", 2i64.into())]),
                    unset: vec!["avgRating".into()],
                },
                WriteOp::UpdateNode {
                    node: NodeKey::person("Nobody"),
                    properties: Properties::new(),
                    unset: Vec::new(),
                },
            ])
            .await
            .unwrap();

        assert_eq!(outcome, BatchOutcome { applied: 1, skipped: 1 });
        let node = store.get_node(&person).await.unwrap().unwrap();
        assert!(!node.properties.contains_key("avgRating"));
        assert_eq!(node.properties["movieCount"], PropertyValue::Integer(2));
        assert_eq!(store.count_nodes(Label::Person).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_rejected_schema_object() {
        let store = MemoryStore::new();
        store.reject_schema_object("unique_movie_id");
        let constraint = Constraint {
            name: "unique_movie_id",
            label: Label::Movie,
            property: "id",
        };
        let err = store.create_constraint(&constraint).await.unwrap_err();
        assert!(matches!(err, StoreError::Schema { .. }));
        assert!(store.constraint_names().is_empty());
    }

    #[tokio::test]
    async fn test_health_check_reports_ok() {
        let store = MemoryStore::new();
        assert!(store.health_check().await.is_ok());
    }

    #[tokio::test]
    async fn test_delayed_batch_is_overtaken() {
        let store = std::sync::Arc::new(MemoryStore::new());
        store.delay_next_batch(Duration::from_millis(50));

        let title = |t: &str| {
            vec![WriteOp::upsert_node(
                NodeKey::movie("1"),
                props(&[("title", t.into())]),
            )]
        };
        let first = tokio::spawn({
            let store = store.clone();
            let batch = title("First");
            async move { store.execute_batch(batch).await }
        });
        tokio::time::sleep(Duration::from_millis(5)).await;
        store.execute_batch(title("Second")).await.unwrap();
        first.await.unwrap().unwrap();

        let node = store.get_node(&NodeKey::movie("1")).await.unwrap().unwrap();
        assert_eq!(node.properties["title"], PropertyValue::from("First"));
    }
}
