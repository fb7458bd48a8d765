use std::collections::HashMap;

use chrono::{DateTime, NaiveDate};
use neo4rs::{query, BoltMap, BoltNull, BoltType, Graph, Query, Txn};

use cinegraph_common::config::RetryConfig;
use cinegraph_common::types::{prop, Label, NodeKey, Properties, PropertyValue, RelType};

use super::{
    AggregateRow, AggregateValue, BatchOutcome, Constraint, Direction, EdgeAggregation,
    EdgeRecord, GraphStore, GroupBy, Index, IndexTarget, Neighbor, NodeRecord, StoreError,
    StoreFuture, WriteOp,
};
use crate::retry::Backoff;

/// Neo4j-backed graph store wrapping a connection pool.
pub struct Neo4jStore {
    graph: Graph,
}

impl Neo4jStore {
    /// Connect to Neo4j, retrying with backoff until the configured attempts
    /// run out.
    pub async fn connect(
        uri: &str,
        user: &str,
        password: &str,
        retry: &RetryConfig,
    ) -> Result<Self, StoreError> {
        let mut backoff = Backoff::new(retry);

        loop {
            tracing::info!(uri = uri, attempt = backoff.attempts() + 1, "Connecting to Neo4j");

            let attempt = async {
                let graph = Graph::new(uri, user, password)
                    .await
                    .map_err(|e| StoreError::Connection(e.to_string()))?;
                let store = Self { graph };
                store.ping().await?;
                Ok::<_, StoreError>(store)
            }
            .await;

            match attempt {
                Ok(store) => {
                    tracing::info!("Neo4j connection established");
                    return Ok(store);
                }
                Err(e) => match backoff.next_wait() {
                    Some(wait) => {
                        tracing::warn!(
                            error = %e,
                            wait_ms = wait.as_millis() as u64,
                            "Failed to connect to Neo4j, retrying"
                        );
                        tokio::time::sleep(wait).await;
                    }
                    None => {
                        return Err(StoreError::Connection(format!(
                            "gave up after {} attempts: {}",
                            backoff.attempts(),
                            e
                        )));
                    }
                },
            }
        }
    }

    /// Get a reference to the underlying neo4rs Graph for raw queries.
    pub fn inner(&self) -> &Graph {
        &self.graph
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.graph
            .run(query("RETURN 1"))
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))
    }

    async fn run_schema(&self, name: &str, statement: String) -> Result<(), StoreError> {
        self.graph
            .run(query(&statement))
            .await
            .map_err(|e| StoreError::Schema {
                name: name.to_string(),
                detail: e.to_string(),
            })
    }

    /// Run a query that returns a single integer column.
    async fn fetch_count(&self, q: Query, column: &str) -> Result<u64, StoreError> {
        let mut result = self.graph.execute(q).await.map_err(query_err)?;
        match result.next().await.map_err(query_err)? {
            Some(row) => {
                let n: i64 = row.get(column).map_err(|e| {
                    StoreError::Query(format!("Missing '{}' column: {}", column, e))
                })?;
                Ok(n.max(0) as u64)
            }
            None => Ok(0),
        }
    }
}

impl GraphStore for Neo4jStore {
    fn health_check(&self) -> StoreFuture<'_, ()> {
        Box::pin(self.ping())
    }

    fn create_constraint<'a>(&'a self, constraint: &'a Constraint) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            ensure_identifier(constraint.name)?;
            let statement = format!(
                "CREATE CONSTRAINT {} IF NOT EXISTS FOR (n:{}) REQUIRE n.{} IS UNIQUE",
                constraint.name, constraint.label, constraint.property
            );
            self.run_schema(constraint.name, statement).await
        })
    }

    fn drop_constraint<'a>(&'a self, name: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            ensure_identifier(name)?;
            self.run_schema(name, format!("DROP CONSTRAINT {} IF EXISTS", name))
                .await
        })
    }

    fn create_index<'a>(&'a self, index: &'a Index) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            ensure_identifier(index.name)?;
            let statement = match index.target {
                IndexTarget::Node(label) => format!(
                    "CREATE INDEX {} IF NOT EXISTS FOR (n:{}) ON (n.{})",
                    index.name, label, index.property
                ),
                IndexTarget::Relationship(rel) => format!(
                    "CREATE INDEX {} IF NOT EXISTS FOR ()-[r:{}]-() ON (r.{})",
                    index.name, rel, index.property
                ),
            };
            self.run_schema(index.name, statement).await
        })
    }

    fn drop_index<'a>(&'a self, name: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            ensure_identifier(name)?;
            self.run_schema(name, format!("DROP INDEX {} IF EXISTS", name))
                .await
        })
    }

    fn execute_batch(&self, batch: Vec<WriteOp>) -> StoreFuture<'_, BatchOutcome> {
        Box::pin(async move {
            // Consecutive writes of the same shape share one UNWIND statement.
            let mut groups: Vec<(Shape, Vec<HashMap<String, BoltType>>)> = Vec::new();
            for op in batch {
                let shape = Shape::of(&op);
                let row = op_row(op);
                match groups.last_mut() {
                    Some((last, rows)) if *last == shape => rows.push(row),
                    _ => groups.push((shape, vec![row])),
                }
            }

            let mut txn = self
                .graph
                .start_txn()
                .await
                .map_err(|e| StoreError::Connection(e.to_string()))?;

            let mut outcome = BatchOutcome::default();
            for (shape, rows) in groups {
                let total = rows.len() as u64;
                match run_group(&mut txn, shape, rows).await {
                    Ok(applied) => {
                        let applied = applied.min(total);
                        outcome.applied += applied;
                        outcome.skipped += total - applied;
                    }
                    Err(e) => {
                        if let Err(rollback) = txn.rollback().await {
                            tracing::warn!(error = %rollback, "Batch rollback failed");
                        }
                        metrics::counter!("store.batch.rollbacks", "store" => "neo4j")
                            .increment(1);
                        return Err(StoreError::BatchRolledBack(e.to_string()));
                    }
                }
            }

            txn.commit().await.map_err(|e| {
                metrics::counter!("store.batch.rollbacks", "store" => "neo4j").increment(1);
                StoreError::BatchRolledBack(e.to_string())
            })?;

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
            let q = query(&format!(
                "MATCH (p:{label})-[:{rel}]->() \
                 WHERE NOT p:{add} \
                 WITH DISTINCT p \
                 SET p:{add} \
                 RETURN count(p) AS labelled"
            ));
            self.fetch_count(q, "labelled").await
        })
    }

    fn aggregate_edges(
        &self,
        aggregation: EdgeAggregation,
    ) -> StoreFuture<'_, Vec<AggregateRow>> {
        Box::pin(async move {
            let EdgeAggregation {
                rel,
                group_by,
                group_label,
                value,
            } = aggregation;

            let pattern = match group_by {
                GroupBy::Source => format!("(g:{group_label})-[r:{rel}]->(o)"),
                GroupBy::Target => format!("(o)-[r:{rel}]->(g:{group_label})"),
            };
            let value_expr = match value {
                Some(AggregateValue::EdgeProperty(p)) => format!("r.{p}"),
                Some(AggregateValue::OtherEndProperty(p)) => format!("o.{p}"),
                None => "null".to_string(),
            };
            let key = group_label.key_property();

            let q = query(&format!(
                "MATCH {pattern} \
                 WITH g, r, {value_expr} AS v \
                 RETURN g.{key} AS key, count(r) AS cnt, \
                        toFloat(avg(v)) AS mean, \
                        coalesce(toFloat(sum(v)), 0.0) AS total"
            ));

            let mut result = self.graph.execute(q).await.map_err(query_err)?;
            let mut rows = Vec::new();
            while let Some(row) = result.next().await.map_err(query_err)? {
                let node_key: String = row.get("key").map_err(column_err("key"))?;
                let count: i64 = row.get("cnt").map_err(column_err("cnt"))?;
                let mean: Option<f64> = row.get("mean").map_err(column_err("mean"))?;
                let sum: f64 = row.get("total").map_err(column_err("total"))?;
                rows.push(AggregateRow {
                    node: NodeKey::new(group_label, node_key),
                    count: count.max(0) as u64,
                    mean,
                    sum,
                });
            }
            Ok(rows)
        })
    }

    fn scan_edges(&self, rel: RelType) -> StoreFuture<'_, Vec<EdgeRecord>> {
        Box::pin(async move {
            let (from_label, to_label) = rel.endpoints();
            let q = query(&format!(
                "MATCH (a:{from_label})-[r:{rel}]->(b:{to_label}) \
                 RETURN a.{} AS from, b.{} AS to, {} AS props",
                from_label.key_property(),
                to_label.key_property(),
                edge_projection("r"),
            ));

            let mut result = self.graph.execute(q).await.map_err(query_err)?;
            let mut edges = Vec::new();
            while let Some(row) = result.next().await.map_err(query_err)? {
                let from: String = row.get("from").map_err(column_err("from"))?;
                let to: String = row.get("to").map_err(column_err("to"))?;
                let props: BoltMap = row.get("props").map_err(column_err("props"))?;
                edges.push(EdgeRecord {
                    from: NodeKey::new(from_label, from),
                    rel,
                    to: NodeKey::new(to_label, to),
                    properties: properties_from_map(&props),
                });
            }
            Ok(edges)
        })
    }

    fn neighbors<'a>(
        &'a self,
        node: &'a NodeKey,
        rel: RelType,
        direction: Direction,
    ) -> StoreFuture<'a, Vec<Neighbor>> {
        Box::pin(async move {
            let (from_label, to_label) = rel.endpoints();
            let (pattern, other_label) = match direction {
                Direction::Outgoing => (
                    format!(
                        "(a:{} {{{}: $key}})-[r:{rel}]->(b:{to_label})",
                        node.label,
                        node.label.key_property()
                    ),
                    to_label,
                ),
                Direction::Incoming => (
                    format!(
                        "(b:{from_label})-[r:{rel}]->(a:{} {{{}: $key}})",
                        node.label,
                        node.label.key_property()
                    ),
                    from_label,
                ),
            };

            let q = query(&format!(
                "MATCH {pattern} \
                 RETURN b.{} AS key, {} AS node, {} AS edge",
                other_label.key_property(),
                node_projection("b"),
                edge_projection("r"),
            ))
            .param("key", node.key.as_str());

            let mut result = self.graph.execute(q).await.map_err(query_err)?;
            let mut found = Vec::new();
            while let Some(row) = result.next().await.map_err(query_err)? {
                let key: String = row.get("key").map_err(column_err("key"))?;
                let node_props: BoltMap = row.get("node").map_err(column_err("node"))?;
                let edge_props: BoltMap = row.get("edge").map_err(column_err("edge"))?;
                found.push(Neighbor {
                    node: NodeKey::new(other_label, key),
                    node_properties: properties_from_map(&node_props),
                    edge_properties: properties_from_map(&edge_props),
                });
            }
            Ok(found)
        })
    }

    fn delete_edges(&self, rel: RelType) -> StoreFuture<'_, u64> {
        Box::pin(async move {
            let q = query(&format!(
                "MATCH ()-[r:{rel}]->() DELETE r RETURN count(r) AS deleted"
            ));
            self.fetch_count(q, "deleted").await
        })
    }

    fn get_node<'a>(&'a self, key: &'a NodeKey) -> StoreFuture<'a, Option<NodeRecord>> {
        Box::pin(async move {
            let q = query(&format!(
                "MATCH (n:{} {{{}: $key}}) RETURN labels(n) AS labels, {} AS props",
                key.label,
                key.label.key_property(),
                node_projection("n"),
            ))
            .param("key", key.key.as_str());

            let mut result = self.graph.execute(q).await.map_err(query_err)?;
            let Some(row) = result.next().await.map_err(query_err)? else {
                return Ok(None);
            };

            let labels: Vec<String> = row.get("labels").map_err(column_err("labels"))?;
            let props: BoltMap = row.get("props").map_err(column_err("props"))?;
            Ok(Some(NodeRecord {
                key: key.clone(),
                labels: labels.iter().filter_map(|l| Label::from_name(l)).collect(),
                properties: properties_from_map(&props),
            }))
        })
    }

    fn count_nodes(&self, label: Label) -> StoreFuture<'_, u64> {
        Box::pin(async move {
            let q = query(&format!("MATCH (n:{label}) RETURN count(n) AS c"));
            self.fetch_count(q, "c").await
        })
    }

    fn count_edges(&self, rel: RelType) -> StoreFuture<'_, u64> {
        Box::pin(async move {
            let q = query(&format!("MATCH ()-[r:{rel}]->() RETURN count(r) AS c"));
            self.fetch_count(q, "c").await
        })
    }
}

/// Statement shape of a write. Labels and relationship types cannot be
/// parameters in Cypher, so each shape gets its own statement text.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Shape {
    UpsertNode(Label),
    UpdateNode(Label),
    UpsertEdge(Label, RelType, Label),
    AppendEdge(Label, RelType, Label),
}

impl Shape {
    fn of(op: &WriteOp) -> Self {
        match op {
            WriteOp::UpsertNode { node, .. } => Shape::UpsertNode(node.label),
            WriteOp::UpdateNode { node, .. } => Shape::UpdateNode(node.label),
            WriteOp::UpsertEdge { from, rel, to, .. } => Shape::UpsertEdge(from.label, *rel, to.label),
            WriteOp::AppendEdge { from, rel, to, .. } => Shape::AppendEdge(from.label, *rel, to.label),
        }
    }

    fn cypher(&self) -> String {
        match *self {
            Shape::UpsertNode(label) => format!(
                "UNWIND $rows AS row \
                 MERGE (n:{label} {{{}: row.key}}) \
                 SET n += row.props \
                 RETURN count(n) AS applied",
                label.key_property()
            ),
            Shape::UpdateNode(label) => format!(
                "UNWIND $rows AS row \
                 MATCH (n:{label} {{{}: row.key}}) \
                 SET n += row.props \
                 RETURN count(n) AS applied",
                label.key_property()
            ),
            Shape::UpsertEdge(from, rel, to) => format!(
                "UNWIND $rows AS row \
                 MATCH (a:{from} {{{}: row.from}}) \
                 MATCH (b:{to} {{{}: row.to}}) \
                 MERGE (a)-[r:{rel}]->(b) \
                 SET r += row.props \
                 RETURN count(r) AS applied",
                from.key_property(),
                to.key_property()
            ),
            Shape::AppendEdge(from, rel, to) => format!(
                "UNWIND $rows AS row \
                 MATCH (a:{from} {{{}: row.from}}) \
                 MATCH (b:{to} {{{}: row.to}}) \
                 CREATE (a)-[r:{rel}]->(b) \
                 SET r = row.props \
                 RETURN count(r) AS applied",
                from.key_property(),
                to.key_property()
            ),
        }
    }
}

async fn run_group(
    txn: &mut Txn,
    shape: Shape,
    rows: Vec<HashMap<String, BoltType>>,
) -> Result<u64, neo4rs::Error> {
    let q = query(&shape.cypher()).param("rows", rows);
    let mut result = txn.execute(q).await?;
    let mut applied = 0u64;
    while let Some(row) = result.next(&mut *txn).await? {
        let n: i64 = row.get("applied").unwrap_or(0);
        applied += n.max(0) as u64;
    }
    Ok(applied)
}

fn op_row(op: WriteOp) -> HashMap<String, BoltType> {
    let mut row: HashMap<String, BoltType> = HashMap::new();
    match op {
        WriteOp::UpsertNode { node, properties } => {
            row.insert("key".into(), node.key.into());
            row.insert("props".into(), props_to_bolt(&properties, &[]).into());
        }
        WriteOp::UpdateNode {
            node,
            properties,
            unset,
        } => {
            row.insert("key".into(), node.key.into());
            row.insert("props".into(), props_to_bolt(&properties, &unset).into());
        }
        WriteOp::UpsertEdge {
            from,
            to,
            properties,
            ..
        }
        | WriteOp::AppendEdge {
            from,
            to,
            properties,
            ..
        } => {
            row.insert("from".into(), from.key.into());
            row.insert("to".into(), to.key.into());
            row.insert("props".into(), props_to_bolt(&properties, &[]).into());
        }
    }
    row
}

/// Property map for `SET x += map`. Null entries remove the property.
fn props_to_bolt(properties: &Properties, unset: &[String]) -> HashMap<String, BoltType> {
    let mut map: HashMap<String, BoltType> = properties
        .iter()
        .map(|(k, v)| (k.clone(), to_bolt(v)))
        .collect();
    for key in unset {
        map.insert(key.clone(), BoltType::Null(BoltNull));
    }
    map
}

fn to_bolt(value: &PropertyValue) -> BoltType {
    match value {
        PropertyValue::Integer(v) => (*v).into(),
        PropertyValue::Float(v) => (*v).into(),
        PropertyValue::String(v) => v.clone().into(),
        PropertyValue::Date(d) => (*d).into(),
        PropertyValue::DateTime(dt) => dt.fixed_offset().into(),
    }
}

/// Node map projection with the release date flattened to an ISO string.
fn node_projection(var: &str) -> String {
    format!(
        "{var} {{.*, {released}: toString({var}.{released})}}",
        released = prop::RELEASED
    )
}

/// Edge map projection with the timestamp flattened to epoch seconds.
fn edge_projection(var: &str) -> String {
    format!(
        "{var} {{.*, {ts}: {var}.{ts}.epochSeconds}}",
        ts = prop::TIMESTAMP
    )
}

fn properties_from_map(map: &BoltMap) -> Properties {
    map.value
        .iter()
        .filter_map(|(k, v)| from_bolt(&k.value, v).map(|pv| (k.value.clone(), pv)))
        .collect()
}

fn from_bolt(key: &str, value: &BoltType) -> Option<PropertyValue> {
    match value {
        BoltType::Integer(i) if key == prop::TIMESTAMP => {
            DateTime::from_timestamp(i.value, 0).map(PropertyValue::DateTime)
        }
        BoltType::Integer(i) => Some(PropertyValue::Integer(i.value)),
        BoltType::Float(f) => Some(PropertyValue::Float(f.value)),
        BoltType::String(s) if key == prop::RELEASED => NaiveDate::parse_from_str(&s.value, "%Y-%m-%d")
            .ok()
            .map(PropertyValue::Date),
        BoltType::String(s) => Some(PropertyValue::String(s.value.clone())),
        _ => None,
    }
}

/// Schema object names are interpolated into statements.
fn ensure_identifier(name: &str) -> Result<(), StoreError> {
    let valid = !name.is_empty()
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit());
    if valid {
        Ok(())
    } else {
        Err(StoreError::Query(format!("Invalid schema object name '{}'", name)))
    }
}

fn query_err(e: neo4rs::Error) -> StoreError {
    StoreError::Query(e.to_string())
}

fn column_err<E: std::fmt::Display>(column: &'static str) -> impl Fn(E) -> StoreError {
    move |e| StoreError::Query(format!("Missing '{}' column: {}", column, e))
}
