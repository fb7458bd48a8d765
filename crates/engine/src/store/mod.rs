//! Property graph store boundary.
//!
//! The pipeline only talks to the graph through [`GraphStore`]. Production
//! runs use [`Neo4jStore`]; tests and dry runs use [`MemoryStore`], which
//! honours the same merge-by-key and atomic-batch contract.

mod memory;
mod neo4j;

use std::future::Future;
use std::pin::Pin;

use cinegraph_common::types::{Label, NodeKey, Properties, RelType};

pub use memory::MemoryStore;
pub use neo4j::Neo4jStore;

/// Boxed future returned by every store operation.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Uniqueness constraint on one key property of a label.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Constraint {
    pub name: &'static str,
    pub label: Label,
    pub property: &'static str,
}

/// What a lookup index covers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexTarget {
    Node(Label),
    Relationship(RelType),
}

/// Lookup index on one property.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Index {
    pub name: &'static str,
    pub target: IndexTarget,
    pub property: &'static str,
}

/// One write inside an atomic batch.
///
/// Edge writes first match both endpoints; when either endpoint is missing
/// the write is skipped and counted, never creating a dangling edge.
#[derive(Clone, Debug, PartialEq)]
pub enum WriteOp {
    /// Create the node if absent, then overwrite the given properties.
    UpsertNode { node: NodeKey, properties: Properties },
    /// Overwrite properties on an existing node; `unset` keys are removed.
    /// No-op when the node does not exist.
    UpdateNode {
        node: NodeKey,
        properties: Properties,
        unset: Vec<String>,
    },
    /// Create the edge if no edge of this type joins the endpoints, then
    /// overwrite its properties.
    UpsertEdge {
        from: NodeKey,
        rel: RelType,
        to: NodeKey,
        properties: Properties,
    },
    /// Always create a new edge, even if one already joins the endpoints.
    AppendEdge {
        from: NodeKey,
        rel: RelType,
        to: NodeKey,
        properties: Properties,
    },
}

impl WriteOp {
    pub fn upsert_node(node: NodeKey, properties: Properties) -> Self {
        WriteOp::UpsertNode { node, properties }
    }

    pub fn upsert_edge(from: NodeKey, rel: RelType, to: NodeKey, properties: Properties) -> Self {
        WriteOp::UpsertEdge {
            from,
            rel,
            to,
            properties,
        }
    }

    pub fn append_edge(from: NodeKey, rel: RelType, to: NodeKey, properties: Properties) -> Self {
        WriteOp::AppendEdge {
            from,
            rel,
            to,
            properties,
        }
    }

    pub fn is_edge_write(&self) -> bool {
        matches!(self, WriteOp::UpsertEdge { .. } | WriteOp::AppendEdge { .. })
    }
}

/// Result of a committed batch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Writes that took effect.
    pub applied: u64,
    /// Edge writes dropped because an endpoint did not exist, plus node
    /// updates whose node did not exist.
    pub skipped: u64,
}

/// Which end of an edge an aggregation groups by.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GroupBy {
    Source,
    Target,
}

/// The number an aggregation averages and sums.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AggregateValue {
    /// A property of the edge itself.
    EdgeProperty(&'static str),
    /// A property of the node at the far end of the edge.
    OtherEndProperty(&'static str),
}

/// Grouped count/mean/sum over every edge of one type.
///
/// Only nodes carrying `group_label` form groups, so role labels such as
/// `Director` restrict the pass to labelled persons.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EdgeAggregation {
    pub rel: RelType,
    pub group_by: GroupBy,
    pub group_label: Label,
    pub value: Option<AggregateValue>,
}

/// One group of an [`EdgeAggregation`].
#[derive(Clone, Debug, PartialEq)]
pub struct AggregateRow {
    pub node: NodeKey,
    /// Number of edges in the group.
    pub count: u64,
    /// Mean over non-missing values; `None` when every value is missing.
    pub mean: Option<f64>,
    /// Sum over non-missing values.
    pub sum: f64,
}

/// A stored edge, as returned by scans.
#[derive(Clone, Debug, PartialEq)]
pub struct EdgeRecord {
    pub from: NodeKey,
    pub rel: RelType,
    pub to: NodeKey,
    pub properties: Properties,
}

/// Traversal direction relative to the starting node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Outgoing,
    Incoming,
}

/// A node reached by one hop, with the edge that reached it.
#[derive(Clone, Debug, PartialEq)]
pub struct Neighbor {
    pub node: NodeKey,
    pub node_properties: Properties,
    pub edge_properties: Properties,
}

/// A stored node.
#[derive(Clone, Debug, PartialEq)]
pub struct NodeRecord {
    pub key: NodeKey,
    pub labels: Vec<Label>,
    pub properties: Properties,
}

impl NodeRecord {
    pub fn has_label(&self, label: Label) -> bool {
        self.labels.contains(&label)
    }
}

/// Object-safe property graph store (dyn dispatch).
/// Tests use `MemoryStore`; production uses `Neo4jStore`.
pub trait GraphStore: Send + Sync {
    /// Verify the store is reachable.
    fn health_check(&self) -> StoreFuture<'_, ()>;

    /// Declare a uniqueness constraint. No error if it already exists.
    fn create_constraint<'a>(&'a self, constraint: &'a Constraint) -> StoreFuture<'a, ()>;

    /// Retract a constraint by name. No error if it does not exist.
    fn drop_constraint<'a>(&'a self, name: &'a str) -> StoreFuture<'a, ()>;

    /// Declare a lookup index. No error if it already exists.
    fn create_index<'a>(&'a self, index: &'a Index) -> StoreFuture<'a, ()>;

    /// Retract an index by name. No error if it does not exist.
    fn drop_index<'a>(&'a self, name: &'a str) -> StoreFuture<'a, ()>;

    /// Apply every write or none of them.
    fn execute_batch(&self, batch: Vec<WriteOp>) -> StoreFuture<'_, BatchOutcome>;

    /// Add `add` to every `label` node with at least one outgoing `rel` edge.
    /// Returns how many nodes gained the label.
    fn label_nodes_with_edge(&self, label: Label, rel: RelType, add: Label)
        -> StoreFuture<'_, u64>;

    /// Grouped aggregation over the current edge set.
    fn aggregate_edges(&self, aggregation: EdgeAggregation)
        -> StoreFuture<'_, Vec<AggregateRow>>;

    /// Every edge of one type.
    fn scan_edges(&self, rel: RelType) -> StoreFuture<'_, Vec<EdgeRecord>>;

    /// Nodes one `rel` hop away from `node`.
    fn neighbors<'a>(
        &'a self,
        node: &'a NodeKey,
        rel: RelType,
        direction: Direction,
    ) -> StoreFuture<'a, Vec<Neighbor>>;

    /// Delete every edge of one type. Returns how many were deleted.
    fn delete_edges(&self, rel: RelType) -> StoreFuture<'_, u64>;

    fn get_node<'a>(&'a self, key: &'a NodeKey) -> StoreFuture<'a, Option<NodeRecord>>;

    fn count_nodes(&self, label: Label) -> StoreFuture<'_, u64>;

    fn count_edges(&self, rel: RelType) -> StoreFuture<'_, u64>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Graph store connection error: {0}")]
    Connection(String),

    #[error("Graph store query error: {0}")]
    Query(String),

    #[error("Schema declaration failed for {name}: {detail}")]
    Schema { name: String, detail: String },

    #[error("Batch rolled back: {0}")]
    BatchRolledBack(String),

    #[error("Graph store state poisoned")]
    Poisoned,
}

impl From<StoreError> for cinegraph_common::CinegraphError {
    fn from(e: StoreError) -> Self {
        match &e {
            StoreError::Schema { .. } => cinegraph_common::CinegraphError::Schema(e.to_string()),
            StoreError::BatchRolledBack(_) => {
                cinegraph_common::CinegraphError::BatchCommit(e.to_string())
            }
            _ => cinegraph_common::CinegraphError::Neo4j(e.to_string()),
        }
    }
}
