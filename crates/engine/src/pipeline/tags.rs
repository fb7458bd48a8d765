//! Tag loading in three phases.
//!
//! A: every application becomes a raw `TAGGED` edge (user to movie).
//! B: raw edges are folded into canonical `Tag` nodes, frequency-weighted
//!    `HAS_TAG` edges and one `APPLIED_TAG` edge per user and tag.
//! C: raw edges are deleted.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};

use cinegraph_common::types::{prop, NodeKey, Properties, RelType, TagRecord, TagRow};

use super::parse::{normalize_tag, parse_tag};
use super::{Batch, BatchTotals, Pipeline, PipelineError, Stage, StageReport};
use crate::sources::FeedRows;
use crate::store::{EdgeRecord, WriteOp};

/// Property holding the raw tag text on a `TAGGED` edge.
const RAW_TAG: &str = "tag";

pub(crate) async fn run(
    pipeline: &Pipeline,
    rows: FeedRows<TagRow>,
    report: &mut StageReport,
) -> Result<(), PipelineError> {
    let store = pipeline.store();

    // Raw edges left behind by an aborted run would be counted twice.
    let stale = store.delete_edges(RelType::Tagged).await?;
    if stale > 0 {
        tracing::warn!(edges = stale, "Removed raw tag edges from an earlier run");
    }

    load_raw(pipeline, rows, report).await?;
    normalize(pipeline, report).await?;

    let deleted = store.delete_edges(RelType::Tagged).await?;
    report.note("raw_edges_deleted", deleted);
    Ok(())
}

/// Phase A.
async fn load_raw(
    pipeline: &Pipeline,
    rows: FeedRows<TagRow>,
    report: &mut StageReport,
) -> Result<(), PipelineError> {
    let records = pipeline.parse_rows(Stage::Tags, rows, report, parse_tag)?;
    let batches: Vec<Batch> = records
        .chunks(pipeline.batch_size())
        .map(raw_batch)
        .collect();

    let mut totals = BatchTotals::default();
    let result = pipeline.commit(Stage::Tags, batches, &mut totals).await;
    report.absorb(&totals);
    result
}

fn raw_batch(records: &[TagRecord]) -> Batch {
    let users: BTreeSet<&str> = records.iter().map(|r| r.user_id.as_str()).collect();

    let mut ops: Vec<WriteOp> = users
        .into_iter()
        .map(|id| WriteOp::upsert_node(NodeKey::user(id), Properties::new()))
        .collect();

    ops.extend(records.iter().map(|record| {
        let mut props = Properties::new();
        props.insert(RAW_TAG.into(), record.tag.clone().into());
        props.insert(prop::TIMESTAMP.into(), record.timestamp.into());
        WriteOp::append_edge(
            NodeKey::user(&record.user_id),
            RelType::Tagged,
            NodeKey::movie(&record.movie_id),
            props,
        )
    }));

    Batch {
        rows: records.len() as u64,
        ops,
    }
}

/// Aggregated view of the raw edges.
#[derive(Debug, Default, PartialEq)]
struct TagFold {
    /// (movie, normalized tag) -> number of applications.
    frequencies: BTreeMap<(NodeKey, String), u64>,
    /// (user, normalized tag) -> latest application.
    applications: BTreeMap<(NodeKey, String), DateTime<Utc>>,
    /// Raw edges whose text normalized to nothing.
    empty: u64,
}

fn fold(edges: Vec<EdgeRecord>) -> TagFold {
    let mut folded = TagFold::default();

    for edge in edges {
        let raw = edge
            .properties
            .get(RAW_TAG)
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        let name = normalize_tag(raw);
        if name.is_empty() {
            folded.empty += 1;
            continue;
        }

        *folded
            .frequencies
            .entry((edge.to, name.clone()))
            .or_insert(0) += 1;

        if let Some(applied_at) = edge
            .properties
            .get(prop::TIMESTAMP)
            .and_then(|v| v.as_datetime())
        {
            folded
                .applications
                .entry((edge.from, name))
                .and_modify(|latest| *latest = (*latest).max(applied_at))
                .or_insert(applied_at);
        }
    }

    folded
}

/// Phase B.
async fn normalize(pipeline: &Pipeline, report: &mut StageReport) -> Result<(), PipelineError> {
    let raw = pipeline.store().scan_edges(RelType::Tagged).await?;
    let raw_count = raw.len() as u64;
    let folded = fold(raw);

    if folded.empty > 0 {
        tracing::info!(edges = folded.empty, "Dropped tag applications with empty text");
    }
    report.skipped += folded.empty;
    report.processed = report.processed.saturating_sub(folded.empty);
    report.note("raw_edges", raw_count);

    let weight_per_application = pipeline.config().tags.weight_per_application;
    let batch_size = pipeline.batch_size();

    let tag_names: BTreeSet<&String> = folded.frequencies.keys().map(|(_, name)| name).collect();
    let tag_ops: Vec<WriteOp> = tag_names
        .iter()
        .map(|name| WriteOp::upsert_node(NodeKey::tag(name.as_str()), Properties::new()))
        .collect();

    let mut edge_ops: Vec<WriteOp> = folded
        .frequencies
        .iter()
        .map(|((movie, name), frequency)| {
            let mut props = Properties::new();
            props.insert(
                prop::WEIGHT.into(),
                (*frequency as f64 * weight_per_application).into(),
            );
            props.insert(prop::FREQUENCY.into(), (*frequency as i64).into());
            WriteOp::upsert_edge(movie.clone(), RelType::HasTag, NodeKey::tag(name.as_str()), props)
        })
        .collect();

    edge_ops.extend(folded.applications.iter().map(|((user, name), applied_at)| {
        let mut props = Properties::new();
        props.insert(prop::TIMESTAMP.into(), (*applied_at).into());
        WriteOp::upsert_edge(user.clone(), RelType::AppliedTag, NodeKey::tag(name.as_str()), props)
    }));

    report.note("tags", tag_ops.len() as u64);
    report.note("has_tag_edges", folded.frequencies.len() as u64);
    report.note("applied_tag_edges", folded.applications.len() as u64);

    // Tag nodes commit before any edge that points at them.
    let mut totals = BatchTotals::default();
    pipeline
        .commit(Stage::Tags, chunk(tag_ops, batch_size), &mut totals)
        .await?;
    pipeline
        .commit(Stage::Tags, chunk(edge_ops, batch_size), &mut totals)
        .await?;
    report.note("normalized_writes", totals.applied);

    Ok(())
}

fn chunk(ops: Vec<WriteOp>, size: usize) -> Vec<Batch> {
    ops.chunks(size)
        .map(|ops| Batch {
            rows: 0,
            ops: ops.to_vec(),
        })
        .collect()
}
