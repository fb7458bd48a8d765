use std::collections::BTreeSet;

use chrono::Datelike;

use cinegraph_common::types::{prop, MovieRecord, MovieRow, NodeKey, Properties, RelType};

use super::parse::parse_movie;
use super::{Batch, BatchTotals, Pipeline, PipelineError, Stage, StageReport};
use crate::sources::FeedRows;
use crate::store::WriteOp;

pub(crate) async fn run(
    pipeline: &Pipeline,
    rows: FeedRows<MovieRow>,
    report: &mut StageReport,
) -> Result<(), PipelineError> {
    let records = pipeline.parse_rows(Stage::Movies, rows, report, parse_movie)?;
    let batches: Vec<Batch> = records
        .chunks(pipeline.batch_size())
        .map(movie_batch)
        .collect();

    let mut totals = BatchTotals::default();
    let result = pipeline.commit(Stage::Movies, batches, &mut totals).await;
    report.absorb(&totals);
    report.note("writes", totals.applied);
    result
}

/// Writes for a chunk of movies: nodes first, then relationships.
fn movie_batch(records: &[MovieRecord]) -> Batch {
    let mut movies = Vec::with_capacity(records.len());
    let mut people = BTreeSet::new();
    let mut genres = BTreeSet::new();
    let mut edges = Vec::new();

    for record in records {
        let movie = NodeKey::movie(&record.id);
        movies.push(WriteOp::upsert_node(movie.clone(), movie_properties(record)));

        for name in &record.directors {
            people.insert(name.clone());
            edges.push(WriteOp::upsert_edge(
                NodeKey::person(name),
                RelType::Directed,
                movie.clone(),
                Properties::new(),
            ));
        }
        for name in &record.actors {
            people.insert(name.clone());
            edges.push(WriteOp::upsert_edge(
                NodeKey::person(name),
                RelType::ActedIn,
                movie.clone(),
                Properties::new(),
            ));
        }
        for name in &record.genres {
            genres.insert(name.clone());
            edges.push(WriteOp::upsert_edge(
                movie.clone(),
                RelType::InGenre,
                NodeKey::genre(name),
                Properties::new(),
            ));
        }
    }

    // Group edges by type so each type is one statement.
    edges.sort_by_key(|op| match op {
        WriteOp::UpsertEdge { rel, .. } => *rel,
        _ => RelType::Directed,
    });

    let mut ops = movies;
    ops.extend(
        people
            .into_iter()
            .map(|name| WriteOp::upsert_node(NodeKey::person(name), Properties::new())),
    );
    ops.extend(
        genres
            .into_iter()
            .map(|name| WriteOp::upsert_node(NodeKey::genre(name), Properties::new())),
    );
    ops.extend(edges);

    Batch {
        rows: records.len() as u64,
        ops,
    }
}

fn movie_properties(record: &MovieRecord) -> Properties {
    let mut props = Properties::new();
    if let Some(title) = &record.title {
        props.insert(prop::TITLE.into(), title.clone().into());
    }
    if let Some(tagline) = &record.tagline {
        props.insert(prop::TAGLINE.into(), tagline.clone().into());
    }
    if let Some(released) = record.released {
        props.insert(prop::RELEASED.into(), released.into());
        props.insert(prop::RELEASE_YEAR.into(), i64::from(released.year()).into());
    }
    if let Some(rating) = record.imdb_rating {
        props.insert(prop::IMDB_RATING.into(), rating.into());
    }
    props
}
