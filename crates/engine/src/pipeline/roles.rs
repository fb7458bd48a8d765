use cinegraph_common::types::{Label, RelType};

use super::{Pipeline, PipelineError, StageReport};

/// Add role labels to persons from their outgoing relationships.
pub(crate) async fn run(pipeline: &Pipeline, report: &mut StageReport) -> Result<(), PipelineError> {
    let store = pipeline.store();

    let actors = store
        .label_nodes_with_edge(Label::Person, RelType::ActedIn, Label::Actor)
        .await?;
    let directors = store
        .label_nodes_with_edge(Label::Person, RelType::Directed, Label::Director)
        .await?;

    report.processed += actors + directors;
    report.note("actor_labels_added", actors);
    report.note("director_labels_added", directors);
    Ok(())
}
