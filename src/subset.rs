use crate::plan::{BoundPipeline, Invocation};
use tracing::debug;

/// Table operations the filter-then-transform adapter needs from the executor.
pub trait ViewExecutor {
    /// Table or grouped-table handle.
    type Table: Clone;
    type Error;

    fn is_grouped(&self, table: &Self::Table) -> bool;

    /// Row-filtered view sharing storage with `table`. Grouping is preserved.
    fn filter_view(
        &mut self,
        table: &Self::Table,
        predicates: &[Invocation],
    ) -> Result<Self::Table, Self::Error>;

    /// Applies the pipeline's invocations in place to `table`.
    fn transform_in_place(
        &mut self,
        table: &Self::Table,
        pipeline: &BoundPipeline,
    ) -> Result<(), Self::Error>;

    /// Ungrouped table underlying a grouped handle.
    fn parent(&self, table: &Self::Table) -> Self::Table;
}

/// Runs a mutating pipeline, filtering through a view first when the
/// pipeline carries a subset stage.
///
/// The nested transform sees the (possibly grouped) view; a grouped input
/// always returns its ungrouped parent.
pub fn run_with_subset<E: ViewExecutor>(
    executor: &mut E,
    input: &E::Table,
    pipeline: &BoundPipeline,
) -> Result<E::Table, E::Error> {
    let Some(predicates) = &pipeline.subset else {
        executor.transform_in_place(input, pipeline)?;
        return Ok(input.clone());
    };
    let view = executor.filter_view(input, predicates)?;
    executor.transform_in_place(&view, pipeline)?;
    let grouped = executor.is_grouped(input);
    debug!(
        entry = pipeline.entry.name(),
        predicates = predicates.len(),
        grouped,
        "transformed filtered view"
    );
    if grouped {
        Ok(executor.parent(input))
    } else {
        Ok(input.clone())
    }
}
