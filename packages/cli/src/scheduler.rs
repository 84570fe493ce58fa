//! Bounded dispatch of study-area parts onto blocking workers.
//!
//! Each part runs in [`tokio::task::spawn_blocking`]; the futures are
//! driven through `buffer_unordered`, so no more than `workers` parts are
//! scored at once. Reports come back in part-id order regardless of which
//! worker finished first.

use std::sync::Arc;

use futures::StreamExt as _;
use geest_cli_utils::IndicatifProgress;
use geest_workflow::{
    CancellationToken, PartReport, PartTask, ProgressCallback, Workflow, null_progress,
};
use indicatif::MultiProgress;

/// Runs every task, at most `workers` at a time.
///
/// With `multi` set, each running part gets its own progress bar plus one
/// bar counting finished parts.
///
/// # Errors
///
/// Returns the [`tokio::task::JoinError`] of a worker that panicked.
pub async fn run_parts(
    workflow: Arc<Workflow>,
    tasks: Vec<PartTask>,
    workers: usize,
    cancel: &CancellationToken,
    multi: Option<&MultiProgress>,
) -> Result<Vec<PartReport>, tokio::task::JoinError> {
    let workers = workers.max(1);
    let total = u64::try_from(tasks.len()).unwrap_or(u64::MAX);
    let overall: Arc<dyn ProgressCallback> =
        multi.map_or_else(null_progress, |m| IndicatifProgress::parts_bar(m, total));

    log::info!("Scheduling {} parts on {workers} workers", tasks.len());

    let joined: Vec<_> = futures::stream::iter(tasks)
        .map(|task| {
            let workflow = Arc::clone(&workflow);
            let cancel = cancel.clone();
            let progress = multi.map_or_else(null_progress, |m| {
                IndicatifProgress::part_bar(m, &task.id.to_string())
            });
            tokio::task::spawn_blocking(move || {
                workflow.run_part(&task, progress.as_ref(), &cancel)
            })
        })
        .buffer_unordered(workers)
        .inspect(|_| overall.inc(1))
        .collect()
        .await;

    let mut reports = joined.into_iter().collect::<Result<Vec<_>, _>>()?;
    reports.sort_by(|a, b| a.part.cmp(&b.part));

    let failed = reports.iter().filter(|r| !r.is_success()).count();
    overall.finish(format!("{} parts, {failed} with problems", reports.len()));
    Ok(reports)
}
