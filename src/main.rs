mod backends;
mod cli;

use ratingsync_core::{ArchiveStatus, PipelineJob, RunOutcome};
use ratingsync_transforms::TripEnricher;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let invocation = cli::parse_config()?;
    let config = invocation.config;

    let store = backends::artifact_store(&config).await?;
    let sink = backends::document_sink(&config)?;
    if invocation.check_only {
        info!(location = %store.describe(&config.artifact_key), "Configuration is valid");
        return Ok(());
    }

    let mut job = PipelineJob::new(&config, store, TripEnricher::from_config(&config), sink);
    let report = match job.run().await {
        Ok(report) => report,
        Err(e) => {
            error!(error = %e, "Pipeline run failed; artifact left in place for the next run");
            return Err(e.into());
        }
    };

    match report.outcome {
        RunOutcome::NoArtifact => info!(run_id = %report.run_id, "Nothing to process"),
        RunOutcome::Contended { holder } => {
            warn!(run_id = %report.run_id, holder = ?holder, "Skipped: artifact claimed by another run")
        }
        RunOutcome::Completed {
            inserted_count,
            archive: ArchiveStatus::Archived(archived),
        } => info!(
            run_id = %report.run_id,
            inserted = inserted_count,
            archive_key = %archived.archive_key,
            "Batch processed"
        ),
        RunOutcome::Completed {
            inserted_count,
            archive: ArchiveStatus::Failed(reason),
        } => error!(
            run_id = %report.run_id,
            inserted = inserted_count,
            %reason,
            "Batch loaded but not archived; reconcile the artifact manually"
        ),
    }

    Ok(())
}
