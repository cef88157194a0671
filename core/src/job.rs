use crate::{
    archive::Archiver,
    config::PipelineConfig,
    connector::{ArchivedArtifact, ArtifactHandle, ArtifactStore, DocumentSink, Transform},
    error::{Error, Result},
    extract::Extractor,
    lease::{Claim, LeaseManager},
    load::Loader,
    locate::SourceLocator,
    metrics::Metrics,
};
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    Locating,
    Extracting,
    Transforming,
    Loading,
    Archiving,
    Done,
    Aborted,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Idle => "IDLE",
            Stage::Locating => "LOCATING",
            Stage::Extracting => "EXTRACTING",
            Stage::Transforming => "TRANSFORMING",
            Stage::Loading => "LOADING",
            Stage::Archiving => "ARCHIVING",
            Stage::Done => "DONE",
            Stage::Aborted => "ABORTED",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveStatus {
    Archived(ArchivedArtifact),
    /// The documents are in the store but the artifact was not retired.
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Nothing under the artifact key, or a zero-length artifact.
    NoArtifact,
    /// Another run holds the lease on the artifact. `holder` is `None` when
    /// its marker could not be parsed.
    Contended { holder: Option<Uuid> },
    Completed {
        inserted_count: u64,
        archive: ArchiveStatus,
    },
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Uuid,
    pub outcome: RunOutcome,
    /// Every stage the run entered, in order, starting with `Idle`.
    pub stages: Vec<Stage>,
}

struct StageTracker {
    stages: Vec<Stage>,
}

impl StageTracker {
    fn new() -> Self {
        Self {
            stages: vec![Stage::Idle],
        }
    }

    fn current(&self) -> Stage {
        self.stages.last().copied().unwrap_or(Stage::Idle)
    }

    fn advance(&mut self, to: Stage) {
        info!(from = %self.current(), to = %to, "Stage transition");
        self.stages.push(to);
    }

    fn abort(&mut self, err: &Error) {
        error!(stage = %self.current(), error = %err, "Run aborted");
        self.stages.push(Stage::Aborted);
    }
}

/// Drives one locate, extract, transform, load, archive cycle.
///
/// Each call to [`PipelineJob::run`] starts from `Idle`; nothing carries over
/// between runs except what is in storage.
pub struct PipelineJob<T: Transform> {
    store: Arc<dyn ArtifactStore>,
    locator: SourceLocator,
    leases: LeaseManager,
    extractor: Extractor,
    transformer: T,
    loader: Loader,
    archiver: Archiver,
    metrics: Metrics,
}

impl<T: Transform> PipelineJob<T> {
    pub fn new(
        config: &PipelineConfig,
        store: Arc<dyn ArtifactStore>,
        transformer: T,
        sink: Box<dyn DocumentSink>,
    ) -> Self {
        Self {
            locator: SourceLocator::new(store.clone(), config.artifact_key.clone()),
            leases: LeaseManager::new(store.clone(), config.lease_key(), config.lease_ttl()),
            extractor: Extractor::new(store.clone()),
            transformer,
            loader: Loader::new(sink, config.connect_timeout()),
            archiver: Archiver::new(store.clone(), config.archive_prefix.clone()),
            store,
            metrics: Metrics::new(),
        }
    }

    /// Metrics of the most recent run.
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Returns `Ok` on success and on the no-op paths. Any error means the
    /// artifact was left in place for the next scheduled run.
    pub async fn run(&mut self) -> Result<RunReport> {
        let run_id = Uuid::new_v4();
        let span = info_span!("pipeline_run", %run_id);
        self.run_inner(run_id).instrument(span).await
    }

    async fn run_inner(&mut self, run_id: Uuid) -> Result<RunReport> {
        let mut tracker = StageTracker::new();
        self.metrics = Metrics::new();
        self.metrics.start_run();

        let result = self.run_stages(run_id, &mut tracker).await;

        self.metrics.end_run();
        self.metrics.print_summary();

        result.map(|outcome| RunReport {
            run_id,
            outcome,
            stages: tracker.stages,
        })
    }

    async fn run_stages(&mut self, run_id: Uuid, tracker: &mut StageTracker) -> Result<RunOutcome> {
        tracker.advance(Stage::Locating);
        let located = self.locator.locate().await;
        match located {
            Ok(Some(_)) => {}
            Ok(None) => {
                tracker.advance(Stage::Done);
                return Ok(RunOutcome::NoArtifact);
            }
            Err(e) => {
                tracker.abort(&e);
                return Err(e);
            }
        }

        let lease = match self.leases.claim(run_id).await {
            Ok(Claim::Acquired(lease)) => lease,
            Ok(Claim::Held(holder)) => {
                match &holder {
                    Some(holder) => warn!(
                        holder = %holder.run_id,
                        claimed_at = %holder.claimed_at,
                        "Artifact is being processed by another run"
                    ),
                    None => warn!("Artifact is claimed by an unreadable lease marker"),
                }
                tracker.advance(Stage::Done);
                return Ok(RunOutcome::Contended {
                    holder: holder.map(|h| h.run_id),
                });
            }
            Err(e) => {
                tracker.abort(&e);
                return Err(e);
            }
        };

        // the previous holder may have archived the artifact before we claimed it
        let handle = match self.locator.locate().await {
            Ok(Some(handle)) => handle,
            Ok(None) => {
                lease.release().await;
                tracker.advance(Stage::Done);
                return Ok(RunOutcome::NoArtifact);
            }
            Err(e) => {
                lease.release().await;
                tracker.abort(&e);
                return Err(e);
            }
        };

        let result = self.process(&handle, tracker).await;
        lease.release().await;
        match result {
            Ok(outcome) => {
                tracker.advance(Stage::Done);
                Ok(outcome)
            }
            Err(e) => {
                tracker.abort(&e);
                Err(e)
            }
        }
    }

    async fn process(
        &mut self,
        handle: &ArtifactHandle,
        tracker: &mut StageTracker,
    ) -> Result<RunOutcome> {
        info!(location = %self.store.describe(&handle.key), size = handle.size, "Processing batch artifact");

        tracker.advance(Stage::Extracting);
        let (snapshot, raw) = self.extractor.extract(handle).await?;
        self.metrics.record_read(raw.len());

        tracker.advance(Stage::Transforming);
        let enriched = self.transformer.transform(raw)?;
        self.metrics.record_transformed(enriched.len());

        tracker.advance(Stage::Loading);
        let loaded = self.loader.load(&enriched).await?;
        self.metrics.record_inserted(loaded.inserted_count);

        tracker.advance(Stage::Archiving);
        let archive = match self.archiver.archive(&snapshot).await {
            Ok(archived) => {
                self.metrics.record_archived(&archived.archive_key);
                ArchiveStatus::Archived(archived)
            }
            Err(e) => {
                // data already landed; reconciling the artifact is an operator task
                error!(key = %handle.key, error = %e, "Archiving failed");
                self.metrics.record_archive_failure();
                ArchiveStatus::Failed(e.to_string())
            }
        };

        Ok(RunOutcome::Completed {
            inserted_count: loaded.inserted_count,
            archive,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_names() {
        assert_eq!(Stage::Locating.to_string(), "LOCATING");
        assert_eq!(Stage::Aborted.to_string(), "ABORTED");
    }

    #[test]
    fn test_tracker_records_path() {
        let mut tracker = StageTracker::new();
        tracker.advance(Stage::Locating);
        tracker.abort(&Error::Storage("down".into()));
        assert_eq!(
            tracker.stages,
            vec![Stage::Idle, Stage::Locating, Stage::Aborted]
        );
        assert_eq!(tracker.current(), Stage::Aborted);
    }
}
