use chrono::{DateTime, Utc};
use ratingsync_core::{
    connector::Transform,
    error::{Error, Result},
    types::{
        EnrichedBatch, EnrichedRatingRecord, RawBatch, RawRatingRecord,
        DEFAULT_VACATION_THRESHOLD_DAYS,
    },
    PipelineConfig,
};
use tracing::debug;

/// Derives trip duration, the vacation flag and the processing timestamp.
#[derive(Debug, Clone, Copy)]
pub struct TripEnricher {
    vacation_threshold_days: i64,
}

impl Default for TripEnricher {
    fn default() -> Self {
        Self::new(DEFAULT_VACATION_THRESHOLD_DAYS)
    }
}

impl TripEnricher {
    pub fn new(vacation_threshold_days: i64) -> Self {
        Self {
            vacation_threshold_days,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.vacation_threshold_days)
    }

    /// Same as [`Transform::transform`] with the processing time supplied by
    /// the caller. Every record gets the same `processed_at`.
    pub fn transform_at(&self, batch: RawBatch, processed_at: DateTime<Utc>) -> Result<EnrichedBatch> {
        let records = batch
            .records
            .into_iter()
            .map(|raw| self.enrich(raw, processed_at))
            .collect::<Result<Vec<_>>>()?;

        debug!(records = records.len(), %processed_at, "Batch enriched");
        Ok(EnrichedBatch {
            source_key: batch.source_key,
            digest: batch.digest,
            records,
        })
    }

    fn enrich(
        &self,
        raw: RawRatingRecord,
        processed_at: DateTime<Utc>,
    ) -> Result<EnrichedRatingRecord> {
        let duration_days = (raw.trip_end - raw.trip_start).num_days();
        if duration_days < 0 {
            return Err(Error::MalformedInput(format!(
                "row {}: trip ends ({}) before it starts ({})",
                raw.source_line,
                raw.trip_end,
                raw.trip_start
            )));
        }

        Ok(EnrichedRatingRecord {
            duration_days,
            is_vacation_period: duration_days > self.vacation_threshold_days,
            processed_at,
            raw,
        })
    }
}

impl Transform for TripEnricher {
    fn transform(&self, batch: RawBatch) -> Result<EnrichedBatch> {
        self.transform_at(batch, Utc::now())
    }
}
