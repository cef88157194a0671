use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Default vacation threshold; trips strictly longer than this are flagged.
pub const DEFAULT_VACATION_THRESHOLD_DAYS: i64 = 7;

/// One rating submission as written by the collection form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRatingRecord {
    #[serde(rename(deserialize = "id_cliente"))]
    pub customer_id: String,
    #[serde(rename(deserialize = "destino"))]
    pub destination: String,
    #[serde(rename(deserialize = "data_inicio"))]
    pub trip_start: NaiveDate,
    #[serde(rename(deserialize = "data_fim"))]
    pub trip_end: NaiveDate,
    #[serde(rename(deserialize = "nota_experiencia"))]
    pub experience_score: i32,
    #[serde(rename(deserialize = "nota_destino"))]
    pub destination_score: i32,
    /// Line of the artifact the record starts on. Not part of the document.
    #[serde(skip)]
    pub source_line: u64,
}

/// Raw record plus the attributes derived by the enrichment step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichedRatingRecord {
    #[serde(flatten)]
    pub raw: RawRatingRecord,
    pub duration_days: i64,
    pub is_vacation_period: bool,
    pub processed_at: DateTime<Utc>,
}

/// A batch moving through the pipeline. `digest` identifies the artifact
/// content the records came from and is carried through to the store.
#[derive(Debug, Clone, PartialEq)]
pub struct RatingBatch<R> {
    pub source_key: String,
    pub digest: String,
    pub records: Vec<R>,
}

pub type RawBatch = RatingBatch<RawRatingRecord>;
pub type EnrichedBatch = RatingBatch<EnrichedRatingRecord>;

impl<R> RatingBatch<R> {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoadResult {
    pub inserted_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_enriched_record_serializes_flat() {
        let processed_at = DateTime::parse_from_rfc3339("2025-01-21T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let record = EnrichedRatingRecord {
            raw: RawRatingRecord {
                customer_id: "cliente123".to_string(),
                destination: "Salvador BA".to_string(),
                trip_start: NaiveDate::from_ymd_opt(2025, 1, 10).unwrap(),
                trip_end: NaiveDate::from_ymd_opt(2025, 1, 20).unwrap(),
                experience_score: 4,
                destination_score: 5,
                source_line: 2,
            },
            duration_days: 10,
            is_vacation_period: true,
            processed_at,
        };

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(
            value,
            json!({
                "customer_id": "cliente123",
                "destination": "Salvador BA",
                "trip_start": "2025-01-10",
                "trip_end": "2025-01-20",
                "experience_score": 4,
                "destination_score": 5,
                "duration_days": 10,
                "is_vacation_period": true,
                "processed_at": "2025-01-21T12:00:00Z"
            })
        );
    }
}
