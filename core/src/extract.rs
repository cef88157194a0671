use crate::connector::{ArtifactHandle, ArtifactSnapshot, ArtifactStore};
use crate::error::{Error, Result};
use crate::types::{RawBatch, RawRatingRecord};
use csv::{ReaderBuilder, StringRecord, Trim};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::info;

/// Header names the collection form writes, in its column order.
pub const REQUIRED_COLUMNS: [&str; 6] = [
    "id_cliente",
    "destino",
    "data_inicio",
    "data_fim",
    "nota_experiencia",
    "nota_destino",
];

pub struct Extractor {
    store: Arc<dyn ArtifactStore>,
}

impl Extractor {
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        Self { store }
    }

    /// Reads the whole artifact and parses it. Batches are small, so there is
    /// no chunking. The snapshot is what gets archived later, whatever is
    /// appended to the artifact in the meantime.
    pub async fn extract(&self, handle: &ArtifactHandle) -> Result<(ArtifactSnapshot, RawBatch)> {
        let snapshot = self.store.read(&handle.key).await?.ok_or_else(|| {
            Error::Storage(format!("{} vanished after it was located", handle.key))
        })?;
        let batch = parse_batch(&handle.key, &snapshot.bytes)?;
        info!(
            key = %handle.key,
            rows = batch.len(),
            digest = %batch.digest,
            revision = %snapshot.revision,
            "Extracted batch"
        );
        Ok((snapshot, batch))
    }
}

pub fn content_digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Parses delimited rating rows. Columns may appear in any order; extra
/// columns are ignored.
pub fn parse_batch(source_key: &str, bytes: &[u8]) -> Result<RawBatch> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(Trim::All)
        .from_reader(bytes);

    let headers = reader.headers()?.clone();
    check_headers(&headers)?;

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row.map_err(|e| {
            let line = e.position().map(|pos| pos.line()).unwrap_or(0);
            malformed(source_key, line, &headers, &e)
        })?;
        // quoted fields may span lines, so the record's own position is used
        let line = row.position().map(|pos| pos.line()).unwrap_or(0);
        let mut record: RawRatingRecord = row
            .deserialize(Some(&headers))
            .map_err(|e| malformed(source_key, line, &headers, &e))?;
        record.source_line = line;
        records.push(record);
    }

    Ok(RawBatch {
        source_key: source_key.to_string(),
        digest: content_digest(bytes),
        records,
    })
}

fn malformed(source_key: &str, line: u64, headers: &StringRecord, err: &csv::Error) -> Error {
    Error::MalformedInput(format!(
        "{}: row {}: {}",
        source_key,
        line,
        describe(headers, err)
    ))
}

fn check_headers(headers: &StringRecord) -> Result<()> {
    let missing: Vec<&str> = REQUIRED_COLUMNS
        .iter()
        .copied()
        .filter(|column| !headers.iter().any(|h| h == *column))
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(Error::MalformedInput(format!(
            "missing required columns: {}",
            missing.join(", ")
        )))
    }
}

fn describe(headers: &StringRecord, err: &csv::Error) -> String {
    match err.kind() {
        csv::ErrorKind::Deserialize { err, .. } => match err.field() {
            Some(field) => {
                let column = headers.get(field as usize).unwrap_or("?");
                format!("column {}: {}", column, err.kind())
            }
            None => err.kind().to_string(),
        },
        _ => err.to_string(),
    }
}
