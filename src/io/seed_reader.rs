//! Asynchronous seed reader
//!
//! Streams [`SeedRecord`]s out of a seed CSV.
//!
//! # Architecture
//!
//! ```text
//! tokio File → compat → csv-async → SeedReader → SeedRecords
//!                                       ↓
//!                                csv_format module
//!                           (SeedRow, convert_seed_row)
//! ```

use std::path::Path;

use csv_async::AsyncReaderBuilder;
use futures::io::AsyncRead;
use futures::stream::StreamExt;
use tokio_util::compat::{Compat, TokioAsyncReadCompatExt};
use tracing::warn;

use crate::io::csv_format::{convert_seed_row, SeedRecord, SeedRow};
use crate::types::EngineError;

/// Asynchronous seed CSV reader
pub struct SeedReader<R: AsyncRead + Unpin> {
    csv_reader: csv_async::AsyncDeserializer<R>,
}

impl SeedReader<Compat<tokio::fs::File>> {
    /// Open a seed file
    pub async fn open(path: &Path) -> Result<Self, EngineError> {
        let file = tokio::fs::File::open(path).await.map_err(|e| EngineError::Io {
            message: format!("failed to open seed file {}: {}", path.display(), e),
        })?;
        Ok(Self::new(file.compat()))
    }
}

impl<R: AsyncRead + Unpin + Send> SeedReader<R> {
    pub fn new(reader: R) -> Self {
        let csv_reader = AsyncReaderBuilder::new()
            .flexible(true)
            .trim(csv_async::Trim::All)
            .create_deserializer(reader);

        Self { csv_reader }
    }

    /// Read every record in file order
    ///
    /// Rows that cannot be parsed or converted are logged and skipped.
    pub async fn read_all(&mut self) -> Vec<SeedRecord> {
        let mut seeds = Vec::new();
        let mut rows = self.csv_reader.deserialize::<SeedRow>();

        while let Some(row) = rows.next().await {
            match row {
                Ok(row) => match convert_seed_row(row) {
                    Ok(record) => seeds.push(record),
                    Err(e) => warn!(error = %e, "Skipping invalid seed row"),
                },
                Err(e) => warn!(error = %e, "Skipping unparsable seed row"),
            }
        }

        seeds
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::io::Cursor;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const HEADER: &str = "kind,id,parent,currency,balance,external_id,detail\n";

    #[tokio::test]
    async fn test_read_all_in_order() {
        let csv_content = format!(
            "{}company,6b1d0b4e-3f43-4c1f-9a57-0d2f8e6a1c01,,,,,\n\
             wallet,0f5b7a2c-1d3e-4b6a-8c9d-2e4f6a8b0c03,6b1d0b4e-3f43-4c1f-9a57-0d2f8e6a1c01,USD,100,,\n",
            HEADER
        );
        let mut reader = SeedReader::new(Cursor::new(csv_content.into_bytes()));

        let seeds = reader.read_all().await;

        assert_eq!(seeds.len(), 2);
        assert!(matches!(seeds[0], SeedRecord::Company(_)));
        assert!(matches!(seeds[1], SeedRecord::Wallet(_)));
    }

    #[tokio::test]
    async fn test_invalid_rows_are_skipped() {
        let csv_content = format!(
            "{}merchant,x,,,,,\n\
             company,6b1d0b4e-3f43-4c1f-9a57-0d2f8e6a1c01,,,,,\n",
            HEADER
        );
        let mut reader = SeedReader::new(Cursor::new(csv_content.into_bytes()));

        let seeds = reader.read_all().await;

        assert_eq!(seeds.len(), 1);
    }

    #[tokio::test]
    async fn test_whitespace_handling() {
        let csv_content = format!(
            "{}  company  ,  6b1d0b4e-3f43-4c1f-9a57-0d2f8e6a1c01  ,,,,, premium \n",
            HEADER
        );
        let mut reader = SeedReader::new(Cursor::new(csv_content.into_bytes()));

        let seeds = reader.read_all().await;

        let SeedRecord::Company(company) = &seeds[0] else {
            panic!("expected company");
        };
        assert_eq!(company.tier, crate::types::CompanyTier::Premium);
    }

    #[tokio::test]
    async fn test_open_reads_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}company,6b1d0b4e-3f43-4c1f-9a57-0d2f8e6a1c01,,,,,\n", HEADER).unwrap();

        let mut reader = SeedReader::open(file.path()).await.unwrap();

        assert_eq!(reader.read_all().await.len(), 1);
    }

    #[tokio::test]
    async fn test_open_missing_file_is_io_error() {
        let result = SeedReader::open(Path::new("does-not-exist.csv")).await;
        assert!(matches!(result, Err(EngineError::Io { .. })));
    }
}
