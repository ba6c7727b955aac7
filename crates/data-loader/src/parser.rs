//! CSV codec for ingest and result files.
//!
//! Input files must carry the four identity columns; anything else in the
//! file is ignored. The output file has a fixed header, with neighbor lists
//! flattened into `|`-separated cells so one output row maps to one input
//! row.

use crate::error::{DataLoadError, Result};
use crate::types::*;
use csv::{ReaderBuilder, StringRecord, Trim, WriterBuilder};

/// Columns every ingest CSV must provide
pub const REQUIRED_COLUMNS: [&str; 4] = ["item_id", "marketplace_id", "img_id", "product_type"];

/// Header of the result CSV
pub const OUTPUT_COLUMNS: [&str; 8] = [
    "item_id",
    "marketplace_id",
    "img_id",
    "product_type",
    "neighbor_item_id",
    "neighbors_dist",
    "status",
    "error",
];

/// Separator used inside the neighbor cells.
///
/// It is not escaped, so neighbor ids must not contain it. The inference
/// client rejects responses that do.
pub const LIST_SEPARATOR: char = '|';

/// Where each required column sits in a particular file's header
#[derive(Debug, Clone, Copy)]
struct ColumnIndex {
    item_id: usize,
    marketplace_id: usize,
    img_id: usize,
    product_type: usize,
}

impl ColumnIndex {
    fn locate(file: &str, headers: &StringRecord) -> Result<Self> {
        let find = |column: &str| {
            headers
                .iter()
                .position(|h| h.trim_start_matches('\u{feff}').trim() == column)
                .ok_or_else(|| DataLoadError::MissingColumn {
                    file: file.to_string(),
                    column: column.to_string(),
                })
        };
        Ok(Self {
            item_id: find("item_id")?,
            marketplace_id: find("marketplace_id")?,
            img_id: find("img_id")?,
            product_type: find("product_type")?,
        })
    }
}

/// Check that a header row carries every required column without reading rows.
pub fn check_input_schema(file: &str, bytes: &[u8]) -> Result<()> {
    let mut reader = ReaderBuilder::new().trim(Trim::All).from_reader(bytes);
    let headers = reader.headers().map_err(|source| DataLoadError::Csv {
        file: file.to_string(),
        source,
    })?;
    ColumnIndex::locate(file, headers).map(|_| ())
}

/// Parse one ingest CSV.
///
/// Rows receive consecutive positions starting at `first_position`. Blank
/// rows are skipped; every required cell must be non-empty.
pub fn parse_input_csv(file: &str, bytes: &[u8], first_position: usize) -> Result<Vec<InputRecord>> {
    let mut reader = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .from_reader(bytes);

    let headers = reader
        .headers()
        .map_err(|source| DataLoadError::Csv {
            file: file.to_string(),
            source,
        })?
        .clone();
    let columns = ColumnIndex::locate(file, &headers)?;

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row.map_err(|source| DataLoadError::Csv {
            file: file.to_string(),
            source,
        })?;
        if row.iter().all(str::is_empty) {
            continue;
        }
        let line_no = row.position().map(|p| p.line() as usize).unwrap_or(0);

        let cell = |idx: usize, name: &str| -> Result<String> {
            match row.get(idx) {
                Some(value) if !value.is_empty() => Ok(value.to_string()),
                _ => Err(DataLoadError::ParseError {
                    file: file.to_string(),
                    line: line_no,
                    reason: format!("Missing {}", name),
                }),
            }
        };

        let position = first_position + records.len();
        records.push(InputRecord {
            item_id: cell(columns.item_id, "item_id")?,
            marketplace_id: cell(columns.marketplace_id, "marketplace_id")?,
            img_id: cell(columns.img_id, "img_id")?,
            product_type: cell(columns.product_type, "product_type")?,
            position,
        });
    }

    Ok(records)
}

/// Serialize result rows into the output CSV.
pub fn write_output_csv(records: &[OutputRecord]) -> Result<Vec<u8>> {
    let mut writer = WriterBuilder::new().from_writer(Vec::new());
    let csv_err = |source| DataLoadError::Csv {
        file: "output".to_string(),
        source,
    };

    writer.write_record(OUTPUT_COLUMNS).map_err(csv_err)?;
    for record in records {
        let neighbors = join_list(record.neighbor_item_ids.iter());
        let distances = join_list(record.neighbors_dist.iter());
        let status = record.status.to_string();
        writer
            .write_record([
                record.item_id.as_str(),
                record.marketplace_id.as_str(),
                record.img_id.as_str(),
                record.product_type.as_str(),
                neighbors.as_str(),
                distances.as_str(),
                status.as_str(),
                record.error.as_deref().unwrap_or(""),
            ])
            .map_err(csv_err)?;
    }

    writer
        .into_inner()
        .map_err(|e| DataLoadError::IoError(e.into_error()))
}

/// Read back a result CSV produced by [`write_output_csv`].
///
/// Positions are assigned from row order.
pub fn read_output_csv(bytes: &[u8]) -> Result<Vec<OutputRecord>> {
    let file = "output";
    let mut reader = ReaderBuilder::new().from_reader(bytes);
    let mut records = Vec::new();

    for row in reader.records() {
        let row = row.map_err(|source| DataLoadError::Csv {
            file: file.to_string(),
            source,
        })?;
        let line_no = row.position().map(|p| p.line() as usize).unwrap_or(0);
        let parse_err = |reason: String| DataLoadError::ParseError {
            file: file.to_string(),
            line: line_no,
            reason,
        };
        if row.len() != OUTPUT_COLUMNS.len() {
            return Err(parse_err(format!(
                "Expected {} fields but found {}",
                OUTPUT_COLUMNS.len(),
                row.len()
            )));
        }

        let status = match &row[6] {
            "ok" => RecordStatus::Ok,
            "failed" => RecordStatus::Failed,
            other => return Err(parse_err(format!("Invalid status: {}", other))),
        };
        let neighbors_dist = split_list(&row[5])
            .map(|d| {
                d.parse::<f32>()
                    .map_err(|e| parse_err(format!("Invalid distance {}: {}", d, e)))
            })
            .collect::<Result<Vec<f32>>>()?;

        let position = records.len();
        records.push(OutputRecord {
            item_id: row[0].to_string(),
            marketplace_id: row[1].to_string(),
            img_id: row[2].to_string(),
            product_type: row[3].to_string(),
            neighbor_item_ids: split_list(&row[4]).map(str::to_string).collect(),
            neighbors_dist,
            status,
            error: Some(row[7].to_string()).filter(|e| !e.is_empty()),
            position,
        });
    }
    Ok(records)
}

fn join_list<T: ToString>(values: impl Iterator<Item = T>) -> String {
    values
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(&LIST_SEPARATOR.to_string())
}

fn split_list(cell: &str) -> impl Iterator<Item = &str> {
    cell.split(LIST_SEPARATOR).filter(|s| !s.is_empty())
}
