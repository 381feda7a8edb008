//! CSV ingestion and schema validation
//!
//! Device exports carry free-form preamble rows and, for some pumps, several
//! sections each introduced by its own header row. The first header that has
//! all required columns wins; everything else is skipped.


use std::fs::File;
use std::io::Read;
use std::path::Path;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use csv::{ReaderBuilder, StringRecord, Trim};
use thiserror::Error;
use tracing::{debug, info};

use crate::analysis::Reading;

pub const DATE_COLUMN: &str = "Date";
pub const TIME_COLUMN: &str = "Time";
pub const GLUCOSE_COLUMN: &str = "Sensor Glucose (mg/dL)";

const DATE_FORMATS: [&str; 3] = ["%Y/%m/%d", "%Y-%m-%d", "%m/%d/%Y"];
const TIME_FORMATS: [&str; 2] = ["%H:%M:%S", "%H:%M"];

#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("Missing required columns {missing:?} (found: {available:?})")]
    MissingColumns {
        missing: Vec<String>,
        available: Vec<String>,
    },

    #[error("No header row with Date, Time and Sensor Glucose (mg/dL) columns found")]
    NoHeader,

    #[error("Line {line}: invalid date/time '{value}'")]
    InvalidTimestamp { line: u64, value: String },

    #[error("Line {line}: invalid glucose value '{value}'")]
    InvalidGlucose { line: u64, value: String },

    #[error("File contains no glucose readings")]
    Empty,

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Validated readings from one input file
#[derive(Debug, Clone, PartialEq)]
pub struct IngestedReadings {
    /// Readings sorted by timestamp
    pub readings: Vec<Reading>,
    /// Data rows seen under a valid header
    pub rows_read: usize,
    /// Data rows with an empty glucose cell
    pub blank_glucose_rows: usize,
}

#[derive(Debug, Clone, Copy)]
struct ColumnMap {
    date: usize,
    time: usize,
    glucose: usize,
}

impl ColumnMap {
    fn from_header(fields: &[String]) -> Option<Self> {
        let position = |name: &str| fields.iter().position(|f| f == name);
        Some(Self {
            date: position(DATE_COLUMN)?,
            time: position(TIME_COLUMN)?,
            glucose: position(GLUCOSE_COLUMN)?,
        })
    }
}

/// Parse a CSV export from a file path
#[inline]
pub fn parse_csv_file(path: &Path) -> Result<IngestedReadings, SchemaError> {
    let file = File::open(path)?;
    info!("Ingesting {}", path.display());
    parse_csv(file)
}

/// Parse and validate a CSV export into typed readings
#[inline]
pub fn parse_csv<R: Read>(reader: R) -> Result<IngestedReadings, SchemaError> {
    let mut csv_reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(reader);

    let mut columns: Option<ColumnMap> = None;
    let mut found_header = false;
    let mut last_candidate: Option<Vec<String>> = None;
    let mut saw_records = false;
    let mut readings = Vec::new();
    let mut rows_read = 0_usize;
    let mut blank_glucose_rows = 0_usize;
    let mut record = StringRecord::new();

    while csv_reader.read_record(&mut record)? {
        saw_records = true;
        let line = record.position().map_or(0, csv::Position::line);
        let fields: Vec<String> = record.iter().map(normalize_header_field).collect();

        if is_header_candidate(&fields) {
            columns = ColumnMap::from_header(&fields);
            if columns.is_some() {
                found_header = true;
                debug!("Found glucose header on line {line}");
            } else {
                debug!("Skipping section without glucose column on line {line}");
            }
            last_candidate = Some(fields);
            continue;
        }

        let Some(map) = columns else {
            continue;
        };
        rows_read += 1;

        let glucose_cell = record.get(map.glucose).unwrap_or_default();
        if glucose_cell.is_empty() {
            blank_glucose_rows += 1;
            continue;
        }

        let date = record.get(map.date).unwrap_or_default();
        let time = record.get(map.time).unwrap_or_default();
        let timestamp =
            parse_timestamp(date, time).ok_or_else(|| SchemaError::InvalidTimestamp {
                line,
                value: format!("{date} {time}"),
            })?;
        let glucose = parse_glucose(glucose_cell).ok_or_else(|| SchemaError::InvalidGlucose {
            line,
            value: glucose_cell.to_string(),
        })?;

        readings.push(Reading::new(timestamp, glucose));
    }

    if !found_header {
        return Err(missing_header_error(last_candidate, saw_records));
    }
    if readings.is_empty() {
        return Err(SchemaError::Empty);
    }

    readings.sort_by_key(|r| r.timestamp);
    info!(
        "Ingested {} readings ({} rows, {} without glucose)",
        readings.len(),
        rows_read,
        blank_glucose_rows
    );

    Ok(IngestedReadings {
        readings,
        rows_read,
        blank_glucose_rows,
    })
}

fn normalize_header_field(field: &str) -> String {
    field.trim_start_matches('\u{feff}').trim().to_string()
}

fn is_header_candidate(fields: &[String]) -> bool {
    fields.iter().any(|f| f == DATE_COLUMN) && fields.iter().any(|f| f == TIME_COLUMN)
}

fn missing_header_error(candidate: Option<Vec<String>>, saw_records: bool) -> SchemaError {
    match candidate {
        Some(available) => {
            let missing = [DATE_COLUMN, TIME_COLUMN, GLUCOSE_COLUMN]
                .into_iter()
                .filter(|required| !available.iter().any(|f| f == *required))
                .map(str::to_string)
                .collect();
            SchemaError::MissingColumns { missing, available }
        }
        None if saw_records => SchemaError::NoHeader,
        None => SchemaError::Empty,
    }
}

/// Parse separate date and time cells using the accepted export formats
#[inline]
pub fn parse_timestamp(date: &str, time: &str) -> Option<NaiveDateTime> {
    let date = DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(date.trim(), fmt).ok())?;
    let time = TIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveTime::parse_from_str(time.trim(), fmt).ok())?;
    Some(date.and_time(time))
}

fn parse_glucose(cell: &str) -> Option<f64> {
    cell.trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v > 0.0)
}
