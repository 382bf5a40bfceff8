//! Spreadsheet decoding into a rectangular string grid

use base64::Engine;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SpreadsheetError {
    #[error("File content is not valid base64: {0}")]
    Encoding(#[from] base64::DecodeError),

    #[error("File is not valid UTF-8 text")]
    NotUtf8,

    #[error("Unsupported file type '{0}', upload a CSV file")]
    UnsupportedFormat(String),

    #[error("Unable to read CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("The file contains no rows")]
    Empty,

    #[error("The file has a header row but no data rows")]
    NoDataRows,

    #[error("The file has {rows} data rows, at most {max} are accepted")]
    TooManyRows { rows: usize, max: usize },
}

/// Header row plus data rows, every row padded to the same width
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetGrid {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl SheetGrid {
    /// Build from raw records: trailing blank rows are dropped, then every
    /// row is padded to the widest one.
    pub fn from_records(mut records: Vec<Vec<String>>) -> Result<Self, SpreadsheetError> {
        while records
            .last()
            .is_some_and(|r| r.iter().all(|c| c.trim().is_empty()))
        {
            records.pop();
        }

        let width = records.iter().map(Vec::len).max().unwrap_or(0);
        if records.is_empty() || width == 0 {
            return Err(SpreadsheetError::Empty);
        }

        for record in records.iter_mut() {
            record.resize(width, String::new());
        }

        let mut records = records.into_iter();
        let headers = records.next().unwrap_or_default();
        let rows: Vec<Vec<String>> = records.collect();
        if rows.is_empty() {
            return Err(SpreadsheetError::NoDataRows);
        }

        Ok(Self { headers, rows })
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn width(&self) -> usize {
        self.headers.len()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

/// Turns uploaded file bytes into a grid. Cell text is kept literally.
pub trait SheetDecoder: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> Result<SheetGrid, SpreadsheetError>;
}

/// CSV with an auto-detected delimiter
pub struct CsvDecoder;

impl SheetDecoder for CsvDecoder {
    fn decode(&self, bytes: &[u8]) -> Result<SheetGrid, SpreadsheetError> {
        let text = std::str::from_utf8(bytes).map_err(|_| SpreadsheetError::NotUtf8)?;
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);

        let first_line = text.lines().next().unwrap_or_default();
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(detect_delimiter(first_line))
            .has_headers(false)
            .flexible(true)
            .from_reader(text.as_bytes());

        let mut records = Vec::new();
        for result in reader.records() {
            let record = result?;
            records.push(record.iter().map(String::from).collect());
        }

        SheetGrid::from_records(records)
    }
}

/// Most frequent of `;`, `,` and tab in the header line, `,` on a tie
pub fn detect_delimiter(first_line: &str) -> u8 {
    let count = |c: char| first_line.matches(c).count();
    let commas = count(',');
    let semicolons = count(';');
    let tabs = count('\t');

    if semicolons > commas && semicolons >= tabs {
        b';'
    } else if tabs > commas && tabs > semicolons {
        b'\t'
    } else {
        b','
    }
}

/// Pick a decoder from the uploaded file name
pub fn decoder_for(file_name: &str) -> Result<Box<dyn SheetDecoder>, SpreadsheetError> {
    let extension = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "csv" | "tsv" | "txt" => Ok(Box::new(CsvDecoder)),
        _ => Err(SpreadsheetError::UnsupportedFormat(file_name.to_string())),
    }
}

/// Decode a base64 upload and enforce the data-row limit
pub fn decode_upload(file_name: &str, content_base64: &str, max_rows: usize) -> Result<SheetGrid, SpreadsheetError> {
    let decoder = decoder_for(file_name)?;
    let bytes = base64::engine::general_purpose::STANDARD.decode(content_base64.trim())?;
    let grid = decoder.decode(&bytes)?;

    if grid.row_count() > max_rows {
        return Err(SpreadsheetError::TooManyRows {
            rows: grid.row_count(),
            max: max_rows,
        });
    }
    Ok(grid)
}
