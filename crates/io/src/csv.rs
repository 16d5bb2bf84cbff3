// CSV snapshot reading

use std::io::Read;
use std::path::Path;

use serde_json::{Map, Value};

/// Read a snapshot file into one JSON object per row, keyed by header.
///
/// `delimiter` is the configured field delimiter; without one it is
/// detected from the first records. Cells are trimmed; empty cells are left
/// out of the row object. Rows with no non-empty cell are skipped.
pub fn read_rows(path: &Path, delimiter: Option<u8>) -> Result<Vec<Map<String, Value>>, String> {
    let content = read_file_as_utf8(path)?;
    let delimiter = delimiter.unwrap_or_else(|| detect_delimiter(&content));
    rows_from_string(&content, delimiter)
}

// Ties go to the later candidate
const DELIMITER_CANDIDATES: [u8; 4] = [b'|', b'\t', b';', b','];
const DELIMITER_SAMPLE: usize = 10;

/// Pick the candidate with the most sampled records matching the header's
/// width, then the widest header. Records are parsed with quoting, so a cell
/// spanning lines counts once. Falls back to comma.
fn detect_delimiter(content: &str) -> u8 {
    DELIMITER_CANDIDATES
        .iter()
        .filter_map(|&delim| {
            let widths: Vec<usize> = csv::ReaderBuilder::new()
                .delimiter(delim)
                .has_headers(false)
                .flexible(true)
                .from_reader(content.as_bytes())
                .records()
                .take(DELIMITER_SAMPLE)
                .map_while(Result::ok)
                .map(|r| r.len())
                .collect();
            let (&header, rest) = widths.split_first()?;
            if header < 2 {
                return None;
            }
            let agreeing = rest.iter().filter(|&&w| w == header).count();
            Some((agreeing, header, delim))
        })
        .max_by_key(|&(agreeing, header, _)| (agreeing, header))
        .map_or(b',', |(_, _, delim)| delim)
}

/// Read file and convert to UTF-8 if needed.
///
/// Exports from Hebrew-locale spreadsheets are often Windows-1255.
pub fn read_file_as_utf8(path: &Path) -> Result<String, String> {
    let mut file = std::fs::File::open(path).map_err(|e| format!("{}: {e}", path.display()))?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes).map_err(|e| e.to_string())?;

    // Try UTF-8 first; on failure, recover the buffer from the error
    let content = match String::from_utf8(bytes) {
        Ok(s) => s,
        Err(e) => {
            let bytes = e.into_bytes();
            let (decoded, _, _) = encoding_rs::WINDOWS_1255.decode(&bytes);
            decoded.into_owned()
        }
    };
    Ok(content.strip_prefix('\u{feff}').map(str::to_string).unwrap_or(content))
}

fn rows_from_string(content: &str, delimiter: u8) -> Result<Vec<Map<String, Value>>, String> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .from_reader(content.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| e.to_string())?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let mut rows = Vec::new();
    for (idx, result) in reader.records().enumerate() {
        // Header is line 1
        let record = result.map_err(|e| format!("line {}: {e}", idx + 2))?;
        let mut row = Map::new();
        for (header, cell) in headers.iter().zip(record.iter()) {
            let cell = cell.trim();
            if header.is_empty() || cell.is_empty() {
                continue;
            }
            row.insert(header.clone(), Value::String(cell.to_string()));
        }
        if !row.is_empty() {
            rows.push(row);
        }
    }
    Ok(rows)
}
