//! CSV export and import of dataset tables.
//!
//! Export writes one header row followed by one row per table row; nulls
//! become empty fields and dates are ISO-8601. Import infers a cell type
//! per field, so it is meant for provider-shaped CSV, not arbitrary text.

use anyhow::{Context, Result};
use stockcache_core::{Cell, DatasetTable};

/// Serialize a table as CSV.
pub fn export_table_csv(table: &DatasetTable) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(table.columns())?;
    for row in table.rows() {
        wtr.write_record(row.iter().map(|c| c.to_string()))?;
    }
    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

/// Parse CSV text into a table.
///
/// A leading byte-order mark is ignored. Empty fields are null;
/// `True`/`False` are booleans; numbers become integers or floats unless
/// they carry a leading zero (stock codes), which stay text.
pub fn import_table_csv(text: &str) -> Result<DatasetTable> {
    let text = text.trim_start_matches('\u{feff}');
    let mut rdr = csv::ReaderBuilder::new().from_reader(text.as_bytes());

    let headers: Vec<String> = rdr
        .headers()
        .context("failed to read CSV header")?
        .iter()
        .map(str::to_string)
        .collect();
    let mut table = DatasetTable::new(headers).context("invalid CSV header")?;

    for (i, record) in rdr.records().enumerate() {
        let record = record.with_context(|| format!("failed to read CSV record {}", i + 1))?;
        let row = record.iter().map(parse_field).collect();
        table
            .push_row(row)
            .with_context(|| format!("CSV record {} has the wrong width", i + 1))?;
    }
    Ok(table)
}

fn parse_field(field: &str) -> Cell {
    let field = field.trim();
    match field {
        "" => return Cell::Null,
        "True" | "true" => return Cell::Bool(true),
        "False" | "false" => return Cell::Bool(false),
        _ => {}
    }

    let leading_zero = field.len() > 1 && field.starts_with('0') && !field.starts_with("0.");
    if leading_zero {
        return Cell::from(field);
    }
    if let Ok(v) = field.parse::<i64>() {
        return Cell::Int(v);
    }
    match field.parse::<f64>() {
        Ok(v) if v.is_finite() => Cell::Float(v),
        _ => Cell::from(field),
    }
}
