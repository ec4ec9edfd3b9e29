// CSV input tables and CSV export

use std::borrow::Cow;
use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::Path;

use hrake_engine::hierarchy::{HierarchyIndex, HierarchyRecord};
use hrake_engine::model::{CellKey, EntityTable, Row, DRAW_DIM, LOCATION_DIM};
use hrake_engine::RakeError;
use tracing::debug;

/// How to read one long-format input table.
#[derive(Debug, Clone)]
pub struct TableSpec<'a> {
    /// Label used in error messages ("coarse", "fine", a file path).
    pub label: &'a str,
    /// Candidate value columns; the first one present in the header wins.
    pub value_columns: &'a [String],
    /// Keep only rows of this draw when the table has a draw column.
    pub draw: Option<i64>,
}

/// Field text as UTF-8; bytes that are not valid UTF-8 are decoded as
/// Windows-1252 (covers Latin-1 exports).
fn decode_field(bytes: &[u8]) -> Cow<'_, str> {
    match std::str::from_utf8(bytes) {
        Ok(s) => Cow::Borrowed(s),
        Err(_) => encoding_rs::WINDOWS_1252.decode_without_bom_handling(bytes).0,
    }
}

pub(crate) fn io_error(path: &Path, e: impl std::fmt::Display) -> RakeError {
    RakeError::Io(format!("{}: {e}", path.display()))
}

fn csv_reader<R: Read>(input: R) -> csv::Reader<R> {
    csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(input)
}

fn read_headers<R: Read>(reader: &mut csv::Reader<R>, label: &str) -> Result<Vec<String>, RakeError> {
    let headers = reader.byte_headers().map_err(|e| parse_error(label, e))?;
    Ok(headers.iter().map(|h| decode_field(h).into_owned()).collect())
}

/// Stream a long-format table from disk, one record at a time.
pub fn read_entity_table(path: &Path, spec: &TableSpec<'_>) -> Result<EntityTable, RakeError> {
    let file = File::open(path).map_err(|e| io_error(path, e))?;
    read_entity_rows(BufReader::new(file), spec)
}

/// Parse a long-format table: `location_id`, any number of integer dimension
/// columns, one value column. Rows with an empty, `NA` or `NaN` value are
/// skipped.
pub fn parse_entity_table(content: &str, spec: &TableSpec<'_>) -> Result<EntityTable, RakeError> {
    read_entity_rows(content.as_bytes(), spec)
}

fn read_entity_rows<R: Read>(input: R, spec: &TableSpec<'_>) -> Result<EntityTable, RakeError> {
    let mut reader = csv_reader(input);
    let headers = read_headers(&mut reader, spec.label)?;
    let column = |name: &str| headers.iter().position(|h| h == name);

    let loc_idx = column(LOCATION_DIM).ok_or_else(|| RakeError::MissingColumn {
        input: spec.label.to_string(),
        column: LOCATION_DIM.to_string(),
    })?;
    let value_idx = spec
        .value_columns
        .iter()
        .find_map(|c| column(c))
        .ok_or_else(|| RakeError::MissingColumn {
            input: spec.label.to_string(),
            column: spec.value_columns.join(" or "),
        })?;

    let dim_idx: Vec<usize> = (0..headers.len())
        .filter(|&i| i != loc_idx && i != value_idx)
        .collect();
    let dims: Vec<String> = dim_idx.iter().map(|&i| headers[i].to_string()).collect();
    let draw_pos = dims.iter().position(|d| d == DRAW_DIM);

    let mut rows = Vec::new();
    let mut seen: HashSet<CellKey> = HashSet::new();
    let mut skipped = 0usize;
    let mut filtered = 0usize;

    let mut record = csv::ByteRecord::new();
    while reader
        .read_byte_record(&mut record)
        .map_err(|e| parse_error(spec.label, e))?
    {
        let line = record.position().map(|p| p.line()).unwrap_or(0);
        let field = |i: usize| decode_field(record.get(i).unwrap_or_default());

        let location_id = parse_int(&field(loc_idx)).ok_or_else(|| RakeError::ValueParse {
            input: spec.label.to_string(),
            line,
            column: LOCATION_DIM.to_string(),
            value: field(loc_idx).to_string(),
        })?;

        let mut strata = Vec::with_capacity(dim_idx.len());
        for (d, &i) in dim_idx.iter().enumerate() {
            let coord = parse_int(&field(i)).ok_or_else(|| RakeError::ValueParse {
                input: spec.label.to_string(),
                line,
                column: dims[d].clone(),
                value: field(i).to_string(),
            })?;
            strata.push(coord);
        }

        if let (Some(pos), Some(draw)) = (draw_pos, spec.draw) {
            if strata[pos] != draw {
                filtered += 1;
                continue;
            }
        }

        let raw = field(value_idx);
        if is_missing(&raw) {
            skipped += 1;
            continue;
        }
        let value: f64 = raw.parse().map_err(|_| RakeError::ValueParse {
            input: spec.label.to_string(),
            line,
            column: headers[value_idx].to_string(),
            value: raw.to_string(),
        })?;

        let row = Row::new(location_id, strata, value);
        if !seen.insert(row.key()) {
            return Err(RakeError::DuplicateKey {
                input: spec.label.to_string(),
                key: format!("location_id={} {}", row.location_id, row.strata),
            });
        }
        rows.push(row);
    }

    debug!(
        input = spec.label,
        rows = rows.len(),
        skipped,
        filtered,
        value_column = headers[value_idx].as_str(),
        "loaded table"
    );
    EntityTable::from_rows(dims, rows)
}

pub fn read_hierarchy(path: &Path, level: i64) -> Result<HierarchyIndex, RakeError> {
    let file = File::open(path).map_err(|e| io_error(path, e))?;
    read_hierarchy_rows(BufReader::new(file), &path.display().to_string(), level)
}

/// Parse a hierarchy table (`location_id`, `parent_id`, `level`, plus any
/// metadata columns) keeping only rows at `level`.
pub fn parse_hierarchy(content: &str, label: &str, level: i64) -> Result<HierarchyIndex, RakeError> {
    read_hierarchy_rows(content.as_bytes(), label, level)
}

fn read_hierarchy_rows<R: Read>(input: R, label: &str, level: i64) -> Result<HierarchyIndex, RakeError> {
    let mut reader = csv_reader(input);
    let headers = read_headers(&mut reader, label)?;

    let required = |name: &str| {
        headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| RakeError::MissingColumn {
                input: label.to_string(),
                column: name.to_string(),
            })
    };
    let loc_idx = required(LOCATION_DIM)?;
    let parent_idx = required("parent_id")?;
    let level_idx = required("level")?;

    let mut records = Vec::new();
    let mut record = csv::ByteRecord::new();
    while reader
        .read_byte_record(&mut record)
        .map_err(|e| parse_error(label, e))?
    {
        let line = record.position().map(|p| p.line()).unwrap_or(0);
        let field = |i: usize| decode_field(record.get(i).unwrap_or_default());
        let int_at = |i: usize| {
            let raw = field(i);
            parse_int(&raw).ok_or_else(|| RakeError::ValueParse {
                input: label.to_string(),
                line,
                column: headers[i].to_string(),
                value: raw.to_string(),
            })
        };

        if int_at(level_idx)? != level {
            continue;
        }
        let mut rec = HierarchyRecord::new(int_at(loc_idx)?, int_at(parent_idx)?, level);
        rec.metadata = headers
            .iter()
            .enumerate()
            .filter(|(i, _)| ![loc_idx, parent_idx, level_idx].contains(i))
            .map(|(i, h)| (h.clone(), field(i).into_owned()))
            .collect::<BTreeMap<_, _>>();
        records.push(rec);
    }

    HierarchyIndex::from_records(level, records)
}

/// Write a table as CSV: `location_id`, dimensions, `value`.
pub fn write_table_csv<W: Write>(table: &EntityTable, writer: W) -> Result<(), RakeError> {
    let mut wtr = csv::Writer::from_writer(writer);
    let mut header = vec![LOCATION_DIM.to_string()];
    header.extend(table.dims().iter().cloned());
    header.push("value".to_string());
    wtr.write_record(&header)
        .map_err(|e| RakeError::Io(e.to_string()))?;

    for row in table.rows() {
        let mut record = Vec::with_capacity(row.strata.len() + 2);
        record.push(row.location_id.to_string());
        record.extend(row.strata.0.iter().map(|c| c.to_string()));
        record.push(row.value.to_string());
        wtr.write_record(&record)
            .map_err(|e| RakeError::Io(e.to_string()))?;
    }
    wtr.flush().map_err(|e| RakeError::Io(e.to_string()))?;
    Ok(())
}

/// Integer coordinate; float-formatted integers ("5.0") are accepted.
fn parse_int(raw: &str) -> Option<i64> {
    if let Ok(v) = raw.parse::<i64>() {
        return Some(v);
    }
    let f: f64 = raw.parse().ok()?;
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 9.0e15 {
        Some(f as i64)
    } else {
        None
    }
}

fn is_missing(raw: &str) -> bool {
    raw.is_empty() || raw.eq_ignore_ascii_case("na") || raw.eq_ignore_ascii_case("nan")
}

fn parse_error(label: &str, e: csv::Error) -> RakeError {
    let line = e.position().map(|p| p.line()).unwrap_or(0);
    RakeError::ValueParse {
        input: label.to_string(),
        line,
        column: "<record>".to_string(),
        value: e.to_string(),
    }
}
