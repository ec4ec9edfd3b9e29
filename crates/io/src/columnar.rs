//! Chunked, compressed columnar archive (`.cols.zip`).
//!
//! Layout:
//! - `manifest.json`: dimensions, row count, chunk layout, per-chunk digests,
//!   run identity
//! - `columns/{name}/{chunk:05}.bin`: one little-endian column chunk
//!
//! Index columns (`location_id` and every dimension) are `i64`. The value
//! column is stored as `f32`. Every chunk carries a BLAKE3 digest of its
//! uncompressed bytes, checked on read.

use std::collections::BTreeMap;
use std::io::{Read, Seek, Write};

use blake3::Hasher;
use hrake_engine::model::{EntityTable, Row, RunKey, LOCATION_DIM};
use hrake_engine::RakeError;
use serde::{Deserialize, Serialize};
use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Increment when the archive layout changes in a way old readers can't handle.
pub const COLUMNAR_FORMAT_VERSION: u32 = 1;

pub const MANIFEST_NAME: &str = "manifest.json";
pub const VALUE_COLUMN: &str = "value";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    I64,
    F32,
}

impl DType {
    pub fn width(self) -> usize {
        match self {
            DType::I64 => 8,
            DType::F32 => 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub dtype: DType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkInfo {
    pub rows: usize,
    /// Column name → BLAKE3 hex digest of the uncompressed chunk bytes.
    pub digests: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub format_version: u32,
    pub dims: Vec<String>,
    pub columns: Vec<ColumnSpec>,
    pub row_count: usize,
    pub chunk_rows: usize,
    pub chunks: Vec<ChunkInfo>,
    pub run: Option<RunKey>,
    pub engine_version: String,
    pub written_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOptions {
    pub chunk_rows: usize,
    /// 0 stores chunks uncompressed; 1..=9 deflates at that level.
    pub compression_level: i64,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            chunk_rows: 65_536,
            compression_level: 1,
        }
    }
}

fn chunk_entry(column: &str, chunk: usize) -> String {
    format!("columns/{column}/{chunk:05}.bin")
}

fn zip_error(e: impl std::fmt::Display) -> RakeError {
    RakeError::Io(format!("archive: {e}"))
}

// ---------------------------------------------------------------------------
// Write
// ---------------------------------------------------------------------------

/// Encode `table` into a columnar archive. Returns the manifest that was written.
pub fn write_columnar<W: Write + Seek>(
    table: &EntityTable,
    run: Option<&RunKey>,
    opts: WriteOptions,
    writer: W,
) -> Result<Manifest, RakeError> {
    if opts.chunk_rows == 0 {
        return Err(RakeError::Io("chunk_rows must be positive".into()));
    }

    let file_opts = if opts.compression_level == 0 {
        SimpleFileOptions::default().compression_method(CompressionMethod::Stored)
    } else {
        SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .compression_level(Some(opts.compression_level))
    };

    let mut columns = vec![ColumnSpec {
        name: LOCATION_DIM.to_string(),
        dtype: DType::I64,
    }];
    columns.extend(table.dims().iter().map(|d| ColumnSpec {
        name: d.clone(),
        dtype: DType::I64,
    }));
    columns.push(ColumnSpec {
        name: VALUE_COLUMN.to_string(),
        dtype: DType::F32,
    });

    let mut zip = ZipWriter::new(writer);
    let mut chunks = Vec::new();

    for (chunk_idx, rows) in table.rows().chunks(opts.chunk_rows).enumerate() {
        let mut digests = BTreeMap::new();
        for (col_idx, col) in columns.iter().enumerate() {
            let bytes = encode_column(rows, col_idx, col.dtype);
            let mut hasher = Hasher::new();
            hasher.update(&bytes);
            digests.insert(col.name.clone(), hasher.finalize().to_hex().to_string());

            zip.start_file(chunk_entry(&col.name, chunk_idx), file_opts)
                .map_err(zip_error)?;
            zip.write_all(&bytes).map_err(zip_error)?;
        }
        chunks.push(ChunkInfo {
            rows: rows.len(),
            digests,
        });
    }

    let manifest = Manifest {
        format_version: COLUMNAR_FORMAT_VERSION,
        dims: table.dims().to_vec(),
        columns,
        row_count: table.len(),
        chunk_rows: opts.chunk_rows,
        chunks,
        run: run.cloned(),
        engine_version: env!("CARGO_PKG_VERSION").to_string(),
        written_at: chrono::Utc::now().to_rfc3339(),
    };
    let json = serde_json::to_vec_pretty(&manifest).map_err(zip_error)?;
    zip.start_file(MANIFEST_NAME, SimpleFileOptions::default())
        .map_err(zip_error)?;
    zip.write_all(&json).map_err(zip_error)?;
    zip.finish().map_err(zip_error)?;

    debug!(
        rows = manifest.row_count,
        chunks = manifest.chunks.len(),
        "columnar archive written"
    );
    Ok(manifest)
}

/// Column 0 is the location id, 1..=dims are strata, last is the value.
fn encode_column(rows: &[Row], col_idx: usize, dtype: DType) -> Vec<u8> {
    let mut out = Vec::with_capacity(rows.len() * dtype.width());
    for row in rows {
        match dtype {
            DType::F32 => out.extend_from_slice(&(row.value as f32).to_le_bytes()),
            DType::I64 => {
                let v = if col_idx == 0 {
                    row.location_id
                } else {
                    row.strata.0[col_idx - 1]
                };
                out.extend_from_slice(&v.to_le_bytes());
            }
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Read
// ---------------------------------------------------------------------------

pub fn read_manifest<R: Read + Seek>(archive: &mut ZipArchive<R>) -> Result<Manifest, RakeError> {
    let bytes = read_entry(archive, MANIFEST_NAME)?;
    let manifest: Manifest = serde_json::from_slice(&bytes).map_err(zip_error)?;
    if manifest.format_version > COLUMNAR_FORMAT_VERSION {
        return Err(RakeError::Io(format!(
            "archive format version {} is newer than supported version {}",
            manifest.format_version, COLUMNAR_FORMAT_VERSION
        )));
    }
    Ok(manifest)
}

/// Decode an archive, verifying every chunk digest.
pub fn read_columnar<R: Read + Seek>(reader: R) -> Result<(Manifest, EntityTable), RakeError> {
    let mut archive = ZipArchive::new(reader).map_err(zip_error)?;
    let manifest = read_manifest(&mut archive)?;

    let n_cols = manifest.columns.len();
    if n_cols != manifest.dims.len() + 2 {
        return Err(RakeError::Io(format!(
            "manifest lists {} columns for {} dimensions",
            n_cols,
            manifest.dims.len()
        )));
    }

    // Index columns decode as i64, the trailing value column as f32.
    for (i, col) in manifest.columns.iter().enumerate() {
        let expected = if i + 1 == n_cols { DType::F32 } else { DType::I64 };
        if col.dtype != expected {
            return Err(RakeError::Io(format!(
                "manifest column '{}' has dtype {:?}, expected {:?}",
                col.name, col.dtype, expected
            )));
        }
    }

    let chunk_total: usize = manifest.chunks.iter().map(|c| c.rows).sum();
    let mut rows = Vec::with_capacity(manifest.row_count.min(chunk_total));
    for (chunk_idx, chunk) in manifest.chunks.iter().enumerate() {
        let mut decoded: Vec<Vec<u8>> = Vec::with_capacity(n_cols);
        for col in &manifest.columns {
            let entry = chunk_entry(&col.name, chunk_idx);
            let bytes = read_entry(&mut archive, &entry)?;

            let mut hasher = Hasher::new();
            hasher.update(&bytes);
            let actual = hasher.finalize().to_hex().to_string();
            let expected = chunk.digests.get(&col.name).map(String::as_str).unwrap_or("");
            if actual != expected {
                return Err(RakeError::Io(format!(
                    "{entry}: digest mismatch (expected {expected}, got {actual})"
                )));
            }
            if bytes.len() != chunk.rows * col.dtype.width() {
                return Err(RakeError::Io(format!(
                    "{entry}: {} bytes for {} rows",
                    bytes.len(),
                    chunk.rows
                )));
            }
            decoded.push(bytes);
        }

        for r in 0..chunk.rows {
            let int_at = |c: usize| {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(&decoded[c][r * 8..r * 8 + 8]);
                i64::from_le_bytes(buf)
            };
            let mut buf = [0u8; 4];
            buf.copy_from_slice(&decoded[n_cols - 1][r * 4..r * 4 + 4]);
            let value = f32::from_le_bytes(buf) as f64;
            let strata: Vec<i64> = (1..n_cols - 1).map(int_at).collect();
            rows.push(Row::new(int_at(0), strata, value));
        }
    }

    if rows.len() != manifest.row_count {
        return Err(RakeError::Io(format!(
            "manifest row_count {} but chunks hold {} rows",
            manifest.row_count,
            rows.len()
        )));
    }

    let table = EntityTable::from_rows(manifest.dims.clone(), rows)?;
    Ok((manifest, table))
}

fn read_entry<R: Read + Seek>(archive: &mut ZipArchive<R>, name: &str) -> Result<Vec<u8>, RakeError> {
    let mut file = archive
        .by_name(name)
        .map_err(|e| RakeError::Io(format!("{name}: {e}")))?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)
        .map_err(|e| RakeError::Io(format!("{name}: {e}")))?;
    Ok(buf)
}
