// Output persistence: group-writable directories, atomic writes

use std::fs;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use hrake_engine::model::{EntityTable, RunKey};
use hrake_engine::RakeError;
use tracing::{debug, warn};

use crate::columnar::{write_columnar, Manifest, WriteOptions};
use crate::csv::io_error;

/// Mode applied to created output directories and files.
pub const OUTPUT_MODE: u32 = 0o775;

/// Create `dir` and every missing ancestor, making each directory this call
/// creates group-writable. Existing ancestors keep their mode.
pub fn ensure_dir(dir: &Path) -> Result<(), RakeError> {
    let missing: Vec<&Path> = dir
        .ancestors()
        .take_while(|p| !p.as_os_str().is_empty() && !p.exists())
        .collect();
    for path in missing.into_iter().rev() {
        match fs::create_dir(path) {
            Ok(()) => set_mode(path)?,
            // Created concurrently by another run
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists && path.is_dir() => {}
            Err(e) => return Err(io_error(path, e)),
        }
    }
    if !dir.is_dir() {
        return Err(io_error(dir, "not a directory"));
    }
    Ok(())
}

#[cfg(unix)]
pub fn set_mode(path: &Path) -> Result<(), RakeError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(OUTPUT_MODE)).map_err(|e| io_error(path, e))
}

#[cfg(not(unix))]
pub fn set_mode(_path: &Path) -> Result<(), RakeError> {
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Write through `write` into `{path}.tmp`, then rename into place. The
/// temporary file is removed on failure, so `path` either holds a complete
/// file or does not exist.
pub fn write_atomic<T, F>(path: &Path, write: F) -> Result<T, RakeError>
where
    F: FnOnce(&mut BufWriter<fs::File>) -> Result<T, RakeError>,
{
    let tmp = tmp_path(path);
    let result = write_then_rename(&tmp, path, write);
    if result.is_err() && tmp.exists() {
        if let Err(e) = fs::remove_file(&tmp) {
            warn!(path = %tmp.display(), error = %e, "failed to remove temporary file");
        }
    }
    result
}

fn write_then_rename<T, F>(tmp: &Path, path: &Path, write: F) -> Result<T, RakeError>
where
    F: FnOnce(&mut BufWriter<fs::File>) -> Result<T, RakeError>,
{
    let file = fs::File::create(tmp).map_err(|e| io_error(tmp, e))?;
    let mut writer = BufWriter::new(file);
    let out = write(&mut writer)?;
    let file = writer.into_inner().map_err(|e| io_error(tmp, e.error()))?;
    file.sync_all().map_err(|e| io_error(tmp, e))?;
    set_mode(tmp)?;
    fs::rename(tmp, path).map_err(|e| io_error(path, e))?;
    Ok(out)
}

/// Persist a raked table as a columnar archive at `path`, creating the
/// parent directory.
pub fn persist_table(
    path: &Path,
    table: &EntityTable,
    run: &RunKey,
    opts: WriteOptions,
) -> Result<Manifest, RakeError> {
    if let Some(dir) = path.parent() {
        ensure_dir(dir)?;
    }
    let manifest = write_atomic(path, |w| write_columnar(table, Some(run), opts, w))?;
    debug!(path = %path.display(), rows = manifest.row_count, "output persisted");
    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::columnar::read_columnar;
    use hrake_engine::model::Row;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn persist_creates_directories_and_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a/b/draw_0.cols.zip");
        let table = EntityTable::from_rows(
            vec!["sex_id".into()],
            vec![Row::new(1, vec![1], 2.0)],
        )
        .unwrap();
        let run = RunKey::new("dengue", 0, "yld", 0);

        persist_table(&path, &table, &run, WriteOptions::default()).unwrap();
        assert!(path.exists());
        assert!(!tmp_path(&path).exists());

        let (manifest, back) = read_columnar(fs::File::open(&path).unwrap()).unwrap();
        assert_eq!(manifest.run, Some(run));
        assert_eq!(back.len(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn outputs_are_group_writable() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let out_dir = dir.path().join("out");
        let path = out_dir.join("draw_1.cols.zip");
        let table = EntityTable::new(vec!["sex_id".into()]);
        persist_table(&path, &table, &RunKey::new("dengue", 0, "yld", 1), WriteOptions::default()).unwrap();

        let file_mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        let dir_mode = fs::metadata(&out_dir).unwrap().permissions().mode() & 0o777;
        assert_eq!(file_mode, OUTPUT_MODE);
        assert_eq!(dir_mode, OUTPUT_MODE);
    }

    #[cfg(unix)]
    #[test]
    fn every_created_ancestor_is_group_writable() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        fs::set_permissions(dir.path(), fs::Permissions::from_mode(0o700)).unwrap();
        let output_root = dir.path().join("output");
        let run_dir = output_root.join("as_cause_dengue_measure_yld_metric_count_ssp_scenario_ssp245_raked");
        let path = run_dir.join("draw_0.cols.zip");
        let table = EntityTable::new(vec!["sex_id".into()]);
        let run = RunKey::new("dengue", 0, "yld", 0);
        persist_table(&path, &table, &run, WriteOptions::default()).unwrap();

        let mode = |p: &Path| fs::metadata(p).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode(&output_root), OUTPUT_MODE);
        assert_eq!(mode(&run_dir), OUTPUT_MODE);
        // pre-existing directories are left alone
        assert_eq!(mode(dir.path()), 0o700);
    }

    #[test]
    fn ensure_dir_accepts_existing_directory() {
        let dir = tempdir().unwrap();
        ensure_dir(dir.path()).unwrap();
        ensure_dir(&dir.path().join("a/b")).unwrap();
        ensure_dir(&dir.path().join("a/b")).unwrap();
        assert!(dir.path().join("a/b").is_dir());
    }

    #[test]
    fn ensure_dir_rejects_file_in_the_way() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("taken");
        fs::write(&file, b"x").unwrap();
        assert!(ensure_dir(&file).is_err());
    }

    #[test]
    fn failed_write_leaves_nothing_behind() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("draw_2.cols.zip");

        let err = write_atomic(&path, |w| {
            w.write_all(b"partial").map_err(|e| RakeError::Io(e.to_string()))?;
            Err::<(), _>(RakeError::Io("encoder failed".into()))
        })
        .unwrap_err();

        assert!(err.to_string().contains("encoder failed"));
        assert!(!path.exists());
        assert!(!tmp_path(&path).exists());
    }

    #[test]
    fn tmp_name_appends_suffix() {
        assert_eq!(
            tmp_path(Path::new("/x/draw_3.cols.zip")),
            PathBuf::from("/x/draw_3.cols.zip.tmp")
        );
    }
}
