pub mod extract;
pub mod filtered_source;

use crate::backup::archive::filtered_source::FilteredSource;
use crate::backup::compress::CompressionLevel;
use crate::backup::function_path;
use crate::backup::path_class::PathClass;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, AddMsg};

use dyn_iter::DynIter;
use function_name::named;
use zip::ZipWriter;

use std::fs::File;
use std::io::{BufWriter, IntoInnerError};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A single file to be written into an archive
#[derive(Debug)]
pub struct ArchiveEntry {
    /// Source file on the filesystem
    pub src: Arc<Path>,

    /// Entry name inside the archive, relative and `/` separated
    pub dst: Arc<str>,
}

impl ArchiveEntry {
    pub fn new<A: Into<Arc<Path>>, B: Into<Arc<str>>>(src: A, dst: B) -> ArchiveEntry {
        Self {
            src: src.into(),
            dst: dst.into(),
        }
    }
}

/// Produces the entries to be written into an archive.
///
/// The iterator yields Results so a single unreadable file surfaces as an
/// error for that entry rather than aborting the scan.
pub trait ArchiveEntryIterable {
    fn archive_entry_iterator<'a>(&'a mut self) -> Result<DynIter<'a, Result<ArchiveEntry>>>;
}

/// Creates a zip archive at `archive_path` from `source`.
///
/// Files for which `exclude` returns true are skipped when `source` is a
/// directory. The archive is written next to its final location with a `.tmp`
/// suffix and only renamed once complete; on any failure the temporary file is
/// removed so a partial archive never looks like a finished backup.
#[named]
pub fn create_archive<F: Fn(&Path) -> bool>(
    source: &mut PathClass,
    archive_path: &Path,
    level: CompressionLevel,
    exclude: F,
) -> Result<PathBuf> {
    let file_path_tmp = tmp_path(archive_path);

    let res = FilteredSource::new(source, exclude)
        .archive_entry_iterator()
        .and_then(|entries| write_zip(&file_path_tmp, entries, level))
        .and_then(|count| {
            std::fs::rename(&file_path_tmp, archive_path)?;
            Ok(count)
        });

    match res {
        Ok(count) => {
            tracing::info!("Created archive {:?} with {} entries", archive_path, count);
            Ok(archive_path.to_path_buf())
        }
        Err(mut e) => {
            if file_path_tmp.exists() {
                if let Err(e2) = std::fs::remove_file(&file_path_tmp) {
                    e = e.chain(Error::from(e2).add_msg("Delete tmp file failed"));
                }
            }
            Err(e
                .add_msg(format!("Creating archive {:?} failed", archive_path))
                .add_fn_name(function_path!()))
        }
    }
}

fn tmp_path(archive_path: &Path) -> PathBuf {
    let mut name = archive_path.as_os_str().to_os_string();
    name.push(".tmp");
    PathBuf::from(name)
}

fn write_zip<I: Iterator<Item = Result<ArchiveEntry>>>(
    path: &Path,
    entries: I,
    level: CompressionLevel,
) -> Result<usize> {
    let mut writer = ZipWriter::new(BufWriter::new(File::create(path)?));

    let mut entry_count = 0;
    for entry in entries {
        let entry = entry?;
        let mut src = File::open(&entry.src)
            .map_err(Error::from)
            .add_msg(format!("Opening {:?} failed", entry.src))?;
        let options = level.file_options(src.metadata()?.len());
        writer.start_file(entry.dst.as_ref(), options)?;
        std::io::copy(&mut src, &mut writer)
            .map_err(Error::from)
            .add_msg(format!("Writing {:?} into archive failed", entry.src))?;
        entry_count += 1;
    }

    writer
        .finish()?
        .into_inner()
        .map_err(IntoInnerError::into_error)?
        .sync_all()?;

    Ok(entry_count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::archive::extract::extract_archive;
    use crate::backup::file_filter::FileFilter;
    use tempfile::TempDir;

    fn create_save_dir(dir: &Path) {
        std::fs::create_dir_all(dir.join("profiles/1")).unwrap();
        std::fs::write(dir.join("slot1.sav"), b"\x00\x01binary save").unwrap();
        std::fs::write(dir.join("profiles/1/settings.ini"), "volume=3").unwrap();
        std::fs::write(dir.join("debug.log"), "noise").unwrap();
    }

    #[test]
    fn test_round_trip_directory_with_filter() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("saves");
        create_save_dir(&src);

        let filter = FileFilter::new(r".*\.log").unwrap();
        let archive_path = temp_dir.path().join("backup.zip");
        let mut source = PathClass::classify(&src);
        let created = create_archive(&mut source, &archive_path, CompressionLevel::default(), |p| {
            filter.is_excluded(p)
        })
        .unwrap();
        assert_eq!(created, archive_path);
        assert!(!tmp_path(&archive_path).exists());

        let out = temp_dir.path().join("restored");
        assert_eq!(extract_archive(&archive_path, &out).unwrap(), 2);
        assert_eq!(
            std::fs::read(out.join("slot1.sav")).unwrap(),
            b"\x00\x01binary save"
        );
        assert_eq!(
            std::fs::read_to_string(out.join("profiles/1/settings.ini")).unwrap(),
            "volume=3"
        );
        assert!(!out.join("debug.log").exists());
    }

    #[test]
    fn test_single_file_archive_uses_base_name() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("only.sav");
        std::fs::write(&file, "single").unwrap();

        let archive_path = temp_dir.path().join("single.zip");
        let mut source = PathClass::classify(&file);
        let stored = CompressionLevel::try_from(0).unwrap();
        create_archive(&mut source, &archive_path, stored, |_| false).unwrap();

        let out = temp_dir.path().join("out");
        extract_archive(&archive_path, &out).unwrap();
        assert_eq!(std::fs::read_to_string(out.join("only.sav")).unwrap(), "single");
    }

    #[test]
    fn test_failure_leaves_no_archive() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("saves");
        create_save_dir(&src);

        let archive_path = temp_dir.path().join("missing_dir").join("backup.zip");
        let mut source = PathClass::classify(&src);
        let res = create_archive(&mut source, &archive_path, CompressionLevel::default(), |_| false);
        assert!(res.is_err());
        assert!(!archive_path.exists());
        assert!(!tmp_path(&archive_path).exists());
    }

    #[test]
    fn test_unreadable_source_removes_tmp_file() {
        let temp_dir = TempDir::new().unwrap();
        let archive_path = temp_dir.path().join("backup.zip");
        let mut source = PathClass::classify(temp_dir.path().join("not_created_yet"));
        let res = create_archive(&mut source, &archive_path, CompressionLevel::default(), |_| false);
        assert!(matches!(res, Err(Error::WithFnName { .. })));
        assert!(!archive_path.exists());
        assert!(!tmp_path(&archive_path).exists());
    }
}
