//! PID file persistence and the advisory lock that serializes writers.
use fs2::FileExt;
use std::{
    fs::{self, File, OpenOptions},
    io::{self, ErrorKind, Write},
    path::{Path, PathBuf},
};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::{constants::PID_LOCK_SUFFIX, error::SupervisorError};

/// A plain-text file holding one decimal PID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the recorded PID, `Ok(None)` when the file does not exist.
    pub fn read(&self) -> io::Result<Option<u32>> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err),
        };

        contents
            .trim()
            .parse::<u32>()
            .map(Some)
            .map_err(|e| io::Error::new(ErrorKind::InvalidData, e))
    }

    /// Replaces the file contents with `pid`.
    ///
    /// The PID is written to a temporary file in the same directory and renamed over the
    /// target, so readers see either the old contents or the complete new PID.
    pub fn write(&self, pid: u32) -> Result<(), SupervisorError> {
        let dir = self.parent_dir();
        fs::create_dir_all(&dir).map_err(|e| SupervisorError::io(&dir, e))?;

        let mut temp =
            NamedTempFile::new_in(&dir).map_err(|e| SupervisorError::io(&dir, e))?;
        writeln!(temp, "{pid}").map_err(|e| SupervisorError::io(temp.path(), e))?;
        temp.as_file()
            .sync_all()
            .map_err(|e| SupervisorError::io(temp.path(), e))?;
        temp.persist(&self.path)
            .map_err(|e| SupervisorError::io(&self.path, e.error))?;

        debug!("Recorded PID {pid} in {}", self.path.display());
        Ok(())
    }

    /// Deletes the file, returning whether it existed.
    pub fn remove(&self) -> Result<bool, SupervisorError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(SupervisorError::io(&self.path, err)),
        }
    }

    /// Path of the advisory lock file guarding this PID file.
    pub fn lock_path(&self) -> PathBuf {
        let mut raw = self.path.clone().into_os_string();
        raw.push(PID_LOCK_SUFFIX);
        PathBuf::from(raw)
    }

    /// Path of the `index`-th additional instance, e.g. `ctld.2.pid` for `ctld.pid`.
    pub fn instance(&self, index: u32) -> PidFile {
        let (stem, ext) = self.stem_and_extension();
        let name = match ext {
            Some(ext) => format!("{stem}.{index}.{ext}"),
            None => format!("{stem}.{index}"),
        };
        PidFile::new(self.parent_dir().join(name))
    }

    /// The primary file followed by every numbered instance file present on disk.
    pub fn instances(&self) -> Vec<PidFile> {
        let (stem, ext) = self.stem_and_extension();
        let prefix = format!("{stem}.");
        let suffix = ext.map(|ext| format!(".{ext}"));

        let mut numbered: Vec<(u32, PathBuf)> = fs::read_dir(self.parent_dir())
            .ok()
            .into_iter()
            .flat_map(|iter| iter.filter_map(Result::ok))
            .filter_map(|entry| {
                let raw_name = entry.file_name();
                let name = raw_name.to_str()?;
                let rest = name.strip_prefix(&prefix)?;
                let index = match &suffix {
                    Some(suffix) => rest.strip_suffix(suffix.as_str())?,
                    None => rest,
                };
                let index = index.parse::<u32>().ok()?;
                Some((index, entry.path()))
            })
            .collect();
        numbered.sort_by_key(|(index, _)| *index);

        std::iter::once(self.clone())
            .chain(numbered.into_iter().map(|(_, path)| PidFile::new(path)))
            .collect()
    }

    fn parent_dir(&self) -> PathBuf {
        self.path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    fn stem_and_extension(&self) -> (String, Option<String>) {
        let stem = self
            .path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        let ext = self
            .path
            .extension()
            .map(|ext| ext.to_string_lossy().into_owned());
        (stem, ext)
    }
}

/// Exclusive advisory lock on `<pidfile>.lock`, released on drop.
///
/// Two supervisors working on the same PID file hold this from the liveness check
/// through the PID write, so only one of them can decide to spawn.
#[derive(Debug)]
pub struct PidLock {
    file: File,
    path: PathBuf,
}

impl PidLock {
    /// Blocks until the lock for `pid_file` is held.
    pub fn acquire(pid_file: &PidFile) -> Result<Self, SupervisorError> {
        let path = pid_file.lock_path();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| SupervisorError::io(parent, e))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| SupervisorError::io(&path, e))?;
        file.lock_exclusive()
            .map_err(|e| SupervisorError::io(&path, e))?;

        debug!("Acquired PID lock {}", path.display());
        Ok(Self { file, path })
    }
}

impl Drop for PidLock {
    fn drop(&mut self) {
        if let Err(err) = FileExt::unlock(&self.file) {
            debug!("Failed to release PID lock {}: {err}", self.path.display());
        }
    }
}
