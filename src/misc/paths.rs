use std::path::{Path, PathBuf};

use anyhow::Result;

/// A directory owned by the server (the data directory, or the run directory),
/// used to generate paths of the files placed inside it
#[derive(Debug, Clone)]
pub struct DirPath {
    dir: PathBuf,
}

impl DirPath {
    pub fn new(path: PathBuf) -> Self {
        Self { dir: path }
    }

    pub fn ensure_exists_blocking(&self) -> Result<()> {
        if self.dir.exists() {
            if !self.dir.canonicalize()?.is_dir() {
                error!("directory path {:?} already exists, and is a file!", self.dir);
                bail!("directory path is a file");
            }
        } else {
            info!("Creating new directory at {:#?}", self.dir);
            std::fs::create_dir_all(&self.dir)?;
        }
        Ok(())
    }

    /// Returns the path of `filename` inside this directory.
    /// does not allow for nesting in subdirectories
    ///
    /// # Panics
    /// - if PathBuf does not have a final (file) component, eg the path `foo/..` or `/`
    pub fn path<P: AsRef<Path>>(&self, filename: P) -> PathBuf {
        let p = filename.as_ref();
        if p.parent().is_some() && p.parent() != Some(Path::new("")) {
            warn!(path=?p, "DirPath::path only uses the last segment of a path, the rest will be discarded");
        }
        if let Some(file) = p.file_name() {
            self.dir.join(file)
        } else {
            panic!("Invalid filename passed to `DirPath::path` (path does not contain a final component)");
        }
    }
}

#[cfg(test)]
mod test {
    use super::DirPath;

    #[test]
    fn creates_missing_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = DirPath::new(tmp.path().join("run").join("nested"));
        dir.ensure_exists_blocking().unwrap();
        assert!(tmp.path().join("run/nested").is_dir());
        // a second call is a no-op
        dir.ensure_exists_blocking().unwrap();
    }

    #[test]
    fn rejects_file() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("store.json");
        std::fs::write(&file, b"{}").unwrap();
        assert!(DirPath::new(file).ensure_exists_blocking().is_err());
    }

    #[test]
    fn only_last_segment_used() {
        let dir = DirPath::new("/var/lib/clima".into());
        assert_eq!(
            dir.path("nested/store.json"),
            std::path::Path::new("/var/lib/clima/store.json")
        );
    }
}
