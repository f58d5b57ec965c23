//! Flat file storage.
//!
//! Everything the app persists goes through the [`Ffs`] trait: a flat
//! directory of named files, no subdirectories. The disk implementation
//! stages writes in a hidden subdirectory and renames into place, so readers
//! never observe a half-written file. Tests run against [`MemFs`].

use std::{
    fs,
    io::{self, Read},
    path::{Path, PathBuf},
};

use rand::{distributions::Alphanumeric, Rng};

pub trait Ffs {
    /// NOTE: a missing file surfaces as [`io::ErrorKind::NotFound`].
    fn read(&self, filename: &str) -> io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.read_into(filename, &mut buf)?;
        Ok(buf)
    }

    fn read_into(&self, filename: &str, buf: &mut Vec<u8>) -> io::Result<()>;

    fn read_dir(&self) -> io::Result<Vec<String>> {
        let mut filenames = Vec::new();
        self.read_dir_visitor(|filename| {
            filenames.push(filename.to_owned());
            Ok(())
        })?;
        Ok(filenames)
    }

    fn read_dir_visitor(
        &self,
        visitor: impl FnMut(&str) -> io::Result<()>,
    ) -> io::Result<()>;

    fn write(&self, filename: &str, data: &[u8]) -> io::Result<()>;

    fn delete(&self, filename: &str) -> io::Result<()>;

    fn delete_all(&self) -> io::Result<()>;
}

impl<T: Ffs> Ffs for &T {
    fn read_into(&self, filename: &str, buf: &mut Vec<u8>) -> io::Result<()> {
        (**self).read_into(filename, buf)
    }

    fn read_dir_visitor(
        &self,
        visitor: impl FnMut(&str) -> io::Result<()>,
    ) -> io::Result<()> {
        (**self).read_dir_visitor(visitor)
    }

    fn write(&self, filename: &str, data: &[u8]) -> io::Result<()> {
        (**self).write(filename, data)
    }

    fn delete(&self, filename: &str) -> io::Result<()> {
        (**self).delete(filename)
    }

    fn delete_all(&self) -> io::Result<()> {
        (**self).delete_all()
    }
}

impl<T: Ffs> Ffs for std::sync::Arc<T> {
    fn read_into(&self, filename: &str, buf: &mut Vec<u8>) -> io::Result<()> {
        (**self).read_into(filename, buf)
    }

    fn read_dir_visitor(
        &self,
        visitor: impl FnMut(&str) -> io::Result<()>,
    ) -> io::Result<()> {
        (**self).read_dir_visitor(visitor)
    }

    fn write(&self, filename: &str, data: &[u8]) -> io::Result<()> {
        (**self).write(filename, data)
    }

    fn delete(&self, filename: &str) -> io::Result<()> {
        (**self).delete(filename)
    }

    fn delete_all(&self) -> io::Result<()> {
        (**self).delete_all()
    }
}

/// Disk-backed [`Ffs`] with atomic-replace writes.
#[derive(Clone, Debug)]
pub struct FlatFileFs {
    base_dir: PathBuf,
    /// `{base_dir}/.stage`: fully written files are renamed from here into
    /// `base_dir`. Staying on the same filesystem keeps the rename atomic.
    stage_dir: PathBuf,
}

impl FlatFileFs {
    /// Open (creating if needed) a flat file store at `base_dir`. Leftover
    /// staged files from a previous crash are discarded.
    pub fn create_dir_all(base_dir: PathBuf) -> anyhow::Result<Self> {
        fs::create_dir_all(&base_dir)?;

        let stage_dir = base_dir.join(".stage");
        remove_dir_all_idempotent(&stage_dir)?;
        fs::create_dir(&stage_dir)?;

        Ok(Self {
            base_dir,
            stage_dir,
        })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }
}

impl Ffs for FlatFileFs {
    fn read_into(&self, filename: &str, buf: &mut Vec<u8>) -> io::Result<()> {
        let mut file = fs::File::open(self.base_dir.join(filename))?;
        file.read_to_end(buf)?;
        Ok(())
    }

    fn read_dir_visitor(
        &self,
        mut visitor: impl FnMut(&str) -> io::Result<()>,
    ) -> io::Result<()> {
        for entry in self.base_dir.read_dir()? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                // Skip non-UTF-8 names; we never write them.
                if let Some(filename) = entry.file_name().to_str() {
                    visitor(filename)?;
                }
            }
        }
        Ok(())
    }

    fn write(&self, filename: &str, data: &[u8]) -> io::Result<()> {
        // Stage under a random name so concurrent writers to the same file
        // cannot interleave; the last rename wins whole.
        let stage_name: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(16)
            .map(char::from)
            .collect();
        let stage_path = self.stage_dir.join(stage_name);

        fs::write(&stage_path, data)?;
        fs::rename(&stage_path, self.base_dir.join(filename))?;
        Ok(())
    }

    fn delete(&self, filename: &str) -> io::Result<()> {
        fs::remove_file(self.base_dir.join(filename))
    }

    fn delete_all(&self) -> io::Result<()> {
        for entry in self.base_dir.read_dir()? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                fs::remove_file(entry.path())?;
            }
        }
        Ok(())
    }
}

fn remove_dir_all_idempotent(dir: &Path) -> io::Result<()> {
    match fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}


#[cfg(test)]
mod test {
    use super::{mem::MemFs, *};

    fn exercise(ffs: &impl Ffs) {
        assert_eq!(ffs.read_dir().unwrap(), Vec::<String>::new());
        assert_eq!(
            ffs.read("missing.json").unwrap_err().kind(),
            io::ErrorKind::NotFound,
        );

        ffs.write("a.json", b"{}").unwrap();
        ffs.write("b.json", b"[1,2]").unwrap();
        assert_eq!(ffs.read("a.json").unwrap(), b"{}");

        // Overwrite replaces the whole content.
        ffs.write("a.json", b"{\"x\":1}").unwrap();
        assert_eq!(ffs.read("a.json").unwrap(), b"{\"x\":1}");

        let mut names = ffs.read_dir().unwrap();
        names.sort();
        assert_eq!(names, vec!["a.json".to_owned(), "b.json".to_owned()]);

        ffs.delete("a.json").unwrap();
        assert_eq!(
            ffs.read("a.json").unwrap_err().kind(),
            io::ErrorKind::NotFound,
        );

        ffs.delete_all().unwrap();
        assert_eq!(ffs.read_dir().unwrap(), Vec::<String>::new());
    }

    #[test]
    fn mem_fs() {
        exercise(&MemFs::new());
    }

    #[test]
    fn disk_fs() {
        let tmp = tempfile::tempdir().unwrap();
        let ffs = FlatFileFs::create_dir_all(tmp.path().to_path_buf()).unwrap();
        exercise(&ffs);
    }

    #[test]
    fn disk_fs_hides_the_stage_dir_from_listings() {
        let tmp = tempfile::tempdir().unwrap();
        let ffs = FlatFileFs::create_dir_all(tmp.path().to_path_buf()).unwrap();
        ffs.write("visible.json", b"1").unwrap();
        assert_eq!(ffs.read_dir().unwrap(), vec!["visible.json".to_owned()]);
    }

    #[test]
    fn reopening_discards_staged_leftovers() {
        let tmp = tempfile::tempdir().unwrap();
        let ffs = FlatFileFs::create_dir_all(tmp.path().to_path_buf()).unwrap();
        std::fs::write(tmp.path().join(".stage").join("partial"), b"junk").unwrap();

        let ffs2 = FlatFileFs::create_dir_all(tmp.path().to_path_buf()).unwrap();
        assert_eq!(ffs2.read_dir().unwrap(), Vec::<String>::new());
        drop(ffs);
    }
}
