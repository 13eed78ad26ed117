//! Random-access file reads.
//!
//! Tables are immutable once written, so the reader only ever needs
//! positioned reads. Real tables live in [`std::fs::File`]s; tests and
//! ephemeral tables use [`MemFile`].

use std::fs::File;
use std::io;
use std::os::unix::fs::FileExt;

use crate::error::Result;

/// Positioned reads over an immutable file.
pub trait RandomAccess: Send + Sync {
    /// Fills `dst` from `offset`. A short read is an error.
    fn read_at(&self, offset: u64, dst: &mut [u8]) -> Result<()>;

    /// Total length in bytes.
    fn len(&self) -> Result<u64>;
}

impl RandomAccess for File {
    fn read_at(&self, offset: u64, dst: &mut [u8]) -> Result<()> {
        FileExt::read_exact_at(self, dst, offset)?;
        Ok(())
    }

    fn len(&self) -> Result<u64> {
        Ok(self.metadata()?.len())
    }
}

/// An in-memory table file.
#[derive(Clone, Debug, Default)]
pub struct MemFile {
    data: Vec<u8>,
}

impl MemFile {
    pub fn new(data: Vec<u8>) -> Self {
        MemFile { data }
    }
}

impl From<Vec<u8>> for MemFile {
    fn from(data: Vec<u8>) -> Self {
        MemFile::new(data)
    }
}

impl RandomAccess for MemFile {
    fn read_at(&self, offset: u64, dst: &mut [u8]) -> Result<()> {
        let start = offset as usize;
        let end = start.checked_add(dst.len());
        match end {
            Some(end) if end <= self.data.len() => {
                dst.copy_from_slice(&self.data[start..end]);
                Ok(())
            }
            _ => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "read past end of file",
            )
            .into()),
        }
    }

    fn len(&self) -> Result<u64> {
        Ok(self.data.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn memfile_positioned_reads() {
        let f = MemFile::new(b"hello world".to_vec());
        let mut buf = [0u8; 5];
        f.read_at(6, &mut buf).unwrap();
        assert_eq!(&buf, b"world");
        assert_eq!(f.len().unwrap(), 11);
    }

    #[test]
    fn memfile_short_read_is_io_error() {
        let f = MemFile::new(b"abc".to_vec());
        let mut buf = [0u8; 5];
        assert!(matches!(f.read_at(2, &mut buf), Err(Error::Io(_))));
    }

    #[test]
    fn real_file_positioned_reads() -> anyhow::Result<()> {
        use std::io::Write;
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("t.sst");
        std::fs::File::create(&path)?.write_all(b"0123456789")?;
        let f = File::open(&path)?;
        let mut buf = [0u8; 4];
        // Disambiguate from `FileExt::read_at`, which is also in scope.
        RandomAccess::read_at(&f, 3, &mut buf)?;
        assert_eq!(&buf, b"3456");
        Ok(())
    }
}
