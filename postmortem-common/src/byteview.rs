//! A wrapper type providing direct, cheaply-cloneable access to a symbol or
//! core file's bytes, whichever of mmap or an in-memory buffer produced them.
//!
//! See the [`ByteView`] struct for more documentation.

use std::borrow::Cow;
use std::fs::File;
use std::io;
use std::ops::Deref;
use std::path::Path;
use std::sync::Arc;

use memmap2::Mmap;
use stable_deref_trait::StableDeref;

/// The owner of the bytes behind a [`ByteView`]: either a memory-mapped file
/// or, for the rare empty-mmap case below, an owned buffer.
#[derive(Debug)]
enum ByteViewBacking<'a> {
    Buf(Cow<'a, [u8]>),
    Mmap(Mmap),
}

impl Deref for ByteViewBacking<'_> {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        match *self {
            ByteViewBacking::Buf(ref buf) => buf,
            ByteViewBacking::Mmap(ref mmap) => mmap,
        }
    }
}

/// A cheaply-cloneable handle to a symbol or core file's bytes.
///
/// A `ByteView` dereferences to `&[u8]` regardless of whether it is backed
/// by a memory-mapped file or (for an empty file, where mmapping is not
/// possible on every platform) an owned in-memory buffer. [`DebuggerSession`]
/// reads both symbol and core data through one, and an `AddressSpace` is
/// typically built over a `ByteView<'static>` cloned from it.
///
/// [`DebuggerSession`]: https://docs.rs/postmortem
///
/// # Example
///
/// ```
/// use std::io::Write;
/// use postmortem_common::ByteView;
///
/// fn main() -> Result<(), std::io::Error> {
///     let mut file = tempfile::NamedTempFile::new()?;
///     file.write_all(b"1234")?;
///
///     let view = ByteView::open(file.path())?;
///     assert_eq!(view.as_slice(), b"1234");
///     Ok(())
/// }
/// ```
#[derive(Clone, Debug)]
pub struct ByteView<'a> {
    backing: Arc<ByteViewBacking<'a>>,
}

impl ByteView<'_> {
    /// Opens and memory-maps the file at `path`.
    ///
    /// An empty file cannot be mmapped on every platform; that case falls
    /// back to an empty owned buffer rather than erroring.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, io::Error> {
        let file = File::open(path)?;
        let backing = match unsafe { Mmap::map(&file) } {
            Ok(mmap) => ByteViewBacking::Mmap(mmap),
            Err(err) => {
                // Raised on empty mmaps, which we want to ignore. The 1006
                // Windows error looks like "The volume for a file has been
                // externally altered so that the opened file is no longer
                // valid."
                if err.kind() == io::ErrorKind::InvalidInput
                    || (cfg!(windows) && err.raw_os_error() == Some(1006))
                {
                    ByteViewBacking::Buf(Cow::Borrowed(b""))
                } else {
                    return Err(err);
                }
            }
        };

        Ok(ByteView {
            backing: Arc::new(backing),
        })
    }

    /// Returns a slice of the underlying data.
    #[inline(always)]
    pub fn as_slice(&self) -> &[u8] {
        self.backing.deref()
    }
}

impl AsRef<[u8]> for ByteView<'_> {
    #[inline(always)]
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl Deref for ByteView<'_> {
    type Target = [u8];

    #[inline(always)]
    fn deref(&self) -> &Self::Target {
        self.as_slice()
    }
}

unsafe impl StableDeref for ByteView<'_> {}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Write;

    use similar_asserts::assert_eq;
    use tempfile::NamedTempFile;

    #[test]
    fn open_reads_an_empty_file() -> Result<(), std::io::Error> {
        let tmp = NamedTempFile::new()?;

        let view = ByteView::open(tmp.path())?;
        assert_eq!(&*view, b"");

        Ok(())
    }

    #[test]
    fn open_reads_a_nonempty_file() -> Result<(), std::io::Error> {
        let mut tmp = NamedTempFile::new()?;
        tmp.write_all(b"1234")?;

        let view = ByteView::open(tmp.path())?;
        assert_eq!(&*view, b"1234");

        Ok(())
    }
}
