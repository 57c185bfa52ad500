//! The address space: an abstraction over a target's virtual memory, backed
//! by the load segments of a core dump or a live process image.

mod error;

pub use error::{MemoryError, MemoryErrorKind};

use postmortem_common::ByteView;

/// Anything that can answer "give me `len` bytes starting at backing offset
/// `offset`". A core dump backs this with a [`ByteView`] over the mapped
/// file; a live attach backs it with reads through `/proc/<pid>/mem` (see
/// `postmortem-process`).
///
/// `spec.md` frames the backing store as "a seekable stream"; this crate
/// re-architects that as a random-access `Backing` trait instead of a
/// `Seek + Read` pair, since both concrete backings (mmap, `pread`-style
/// process memory) are naturally random access and a stateful cursor would
/// just be reinvented internally. See `DESIGN.md`.
pub trait Backing {
    /// Reads `len` bytes starting at `offset`, or an I/O error.
    fn read_at(&self, offset: u64, len: usize) -> std::io::Result<Vec<u8>>;
}

impl Backing for ByteView<'_> {
    fn read_at(&self, offset: u64, len: usize) -> std::io::Result<Vec<u8>> {
        let start = offset as usize;
        let end = start
            .checked_add(len)
            .ok_or_else(|| std::io::Error::from(std::io::ErrorKind::InvalidInput))?;
        let slice = self.as_slice();
        if end > slice.len() {
            return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof));
        }
        Ok(slice[start..end].to_vec())
    }
}

/// Maps a contiguous virtual-address range `[va_start, va_end)` onto a
/// contiguous range of the backing stream starting at `file_offset`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoadSegment {
    /// Inclusive start of the virtual-address range.
    pub va_start: u64,
    /// Exclusive end of the virtual-address range.
    pub va_end: u64,
    /// Offset into the backing stream where this range's bytes begin.
    pub file_offset: u64,
}

impl LoadSegment {
    /// Creates a new load segment. `va_end` must be `>= va_start`.
    pub fn new(va_start: u64, va_end: u64, file_offset: u64) -> Self {
        LoadSegment {
            va_start,
            va_end,
            file_offset,
        }
    }

    /// Whether `address` falls within `[va_start, va_end)`.
    pub fn contains(&self, address: u64) -> bool {
        address >= self.va_start && address < self.va_end
    }

    /// Translates a virtual address covered by this segment into a backing
    /// stream offset.
    fn translate(&self, address: u64) -> u64 {
        self.file_offset + (address - self.va_start)
    }
}

/// A sorted, disjoint collection of [`LoadSegment`]s over a single backing
/// stream, giving byte- and integer-level access to a target's virtual
/// memory by address.
///
/// Constructed once per target image and read-only thereafter. Reads are
/// idempotent and never span a segment boundary — a read that does not fit
/// entirely inside one segment's range is reported as unmapped rather than
/// silently splitting across segments of possibly-unrelated backing ranges.
#[derive(Debug)]
pub struct AddressSpace<B> {
    segments: Vec<LoadSegment>,
    backing: B,
}

impl<B: Backing> AddressSpace<B> {
    /// Builds an address space from an already-sorted-or-not set of
    /// segments; segments are sorted by `va_start` for binary search.
    pub fn new(mut segments: Vec<LoadSegment>, backing: B) -> Self {
        segments.sort_by_key(|s| s.va_start);
        AddressSpace { segments, backing }
    }

    fn segment_for(&self, address: u64) -> Option<&LoadSegment> {
        // Binary search for the last segment whose va_start <= address, then
        // confirm the address actually falls inside it.
        let idx = self
            .segments
            .partition_point(|s| s.va_start <= address)
            .checked_sub(1)?;
        let segment = &self.segments[idx];
        segment.contains(address).then_some(segment)
    }

    /// Reads `size` bytes starting at `address`. Returns `Ok(None)` if no
    /// segment covers `[address, address + size)`, matching `spec.md`'s
    /// "does not span segment boundaries" guarantee — a read must fit
    /// entirely within one segment or it is unmapped.
    pub fn read(&self, address: u64, size: usize) -> Result<Option<Vec<u8>>, MemoryError> {
        let Some(segment) = self.segment_for(address) else {
            tracing::debug!(address, "address not covered by any load segment");
            return Ok(None);
        };

        let end = match address.checked_add(size as u64) {
            Some(end) if end <= segment.va_end => end,
            _ => {
                tracing::debug!(address, size, "read would span a segment boundary");
                return Ok(None);
            }
        };
        let _ = end;

        let offset = segment.translate(address);
        match self.backing.read_at(offset, size) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) => Err(MemoryError::with_source(MemoryErrorKind::IoFailure, err)),
        }
    }

    /// Like [`read`](Self::read), but treats an unmapped address as an
    /// error instead of `None`. Used by callers (the evaluator, the
    /// unwinder) that cannot proceed meaningfully without the bytes.
    pub fn read_required(&self, address: u64, size: usize) -> Result<Vec<u8>, MemoryError> {
        self.read(address, size)?
            .ok_or_else(|| MemoryError::new(MemoryErrorKind::AddressUnmapped))
    }

    /// Reads a little-endian unsigned integer of `size` bytes (`size` must
    /// be one of `1, 2, 4, 8`).
    pub fn read_int(&self, address: u64, size: usize) -> Result<Option<u64>, MemoryError> {
        if !matches!(size, 1 | 2 | 4 | 8) {
            return Err(MemoryError::new(MemoryErrorKind::InvalidReadSize));
        }

        let Some(bytes) = self.read(address, size)? else {
            return Ok(None);
        };

        let mut buf = [0u8; 8];
        buf[..size].copy_from_slice(&bytes);
        Ok(Some(u64::from_le_bytes(buf)))
    }

    /// Like [`read_int`](Self::read_int), surfacing an unmapped address as
    /// [`MemoryErrorKind::AddressUnmapped`] instead of `None`.
    pub fn read_int_required(&self, address: u64, size: usize) -> Result<u64, MemoryError> {
        self.read_int(address, size)?
            .ok_or_else(|| MemoryError::new(MemoryErrorKind::AddressUnmapped))
    }

    /// The segments backing this address space, in ascending `va_start` order.
    pub fn segments(&self) -> &[LoadSegment] {
        &self.segments
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct VecBacking(Vec<u8>);

    impl Backing for VecBacking {
        fn read_at(&self, offset: u64, len: usize) -> std::io::Result<Vec<u8>> {
            let start = offset as usize;
            let end = start + len;
            self.0
                .get(start..end)
                .map(|s| s.to_vec())
                .ok_or_else(|| std::io::Error::from(std::io::ErrorKind::UnexpectedEof))
        }
    }

    fn fixture() -> AddressSpace<VecBacking> {
        // file offset 0x1000 holds the bytes for [0x400000, 0x401000)
        // file offset 0x8000 holds the bytes for [0x600000, 0x600100)
        let mut backing = vec![0u8; 0x8100];
        backing[0x1010..0x1014].copy_from_slice(&[0xde, 0xad, 0xbe, 0xef]);
        let segments = vec![
            LoadSegment::new(0x400000, 0x401000, 0x1000),
            LoadSegment::new(0x600000, 0x600100, 0x8000),
        ];
        AddressSpace::new(segments, VecBacking(backing))
    }

    #[test]
    fn reads_bytes_from_the_right_segment() {
        let space = fixture();
        let bytes = space.read(0x400010, 4).unwrap().unwrap();
        assert_eq!(bytes, [0xde, 0xad, 0xbe, 0xef]);
    }

    #[test]
    fn unmapped_address_is_absent_not_an_error() {
        let space = fixture();
        assert_eq!(space.read(0x500000, 1).unwrap(), None);
    }

    #[test]
    fn read_does_not_span_a_segment_boundary() {
        let space = fixture();
        // starts inside the first segment but runs past va_end
        assert_eq!(space.read(0x400ffe, 4).unwrap(), None);
    }

    #[test]
    fn read_int_round_trips_little_endian_sizes() {
        let space = fixture();
        assert_eq!(space.read_int(0x400010, 4).unwrap(), Some(0xefbeadde));
    }

    #[test]
    fn read_int_rejects_invalid_sizes() {
        let space = fixture();
        let err = space.read_int(0x400010, 3).unwrap_err();
        assert_eq!(err.kind(), MemoryErrorKind::InvalidReadSize);
    }

    #[test]
    fn read_required_surfaces_unmapped_as_an_error() {
        let space = fixture();
        let err = space.read_required(0x500000, 1).unwrap_err();
        assert_eq!(err.kind(), MemoryErrorKind::AddressUnmapped);
    }
}
