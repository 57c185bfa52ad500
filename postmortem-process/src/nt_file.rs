//! `NT_FILE` note decoding: the core's own record of every file mapped into
//! its address space, used as a fallback when no executable path is given
//! explicitly (`spec.md`'s supplemented `Process::open_core` resolution —
//! `pycdb.py`'s CLI always takes an explicit symbol-file argument, so this
//! widens that interface with a core-native fallback rather than adapting
//! an existing fallback path).

use std::path::PathBuf;

/// The `NT_FILE` note type, per `linux/elfcore.h`.
pub(crate) const NT_FILE: u32 = 0x46494c45;

fn read_u64(desc: &[u8], offset: usize) -> Option<u64> {
    desc.get(offset..offset + 8)
        .map(|s| u64::from_le_bytes(s.try_into().unwrap()))
}

/// One entry of an `NT_FILE` mapping table: the mapped range, its file
/// offset, and the path it was mapped from.
#[derive(Clone, Debug)]
pub(crate) struct MappedFile {
    pub start: u64,
    pub file_ofs: u64,
    pub path: String,
}

/// Decodes an `NT_FILE` descriptor's mapping table.
///
/// Layout: `count: u64`, `page_size: u64`, then `count` entries of
/// `(start: u64, end: u64, file_ofs: u64)`, followed by `count` NUL-terminated
/// path strings in the same order.
pub(crate) fn parse(desc: &[u8]) -> Vec<MappedFile> {
    let Some(count) = read_u64(desc, 0) else {
        return Vec::new();
    };
    let count = count as usize;
    let mut entries = Vec::with_capacity(count);
    let mut offset = 16;
    for _ in 0..count {
        let Some(start) = read_u64(desc, offset) else { break };
        let Some(file_ofs) = read_u64(desc, offset + 16) else { break };
        entries.push((start, file_ofs));
        offset += 24;
    }

    let mut out = Vec::with_capacity(entries.len());
    let mut name_cursor = offset;
    for (start, file_ofs) in entries {
        let Some(rest) = desc.get(name_cursor..) else { break };
        let end = rest.iter().position(|&b| b == 0).unwrap_or(rest.len());
        let path = String::from_utf8_lossy(&rest[..end]).into_owned();
        name_cursor += end + 1;
        out.push(MappedFile { start, file_ofs, path });
    }
    out
}

/// Picks the executable's own path out of an `NT_FILE` mapping table: the
/// entry mapped at file offset zero, which is where the main executable's
/// first segment lands.
pub(crate) fn first_mapped_path(desc: &[u8]) -> Option<PathBuf> {
    parse(desc)
        .into_iter()
        .find(|entry| entry.file_ofs == 0)
        .map(|entry| PathBuf::from(entry.path))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_desc(entries: &[(u64, u64, u64, &str)]) -> Vec<u8> {
        let mut desc = Vec::new();
        desc.extend_from_slice(&(entries.len() as u64).to_le_bytes());
        desc.extend_from_slice(&4096u64.to_le_bytes());
        for (start, end, file_ofs, _) in entries {
            desc.extend_from_slice(&start.to_le_bytes());
            desc.extend_from_slice(&end.to_le_bytes());
            desc.extend_from_slice(&file_ofs.to_le_bytes());
        }
        for (_, _, _, path) in entries {
            desc.extend_from_slice(path.as_bytes());
            desc.push(0);
        }
        desc
    }

    #[test]
    fn picks_the_entry_mapped_at_file_offset_zero() {
        let desc = build_desc(&[
            (0x0040_0000, 0x0040_1000, 0, "/bin/crashy"),
            (0x7f00_0000, 0x7f01_0000, 0, "/lib/libc.so.6"),
        ]);
        assert_eq!(first_mapped_path(&desc), Some(PathBuf::from("/bin/crashy")));
    }

    #[test]
    fn empty_table_has_no_path() {
        let desc = build_desc(&[]);
        assert_eq!(first_mapped_path(&desc), None);
    }
}
