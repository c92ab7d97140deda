//! Read-only flat filesystem reader.
//!
//! The filesystem lives as a single contiguous image (embedded alongside the
//! kernel binary): a boot block describing every directory entry, followed
//! by one inode block per file, followed by the raw data blocks those
//! inodes index into. There is no free space management, no writes, and no
//! nesting — every file lives directly under the root directory.

use alloc::vec;
use alloc::vec::Vec;

use crate::process::FileKind;

/// Size of every block in the image, including the boot block itself.
pub const BLOCK_SIZE: usize = 4096;
/// Maximum length of a filename, not necessarily NUL terminated.
pub const FILENAME_LEN: usize = 32;
/// Maximum number of directory entries the boot block can describe.
pub const MAX_DIR_ENTRIES: usize = 63;
/// Maximum number of data blocks a single inode can index.
const MAX_DATA_BLOCKS_PER_INODE: usize = 1023;

/// One entry of the root directory listing.
#[derive(Debug, Clone, Copy)]
pub struct DirEntry {
    /// Raw filename bytes, not necessarily NUL terminated, 0-padded.
    pub filename: [u8; FILENAME_LEN],
    /// Byte length of `filename` before any trailing NUL padding.
    pub filename_len: usize,
    /// What kind of object this entry describes.
    pub kind: FileKind,
    /// Inode number backing the entry (ignored for RTC entries).
    pub inode_num: u32,
}

impl DirEntry {
    /// Returns the filename as a UTF-8 string, ignoring trailing padding.
    #[must_use]
    pub fn name(&self) -> &str {
        core::str::from_utf8(&self.filename[..self.filename_len]).unwrap_or("")
    }
}

/// A read-only flat filesystem image, parsed on demand from raw bytes.
///
/// The image is never copied: every accessor indexes directly into the
/// caller-provided byte slice, which must remain valid (and unchanged) for
/// the lifetime of the `Filesystem`.
pub struct Filesystem<'a> {
    image: &'a [u8],
    dir_count: usize,
    inode_count: usize,
    data_count: usize,
}

impl<'a> Filesystem<'a> {
    /// Parses the boot block at the start of `image`.
    ///
    /// # Errors
    ///
    /// Returns an error if `image` is too small to contain a boot block, or
    /// if the block counts it reports are inconsistent with its length.
    pub fn new(image: &'a [u8]) -> Result<Self, &'static str> {
        if image.len() < BLOCK_SIZE {
            return Err("fs: image smaller than one block");
        }
        let dir_count = read_u32_le(image, 0) as usize;
        let inode_count = read_u32_le(image, 4) as usize;
        let data_count = read_u32_le(image, 8) as usize;

        if dir_count > MAX_DIR_ENTRIES {
            return Err("fs: dir_count exceeds boot block capacity");
        }
        let required_blocks = 1 + inode_count + data_count;
        if image.len() < required_blocks * BLOCK_SIZE {
            return Err("fs: image shorter than inode_count + data_count implies");
        }

        Ok(Self {
            image,
            dir_count,
            inode_count,
            data_count,
        })
    }

    /// Number of entries in the root directory.
    #[must_use]
    pub const fn dir_count(&self) -> usize {
        self.dir_count
    }

    /// Reads the `index`-th directory entry, in on-disk order.
    #[must_use]
    pub fn dentry_by_index(&self, index: usize) -> Option<DirEntry> {
        if index >= self.dir_count {
            return None;
        }
        let base = 64 + index * 64;
        self.parse_dentry(base)
    }

    /// Looks up a directory entry by exact (case-sensitive) filename match.
    ///
    /// Mirrors `read_dentry_by_name`: names longer than [`FILENAME_LEN`]
    /// never match, since the original's comparison window is clamped to
    /// that length for both operands.
    #[must_use]
    pub fn dentry_by_name(&self, name: &str) -> Option<DirEntry> {
        if name.len() > FILENAME_LEN {
            return None;
        }
        (0..self.dir_count)
            .filter_map(|i| self.dentry_by_index(i))
            .find(|d| d.name() == name)
    }

    fn parse_dentry(&self, base: usize) -> Option<DirEntry> {
        let mut filename = [0u8; FILENAME_LEN];
        filename.copy_from_slice(self.image.get(base..base + FILENAME_LEN)?);
        let filename_len = filename.iter().position(|&b| b == 0).unwrap_or(FILENAME_LEN);

        let filetype = read_u32_le(self.image, base + FILENAME_LEN);
        let inode_num = read_u32_le(self.image, base + FILENAME_LEN + 4);

        let kind = match filetype {
            0 => FileKind::Rtc,
            1 => FileKind::Directory,
            _ => FileKind::Regular,
        };

        if kind == FileKind::Regular && inode_num as usize >= self.inode_count {
            return None;
        }

        Some(DirEntry {
            filename,
            filename_len,
            kind,
            inode_num,
        })
    }

    /// Length in bytes of the file backed by `inode_idx`.
    ///
    /// # Errors
    ///
    /// Returns an error if `inode_idx` is out of range.
    pub fn file_length(&self, inode_idx: u32) -> Result<u32, &'static str> {
        let inode_idx = inode_idx as usize;
        if inode_idx >= self.inode_count {
            return Err("fs: inode index out of range");
        }
        let inode_base = (1 + inode_idx) * BLOCK_SIZE;
        Ok(read_u32_le(self.image, inode_base))
    }

    /// Reads up to `buf.len()` bytes starting at `offset` within the file
    /// backed by `inode_idx`. Returns the number of bytes copied into
    /// `buf`; fewer than `buf.len()` bytes means end of file was reached.
    ///
    /// # Errors
    ///
    /// Returns an error if `inode_idx` is out of range, or if the image
    /// references a data block index beyond `data_count`.
    pub fn read_data(
        &self,
        inode_idx: u32,
        offset: u32,
        buf: &mut [u8],
    ) -> Result<usize, &'static str> {
        if buf.is_empty() {
            return Ok(0);
        }
        let inode_idx = inode_idx as usize;
        if inode_idx >= self.inode_count {
            return Err("fs: inode index out of range");
        }

        let inode_base = (1 + inode_idx) * BLOCK_SIZE;
        let file_len = read_u32_le(self.image, inode_base);
        let offset = offset as u64;
        if offset >= u64::from(file_len) {
            return Ok(0);
        }

        let data_blocks_start = (1 + self.inode_count) * BLOCK_SIZE;
        let mut written = 0usize;
        let mut pos = offset;

        while written < buf.len() && pos < u64::from(file_len) {
            let dnode_num = (pos / BLOCK_SIZE as u64) as usize;
            let pos_in_dnode = (pos % BLOCK_SIZE as u64) as usize;

            let dnode_field = inode_base + 4 + dnode_num * 4;
            if dnode_num >= MAX_DATA_BLOCKS_PER_INODE {
                return Err("fs: file references more data blocks than an inode can hold");
            }
            let dnode_idx = read_u32_le(self.image, dnode_field) as usize;
            if dnode_idx >= self.data_count {
                return Err("fs: data block index out of range");
            }

            let byte_off = data_blocks_start + dnode_idx * BLOCK_SIZE + pos_in_dnode;
            let byte = *self.image.get(byte_off).ok_or("fs: data block read out of bounds")?;
            buf[written] = byte;
            written += 1;
            pos += 1;
        }

        Ok(written)
    }
}

/// Builds a minimal filesystem image with one regular file, for bootstrap
/// use before any real disk/initrd image is attached. `data` must fit in a
/// single data block.
///
/// # Panics
///
/// Panics if `name` or `data` exceed their respective on-disk limits.
#[must_use]
pub fn build_single_file_image(name: &str, data: &[u8]) -> Vec<u8> {
    assert!(name.len() <= FILENAME_LEN, "filename too long");
    assert!(data.len() <= BLOCK_SIZE, "bootstrap loader supports one data block");

    let mut image = vec![0u8; 3 * BLOCK_SIZE];

    image[0..4].copy_from_slice(&1u32.to_le_bytes());
    image[4..8].copy_from_slice(&1u32.to_le_bytes());
    image[8..12].copy_from_slice(&1u32.to_le_bytes());

    let dentry_base = 64;
    image[dentry_base..dentry_base + name.len()].copy_from_slice(name.as_bytes());
    image[dentry_base + FILENAME_LEN..dentry_base + FILENAME_LEN + 4].copy_from_slice(&2u32.to_le_bytes());
    image[dentry_base + FILENAME_LEN + 4..dentry_base + FILENAME_LEN + 8].copy_from_slice(&0u32.to_le_bytes());

    let inode_base = BLOCK_SIZE;
    image[inode_base..inode_base + 4].copy_from_slice(&(data.len() as u32).to_le_bytes());
    image[inode_base + 4..inode_base + 8].copy_from_slice(&0u32.to_le_bytes());

    let data_base = 2 * BLOCK_SIZE;
    image[data_base..data_base + data.len()].copy_from_slice(data);

    image
}

fn read_u32_le(image: &[u8], offset: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&image[offset..offset + 4]);
    u32::from_le_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_IMAGE_BLOCKS: usize = 3;

    /// Builds a single-file image (one boot block, one inode block, one data
    /// block) entirely on the stack, so these tests don't depend on the heap
    /// allocator being initialized.
    fn build_single_file_image(name: &str, data: &[u8]) -> [u8; TEST_IMAGE_BLOCKS * BLOCK_SIZE] {
        assert!(data.len() <= BLOCK_SIZE, "test helper supports one data block");
        let mut image = [0u8; TEST_IMAGE_BLOCKS * BLOCK_SIZE];

        image[0..4].copy_from_slice(&1u32.to_le_bytes()); // dir_count
        image[4..8].copy_from_slice(&1u32.to_le_bytes()); // inode_count
        image[8..12].copy_from_slice(&1u32.to_le_bytes()); // data_count

        let dentry_base = 64;
        image[dentry_base..dentry_base + name.len()].copy_from_slice(name.as_bytes());
        image[dentry_base + FILENAME_LEN..dentry_base + FILENAME_LEN + 4]
            .copy_from_slice(&2u32.to_le_bytes()); // regular file
        image[dentry_base + FILENAME_LEN + 4..dentry_base + FILENAME_LEN + 8]
            .copy_from_slice(&0u32.to_le_bytes()); // inode 0

        let inode_base = BLOCK_SIZE;
        image[inode_base..inode_base + 4].copy_from_slice(&(data.len() as u32).to_le_bytes());
        image[inode_base + 4..inode_base + 8].copy_from_slice(&0u32.to_le_bytes()); // data block 0

        let data_base = 2 * BLOCK_SIZE;
        image[data_base..data_base + data.len()].copy_from_slice(data);

        image
    }

    #[test_case]
    fn test_dentry_by_name_finds_exact_match() {
        let image = build_single_file_image("shell", b"shell-binary");
        let fs = Filesystem::new(&image).expect("valid image");
        let dentry = fs.dentry_by_name("shell").expect("shell must exist");
        assert_eq!(dentry.name(), "shell");
        assert_eq!(dentry.inode_num, 0);
    }

    #[test_case]
    fn test_dentry_by_name_rejects_overlong_name() {
        let image = build_single_file_image("shell", b"x");
        let fs = Filesystem::new(&image).expect("valid image");
        let too_long = [b'a'; FILENAME_LEN + 1];
        let too_long_str = core::str::from_utf8(&too_long).expect("ascii");
        assert!(fs.dentry_by_name(too_long_str).is_none());
    }

    #[test_case]
    fn test_read_data_respects_offset_and_eof() {
        let contents = b"0123456789";
        let image = build_single_file_image("f", contents);
        let fs = Filesystem::new(&image).expect("valid image");

        let mut buf = [0u8; 4];
        let n = fs.read_data(0, 3, &mut buf).expect("read should succeed");
        assert_eq!(n, 4);
        assert_eq!(&buf, b"3456");

        let mut tail = [0u8; 20];
        let n = fs.read_data(0, 8, &mut tail).expect("read should succeed");
        assert_eq!(n, 2, "short read at end of file");
        assert_eq!(&tail[..2], b"89");
    }

    #[test_case]
    fn test_read_data_past_eof_returns_zero() {
        let image = build_single_file_image("f", b"hi");
        let fs = Filesystem::new(&image).expect("valid image");
        let mut buf = [0u8; 4];
        let n = fs.read_data(0, 100, &mut buf).expect("read should succeed");
        assert_eq!(n, 0);
    }

    #[test_case]
    fn test_dentry_by_index_enumerates_and_stops_at_dir_count() {
        let image = build_single_file_image("shell", b"x");
        let fs = Filesystem::new(&image).expect("valid image");
        assert_eq!(fs.dentry_by_index(0).expect("first entry").name(), "shell");
        assert!(fs.dentry_by_index(1).is_none(), "only one entry exists");
    }
}
