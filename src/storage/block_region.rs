//! Block Region - direct I/O access to the persistent backing store.
//!
//! The [`BlockRegion`] reads and writes whole pages at a byte offset derived
//! from the page ID. There is no header and no persisted free list: the
//! store is a raw array of pages per size class.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::common::config::PAGE_ALIGNMENT;
use crate::common::{Error, PageId, PageSizeType, Result, NUM_PAGE_SIZE_TYPES};

/// How pages of the different size classes are placed on the backing store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackingLayout {
    /// One growable file per size class inside a directory.
    PerClassFiles { dir: PathBuf },

    /// A single file or block device split into equal, disjoint extents,
    /// one per size class in ascending size order.
    Partitioned { extent_bytes: u64 },
}

/// Page-granular access to the backing store.
///
/// # File Layout
/// Within the extent of one size class, page `N` lives at byte offset
/// `N × page_bytes`:
/// ```text
/// ┌──────────┬──────────┬──────────┬─────────┐
/// │ index 0  │ index 1  │ index 2  │   ...   │
/// └──────────┴──────────┴──────────┴─────────┘
/// Offset:  0     bytes      2×bytes
/// ```
///
/// # Thread Safety
/// All I/O is positional (`pread`/`pwrite`), so a `BlockRegion` can be used
/// from many threads at once without a lock.
///
/// # Alignment
/// With direct I/O the kernel bypasses the page cache, which requires every
/// buffer to be aligned to [`PAGE_ALIGNMENT`]. Passing a misaligned buffer or
/// a buffer of the wrong length is a programming error and panics.
pub struct BlockRegion {
    /// Per-class files, or a single partitioned device at index 0.
    files: Vec<File>,
    layout: BackingLayout,
    direct: bool,
}

impl BlockRegion {
    /// Open the backing store at `path`.
    ///
    /// A directory (created if missing) holds one file per size class. An
    /// existing file or block device is partitioned into equal extents.
    ///
    /// With `direct_io`, files are opened with `O_DIRECT` where the platform
    /// and filesystem allow it, falling back to buffered I/O otherwise.
    ///
    /// # Errors
    /// - I/O errors while creating or opening files
    /// - `Error::InvalidConfig` if a device is too small to hold one page of
    ///   the largest size class per extent
    pub fn open<P: AsRef<Path>>(path: P, direct_io: bool) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() || path.is_dir() {
            fs::create_dir_all(path)?;
            let mut files = Vec::with_capacity(NUM_PAGE_SIZE_TYPES);
            let mut direct = direct_io;
            for size_type in PageSizeType::ALL {
                let file_path = path.join(format!("pages-{}.bin", size_type));
                let (file, is_direct) = open_file(&file_path, true, direct_io)?;
                direct &= is_direct;
                files.push(file);
            }
            debug!(path = %path.display(), direct, "opened per-class backing files");
            return Ok(Self {
                files,
                layout: BackingLayout::PerClassFiles {
                    dir: path.to_path_buf(),
                },
                direct,
            });
        }

        let (mut file, direct) = open_file(path, false, direct_io)?;
        // Block devices report a zero length in their metadata.
        let device_bytes = file.seek(SeekFrom::End(0))?;
        let max_page = PageSizeType::MAX.bytes() as u64;
        let extent_bytes = device_bytes / NUM_PAGE_SIZE_TYPES as u64 / max_page * max_page;
        if extent_bytes == 0 {
            return Err(Error::InvalidConfig(format!(
                "backing device {} holds {} bytes, too small for one {} page per size class",
                path.display(),
                device_bytes,
                PageSizeType::MAX
            )));
        }

        debug!(path = %path.display(), extent_bytes, direct, "opened partitioned backing device");
        Ok(Self {
            files: vec![file],
            layout: BackingLayout::Partitioned { extent_bytes },
            direct,
        })
    }

    #[inline]
    pub fn layout(&self) -> &BackingLayout {
        &self.layout
    }

    /// Whether the store bypasses the OS page cache.
    #[inline]
    pub fn is_direct(&self) -> bool {
        self.direct
    }

    /// Read a page into `buf`.
    ///
    /// # Panics
    /// Panics if `buf` is not exactly one page long or not aligned to
    /// [`PAGE_ALIGNMENT`].
    ///
    /// # Errors
    /// - `Error::ShortTransfer` if less than a full page could be read (e.g.
    ///   the page was never written)
    /// - `Error::DeviceFull` if the page lies outside its extent
    /// - I/O errors
    pub fn read_page(&self, page_id: PageId, buf: &mut [u8]) -> Result<()> {
        check_buffer(page_id, buf.as_ptr(), buf.len());
        let (file, offset) = self.locate(page_id)?;

        let mut done = 0;
        while done < buf.len() {
            match read_at(file, &mut buf[done..], offset + done as u64) {
                Ok(0) => break,
                Ok(n) => done += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        if done != buf.len() {
            return Err(Error::ShortTransfer {
                op: "read",
                page_id,
                transferred: done,
                expected: buf.len(),
            });
        }
        Ok(())
    }

    /// Write a page from `buf`, growing the backing file if needed.
    ///
    /// # Panics
    /// Same preconditions as [`BlockRegion::read_page`].
    ///
    /// # Errors
    /// - `Error::ShortTransfer` if the device accepted less than a full page
    /// - `Error::DeviceFull` if the page lies outside its extent
    /// - I/O errors
    pub fn write_page(&self, page_id: PageId, buf: &[u8]) -> Result<()> {
        check_buffer(page_id, buf.as_ptr(), buf.len());
        let (file, offset) = self.locate(page_id)?;

        let mut done = 0;
        while done < buf.len() {
            match write_at(file, &buf[done..], offset + done as u64) {
                Ok(0) => break,
                Ok(n) => done += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        if done != buf.len() {
            return Err(Error::ShortTransfer {
                op: "write",
                page_id,
                transferred: done,
                expected: buf.len(),
            });
        }
        Ok(())
    }

    /// Flush written pages to stable storage.
    pub fn sync(&self) -> Result<()> {
        for file in &self.files {
            file.sync_data()?;
        }
        Ok(())
    }

    /// Resolve the file and byte offset of a page.
    fn locate(&self, page_id: PageId) -> Result<(&File, u64)> {
        let size_type = page_id.size_type();
        let bytes = size_type.bytes() as u64;
        let offset = page_id.index() * bytes;

        match self.layout {
            BackingLayout::PerClassFiles { .. } => Ok((&self.files[size_type.index()], offset)),
            BackingLayout::Partitioned { extent_bytes } => {
                let end = offset + bytes;
                if end > extent_bytes {
                    return Err(Error::DeviceFull {
                        page_id,
                        end,
                        extent: extent_bytes,
                    });
                }
                let base = size_type.index() as u64 * extent_bytes;
                Ok((&self.files[0], base + offset))
            }
        }
    }
}

fn check_buffer(page_id: PageId, ptr: *const u8, len: usize) {
    assert!(page_id.is_valid(), "I/O on invalid page id");
    assert_eq!(
        len,
        page_id.num_bytes(),
        "buffer of {} bytes does not match {}",
        len,
        page_id
    );
    assert!(
        ptr as usize % PAGE_ALIGNMENT == 0,
        "buffer is not aligned to {}: misaligned by {}",
        PAGE_ALIGNMENT,
        ptr as usize % PAGE_ALIGNMENT
    );
}

/// Open a backing file, preferring `O_DIRECT`. Returns whether it is direct.
fn open_file(path: &Path, create: bool, direct_io: bool) -> Result<(File, bool)> {
    let mut options = OpenOptions::new();
    options.read(true).write(true).create(create).truncate(false);

    #[cfg(target_os = "linux")]
    {
        use std::os::unix::fs::OpenOptionsExt;

        if direct_io {
            let mut direct = options.clone();
            direct.custom_flags(libc::O_DIRECT);
            match direct.open(path) {
                Ok(file) => return Ok((file, true)),
                Err(e) if e.raw_os_error() == Some(libc::EINVAL) => {
                    warn!(path = %path.display(), "filesystem rejects O_DIRECT, falling back to buffered I/O");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    #[cfg(not(target_os = "linux"))]
    {
        if direct_io {
            warn!(path = %path.display(), "direct I/O is unsupported on this platform, using buffered I/O");
        }
    }

    Ok((options.open(path)?, false))
}

#[cfg(unix)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    std::os::unix::fs::FileExt::read_at(file, buf, offset)
}

#[cfg(unix)]
fn write_at(file: &File, buf: &[u8], offset: u64) -> io::Result<usize> {
    std::os::unix::fs::FileExt::write_at(file, buf, offset)
}

#[cfg(windows)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    std::os::windows::fs::FileExt::seek_read(file, buf, offset)
}

#[cfg(windows)]
fn write_at(file: &File, buf: &[u8], offset: u64) -> io::Result<usize> {
    std::os::windows::fs::FileExt::seek_write(file, buf, offset)
}
