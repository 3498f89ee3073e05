//! File-backed shared mappings.
//!
//! A mapped region is RAM-backed shared memory that several processes can
//! open by name. On Linux the backing file lives in /dev/shm (tmpfs); other
//! platforms fall back to the system temp directory. Regions back memory
//! spaces whose slots, coordination cells and message counters must be
//! addressable by peers outside this process.

use std::fs::{File, OpenOptions};
use std::path::PathBuf;

use memmap2::{MmapMut, MmapOptions};

use crate::error::{MosaicError, MosaicResult};

fn mapped_base_dir() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/dev/shm/mosaic")
    }
    #[cfg(not(target_os = "linux"))]
    {
        std::env::temp_dir().join("mosaic")
    }
}

/// A named, file-backed shared memory region
#[derive(Debug)]
pub struct MappedRegion {
    mmap: MmapMut,
    _file: File,
    path: PathBuf,
    size: usize,
    owner: bool,
}

impl MappedRegion {
    /// Create a region of `size` bytes, or attach to an existing one of the
    /// same name. The creator zero-fills it and removes the backing file on
    /// drop.
    pub fn create(name: &str, size: usize) -> MosaicResult<Self> {
        if size == 0 {
            return Err(MosaicError::logic(
                "attempting to create a zero-sized mapped region",
            ));
        }
        let dir = mapped_base_dir();
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(format!("mosaic_{}", name));

        let (file, owner) = if path.exists() {
            let file = OpenOptions::new().read(true).write(true).open(&path)?;
            if file.metadata()?.len() < size as u64 {
                file.set_len(size as u64)?;
            }
            (file, false)
        } else {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .open(&path)?;
            file.set_len(size as u64)?;
            (file, true)
        };

        let mut mmap = unsafe { MmapOptions::new().len(size).map_mut(&file)? };
        if owner {
            mmap.fill(0);
        }

        log::debug!("mapped region '{}' ({} bytes, owner: {})", name, size, owner);
        Ok(Self {
            mmap,
            _file: file,
            path,
            size,
            owner,
        })
    }

    /// Attach to an existing region; fails when none of that name exists
    pub fn open(name: &str) -> MosaicResult<Self> {
        let path = mapped_base_dir().join(format!("mosaic_{}", name));
        if !path.exists() {
            return Err(MosaicError::logic(format!(
                "mapped region '{}' does not exist",
                name
            )));
        }
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let size = file.metadata()?.len() as usize;
        let mmap = unsafe { MmapOptions::new().len(size).map_mut(&file)? };
        Ok(Self {
            mmap,
            _file: file,
            path,
            size,
            owner: false,
        })
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.mmap.as_ptr()
    }

    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.mmap.as_mut_ptr()
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_owner(&self) -> bool {
        self.owner
    }
}

impl Drop for MappedRegion {
    fn drop(&mut self) {
        if self.owner && self.path.exists() {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

// Mapped regions move between threads with the memory spaces they back
unsafe impl Send for MappedRegion {}
unsafe impl Sync for MappedRegion {}
