
use memmap2::{MmapMut, MmapOptions};
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom};
use std::os::unix::fs::{FileExt, FileTypeExt, OpenOptionsExt};
use std::path::Path;

/// What a span path points at.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DeviceKind {
    Block,
    Char,
    File,
    Directory,
    Other,
}

impl DeviceKind {
    /// # Errors
    /// Returns an error if the path metadata cannot be read.
    pub fn classify(path: &Path) -> std::io::Result<Self> {
        let ft = std::fs::metadata(path)?.file_type();
        Ok(if ft.is_block_device() {
            Self::Block
        } else if ft.is_char_device() {
            Self::Char
        } else if ft.is_file() {
            Self::File
        } else if ft.is_dir() {
            Self::Directory
        } else {
            Self::Other
        })
    }
}

/// Physical layout of a device as reported by the OS.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct Geometry {
    /// Required I/O alignment in bytes.
    pub block_size: u64,
    pub total_size: u64,
}

/// An open span device, accessed with positioned reads and writes only.
pub struct Device {
    file: File,
    geometry: Geometry,
    writable: bool,
}

impl Device {
    /// Open `path` read-only, or read-write with synchronous data writes when `writable`.
    ///
    /// # Errors
    /// Returns an error if the device cannot be opened or its size cannot be queried.
    pub fn open(path: &Path, writable: bool) -> std::io::Result<Self> {
        let mut opts = OpenOptions::new();
        opts.read(true);
        if writable {
            opts.write(true).custom_flags(libc::O_DSYNC);
        }
        let mut file = opts.open(path)?;

        let total_size = file.seek(SeekFrom::End(0))?;
        file.seek(SeekFrom::Start(0))?;
        let block_size = sector_size(&file).unwrap_or(512);

        Ok(Self {
            file,
            geometry: Geometry {
                block_size,
                total_size,
            },
            writable,
        })
    }

    #[must_use]
    pub const fn geometry(&self) -> Geometry {
        self.geometry
    }

    /// Read up to `buf.len()` bytes at `off`, short only at end of device.
    ///
    /// # Errors
    /// Returns an error if the underlying read fails.
    pub fn read_at(&self, off: u64, buf: &mut [u8]) -> std::io::Result<usize> {
        let mut done = 0;
        while done < buf.len() {
            match self.file.read_at(&mut buf[done..], off + done as u64) {
                Ok(0) => break,
                Ok(n) => done += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(done)
    }

    /// # Errors
    /// Returns an error if the device was opened read-only or the write fails.
    pub fn write_at(&self, off: u64, data: &[u8]) -> std::io::Result<usize> {
        if !self.writable {
            return Err(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "device opened read-only",
            ));
        }
        self.file.write_all_at(data, off)?;
        Ok(data.len())
    }

    /// Map `len` bytes at `off` as a private copy: edits stay in memory.
    ///
    /// # Errors
    /// Returns an error if the range cannot be mapped.
    pub fn map_private(&self, off: u64, len: usize) -> std::io::Result<MmapMut> {
        // SAFETY: the mapping is copy-on-write, so concurrent writers to the device can
        // change what we read but never observe our modifications.
        unsafe { MmapOptions::new().offset(off).len(len).map_copy(&self.file) }
    }
}

#[cfg(target_os = "linux")]
fn sector_size(file: &File) -> Option<u64> {
    use std::os::unix::io::AsRawFd;

    if !file.metadata().ok()?.file_type().is_block_device() {
        return None;
    }
    const BLKSSZGET: libc::c_ulong = 0x1268;
    let mut size: libc::c_int = 0;
    // SAFETY: BLKSSZGET writes a single int through the provided pointer.
    let rc = unsafe {
        libc::ioctl(
            file.as_raw_fd(),
            BLKSSZGET as _,
            &mut size as *mut libc::c_int,
        )
    };
    (rc == 0 && size > 0).then(|| size as u64)
}

#[cfg(not(target_os = "linux"))]
fn sector_size(_file: &File) -> Option<u64> {
    None
}
