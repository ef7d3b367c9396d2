//! Module loading.
//!
//! The runtime does not parse package formats itself; a [`Loader`] is the
//! narrow seam an external format parser plugs into. Loading maps the
//! module's code into the address space and names the entry point; nothing
//! about threads happens here, so a failed load leaves the kernel empty.
//!
//! [`RawImage`] is the supplied loader: a flat little-endian code blob
//! mapped read-execute at a fixed base, entry at the first byte. It is what
//! the CLI and the integration tests feed the runtime with.

use std::path::{Path, PathBuf};

use crate::memory::{AddressSpace, GuestPtr, Protection, RegionTag};
use crate::Result;

/// A successfully loaded module.
#[derive(Clone, Copy, Debug)]
pub struct LoadedImage {
    /// Entry point of the module's main function.
    pub entry: GuestPtr<()>,
}

/// Maps a module into a guest address space.
pub trait Loader {
    /// Maps the module and returns its entry point.
    ///
    /// # Errors
    ///
    /// Returns an error if the module cannot be read, is malformed, or does
    /// not fit into the address space. No partial mappings survive a
    /// failure observable to the caller holding only the `Err`.
    fn load(&self, memory: &mut AddressSpace) -> Result<LoadedImage>;
}

/// A flat raw code image.
///
/// The whole file (or byte buffer) is guest code, mapped read-execute at
/// [`RawImage::DEFAULT_LOAD_BASE`] with the entry point at offset zero.
#[derive(Clone, Debug)]
pub struct RawImage {
    code: Vec<u8>,
    base: u32,
    source: Option<PathBuf>,
}

impl RawImage {
    /// Where flat images are mapped by default.
    pub const DEFAULT_LOAD_BASE: u32 = 0x0048_0000;

    /// Wraps an in-memory code blob.
    #[must_use]
    pub fn from_bytes(code: Vec<u8>) -> Self {
        RawImage {
            code,
            base: Self::DEFAULT_LOAD_BASE,
            source: None,
        }
    }

    /// Reads a flat image from a file.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::FileError`] if the file cannot be read.
    pub fn from_file(path: &Path) -> Result<Self> {
        let code = std::fs::read(path)?;
        Ok(RawImage {
            code,
            base: Self::DEFAULT_LOAD_BASE,
            source: Some(path.to_path_buf()),
        })
    }

    /// Overrides the load base. Must be page-aligned.
    #[must_use]
    pub fn at_base(mut self, base: u32) -> Self {
        self.base = base;
        self
    }

    /// The path the image was read from, if any.
    #[must_use]
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }
}

impl Loader for RawImage {
    fn load(&self, memory: &mut AddressSpace) -> Result<LoadedImage> {
        #[allow(clippy::cast_possible_truncation)]
        let len = self.code.len().min(u32::MAX as usize) as u32;
        let region = memory.reserve_at(self.base, len, Protection::RX, RegionTag::Code)?;
        memory.populate(region, 0, &self.code)?;
        log::info!(
            "loaded {} bytes of code at {:#010x}",
            self.code.len(),
            region.base()
        );
        Ok(LoadedImage {
            entry: region.ptr(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread::isa;
    use crate::Error;

    #[test]
    fn test_raw_image_maps_at_base() {
        let mut mem = AddressSpace::default();
        let image = RawImage::from_bytes(isa::assemble(&[isa::movw(0, 1), isa::ret()]));

        let loaded = image.load(&mut mem).unwrap();
        assert_eq!(loaded.entry.address(), RawImage::DEFAULT_LOAD_BASE);
        assert_eq!(
            mem.read_value::<u32>(loaded.entry.address(), Protection::EXEC).unwrap(),
            isa::movw(0, 1)
        );
    }

    #[test]
    fn test_code_region_is_not_writable() {
        let mut mem = AddressSpace::default();
        let image = RawImage::from_bytes(vec![0; 16]);
        let loaded = image.load(&mut mem).unwrap();

        assert!(matches!(
            mem.write_value::<u32>(loaded.entry.address(), 0, Protection::WRITE),
            Err(Error::InvalidAddress { .. })
        ));
    }

    #[test]
    fn test_load_fails_when_base_is_taken() {
        let mut mem = AddressSpace::default();
        let image = RawImage::from_bytes(vec![0; 16]);
        image.load(&mut mem).unwrap();

        // Mapping a second image at the same base fails and maps nothing new.
        let before: Vec<_> = mem.regions().collect();
        assert!(image.load(&mut mem).is_err());
        let after: Vec<_> = mem.regions().collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_missing_file() {
        let err = RawImage::from_file(Path::new("/nonexistent/module.bin")).unwrap_err();
        assert!(matches!(err, Error::FileError(_)));
    }

    #[test]
    fn test_empty_image_is_rejected() {
        let mut mem = AddressSpace::default();
        let image = RawImage::from_bytes(Vec::new());
        assert!(image.load(&mut mem).is_err());
    }
}
