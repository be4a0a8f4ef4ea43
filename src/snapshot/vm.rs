//! Virtual machine geometry recorded with the capture.

use crate::error::{CrawlError, CrawlResult};

/// Layout constants of the runtime that produced the snapshot.
///
/// All offsets are in bytes from the start of an object.
///
/// # Examples
///
/// ```
/// use heapcrawl::snapshot::VmInfo;
///
/// let vm = VmInfo::x64();
/// assert_eq!(vm.pointer_size, 8);
/// assert_eq!(vm.object_header_size, 16);
/// assert!(vm.validate().is_ok());
/// ```
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct VmInfo {
    pub pointer_size: u32,
    pub object_header_size: u32,
    pub array_header_size: u32,
    /// Offset of the bounds pointer, null for single-dimension arrays
    pub array_bounds_offset: u32,
    /// Offset of the pointer-sized element count
    pub array_size_offset: u32,
    pub allocation_granularity: u32,
}

impl VmInfo {
    /// Geometry of a 64-bit runtime.
    pub const fn x64() -> Self {
        Self {
            pointer_size: 8,
            object_header_size: 16,
            array_header_size: 32,
            array_bounds_offset: 16,
            array_size_offset: 24,
            allocation_granularity: 16,
        }
    }

    /// Geometry of a 32-bit runtime.
    pub const fn x86() -> Self {
        Self {
            pointer_size: 4,
            object_header_size: 8,
            array_header_size: 16,
            array_bounds_offset: 8,
            array_size_offset: 12,
            allocation_granularity: 8,
        }
    }

    pub fn validate(&self) -> CrawlResult<()> {
        if self.pointer_size != 4 && self.pointer_size != 8 {
            return Err(CrawlError::InvalidGeometry(format!(
                "pointer size {} is neither 4 nor 8",
                self.pointer_size
            )));
        }
        if self.object_header_size < self.pointer_size {
            return Err(CrawlError::InvalidGeometry(format!(
                "object header of {} bytes cannot hold a {}-byte type pointer",
                self.object_header_size, self.pointer_size
            )));
        }
        if self.array_header_size < self.object_header_size {
            return Err(CrawlError::InvalidGeometry(format!(
                "array header of {} bytes is smaller than the object header",
                self.array_header_size
            )));
        }
        if self.array_size_offset + self.pointer_size > self.array_header_size
            || self.array_bounds_offset + self.pointer_size > self.array_header_size
        {
            return Err(CrawlError::InvalidGeometry(
                "array length or bounds slot lies outside the array header".to_string(),
            ));
        }
        Ok(())
    }

    #[inline]
    pub fn pointer_bytes(&self) -> u64 {
        self.pointer_size as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_are_valid() {
        assert!(VmInfo::x64().validate().is_ok());
        assert!(VmInfo::x86().validate().is_ok());
    }

    #[test]
    fn rejects_odd_pointer_size() {
        let vm = VmInfo {
            pointer_size: 6,
            ..VmInfo::x64()
        };
        assert!(matches!(vm.validate(), Err(CrawlError::InvalidGeometry(_))));
    }

    #[test]
    fn rejects_header_smaller_than_pointer() {
        let vm = VmInfo {
            object_header_size: 4,
            ..VmInfo::x64()
        };
        assert!(vm.validate().is_err());
    }

    #[test]
    fn rejects_length_slot_outside_header() {
        let vm = VmInfo {
            array_size_offset: 32,
            ..VmInfo::x64()
        };
        assert!(vm.validate().is_err());
    }
}
