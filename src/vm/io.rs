//! Byte-addressable I/O over page-frame-backed memory.

use pod::Pod;

use crate::prelude::*;

/// An I/O interface for reading and writing contents from a memory-like
/// object, such as `VmFrame` and `VmFrameVec`.
pub trait VmIo {
    /// Reads `buf.len()` bytes starting from `offset` into `buf`.
    ///
    /// # No short reads
    ///
    /// On success, `buf` is filled with the requested data completely; if
    /// the data is only partially available, the method returns an error.
    fn read_bytes(&self, offset: usize, buf: &mut [u8]) -> Result<()>;

    /// Reads a value of a specified type at a specified offset.
    fn read_val<T: Pod>(&self, offset: usize) -> Result<T> {
        let mut val = T::new_uninit();
        self.read_bytes(offset, val.as_bytes_mut())?;
        Ok(val)
    }

    /// Reads a slice of a specified type starting from a specified offset.
    fn read_slice<T: Pod>(&self, offset: usize, slice: &mut [T]) -> Result<()> {
        let buf = unsafe { core::mem::transmute(slice) };
        self.read_bytes(offset, buf)
    }

    /// Writes `buf.len()` bytes starting at `offset` from `buf`.
    fn write_bytes(&self, offset: usize, buf: &[u8]) -> Result<()>;

    /// Writes a value of a specified type at a specified offset.
    fn write_val<T: Pod>(&self, offset: usize, new_val: &T) -> Result<()> {
        self.write_bytes(offset, new_val.as_bytes())
    }

    /// Writes a slice of a specified type starting from a specified offset.
    fn write_slice<T: Pod>(&self, offset: usize, slice: &[T]) -> Result<()> {
        let buf = unsafe { core::mem::transmute(slice) };
        self.write_bytes(offset, buf)
    }
}
