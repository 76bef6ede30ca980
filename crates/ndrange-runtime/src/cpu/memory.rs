//! Memory manager for the CPU device
//!
//! Buffers are heap byte vectors keyed by handle id. Each buffer remembers
//! its access flags and the context it was created in.

use crate::error::{Result, RuntimeError};
use crate::isa::Type;
use crate::runtime::{ContextHandle, MemFlags, MemHandle};
use std::collections::HashMap;

/// Device buffer
struct Buffer {
    data: Vec<u8>,
    flags: MemFlags,
    context: ContextHandle,
}

/// Memory manager for the CPU device
pub struct MemoryManager {
    buffers: HashMap<u64, Buffer>,
    next_buffer_id: u64,
}

impl MemoryManager {
    pub fn new() -> Self {
        Self {
            buffers: HashMap::new(),
            next_buffer_id: 1,
        }
    }

    /// Allocate a zeroed buffer, or one initialized from `host_data`
    pub fn allocate_buffer(
        &mut self,
        context: ContextHandle,
        flags: MemFlags,
        size: usize,
        host_data: Option<&[u8]>,
    ) -> Result<MemHandle> {
        if size == 0 {
            return Err(RuntimeError::InvalidBuffer("size must be non-zero".to_string()));
        }

        let data = match (flags.copy_host_ptr, host_data) {
            (true, Some(host)) if host.len() == size => host.to_vec(),
            (true, Some(host)) => {
                return Err(RuntimeError::InvalidBuffer(format!(
                    "host data is {} bytes, buffer size is {size}",
                    host.len()
                )))
            }
            (true, None) => {
                return Err(RuntimeError::InvalidBuffer(
                    "copy-from-host requested without host data".to_string(),
                ))
            }
            (false, Some(_)) => {
                return Err(RuntimeError::InvalidBuffer(
                    "host data given without copy-from-host".to_string(),
                ))
            }
            (false, None) => vec![0u8; size],
        };

        let id = self.next_buffer_id;
        self.next_buffer_id += 1;
        self.buffers.insert(id, Buffer { data, flags, context });
        Ok(MemHandle(id))
    }

    /// Free a buffer
    pub fn free_buffer(&mut self, handle: MemHandle) -> Result<()> {
        self.buffers
            .remove(&handle.id())
            .map(|_| ())
            .ok_or_else(|| RuntimeError::invalid_handle("mem", handle.id()))
    }

    fn buffer(&self, handle: MemHandle) -> Result<&Buffer> {
        self.buffers
            .get(&handle.id())
            .ok_or_else(|| RuntimeError::invalid_handle("mem", handle.id()))
    }

    fn buffer_mut(&mut self, handle: MemHandle) -> Result<&mut Buffer> {
        self.buffers
            .get_mut(&handle.id())
            .ok_or_else(|| RuntimeError::invalid_handle("mem", handle.id()))
    }

    /// Buffer size in bytes
    pub fn buffer_size(&self, handle: MemHandle) -> Result<usize> {
        Ok(self.buffer(handle)?.data.len())
    }

    /// Access flags of a buffer
    pub fn buffer_flags(&self, handle: MemHandle) -> Result<MemFlags> {
        Ok(self.buffer(handle)?.flags)
    }

    /// Context a buffer was created in
    pub fn buffer_context(&self, handle: MemHandle) -> Result<ContextHandle> {
        Ok(self.buffer(handle)?.context)
    }

    /// Number of live buffers created in `context`
    pub fn buffers_in_context(&self, context: ContextHandle) -> usize {
        self.buffers.values().filter(|b| b.context == context).count()
    }

    // ============================================================================================
    // Host Transfers
    // ============================================================================================

    /// Copy host data into a buffer at byte `offset`
    pub fn copy_to_buffer(&mut self, handle: MemHandle, offset: usize, data: &[u8]) -> Result<()> {
        let buffer = self.buffer_mut(handle)?;
        let range = checked_range(offset, data.len(), buffer.data.len())?;
        buffer.data[range].copy_from_slice(data);
        Ok(())
    }

    /// Copy buffer bytes at `offset` into `dst`
    pub fn copy_from_buffer(&self, handle: MemHandle, offset: usize, dst: &mut [u8]) -> Result<()> {
        let buffer = self.buffer(handle)?;
        let range = checked_range(offset, dst.len(), buffer.data.len())?;
        dst.copy_from_slice(&buffer.data[range]);
        Ok(())
    }

    // ============================================================================================
    // Element Access
    // ============================================================================================

    /// Load element `index` of type `ty`
    ///
    /// `index` is the raw register value; negative values (or huge unsigned
    /// ones) are out of bounds.
    pub fn load_element(&self, handle: MemHandle, ty: Type, index: i64) -> Result<i64> {
        let buffer = self.buffer(handle)?;
        let range = element_range(ty, index, buffer.data.len())?;
        Ok(ty.decode(&buffer.data[range]))
    }

    /// Store `value` as element `index` of type `ty`
    pub fn store_element(&mut self, handle: MemHandle, ty: Type, index: i64, value: i64) -> Result<()> {
        let buffer = self.buffer_mut(handle)?;
        let range = element_range(ty, index, buffer.data.len())?;
        ty.encode(value, &mut buffer.data[range]);
        Ok(())
    }
}

impl Default for MemoryManager {
    fn default() -> Self {
        Self::new()
    }
}

fn checked_range(offset: usize, size: usize, buffer_size: usize) -> Result<std::ops::Range<usize>> {
    match offset.checked_add(size) {
        Some(end) if end <= buffer_size => Ok(offset..end),
        _ => Err(RuntimeError::BufferOutOfBounds {
            offset,
            size,
            buffer_size,
        }),
    }
}

fn element_range(ty: Type, index: i64, buffer_size: usize) -> Result<std::ops::Range<usize>> {
    let size = ty.size_bytes();
    let offset = usize::try_from(index)
        .ok()
        .and_then(|i| i.checked_mul(size))
        .ok_or(RuntimeError::BufferOutOfBounds {
            offset: index as u64 as usize,
            size,
            buffer_size,
        })?;
    checked_range(offset, size, buffer_size)
}
