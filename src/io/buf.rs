//! A single cached disk block.

use crate::{fs::BSIZE, sync::sleeplock::Sleeplock};

#[repr(C)]
pub struct Buffer {
    /// Has data been read from disk?
    pub valid: bool,
    /// Does the disk currently own this buffer (DMA in flight)?
    pub disk: bool,
    pub dev: u32,
    pub blockno: u32,
    pub lock: Sleeplock,
    pub refcnt: u32,
    /// Tick this buffer was last released at, used to pick an
    /// eviction candidate among unreferenced buffers.
    pub last_used: u64,
    pub data: [u8; BSIZE as usize],
}
impl Buffer {
    pub const fn new() -> Buffer {
        Buffer {
            valid: false,
            disk: false,
            dev: 0,
            blockno: 0,
            lock: Sleeplock::new(),
            refcnt: 0,
            last_used: 0,
            data: [0u8; BSIZE as usize],
        }
    }
}
