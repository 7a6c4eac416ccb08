//! Virtio MMIO block device driver.
//!
//! Only tested against qemu's `virtio-blk-device`. Issues one disk request
//! at a time: `read`/`write` queue a descriptor chain, kick the device, and
//! sleep on the buffer's address until `intr` observes the matching entry in
//! the used ring and wakes the caller back up.
//!
//! The virtio spec: <https://docs.oasis-open.org/virtio/virtio/v1.1/virtio-v1.1.pdf>

use crate::{
    arch::riscv::memlayout::VIRTIO0,
    io::buf::Buffer,
    mem::{kalloc::kalloc, memset},
    proc, println,
    sync::spinlock::Spinlock,
};
use core::ptr::{addr_of, addr_of_mut};

const MMIO_MAGIC_VALUE: usize = 0x000;
const MMIO_VERSION: usize = 0x004;
const MMIO_DEVICE_ID: usize = 0x008;
const MMIO_VENDOR_ID: usize = 0x00c;
const MMIO_DEVICE_FEATURES: usize = 0x010;
const MMIO_DRIVER_FEATURES: usize = 0x020;
const MMIO_QUEUE_SEL: usize = 0x030;
const MMIO_QUEUE_NUM_MAX: usize = 0x034;
const MMIO_QUEUE_NUM: usize = 0x038;
const MMIO_QUEUE_READY: usize = 0x044;
const MMIO_QUEUE_NOTIFY: usize = 0x050;
const MMIO_INTERRUPT_STATUS: usize = 0x060;
const MMIO_INTERRUPT_ACK: usize = 0x064;
const MMIO_STATUS: usize = 0x070;
const MMIO_QUEUE_DESC_LOW: usize = 0x080;
const MMIO_QUEUE_DESC_HIGH: usize = 0x084;
const MMIO_DRIVER_DESC_LOW: usize = 0x090;
const MMIO_DRIVER_DESC_HIGH: usize = 0x094;
const MMIO_DEVICE_DESC_LOW: usize = 0x0a0;
const MMIO_DEVICE_DESC_HIGH: usize = 0x0a4;

const CONFIG_S_ACKNOWLEDGE: u32 = 1;
const CONFIG_S_DRIVER: u32 = 2;
const CONFIG_S_DRIVER_OK: u32 = 4;
const CONFIG_S_FEATURES_OK: u32 = 8;

const BLK_F_RO: u32 = 1 << 5;
const BLK_F_SCSI: u32 = 1 << 7;
const BLK_F_CONFIG_WCE: u32 = 1 << 11;
const BLK_F_MQ: u32 = 1 << 12;
const F_ANY_LAYOUT: u32 = 1 << 27;
const RING_F_INDIRECT_DESC: u32 = 1 << 28;
const RING_F_EVENT_IDX: u32 = 1 << 29;

pub const NUM_DESCRIPTORS: usize = 8;

unsafe fn reg(offset: usize) -> *mut u32 {
    (VIRTIO0 + offset) as *mut u32
}
unsafe fn read_reg(offset: usize) -> u32 {
    reg(offset).read_volatile()
}
unsafe fn write_reg(offset: usize, value: u32) {
    reg(offset).write_volatile(value)
}

const VRING_DESC_F_NEXT: u16 = 1;
const VRING_DESC_F_WRITE: u16 = 2;

#[repr(C)]
struct VirtqDesc {
    addr: u64,
    len: u32,
    flags: u16,
    next: u16,
}

#[repr(C)]
struct VirtqAvail {
    flags: u16,
    idx: u16,
    ring: [u16; NUM_DESCRIPTORS],
    unused: u16,
}

#[repr(C)]
struct VirtqUsedElem {
    id: u32,
    len: u32,
}

#[repr(C)]
struct VirtqUsed {
    flags: u16,
    idx: u16,
    ring: [VirtqUsedElem; NUM_DESCRIPTORS],
}

const BLK_T_IN: u32 = 0;
const BLK_T_OUT: u32 = 1;

#[repr(C)]
struct BlockRequest {
    kind: u32,
    reserved: u32,
    sector: u64,
}

struct InFlight {
    buf: *mut Buffer,
    status: u8,
}

struct Disk {
    desc: *mut VirtqDesc,
    avail: *mut VirtqAvail,
    used: *mut VirtqUsed,
    free: [bool; NUM_DESCRIPTORS],
    used_idx: u16,
    info: [InFlight; NUM_DESCRIPTORS],
    ops: [BlockRequest; NUM_DESCRIPTORS],
    lock: Spinlock,
}

const fn empty_req() -> BlockRequest {
    BlockRequest {
        kind: 0,
        reserved: 0,
        sector: 0,
    }
}
const fn empty_inflight() -> InFlight {
    InFlight {
        buf: core::ptr::null_mut(),
        status: 0xff,
    }
}

static mut DISK: Disk = Disk {
    desc: core::ptr::null_mut(),
    avail: core::ptr::null_mut(),
    used: core::ptr::null_mut(),
    free: [false; NUM_DESCRIPTORS],
    used_idx: 0,
    info: [empty_inflight(); NUM_DESCRIPTORS],
    ops: [empty_req(); NUM_DESCRIPTORS],
    lock: Spinlock::new(),
};

impl Clone for InFlight {
    fn clone(&self) -> InFlight {
        InFlight {
            buf: self.buf,
            status: self.status,
        }
    }
}
impl Copy for InFlight {}
impl Clone for BlockRequest {
    fn clone(&self) -> BlockRequest {
        BlockRequest {
            kind: self.kind,
            reserved: self.reserved,
            sector: self.sector,
        }
    }
}
impl Copy for BlockRequest {}

pub unsafe fn init() {
    if read_reg(MMIO_MAGIC_VALUE) != 0x74726976
        || read_reg(MMIO_VERSION) != 2
        || read_reg(MMIO_DEVICE_ID) != 2
        || read_reg(MMIO_VENDOR_ID) != 0x554d4551
    {
        panic!("could not find virtio disk");
    }

    let mut status = 0u32;
    write_reg(MMIO_STATUS, status);

    status |= CONFIG_S_ACKNOWLEDGE;
    write_reg(MMIO_STATUS, status);

    status |= CONFIG_S_DRIVER;
    write_reg(MMIO_STATUS, status);

    // Negotiate features.
    let mut features = read_reg(MMIO_DEVICE_FEATURES);
    features &= !(1 << BLK_F_RO);
    features &= !(1 << BLK_F_SCSI);
    features &= !(1 << BLK_F_CONFIG_WCE);
    features &= !(1 << BLK_F_MQ);
    features &= !(1 << F_ANY_LAYOUT);
    features &= !(1 << RING_F_EVENT_IDX);
    features &= !(1 << RING_F_INDIRECT_DESC);
    write_reg(MMIO_DRIVER_FEATURES, features);

    status |= CONFIG_S_FEATURES_OK;
    write_reg(MMIO_STATUS, status);

    status = read_reg(MMIO_STATUS);
    if status & CONFIG_S_FEATURES_OK == 0 {
        panic!("virtio disk did not accept features");
    }

    status |= CONFIG_S_DRIVER_OK;
    write_reg(MMIO_STATUS, status);

    write_reg(MMIO_QUEUE_SEL, 0);

    if read_reg(MMIO_QUEUE_READY) != 0 {
        panic!("virtio disk should not be ready");
    }

    let max = read_reg(MMIO_QUEUE_NUM_MAX);
    if max == 0 {
        panic!("virtio disk has no queue 0");
    }
    if (max as usize) < NUM_DESCRIPTORS {
        panic!("virtio disk max queue too short");
    }

    DISK.desc = kalloc().cast();
    DISK.avail = kalloc().cast();
    DISK.used = kalloc().cast();
    if DISK.desc.is_null() || DISK.avail.is_null() || DISK.used.is_null() {
        panic!("virtio disk kalloc");
    }
    memset(DISK.desc.cast(), 0, 4096);
    memset(DISK.avail.cast(), 0, 4096);
    memset(DISK.used.cast(), 0, 4096);

    write_reg(MMIO_QUEUE_NUM, NUM_DESCRIPTORS as u32);

    write_reg(MMIO_QUEUE_DESC_LOW, DISK.desc as u64 as u32);
    write_reg(MMIO_QUEUE_DESC_HIGH, (DISK.desc as u64 >> 32) as u32);
    write_reg(MMIO_DRIVER_DESC_LOW, DISK.avail as u64 as u32);
    write_reg(MMIO_DRIVER_DESC_HIGH, (DISK.avail as u64 >> 32) as u32);
    write_reg(MMIO_DEVICE_DESC_LOW, DISK.used as u64 as u32);
    write_reg(MMIO_DEVICE_DESC_HIGH, (DISK.used as u64 >> 32) as u32);

    write_reg(MMIO_QUEUE_READY, 1);

    for b in DISK.free.iter_mut() {
        *b = true;
    }
}

unsafe fn alloc_desc() -> Option<usize> {
    for (i, free) in DISK.free.iter_mut().enumerate() {
        if *free {
            *free = false;
            return Some(i);
        }
    }
    None
}
unsafe fn free_desc(i: usize) {
    (*DISK.desc.add(i)) = VirtqDesc {
        addr: 0,
        len: 0,
        flags: 0,
        next: 0,
    };
    DISK.free[i] = true;
    proc::wakeup(addr_of!(DISK.free).cast());
}
unsafe fn free_chain(mut i: usize) {
    loop {
        let d = &*DISK.desc.add(i);
        let has_next = d.flags & VRING_DESC_F_NEXT != 0;
        let next = d.next;
        free_desc(i);
        if has_next {
            i = next as usize;
        } else {
            break;
        }
    }
}
unsafe fn alloc3_desc() -> Option<[usize; 3]> {
    let mut idx = [0usize; 3];
    for slot in idx.iter_mut() {
        match alloc_desc() {
            Some(i) => *slot = i,
            None => {
                for &prev in idx.iter().take_while(|&&x| x != *slot) {
                    free_desc(prev);
                }
                return None;
            }
        }
    }
    Some(idx)
}

/// Read block `buf.blockno()` into `buf`.
pub unsafe fn read(buf: &mut Buffer) {
    rw(buf, false);
}
/// Write `buf`'s contents to block `buf.blockno()`.
pub unsafe fn write(buf: &mut Buffer) {
    rw(buf, true);
}

unsafe fn rw(b: &mut Buffer, is_write: bool) {
    let sector = (b.blockno as u64) * (crate::fs::BSIZE as u64 / 512);

    let guard = DISK.lock.lock();

    let idx = loop {
        if let Some(idx) = alloc3_desc() {
            break idx;
        }
        guard.sleep(addr_of!(DISK.free).cast_mut().cast());
    };

    let op = &mut DISK.ops[idx[0]];
    op.kind = if is_write { BLK_T_OUT } else { BLK_T_IN };
    op.reserved = 0;
    op.sector = sector;

    let d0 = &mut *DISK.desc.add(idx[0]);
    d0.addr = addr_of!(*op) as u64;
    d0.len = core::mem::size_of::<BlockRequest>() as u32;
    d0.flags = VRING_DESC_F_NEXT;
    d0.next = idx[1] as u16;

    let d1 = &mut *DISK.desc.add(idx[1]);
    d1.addr = addr_of!(b.data) as u64;
    d1.len = crate::fs::BSIZE;
    d1.flags = if is_write { 0 } else { VRING_DESC_F_WRITE };
    d1.flags |= VRING_DESC_F_NEXT;
    d1.next = idx[2] as u16;

    DISK.info[idx[0]] = InFlight {
        buf: b as *mut Buffer,
        status: 0xff,
    };
    let status_addr = addr_of_mut!(DISK.info[idx[0]].status);

    let d2 = &mut *DISK.desc.add(idx[2]);
    d2.addr = status_addr as u64;
    d2.len = 1;
    d2.flags = VRING_DESC_F_WRITE;
    d2.next = 0;

    b.disk = true;

    let avail = &mut *DISK.avail;
    avail.ring[(avail.idx as usize) % NUM_DESCRIPTORS] = idx[0] as u16;
    core::sync::atomic::fence(core::sync::atomic::Ordering::SeqCst);
    avail.idx = avail.idx.wrapping_add(1);
    core::sync::atomic::fence(core::sync::atomic::Ordering::SeqCst);

    write_reg(MMIO_QUEUE_NOTIFY, 0);

    while b.disk {
        guard.sleep((b as *mut Buffer).cast());
    }
}

pub unsafe fn intr() {
    let _guard = DISK.lock.lock();

    write_reg(MMIO_INTERRUPT_ACK, read_reg(MMIO_INTERRUPT_STATUS) & 0x3);

    core::sync::atomic::fence(core::sync::atomic::Ordering::SeqCst);

    while DISK.used_idx != (*DISK.used).idx {
        core::sync::atomic::fence(core::sync::atomic::Ordering::SeqCst);
        let id = (*DISK.used).ring[(DISK.used_idx as usize) % NUM_DESCRIPTORS].id as usize;

        if DISK.info[id].status != 0 {
            println!("virtio_disk_intr: status {}", DISK.info[id].status);
        }

        let b = &mut *DISK.info[id].buf;
        b.disk = false;
        proc::wakeup((b as *mut Buffer).cast());

        DISK.used_idx = DISK.used_idx.wrapping_add(1);
        free_chain(id);
    }
}
