//! ELF program loading for the `exec` syscall.

use crate::{
    arch::riscv::{
        memlayout::{TRAMPOLINE, TRAPFRAME},
        pg_round_up, Pagetable, PGSIZE, PTE_R, PTE_W, PTE_X,
    },
    fs::{
        inode::{ilock, iunlockput, readi},
        log::LogOperation,
        path::namei,
        Inode,
    },
    mem::virtual_memory::{
        copyout, mappages, trampoline, uvmalloc, uvmclear, uvmcreate, uvmfree, uvmunmap, walkaddr,
    },
    proc::process::Process,
    string::strlen,
    MAXARG,
};
use core::ptr::addr_of_mut;

/// ELF magic number: `"\x7fELF"` in little-endian.
const ELF_MAGIC: u32 = 0x464c457f;

#[repr(C)]
#[derive(Copy, Clone, Default)]
struct ElfHeader {
    magic: u32,
    elf: [u8; 12],
    kind: u16,
    machine: u16,
    version: u32,
    entry: u64,
    phoff: u64,
    shoff: u64,
    flags: u32,
    ehsize: u16,
    phentsize: u16,
    phnum: u16,
    shentsize: u16,
    shnum: u16,
    shstrndx: u16,
}

const PROG_LOAD: u32 = 1;

#[repr(C)]
#[derive(Copy, Clone, Default)]
struct ProgramHeader {
    kind: u32,
    flags: u32,
    off: u64,
    vaddr: u64,
    paddr: u64,
    filesz: u64,
    memsz: u64,
    align: u64,
}

const PROG_FLAG_EXEC: u32 = 1;
const PROG_FLAG_WRITE: u32 = 2;

fn flags2perm(flags: u32) -> i32 {
    let mut perm = 0;
    if flags & PROG_FLAG_EXEC != 0 {
        perm |= PTE_X;
    }
    if flags & PROG_FLAG_WRITE != 0 {
        perm |= PTE_W;
    }
    perm
}

/// Load a program segment into `pagetable` at `vaddr`, reading `filesz`
/// bytes starting at `offset` in `ip`. `vaddr` must already be mapped by
/// a prior [`uvmalloc`] and must be page-aligned.
unsafe fn loadseg(
    pagetable: Pagetable,
    vaddr: u64,
    ip: &mut Inode,
    offset: u32,
    filesz: u32,
) -> Result<(), ()> {
    let mut i = 0u32;
    while i < filesz {
        let pa = walkaddr(pagetable, vaddr + i as u64);
        if pa == 0 {
            return Err(());
        }
        let n = core::cmp::min(filesz - i, PGSIZE as u32);
        if readi(ip, false, pa, offset + i, n) as u32 != n {
            return Err(());
        }
        i += n;
    }
    Ok(())
}

/// Build a fresh, otherwise-empty user pagetable with the trampoline and
/// trapframe pages mapped in, the same way [`Process::alloc_pagetable`]
/// does for a brand new process.
unsafe fn exec_pagetable(p: &mut Process) -> Pagetable {
    let pagetable = uvmcreate();
    if pagetable.is_null() {
        return pagetable;
    }

    if mappages(
        pagetable,
        TRAMPOLINE,
        PGSIZE,
        core::ptr::addr_of!(trampoline) as usize as u64,
        PTE_R | PTE_X,
    ) < 0
    {
        uvmfree(pagetable, 0);
        return core::ptr::null_mut();
    }
    if mappages(
        pagetable,
        TRAPFRAME,
        PGSIZE,
        p.trapframe as usize as u64,
        PTE_R | PTE_W,
    ) < 0
    {
        uvmunmap(pagetable, TRAMPOLINE, 1, 0);
        uvmfree(pagetable, 0);
        return core::ptr::null_mut();
    }

    pagetable
}

/// Replace the calling process's image with the program at `path`,
/// passing `argv` (kernel pointers to null-terminated strings) as its
/// argument vector. Returns the argument count (delivered to the caller
/// via `a0`) on success, or -1 on failure, in which case the caller's
/// original image is left untouched.
pub unsafe fn exec(path: *mut u8, argv: &[*mut u8]) -> i32 {
    if argv.len() > MAXARG {
        return -1;
    }

    let p = Process::current().unwrap();
    let operation = LogOperation::new();

    let ip = namei(path);
    if ip.is_null() {
        return -1;
    }
    ilock(ip);

    let mut elf = ElfHeader::default();
    let header_size = core::mem::size_of::<ElfHeader>() as u32;
    if readi(&mut *ip, false, addr_of_mut!(elf) as u64, 0, header_size) as u32 != header_size
        || elf.magic != ELF_MAGIC
    {
        iunlockput(ip);
        return -1;
    }

    let pagetable = exec_pagetable(p);
    if pagetable.is_null() {
        iunlockput(ip);
        return -1;
    }

    let loaded = load_segments(pagetable, &mut *ip, &elf);
    let mut sz = match loaded {
        Ok(sz) => sz,
        Err(()) => {
            Process::free_pagetable(pagetable, 0);
            iunlockput(ip);
            return -1;
        }
    };

    iunlockput(ip);
    drop(operation);

    let old_sz = p.sz;

    // Two pages at the next boundary: a stack guard page, then the stack.
    sz = pg_round_up(sz);
    let new_sz = uvmalloc(pagetable, sz, sz + 2 * PGSIZE, PTE_W);
    if new_sz == 0 {
        Process::free_pagetable(pagetable, sz as usize);
        return -1;
    }
    sz = new_sz;
    uvmclear(pagetable, sz - 2 * PGSIZE);
    let mut sp = sz;
    let stackbase = sp - PGSIZE;

    let mut ustack = [0u64; MAXARG + 1];
    for (i, &arg) in argv.iter().enumerate() {
        let len = strlen(arg.cast()) as u64 + 1;
        sp -= len;
        sp -= sp % 16;
        if sp < stackbase || copyout(pagetable, sp, arg, len) < 0 {
            Process::free_pagetable(pagetable, sz as usize);
            return -1;
        }
        ustack[i] = sp;
    }
    ustack[argv.len()] = 0;

    let argv_bytes = (argv.len() as u64 + 1) * core::mem::size_of::<u64>() as u64;
    sp -= argv_bytes;
    sp -= sp % 16;
    if sp < stackbase || copyout(pagetable, sp, ustack.as_mut_ptr().cast(), argv_bytes) < 0 {
        Process::free_pagetable(pagetable, sz as usize);
        return -1;
    }

    // a1 carries argv to main(); a0 (argc) is the return value of this function.
    (*p.trapframe).a1 = sp;

    let path_cstr = core::ffi::CStr::from_ptr(path.cast());
    let last = path_cstr
        .to_bytes()
        .rsplit(|&c| c == b'/')
        .next()
        .unwrap_or(path_cstr.to_bytes());
    p.set_name(last);

    let old_pagetable = p.pagetable;
    p.pagetable = pagetable;
    p.sz = sz;
    (*p.trapframe).epc = elf.entry;
    (*p.trapframe).sp = sp;

    Process::free_pagetable(old_pagetable, old_sz as usize);

    argv.len() as i32
}

/// Walk the program headers, mapping and loading each `PT_LOAD` segment.
/// Returns the process size implied by the highest segment on success.
unsafe fn load_segments(pagetable: Pagetable, ip: &mut Inode, elf: &ElfHeader) -> Result<u64, ()> {
    let mut sz = 0u64;
    let mut off = elf.phoff;
    let ph_size = core::mem::size_of::<ProgramHeader>() as u32;

    for _ in 0..elf.phnum {
        let mut ph = ProgramHeader::default();
        if readi(ip, false, addr_of_mut!(ph) as u64, off as u32, ph_size) as u32 != ph_size {
            return Err(());
        }
        off += ph_size as u64;

        if ph.kind != PROG_LOAD {
            continue;
        }
        if ph.memsz < ph.filesz || ph.vaddr.checked_add(ph.memsz).is_none() || ph.vaddr % PGSIZE != 0 {
            return Err(());
        }

        let new_sz = uvmalloc(pagetable, sz, ph.vaddr + ph.memsz, flags2perm(ph.flags));
        if new_sz == 0 {
            return Err(());
        }
        sz = new_sz;

        loadseg(pagetable, ph.vaddr, ip, ph.off as u32, ph.filesz as u32)?;
    }

    Ok(sz)
}
