//! File-system-related syscalls: open, mknod, mkdir, unlink, link,
//! pipe and exec. Kept apart from [`crate::syscall`] because each of
//! these has to walk the directory tree or juggle file descriptors,
//! unlike the one-liners over there.

use crate::{
    arch::riscv::PGSIZE,
    exec,
    fs::{
        file::{self, File, FileKind},
        inode::{ilock, iput, iunlock, iunlockput, itrunc, iupdate, readi, writei, Inode},
        log::LogOperation,
        path::{create, dirlink, dirlookup, namei, nameiparent},
        stat::{KIND_DEVICE, KIND_DIR, KIND_FILE},
        DirectoryEntry, DIRSIZ,
    },
    io::pipe,
    mem::{
        kalloc::{kalloc, kfree},
        virtual_memory::copyout,
    },
    proc::myproc,
    syscall::{argaddr, argint, argstr, fdalloc, fetchaddr, fetchstr},
    MAXARG, MAXPATH, NDEV,
};
use core::ptr::{addr_of_mut, null_mut};

const O_RDONLY: i32 = 0x000;
const O_WRONLY: i32 = 0x001;
const O_RDWR: i32 = 0x002;
const O_CREATE: i32 = 0x200;
const O_TRUNC: i32 = 0x400;

fn is_dot(name: &[u8; DIRSIZ]) -> bool {
    name[0] == b'.' && name[1] == 0
}

fn is_dotdot(name: &[u8; DIRSIZ]) -> bool {
    name[0] == b'.' && name[1] == b'.' && name[2] == 0
}

/// Is the directory `ip` (locked) empty, apart from `.` and `..`?
unsafe fn isdirempty(ip: &mut Inode) -> bool {
    let entry_size = core::mem::size_of::<DirectoryEntry>() as u32;
    let mut off = 2 * entry_size;
    let mut entry = DirectoryEntry {
        inum: 0,
        name: [0; DIRSIZ],
    };
    while off < ip.size {
        if readi(ip, false, addr_of_mut!(entry) as u64, off, entry_size) as u32 != entry_size {
            panic!("isdirempty: readi");
        }
        if entry.inum != 0 {
            return false;
        }
        off += entry_size;
    }
    true
}

pub unsafe fn sys_open() -> u64 {
    let mut path = [0u8; MAXPATH];
    let mut omode = 0i32;

    if argstr(0, addr_of_mut!(path).cast(), path.len() as i32) < 0 {
        return -1i64 as u64;
    }
    argint(1, addr_of_mut!(omode));

    let operation = LogOperation::new();

    let ip;
    if omode & O_CREATE != 0 {
        ip = create(path.as_mut_ptr(), KIND_FILE, 0, 0);
        if ip.is_null() {
            return -1i64 as u64;
        }
    } else {
        ip = namei(path.as_mut_ptr());
        if ip.is_null() {
            return -1i64 as u64;
        }
        ilock(ip);
        if (*ip).kind == KIND_DIR && omode != O_RDONLY {
            iunlockput(ip);
            return -1i64 as u64;
        }
    }

    if (*ip).kind == KIND_DEVICE && ((*ip).major < 0 || (*ip).major as usize >= NDEV) {
        iunlockput(ip);
        return -1i64 as u64;
    }

    let f = file::filealloc();
    if f.is_null() {
        iunlockput(ip);
        return -1i64 as u64;
    }
    let fd = match fdalloc(f) {
        Ok(fd) => fd,
        Err(()) => {
            file::fileclose(f);
            iunlockput(ip);
            return -1i64 as u64;
        }
    };

    if (*ip).kind == KIND_DEVICE {
        (*f).kind = FileKind::Device;
        (*f).major = (*ip).major;
    } else {
        (*f).kind = FileKind::Inode;
        (*f).off = 0;
    }
    (*f).ip = ip;
    (*f).readable = omode & O_WRONLY == 0;
    (*f).writable = omode & O_WRONLY != 0 || omode & O_RDWR != 0;

    if omode & O_TRUNC != 0 && (*ip).kind == KIND_FILE {
        itrunc(&mut *ip);
    }

    iunlock(ip);
    drop(operation);

    fd as u64
}

pub unsafe fn sys_mkdir() -> u64 {
    let mut path = [0u8; MAXPATH];
    let operation = LogOperation::new();

    if argstr(0, addr_of_mut!(path).cast(), path.len() as i32) < 0 {
        return -1i64 as u64;
    }

    let ip = create(path.as_mut_ptr(), KIND_DIR, 0, 0);
    if ip.is_null() {
        return -1i64 as u64;
    }
    iunlockput(ip);
    drop(operation);
    0
}

pub unsafe fn sys_mknod() -> u64 {
    let mut path = [0u8; MAXPATH];
    let mut major = 0i32;
    let mut minor = 0i32;
    let operation = LogOperation::new();

    if argstr(0, addr_of_mut!(path).cast(), path.len() as i32) < 0 {
        return -1i64 as u64;
    }
    argint(1, addr_of_mut!(major));
    argint(2, addr_of_mut!(minor));

    let ip = create(path.as_mut_ptr(), KIND_DEVICE, major as i16, minor as i16);
    if ip.is_null() {
        return -1i64 as u64;
    }
    iunlockput(ip);
    drop(operation);
    0
}

pub unsafe fn sys_unlink() -> u64 {
    let mut path = [0u8; MAXPATH];
    let mut name = [0u8; DIRSIZ];
    let mut off = 0u32;

    if argstr(0, addr_of_mut!(path).cast(), path.len() as i32) < 0 {
        return -1i64 as u64;
    }

    let operation = LogOperation::new();

    let dp = nameiparent(path.as_mut_ptr(), &mut name);
    if dp.is_null() {
        return -1i64 as u64;
    }

    ilock(dp);

    if is_dot(&name) || is_dotdot(&name) {
        iunlockput(dp);
        return -1i64 as u64;
    }

    let ip = dirlookup(&mut *dp, &name, Some(&mut off));
    if ip.is_null() {
        iunlockput(dp);
        return -1i64 as u64;
    }
    ilock(ip);

    if (*ip).num_links < 1 {
        panic!("sys_unlink: nlink < 1");
    }
    if (*ip).kind == KIND_DIR && !isdirempty(&mut *ip) {
        iunlockput(ip);
        iunlockput(dp);
        return -1i64 as u64;
    }

    let entry_size = core::mem::size_of::<DirectoryEntry>() as u32;
    let empty = DirectoryEntry {
        inum: 0,
        name: [0; DIRSIZ],
    };
    if writei(
        &mut *dp,
        false,
        &empty as *const DirectoryEntry as u64,
        off,
        entry_size,
    ) != entry_size as i32
    {
        panic!("sys_unlink: writei");
    }

    if (*ip).kind == KIND_DIR {
        (*dp).num_links -= 1;
        iupdate(&mut *dp);
    }
    iunlockput(dp);

    (*ip).num_links -= 1;
    iupdate(&mut *ip);
    iunlockput(ip);

    drop(operation);
    0
}

pub unsafe fn sys_link() -> u64 {
    let mut old = [0u8; MAXPATH];
    let mut new = [0u8; MAXPATH];

    if argstr(0, addr_of_mut!(old).cast(), old.len() as i32) < 0
        || argstr(1, addr_of_mut!(new).cast(), new.len() as i32) < 0
    {
        return -1i64 as u64;
    }

    let operation = LogOperation::new();

    let ip = namei(old.as_mut_ptr());
    if ip.is_null() {
        return -1i64 as u64;
    }

    ilock(ip);
    if (*ip).kind == KIND_DIR {
        iunlockput(ip);
        return -1i64 as u64;
    }

    (*ip).num_links += 1;
    iupdate(&mut *ip);
    iunlock(ip);

    let mut name = [0u8; DIRSIZ];
    let dp = nameiparent(new.as_mut_ptr(), &mut name);
    let linked = if dp.is_null() {
        false
    } else {
        ilock(dp);
        let ok = (*dp).device == (*ip).device && dirlink(&mut *dp, &name, (*ip).inum) >= 0;
        iunlockput(dp);
        ok
    };

    if !linked {
        ilock(ip);
        (*ip).num_links -= 1;
        iupdate(&mut *ip);
        iunlockput(ip);
        return -1i64 as u64;
    }

    iput(ip);
    drop(operation);
    0
}

pub unsafe fn sys_pipe() -> u64 {
    let p = myproc();
    let mut fdarray = 0u64;
    argaddr(0, addr_of_mut!(fdarray));

    let mut rf: *mut File = null_mut();
    let mut wf: *mut File = null_mut();
    if pipe::pipealloc(&mut rf, &mut wf) < 0 {
        return -1i64 as u64;
    }

    let fd0 = match fdalloc(rf) {
        Ok(fd) => fd,
        Err(()) => {
            file::fileclose(rf);
            file::fileclose(wf);
            return -1i64 as u64;
        }
    };
    let fd1 = match fdalloc(wf) {
        Ok(fd) => fd,
        Err(()) => {
            (*p).ofile[fd0] = null_mut();
            file::fileclose(rf);
            file::fileclose(wf);
            return -1i64 as u64;
        }
    };

    let mut fd0_out = fd0 as i32;
    let mut fd1_out = fd1 as i32;
    if copyout(
        (*p).pagetable,
        fdarray,
        addr_of_mut!(fd0_out).cast::<u8>(),
        core::mem::size_of::<i32>() as u64,
    ) < 0
        || copyout(
            (*p).pagetable,
            fdarray + core::mem::size_of::<i32>() as u64,
            addr_of_mut!(fd1_out).cast::<u8>(),
            core::mem::size_of::<i32>() as u64,
        ) < 0
    {
        (*p).ofile[fd0] = null_mut();
        (*p).ofile[fd1] = null_mut();
        file::fileclose(rf);
        file::fileclose(wf);
        return -1i64 as u64;
    }

    0
}

pub unsafe fn sys_exec() -> u64 {
    let mut path = [0u8; MAXPATH];
    let mut argv: [*mut u8; MAXARG] = [null_mut(); MAXARG];

    if argstr(0, addr_of_mut!(path).cast(), path.len() as i32) < 0 {
        return -1i64 as u64;
    }

    let mut uargv = 0u64;
    argaddr(1, addr_of_mut!(uargv));

    let mut argc = 0usize;
    let mut ok = true;
    loop {
        if argc >= MAXARG {
            ok = false;
            break;
        }
        let mut uarg = 0u64;
        if fetchaddr(uargv + (argc * core::mem::size_of::<u64>()) as u64, addr_of_mut!(uarg)) < 0 {
            ok = false;
            break;
        }
        if uarg == 0 {
            break;
        }
        let mem = kalloc();
        if mem.is_null() {
            ok = false;
            break;
        }
        argv[argc] = mem.cast();
        if fetchstr(uarg, argv[argc], PGSIZE as i32) < 0 {
            ok = false;
            break;
        }
        argc += 1;
    }

    let ret = if ok {
        exec::exec(path.as_mut_ptr(), &argv[..argc]) as i64 as u64
    } else {
        -1i64 as u64
    };

    for &slot in argv.iter().take(argc) {
        if !slot.is_null() {
            kfree(slot);
        }
    }

    ret
}
