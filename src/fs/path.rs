//! Path name parsing and directory lookup, layered on top of the inode
//! cache. Paths are evaluated element by element, dropping a reference
//! to each directory as soon as the next is locked (mirrors how a
//! single process can hold only one inode lock at a time).

use super::{
    inode::{iget, ilock, iunlock, iunlockput, Inode},
    DirectoryEntry, DIRSIZ,
};
use crate::proc::process::Process;

/// Copy the next path element into `name`, returning the remainder of
/// the path. Skips leading slashes. Returns `None` once `path` is
/// empty, leaving `name` untouched.
fn skipelem<'p>(mut path: &'p [u8], name: &mut [u8; DIRSIZ]) -> Option<&'p [u8]> {
    while path.first() == Some(&b'/') {
        path = &path[1..];
    }
    if path.is_empty() {
        return None;
    }

    let end = path.iter().position(|&c| c == b'/').unwrap_or(path.len());
    let len = core::cmp::min(end, DIRSIZ);
    name.fill(0);
    name[..len].copy_from_slice(&path[..len]);

    let mut rest = &path[end..];
    while rest.first() == Some(&b'/') {
        rest = &rest[1..];
    }
    Some(rest)
}

fn namecmp(name: &[u8; DIRSIZ], entry: &[u8; DIRSIZ]) -> bool {
    name == entry
}

/// Look for a directory entry named `name` in directory `dp`.
/// Returns the matching inode (unlocked, referenced) and, if `poff` is
/// given, the byte offset of its entry within `dp`.
pub unsafe fn dirlookup(dp: &mut Inode, name: &[u8; DIRSIZ], poff: Option<&mut u32>) -> *mut Inode {
    if dp.kind != super::stat::KIND_DIR {
        panic!("dirlookup: not a directory");
    }

    let mut entry = DirectoryEntry {
        inum: 0,
        name: [0; DIRSIZ],
    };
    let entry_size = core::mem::size_of::<DirectoryEntry>() as u32;

    let mut off = 0u32;
    while off < dp.size {
        if super::inode::readi(
            dp,
            false,
            core::ptr::addr_of_mut!(entry) as u64,
            off,
            entry_size,
        ) != entry_size as i32
        {
            panic!("dirlookup: readi");
        }
        if entry.inum != 0 && namecmp(name, &entry.name) {
            if let Some(poff) = poff {
                *poff = off;
            }
            return iget(dp.device, entry.inum as u32);
        }
        off += entry_size;
    }

    core::ptr::null_mut()
}

/// Add a directory entry mapping `name` to `inum` into directory `dp`.
/// Returns -1 if `name` already exists or on I/O error.
pub unsafe fn dirlink(dp: &mut Inode, name: &[u8; DIRSIZ], inum: u32) -> i32 {
    if !dirlookup(dp, name, None).is_null() {
        return -1;
    }

    let entry_size = core::mem::size_of::<DirectoryEntry>() as u32;
    let mut entry = DirectoryEntry {
        inum: 0,
        name: [0; DIRSIZ],
    };
    let mut off = 0u32;
    while off < dp.size {
        if super::inode::readi(
            dp,
            false,
            core::ptr::addr_of_mut!(entry) as u64,
            off,
            entry_size,
        ) != entry_size as i32
        {
            panic!("dirlink: readi");
        }
        if entry.inum == 0 {
            break;
        }
        off += entry_size;
    }

    entry.inum = inum as u16;
    entry.name = *name;
    if super::inode::writei(
        dp,
        false,
        core::ptr::addr_of_mut!(entry) as u64,
        off,
        entry_size,
    ) != entry_size as i32
    {
        return -1;
    }
    0
}

/// Resolve `path`, returning the inode it names (unlocked, referenced),
/// or the parent directory of its last element if `name_out` is given
/// (in which case the last element is copied into `name_out` and the
/// final component is *not* looked up, for callers like create/unlink
/// that need the parent locked to add or remove an entry).
unsafe fn namex(path: &[u8], name_out: Option<&mut [u8; DIRSIZ]>) -> *mut Inode {
    let mut ip = if path.first() == Some(&b'/') {
        iget(crate::param::ROOTDEV as u32, super::ROOTINO)
    } else {
        let cwd = Process::current().unwrap().cwd;
        super::inode::idup(cwd)
    };

    let mut rest = path;
    let mut name = [0u8; DIRSIZ];
    let mut matched_any = false;
    loop {
        let Some(next) = skipelem(rest, &mut name) else {
            break;
        };
        matched_any = true;

        ilock(ip);
        if (*ip).kind != super::stat::KIND_DIR {
            iunlockput(ip);
            return core::ptr::null_mut();
        }

        if name_out.is_some() && next.is_empty() {
            // Stop one level early for nameiparent: caller wants `ip`
            // locked as the parent and `name` left as the final element.
            iunlock(ip);
            break;
        }

        let next_ip = dirlookup(&mut *ip, &name, None);
        iunlockput(ip);
        if next_ip.is_null() {
            return core::ptr::null_mut();
        }
        ip = next_ip;
        rest = next;
    }

    if let Some(name_out) = name_out {
        if !matched_any {
            // nameiparent("/"): the path has no parent to return.
            super::inode::iput(ip);
            return core::ptr::null_mut();
        }
        *name_out = name;
    }
    ip
}

/// Resolve a path to its inode.
pub unsafe fn namei(path: *mut u8) -> *mut Inode {
    let path = core::ffi::CStr::from_ptr(path.cast());
    namex(path.to_bytes(), None)
}

/// Resolve a path to its parent directory, returning the directory's
/// inode and the final path element in `name`.
pub unsafe fn nameiparent(path: *mut u8, name: &mut [u8; DIRSIZ]) -> *mut Inode {
    let path = core::ffi::CStr::from_ptr(path.cast());
    namex(path.to_bytes(), Some(name))
}

/// Find (or create) the inode named by `path`. Used by the create
/// family of syscalls; caller is expected to wrap this in a
/// [`log::LogOperation`](super::log::LogOperation).
pub unsafe fn create(path: *mut u8, kind: i16, major: i16, minor: i16) -> *mut Inode {
    let mut name = [0u8; DIRSIZ];
    let dp = nameiparent(path, &mut name);
    if dp.is_null() {
        return core::ptr::null_mut();
    }
    ilock(dp);

    let existing = dirlookup(&mut *dp, &name, None);
    if !existing.is_null() {
        iunlockput(dp);
        ilock(existing);
        if kind == super::stat::KIND_FILE
            && ((*existing).kind == super::stat::KIND_FILE || (*existing).kind == super::stat::KIND_DEVICE)
        {
            return existing;
        }
        iunlockput(existing);
        return core::ptr::null_mut();
    }

    let ip = super::inode::ialloc((*dp).device, kind);
    if ip.is_null() {
        iunlockput(dp);
        return core::ptr::null_mut();
    }
    ilock(ip);
    (*ip).major = major;
    (*ip).minor = minor;
    (*ip).num_links = 1;
    super::inode::iupdate(&mut *ip);

    if kind == super::stat::KIND_DIR {
        // Create . and .. entries.
        (*dp).num_links += 1;
        super::inode::iupdate(&mut *dp);

        let mut dot = [0u8; DIRSIZ];
        dot[0] = b'.';
        let mut dotdot = [0u8; DIRSIZ];
        dotdot[0] = b'.';
        dotdot[1] = b'.';
        if dirlink(&mut *ip, &dot, (*ip).inum) < 0 || dirlink(&mut *ip, &dotdot, (*dp).inum) < 0 {
            panic!("create: dots");
        }
    }

    if dirlink(&mut *dp, &name, (*ip).inum) < 0 {
        panic!("create: dirlink");
    }

    iunlockput(dp);
    ip
}

#[cfg(test)]
mod tests {
    use super::*;

    fn elem(s: &[u8]) -> [u8; DIRSIZ] {
        let mut name = [0u8; DIRSIZ];
        name[..s.len()].copy_from_slice(s);
        name
    }

    #[test]
    fn skipelem_walks_one_component_at_a_time() {
        let mut name = [0u8; DIRSIZ];
        let rest = skipelem(b"a/bb/ccc", &mut name).unwrap();
        assert_eq!(name, elem(b"a"));
        assert_eq!(rest, b"bb/ccc");

        let rest = skipelem(rest, &mut name).unwrap();
        assert_eq!(name, elem(b"bb"));
        assert_eq!(rest, b"ccc");

        let rest = skipelem(rest, &mut name).unwrap();
        assert_eq!(name, elem(b"ccc"));
        assert_eq!(rest, b"");

        assert!(skipelem(rest, &mut name).is_none());
    }

    #[test]
    fn skipelem_skips_leading_and_repeated_slashes() {
        let mut name = [0u8; DIRSIZ];
        let rest = skipelem(b"//a//b", &mut name).unwrap();
        assert_eq!(name, elem(b"a"));
        assert_eq!(rest, b"b");
    }

    #[test]
    fn skipelem_truncates_overlong_components() {
        let long = [b'x'; DIRSIZ + 5];
        let mut name = [0u8; DIRSIZ];
        skipelem(&long, &mut name).unwrap();
        assert_eq!(name, [b'x'; DIRSIZ]);
    }

    #[test]
    fn namecmp_compares_full_fixed_width_array() {
        assert!(namecmp(&elem(b"a"), &elem(b"a")));
        assert!(!namecmp(&elem(b"a"), &elem(b"ab")));
    }
}
