//! Directory mutations: `link`, `unlink` and `create`.
//!
//! Each runs inside a transaction, so its inode updates commit together.
//! When a child inode and its parent directory are both locked, the child
//! is locked first.

use alloc::sync::Arc;
use log::debug;

use crate::fs::dir::is_dot_or_dotdot;
use crate::fs::{dir_name, DirName, FileSystem, FsError, InodeRef, InodeType};

/// Give the inode at `old` a second name, `new`.
///
/// Directories cannot be linked. The link count is raised before the new
/// entry is written and lowered again if writing it fails.
pub fn link(fs: &Arc<FileSystem>, cwd: &InodeRef, old: &[u8], new: &[u8]) -> Result<(), FsError> {
    let _tx = fs.begin_op();
    let ip = fs.namei(cwd, old)?;
    {
        let mut guard = ip.lock();
        if guard.typ == InodeType::Dir {
            return Err(FsError::IsDir);
        }
        guard.nlink += 1;
        guard.update();
    }

    let result = add_entry(fs, cwd, &ip, new);
    if result.is_err() {
        let mut guard = ip.lock();
        guard.nlink -= 1;
        guard.update();
    }
    result
}

fn add_entry(
    fs: &Arc<FileSystem>,
    cwd: &InodeRef,
    ip: &InodeRef,
    path: &[u8],
) -> Result<(), FsError> {
    let (dp, name) = fs.nameiparent(cwd, path)?;
    let mut dir = dp.lock();
    if dp.dev() != ip.dev() {
        return Err(FsError::CrossDevice);
    }
    dir.dirlink(&name, ip.inum())
}

/// Remove the directory entry `path`.
///
/// A directory must be empty apart from `.` and `..`. The entry is zeroed
/// first; then the parent loses the link held by the child's `..` (for a
/// directory), and finally the child loses the link held by the entry.
///
/// # Panics
/// Panics if the child's link count is already below one.
pub fn unlink(fs: &Arc<FileSystem>, cwd: &InodeRef, path: &[u8]) -> Result<(), FsError> {
    let _tx = fs.begin_op();
    let (dp, name) = fs.nameiparent(cwd, path)?;
    if is_dot_or_dotdot(&name) {
        return Err(FsError::InvalidName);
    }

    let (ip, off) = dp.lock().dirlookup(&name).ok_or(FsError::NotFound)?;
    let mut child = ip.lock();
    let mut dir = dp.lock();
    // The parent was unlocked while the child lock was taken.
    if dir.dir_find(&name) != Some((ip.inum(), off)) {
        return Err(FsError::NotFound);
    }

    if child.nlink < 1 {
        panic!("unlink: nlink < 1");
    }
    if child.typ == InodeType::Dir && !child.is_dir_empty() {
        return Err(FsError::NotEmpty);
    }

    dir.clear_dirent(off)?;
    if child.typ == InodeType::Dir {
        dir.nlink -= 1;
        dir.update();
    }
    drop(dir);

    child.nlink -= 1;
    child.update();
    debug!("[FS] unlink inode {}: nlink now {}", ip.inum(), child.nlink);
    Ok(())
}

/// Create `path` as a new inode of type `typ`, or open what is already there.
///
/// An existing name is only acceptable when a plain file is requested and a
/// file or device is found; that inode is returned. Must run inside a
/// transaction. The returned inode is unlocked.
pub fn create(
    fs: &Arc<FileSystem>,
    cwd: &InodeRef,
    path: &[u8],
    typ: InodeType,
    major: i16,
    minor: i16,
) -> Result<InodeRef, FsError> {
    let (dp, name) = fs.nameiparent(cwd, path)?;

    let existing = dp.lock().dirlookup(&name);
    if let Some((ip, _)) = existing {
        let found = ip.lock().typ;
        return if typ == InodeType::File && matches!(found, InodeType::File | InodeType::Device) {
            Ok(ip)
        } else {
            Err(FsError::Exists)
        };
    }

    let ip = fs.ialloc(typ)?;
    if let Err(e) = init_and_link(&dp, &ip, &name, typ, major, minor) {
        // Released below; the last reference frees it.
        let mut guard = ip.lock();
        guard.nlink = 0;
        guard.update();
        return Err(e);
    }
    debug!("[FS] created inode {} ({:?})", ip.inum(), typ);
    Ok(ip)
}

fn init_and_link(
    dp: &InodeRef,
    ip: &InodeRef,
    name: &DirName,
    typ: InodeType,
    major: i16,
    minor: i16,
) -> Result<(), FsError> {
    let mut child = ip.lock();
    child.major = major;
    child.minor = minor;
    child.nlink = 1;
    child.update();

    // No nlink for "." itself: a self-reference would keep it alive.
    if typ == InodeType::Dir {
        child.dirlink(&dir_name(b"."), ip.inum())?;
        child.dirlink(&dir_name(b".."), dp.inum())?;
    }

    let mut dir = dp.lock();
    dir.dirlink(name, ip.inum())?;
    if typ == InodeType::Dir {
        dir.nlink += 1;
        dir.update();
    }
    Ok(())
}
