//! Path resolution (`namei`, `nameiparent`).
//!
//! Walks one component at a time, holding at most one inode lock: the
//! current directory is unlocked before the next component is locked.

use super::dir::{dir_name, DirName};
use super::inode::{InodeRef, InodeType};
use super::{FileSystem, FsError};
use alloc::sync::Arc;

/// Split the next component off `path`.
///
/// Leading slashes are skipped; the rest has its leading slashes skipped
/// too, so an empty rest means `elem` was the final component.
///
/// ```text
/// skip_elem(b"a/bb/c") == Some((b"a", b"bb/c"))
/// skip_elem(b"///a//bb") == Some((b"a", b"bb"))
/// skip_elem(b"a") == Some((b"a", b""))
/// skip_elem(b"") == skip_elem(b"////") == None
/// ```
pub fn skip_elem(path: &[u8]) -> Option<(&[u8], &[u8])> {
    let start = path.iter().position(|&c| c != b'/')?;
    let path = &path[start..];
    let end = path.iter().position(|&c| c == b'/').unwrap_or(path.len());
    let (elem, rest) = path.split_at(end);
    let rest_start = rest.iter().position(|&c| c != b'/').unwrap_or(rest.len());
    Some((elem, &rest[rest_start..]))
}

enum Step {
    Parent,
    Next(InodeRef),
}

impl FileSystem {
    fn namex(
        self: &Arc<Self>,
        cwd: &InodeRef,
        mut path: &[u8],
        want_parent: bool,
    ) -> Result<(InodeRef, DirName), FsError> {
        let mut ip = if path.first() == Some(&b'/') {
            self.root()
        } else {
            cwd.dup()
        };
        let mut name = dir_name(b"");

        while let Some((elem, rest)) = skip_elem(path) {
            name = dir_name(elem);
            path = rest;

            let step = {
                let guard = ip.lock();
                if guard.typ != InodeType::Dir {
                    return Err(FsError::NotDir);
                }
                if want_parent && rest.is_empty() {
                    Step::Parent
                } else {
                    let (next, _) = guard.dirlookup(&name).ok_or(FsError::NotFound)?;
                    Step::Next(next)
                }
            };
            match step {
                Step::Parent => return Ok((ip, name)),
                Step::Next(next) => ip = next,
            }
        }

        if want_parent {
            // The path named the root (or nothing): there is no parent.
            return Err(FsError::NotFound);
        }
        Ok((ip, name))
    }

    /// Resolve `path` relative to `cwd` to an unlocked inode.
    pub fn namei(self: &Arc<Self>, cwd: &InodeRef, path: &[u8]) -> Result<InodeRef, FsError> {
        self.namex(cwd, path, false).map(|(ip, _)| ip)
    }

    /// Resolve the parent directory of `path` and return it unlocked along
    /// with the final component.
    pub fn nameiparent(
        self: &Arc<Self>,
        cwd: &InodeRef,
        path: &[u8],
    ) -> Result<(InodeRef, DirName), FsError> {
        self.namex(cwd, path, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ROOTDEV, ROOTINO};

    #[test]
    fn test_skip_elem() {
        assert_eq!(skip_elem(b"a/bb/c"), Some((&b"a"[..], &b"bb/c"[..])));
        assert_eq!(skip_elem(b"///a//bb"), Some((&b"a"[..], &b"bb"[..])));
        assert_eq!(skip_elem(b"a/"), Some((&b"a"[..], &b""[..])));
        assert_eq!(skip_elem(b""), None);
        assert_eq!(skip_elem(b"////"), None);
    }

    #[test]
    fn test_resolve_nested() {
        let fs = FileSystem::new(ROOTDEV, 16);
        let root = fs.root();
        let sub = {
            let _tx = fs.begin_op();
            let sub = fs.ialloc(InodeType::Dir).unwrap();
            {
                let mut g = sub.lock();
                g.nlink = 1;
                g.update();
                g.dirlink(&dir_name(b"."), sub.inum()).unwrap();
                g.dirlink(&dir_name(b".."), ROOTINO).unwrap();
            }
            root.lock().dirlink(&dir_name(b"sub"), sub.inum()).unwrap();
            sub
        };

        let found = fs.namei(&root, b"/sub/.").unwrap();
        assert!(found.same_inode(&sub));
        let up = fs.namei(&sub, b"..").unwrap();
        assert!(up.same_inode(&root));

        let (parent, name) = fs.nameiparent(&root, b"sub/new").unwrap();
        assert!(parent.same_inode(&sub));
        assert_eq!(name, dir_name(b"new"));

        assert_eq!(fs.namei(&root, b"/missing").unwrap_err(), FsError::NotFound);
        assert_eq!(fs.nameiparent(&root, b"/").unwrap_err(), FsError::NotFound);
    }

    #[test]
    fn test_file_as_directory_component() {
        let fs = FileSystem::new(ROOTDEV, 16);
        let root = fs.root();
        {
            let _tx = fs.begin_op();
            let f = fs.ialloc(InodeType::File).unwrap();
            {
                let mut g = f.lock();
                g.nlink = 1;
                g.update();
            }
            root.lock().dirlink(&dir_name(b"f"), f.inum()).unwrap();
        }
        assert_eq!(fs.namei(&root, b"/f/x").unwrap_err(), FsError::NotDir);
    }
}
