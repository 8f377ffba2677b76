//! Textual paths and their resolution over the flat directory table.

use crate::fs::{FsError, Result, MAX_PATH_LENGTH};
use crate::node::{FileKind, InodeNumber, ROOT_INODE};
use crate::sb::SuperBlock;

/// Non-empty components of `path`.
pub fn split(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|part| !part.is_empty())
}

/// Text after the last separator once trailing separators are stripped.
pub fn last_component(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(at) => &trimmed[at + 1..],
        None => trimmed,
    }
}

/// Anchors a relative path at `cwd`. The result is not normalised.
pub fn join(cwd: &str, path: &str) -> Result<String> {
    let joined = if path.starts_with('/') {
        path.to_string()
    } else if cwd.ends_with('/') {
        format!("{}{}", cwd, path)
    } else {
        format!("{}/{}", cwd, path)
    };
    if joined.len() >= MAX_PATH_LENGTH {
        return Err(FsError::InvalidArgument(format!(
            "path longer than {} bytes",
            MAX_PATH_LENGTH - 1
        )));
    }
    Ok(joined)
}

/// Folds "." and ".." lexically. ".." at the root stays at the root.
pub fn normalize(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in split(path) {
        match part {
            "." => (),
            ".." => {
                parts.pop();
            }
            _ => parts.push(part),
        }
    }
    format!("/{}", parts.join("/"))
}

/// The normalised absolute form of `path` seen from `cwd`.
pub fn absolute(cwd: &str, path: &str) -> Result<String> {
    Ok(normalize(&join(cwd, path)?))
}

impl SuperBlock {
    /// Walks `path` from the root. Symlinks along the way are not followed.
    pub fn resolve(&self, cwd: &str, path: &str) -> Result<InodeNumber> {
        let full = join(cwd, path)?;
        let mut current = ROOT_INODE;
        let mut walked = String::new();
        for part in split(&full) {
            if self.inodes.get(current)?.file_kind() != FileKind::Directory {
                return Err(FsError::NotADirectory(walked));
            }
            walked.push('/');
            walked.push_str(part);
            if part == "." {
                continue;
            }
            current = self
                .entries
                .find(current, part)
                .ok_or_else(|| FsError::NotFound(walked.clone()))?;
        }
        Ok(current)
    }

    /// The directory that would hold the last component of `path`.
    pub fn resolve_parent(&self, cwd: &str, path: &str) -> Result<InodeNumber> {
        let full = join(cwd, path)?;
        let trimmed = full.trim_end_matches('/');
        match trimmed.rfind('/') {
            Some(0) | None => Ok(ROOT_INODE),
            Some(at) => self.resolve(cwd, &trimmed[..at]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_component_ignores_trailing_separators() {
        assert_eq!(last_component("/a/b/c"), "c");
        assert_eq!(last_component("/a/b/"), "b");
        assert_eq!(last_component("name"), "name");
        assert_eq!(last_component("/"), "");
    }

    #[test]
    fn relative_paths_join_the_working_directory() {
        assert_eq!(join("/", "a").unwrap(), "/a");
        assert_eq!(join("/x/y", "a/b").unwrap(), "/x/y/a/b");
        assert_eq!(join("/x", "/abs").unwrap(), "/abs");
    }

    #[test]
    fn over_long_paths_are_rejected() {
        let long = "a".repeat(MAX_PATH_LENGTH);
        assert!(matches!(join("/", &long), Err(FsError::InvalidArgument(_))));
        let fits = "a".repeat(MAX_PATH_LENGTH - 2);
        assert!(join("/", &fits).is_ok());
    }

    #[test]
    fn normalize_folds_dots() {
        assert_eq!(normalize("/a/./b/../c"), "/a/c");
        assert_eq!(normalize("/../.."), "/");
        assert_eq!(normalize("//a//"), "/a");
        assert_eq!(absolute("/a/b", "../c").unwrap(), "/a/c");
    }

    #[test]
    fn resolution_walks_the_directory_table() {
        let mut sb = SuperBlock::format().unwrap();
        let a = sb.make_directory(ROOT_INODE, "a").unwrap();
        let b = sb.make_directory(a, "b").unwrap();

        assert_eq!(sb.resolve("/", "/").unwrap(), ROOT_INODE);
        assert_eq!(sb.resolve("/", "/a/b").unwrap(), b);
        assert_eq!(sb.resolve("/a", "b").unwrap(), b);
        assert_eq!(sb.resolve("/", "/a/b/..").unwrap(), a);
        assert_eq!(sb.resolve("/", "/a/./b/../..").unwrap(), ROOT_INODE);
        assert_eq!(sb.resolve("/", "/..").unwrap(), ROOT_INODE);
        assert!(matches!(sb.resolve("/", "/a/zz"), Err(FsError::NotFound(_))));
    }

    #[test]
    fn resolving_absolute_form_agrees() {
        let mut sb = SuperBlock::format().unwrap();
        let a = sb.make_directory(ROOT_INODE, "a").unwrap();
        sb.make_directory(a, "b").unwrap();

        for (cwd, path) in &[("/a", "b/.."), ("/a/b", "../../a"), ("/", "./a/b")] {
            let direct = sb.resolve(cwd, path).unwrap();
            let via_absolute = sb.resolve("/", &absolute(cwd, path).unwrap()).unwrap();
            assert_eq!(direct, via_absolute);
        }
    }

    #[test]
    fn files_cannot_be_walked_through() {
        let mut sb = SuperBlock::format().unwrap();
        sb.make_file(ROOT_INODE, "f").unwrap();
        assert!(matches!(
            sb.resolve("/", "/f/x"),
            Err(FsError::NotADirectory(_))
        ));
    }

    #[test]
    fn parent_of_top_level_names_is_the_root() {
        let mut sb = SuperBlock::format().unwrap();
        let a = sb.make_directory(ROOT_INODE, "a").unwrap();
        assert_eq!(sb.resolve_parent("/", "/a").unwrap(), ROOT_INODE);
        assert_eq!(sb.resolve_parent("/", "a").unwrap(), ROOT_INODE);
        assert_eq!(sb.resolve_parent("/", "/a/new").unwrap(), a);
        assert_eq!(sb.resolve_parent("/a", "new/").unwrap(), a);
        assert_eq!(sb.resolve_parent("/", "/").unwrap(), ROOT_INODE);
    }
}
