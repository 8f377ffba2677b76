//! The permission model: one rwx set per object, no owner or group classes.

use enumflags2::{bitflags, BitFlags};

use crate::fs::{FsError, Result};
use crate::node::{FileKind, Inode};

#[bitflags]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    Read = 0b100,
    Write = 0b010,
    Execute = 0b001,
}

pub type Permissions = BitFlags<Permission>;

/// The access combinations an operation may ask for. Anything outside this set is
/// not expressible, and each check below further narrows what it accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    ReadExecute,
    Write,
    ReadWrite,
    ReadWriteExecute,
    /// Only meaningful for regular files.
    Execute,
}

impl Access {
    pub fn required(self) -> Permissions {
        match self {
            Access::Read => Permission::Read.into(),
            Access::ReadExecute => Permission::Read | Permission::Execute,
            Access::Write => Permission::Write.into(),
            Access::ReadWrite => Permission::Read | Permission::Write,
            Access::ReadWriteExecute => BitFlags::all(),
            Access::Execute => Permission::Execute.into(),
        }
    }
}

/// Whether `dir` is a directory granting `access`. Execute alone is never granted on
/// a directory.
pub fn check_directory(dir: &Inode, access: Access) -> bool {
    if dir.file_kind() != FileKind::Directory || access == Access::Execute {
        return false;
    }
    dir.permissions.contains(access.required())
}

/// Whether `file` is a regular file granting `access`. Read+execute is not a
/// combination files are checked for.
pub fn check_file(file: &Inode, access: Access) -> bool {
    if file.file_kind() != FileKind::Regular || access == Access::ReadExecute {
        return false;
    }
    file.permissions.contains(access.required())
}

/// Parses a three character descriptor such as `rw-`. Position 0 must be `r` or `-`,
/// position 1 `w` or `-`, position 2 `x` or `-`.
pub fn parse(descriptor: &str) -> Result<Permissions> {
    let chars: Vec<char> = descriptor.chars().collect();
    if chars.len() != 3 {
        return Err(FsError::InvalidArgument(format!(
            "permission descriptor {:?} must be three characters like 'rw-'",
            descriptor
        )));
    }

    let mut permissions = Permissions::empty();
    for (position, (&c, (letter, bit))) in chars
        .iter()
        .zip([
            ('r', Permission::Read),
            ('w', Permission::Write),
            ('x', Permission::Execute),
        ])
        .enumerate()
    {
        if c == letter {
            permissions |= bit;
        } else if c != '-' {
            return Err(FsError::InvalidArgument(format!(
                "position {} of {:?} must be '{}' or '-'",
                position, descriptor, letter
            )));
        }
    }
    Ok(permissions)
}

/// The `rwx` style rendering of a permission set.
pub fn describe(permissions: Permissions) -> String {
    [
        (Permission::Read, 'r'),
        (Permission::Write, 'w'),
        (Permission::Execute, 'x'),
    ]
    .iter()
    .map(|&(bit, letter)| {
        if permissions.contains(bit) {
            letter
        } else {
            '-'
        }
    })
    .collect()
}
