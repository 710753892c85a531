//! Kernel action codes (§3) and the actions derived internally from rename coalescing.

use num_derive::{FromPrimitive, ToPrimitive};

/// The closed set of action codes the kernel module emits on the wire.
///
/// Numeric values are part of the wire contract with the kernel module (§6) and must not be
/// renumbered.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, FromPrimitive, ToPrimitive)]
#[repr(u8)]
pub enum Action {
    NewFile = 0,
    NewSymlink = 1,
    NewLink = 2,
    NewFolder = 3,
    DelFile = 4,
    DelFolder = 5,
    RenameFromFile = 6,
    RenameFromFolder = 7,
    RenameToFile = 8,
    RenameToFolder = 9,
    Mount = 10,
    Unmount = 11,
}

impl Action {
    /// Whether this action is the first half of a rename pair.
    pub fn is_rename_from(self) -> bool {
        matches!(self, Action::RenameFromFile | Action::RenameFromFolder)
    }

    /// Whether this action is the second half of a rename pair.
    pub fn is_rename_to(self) -> bool {
        matches!(self, Action::RenameToFile | Action::RenameToFolder)
    }

    /// Whether this action concerns a directory rather than a file/symlink/link.
    pub fn is_folder(self) -> bool {
        matches!(
            self,
            Action::NewFolder | Action::DelFolder | Action::RenameFromFolder | Action::RenameToFolder
        )
    }
}

/// Normalized action used internally once a rename pair has been coalesced by cookie (§3).
/// Unlike [`Action`], this has no direct wire encoding.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum NormalizedAction {
    NewFile,
    NewSymlink,
    NewLink,
    NewFolder,
    DelFile,
    DelFolder,
    /// Produced when a `RENAME_TO_*` is matched against a pending `RENAME_FROM_*` cookie.
    RenameFile,
    /// Produced when a `RENAME_TO_*` is matched against a pending `RENAME_FROM_*` cookie.
    RenameFolder,
}

impl NormalizedAction {
    /// Maps a non-rename, non-mount wire action directly to its normalized form.
    ///
    /// Returns `None` for `Mount`/`Unmount` (handled separately, they never reach the path
    /// translation stage) and for `RenameFrom*`/`RenameTo*` (handled by the cookie coalescer).
    pub fn from_simple(action: Action) -> Option<Self> {
        match action {
            Action::NewFile => Some(Self::NewFile),
            Action::NewSymlink => Some(Self::NewSymlink),
            Action::NewLink => Some(Self::NewLink),
            Action::NewFolder => Some(Self::NewFolder),
            Action::DelFile => Some(Self::DelFile),
            Action::DelFolder => Some(Self::DelFolder),
            _ => None,
        }
    }

    /// Maps the *matching* side (§9 Open Question (c): the `TO` flavor wins on mismatch) of a
    /// coalesced rename pair to the internal rename action.
    pub fn from_rename_to(to_action: Action) -> Self {
        match to_action {
            Action::RenameToFolder => Self::RenameFolder,
            _ => Self::RenameFile,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_traits::FromPrimitive;

    #[test]
    fn wire_roundtrip() {
        for code in 0u8..=11 {
            assert!(Action::from_u8(code).is_some());
        }
        assert!(Action::from_u8(12).is_none());
    }

    #[test]
    fn to_flavor_wins_on_mismatch() {
        assert_eq!(NormalizedAction::from_rename_to(Action::RenameToFolder), NormalizedAction::RenameFolder);
        assert_eq!(NormalizedAction::from_rename_to(Action::RenameToFile), NormalizedAction::RenameFile);
    }
}
