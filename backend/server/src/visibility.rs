//! # Visibility
//!
//! Three-state lifecycle for a question.
//!
//! - **Hidden**: default on creation, only the moderator sees it
//! - **Visible**: everyone sees it
//! - **Deleted**: terminal, nobody sees it, not even the moderator
//!
//! Any state can move to any other, except out of `Deleted`.
//!
//! Stored as a small integer so the frontend and Redis share the same encoding.
use serde::{Serialize, Serializer};

use crate::range::IdRange;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Visibility {
    #[default]
    Hidden,
    Visible,
    Deleted,
}

impl Visibility {
    pub fn code(self) -> u8 {
        match self {
            Visibility::Hidden => 0,
            Visibility::Visible => 1,
            Visibility::Deleted => 2,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Visibility::Hidden),
            1 => Some(Visibility::Visible),
            2 => Some(Visibility::Deleted),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == Visibility::Deleted
    }

    /// Next state when moving to `target`, `None` once deleted.
    pub fn transition(self, target: Visibility) -> Option<Visibility> {
        if self.is_terminal() {
            None
        } else {
            Some(target)
        }
    }

    /// Whether a viewer with the given role may see a question in this state.
    pub fn visible_to(self, moderator: bool) -> bool {
        match self {
            Visibility::Visible => true,
            Visibility::Hidden => moderator,
            Visibility::Deleted => false,
        }
    }
}

impl Serialize for Visibility {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

/// Deleted and out-of-range ids are the same thing to every reader and writer.
pub fn effectively_deleted(range: &IdRange, id: u64, visibility: Visibility) -> bool {
    visibility.is_terminal() || !range.contains(id)
}
