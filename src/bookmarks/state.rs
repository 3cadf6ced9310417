use std::collections::HashMap;
use std::fmt;

use super::model::{Bookmark, BookmarkId};
use crate::auth::User;

/// Where the controller is in the sign-in lifecycle
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionPhase {
    #[default]
    Anonymous,
    /// The provider redirect was started and has not completed yet
    Authenticating { authorize_url: String },
    Authenticated,
}

/// Identifies a user command so duplicates can be rejected while one is pending
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MutationKey {
    Add { title: String, url: String },
    Delete(BookmarkId),
}

impl fmt::Display for MutationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MutationKey::Add { title, url } => write!(f, "add {:?} {}", title, url),
            MutationKey::Delete(id) => write!(f, "delete {}", id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationStatus {
    Pending,
    Committed,
    Failed(String),
}

/// Everything a view needs to render the bookmark screen
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SyncSnapshot {
    pub phase: SessionPhase,
    pub user: Option<User>,
    /// Current owner's bookmarks, newest first
    pub bookmarks: Vec<Bookmark>,
    /// A list load is outstanding for a new session
    pub loading: bool,
    /// Pending commands, plus the results of those settled since the last
    /// command started
    pub mutations: HashMap<MutationKey, MutationStatus>,
    /// Last failure surfaced to the user
    pub last_error: Option<String>,
}

impl SyncSnapshot {
    pub fn is_authenticated(&self) -> bool {
        self.phase == SessionPhase::Authenticated && self.user.is_some()
    }

    pub fn owner_id(&self) -> Option<&str> {
        if self.phase == SessionPhase::Authenticated {
            self.user.as_ref().map(|u| u.id.as_str())
        } else {
            None
        }
    }

    pub fn status(&self, key: &MutationKey) -> Option<&MutationStatus> {
        self.mutations.get(key)
    }

    pub fn contains(&self, id: &BookmarkId) -> bool {
        self.bookmarks.iter().any(|b| &b.id == id)
    }
}
