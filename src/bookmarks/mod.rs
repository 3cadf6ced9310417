//! Bookmark list synchronisation for a signed-in user

mod backend;
mod model;
mod remote;
mod state;
mod sync;

pub use backend::{BookmarkStore, ChangeFeed, ChangeFilter, IdentityProvider};
pub use model::{Bookmark, BookmarkId, NewBookmark};
pub use remote::{RealtimeChangeFeed, RestBookmarkStore};
pub use state::{MutationKey, MutationStatus, SessionPhase, SyncSnapshot};
pub use sync::BookmarkSync;
