//! Property tests for the bookmark controller.
//!
//! Two users share one in-memory backend and issue arbitrary sequences of
//! adds and deletes. After every command each controller must hold only its
//! own user's rows, and once the feeds settle each list must equal that
//! user's rows in the store, newest first.

use std::sync::Arc;
use std::time::Duration;

use bookmark_sync::auth::User;
use bookmark_sync::bookmarks::{BookmarkStore, BookmarkSync};
use bookmark_sync::config::SyncOptions;
use bookmark_sync::memory::{MemoryBackend, MemoryIdentity};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Command {
    Add { user: usize, title: String },
    Delete { user: usize, pick: usize },
    DeleteOther { user: usize, pick: usize },
}

fn arb_title() -> impl Strategy<Value = String> {
    "[a-z]{1,8}"
}

fn arb_command() -> impl Strategy<Value = Command> {
    prop_oneof![
        3 => (0..2usize, arb_title()).prop_map(|(user, title)| Command::Add { user, title }),
        2 => (0..2usize, any::<usize>()).prop_map(|(user, pick)| Command::Delete { user, pick }),
        1 => (0..2usize, any::<usize>()).prop_map(|(user, pick)| Command::DeleteOther { user, pick }),
    ]
}

const USERS: [&str; 2] = ["u1", "u2"];

async fn signed_in(backend: &MemoryBackend, user_id: &str) -> BookmarkSync {
    let identity = MemoryIdentity::signed_in(User::new(user_id, None));
    let sync = BookmarkSync::new(
        Arc::new(identity),
        Arc::new(backend.clone()),
        Arc::new(backend.clone()),
        SyncOptions::default().with_refresh_debounce(Duration::from_millis(5)),
    );
    sync.start().await;
    sync
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn lists_only_ever_hold_their_owners_rows(commands in prop::collection::vec(arb_command(), 1..20)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            let backend = MemoryBackend::new();
            let controllers = [signed_in(&backend, USERS[0]).await, signed_in(&backend, USERS[1]).await];

            for command in commands {
                match command {
                    Command::Add { user, title } => {
                        let added = controllers[user]
                            .add_bookmark(&title, "https://example.com")
                            .await
                            .unwrap()
                            .unwrap();
                        prop_assert_eq!(added.user_id.as_str(), USERS[user]);
                    }
                    Command::Delete { user, pick } => {
                        let own = controllers[user].snapshot().bookmarks;
                        if !own.is_empty() {
                            let id = own[pick % own.len()].id.clone();
                            controllers[user].delete_bookmark(&id).await.unwrap();
                            prop_assert!(!controllers[user].snapshot().contains(&id));
                        }
                    }
                    Command::DeleteOther { user, pick } => {
                        let theirs = controllers[1 - user].snapshot().bookmarks;
                        if !theirs.is_empty() {
                            let id = theirs[pick % theirs.len()].id.clone();
                            prop_assert!(controllers[user].delete_bookmark(&id).await.is_err());
                            prop_assert!(backend.rows().await.iter().any(|b| b.id == id));
                        }
                    }
                }

                for (sync, owner) in controllers.iter().zip(USERS) {
                    let snapshot = sync.snapshot();
                    prop_assert!(snapshot.bookmarks.iter().all(|b| b.user_id == owner));
                }
            }

            tokio::time::sleep(Duration::from_millis(50)).await;
            for (sync, owner) in controllers.iter().zip(USERS) {
                let expected = backend.list(owner).await.unwrap();
                prop_assert_eq!(sync.snapshot().bookmarks, expected);
            }
            Ok(())
        })?;
    }
}
