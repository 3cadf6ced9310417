use bookmark_sync::config::{SupabaseConfig, SyncOptions};
use bookmark_sync::prelude::*;
use dotenv::dotenv;

/// Smoke test against a real project, skipped unless SUPABASE_URL and
/// SUPABASE_ANON_KEY (or their NEXT_PUBLIC_ variants) are set.
#[tokio::test]
async fn test_live_project_starts_signed_out() {
    dotenv().ok();

    let config = match SupabaseConfig::from_env() {
        Ok(config) => config,
        Err(_) => {
            println!("SUPABASE_URL / SUPABASE_ANON_KEY not set, skipping");
            return;
        }
    };
    let base_url = config.base_url();

    let supabase = Supabase::new(config).unwrap();
    let sync = supabase.bookmarks(SyncOptions::default().with_redirect_to("http://localhost:3000"));

    assert!(sync.start().await.is_none());
    assert_eq!(sync.snapshot().phase, SessionPhase::Anonymous);

    let url = sync.sign_in().unwrap();
    assert!(url.starts_with(&format!("{}/auth/v1/authorize?provider=google", base_url)));

    assert!(supabase.realtime().websocket_url().unwrap().starts_with("ws"));
    sync.shutdown().await;
}
