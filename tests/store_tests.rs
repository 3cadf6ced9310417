use bookmark_sync::auth::{Auth, Session, User};
use bookmark_sync::bookmarks::{BookmarkId, BookmarkStore, NewBookmark, RestBookmarkStore};
use bookmark_sync::config::ClientOptions;
use bookmark_sync::error::Error;
use bookmark_sync::postgrest::PostgrestClient;
use reqwest::Client;
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn signed_in_store(server: &MockServer) -> RestBookmarkStore {
    let auth = Auth::new(&server.uri(), "test_anon_key", Client::new(), ClientOptions::default());
    auth.set_session(Session::new(
        "user_token".to_string(),
        "refresh".to_string(),
        3600,
        User::new("u1", Some("u1@example.com")),
    ))
    .await;
    RestBookmarkStore::new(&server.uri(), "test_anon_key", Client::new(), auth)
}

fn row(id: i64, owner: &str, created_at: &str) -> serde_json::Value {
    json!({
        "id": id,
        "title": format!("Bookmark {}", id),
        "url": format!("https://example.com/{}", id),
        "user_id": owner,
        "created_at": created_at
    })
}

#[tokio::test]
async fn test_list_is_owner_scoped_and_ordered() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/bookmarks"))
        .and(query_param("select", "id,title,url,created_at,user_id"))
        .and(query_param("user_id", "eq.u1"))
        .and(query_param("order", "created_at.desc"))
        .and(header("apikey", "test_anon_key"))
        .and(header("Authorization", "Bearer user_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            row(2, "u1", "2024-05-02T08:00:00+00:00"),
            row(1, "u1", "2024-05-01T08:00:00+00:00"),
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let store = signed_in_store(&mock_server).await;
    let bookmarks = store.list("u1").await.unwrap();

    assert_eq!(bookmarks.len(), 2);
    assert_eq!(bookmarks[0].id, BookmarkId::from(2));
    assert_eq!(bookmarks[0].user_id, "u1");
    assert_eq!(bookmarks[1].title, "Bookmark 1");
}

#[tokio::test]
async fn test_insert_returns_the_stored_row() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/bookmarks"))
        .and(header("Prefer", "return=representation"))
        .and(body_json(json!({
            "title": "Rust",
            "url": "https://rust-lang.org",
            "user_id": "u1"
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([{
            "id": 7,
            "title": "Rust",
            "url": "https://rust-lang.org",
            "user_id": "u1",
            "created_at": "2024-05-03T08:00:00.123456+00:00"
        }])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let store = signed_in_store(&mock_server).await;
    let created = store
        .insert(&NewBookmark {
            title: "Rust".to_string(),
            url: "https://rust-lang.org".to_string(),
            user_id: "u1".to_string(),
        })
        .await
        .unwrap();

    assert_eq!(created.id, BookmarkId::from(7));
    assert_eq!(created.url, "https://rust-lang.org");
}

#[tokio::test]
async fn test_delete_filters_by_id_and_owner() {
    let mock_server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/rest/v1/bookmarks"))
        .and(query_param("id", "eq.7"))
        .and(query_param("user_id", "eq.u1"))
        .and(header("Prefer", "return=representation"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            row(7, "u1", "2024-05-03T08:00:00+00:00")
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let store = signed_in_store(&mock_server).await;
    assert!(store.delete(&BookmarkId::from(7), "u1").await.unwrap());
}

#[tokio::test]
async fn test_delete_of_missing_row_reports_false() {
    let mock_server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/rest/v1/bookmarks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    let store = signed_in_store(&mock_server).await;
    assert!(!store.delete(&BookmarkId::from(99), "u1").await.unwrap());
}

#[tokio::test]
async fn test_custom_owner_column() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/links"))
        .and(query_param("select", "id,title,url,created_at,owner"))
        .and(query_param("owner", "eq.u1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "id": "0b7c",
            "title": "Docs",
            "url": "https://docs.rs",
            "owner": "u1",
            "created_at": "2024-05-01T08:00:00+00:00"
        }])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let store = signed_in_store(&mock_server)
        .await
        .with_table("links")
        .with_owner_column("owner");
    let bookmarks = store.list("u1").await.unwrap();

    assert_eq!(bookmarks[0].id.as_str(), "0b7c");
    assert_eq!(bookmarks[0].user_id, "u1");
}

#[tokio::test]
async fn test_store_requires_a_session() {
    let mock_server = MockServer::start().await;
    let auth = Auth::new(&mock_server.uri(), "test_anon_key", Client::new(), ClientOptions::default());
    let store = RestBookmarkStore::new(&mock_server.uri(), "test_anon_key", Client::new(), auth);

    assert!(matches!(store.list("u1").await, Err(Error::MissingSession)));
    assert!(mock_server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_rejected_request_is_a_database_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/bookmarks"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "message": "JWT expired"
        })))
        .mount(&mock_server)
        .await;

    let store = signed_in_store(&mock_server).await;
    match store.list("u1").await {
        Err(Error::Database(message)) => assert!(message.contains("401")),
        other => panic!("unexpected result: {:?}", other.map(|rows| rows.len())),
    }
}

#[tokio::test]
async fn test_non_public_schema_sets_profile_headers() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/bookmarks"))
        .and(header("Accept-Profile", "private"))
        .and(query_param("limit", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = PostgrestClient::new(&mock_server.uri(), "test_anon_key", "bookmarks", Client::new())
        .with_schema("private");
    let rows: Vec<serde_json::Value> = client.select("*").limit(1).execute().await.unwrap();
    assert!(rows.is_empty());
}

#[tokio::test]
async fn test_delete_without_filter_is_refused() {
    let mock_server = MockServer::start().await;
    let client = PostgrestClient::new(&mock_server.uri(), "test_anon_key", "bookmarks", Client::new());

    let result = client.delete().execute::<serde_json::Value>().await;
    assert!(matches!(result, Err(Error::Database(_))));
    assert!(mock_server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_malformed_token_is_not_sent() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/bookmarks"))
        .respond_with(ResponseTemplate::new(401))
        .expect(0)
        .mount(&mock_server)
        .await;

    let auth = Auth::new(&mock_server.uri(), "test_anon_key", Client::new(), ClientOptions::default());
    auth.set_session(Session::new(
        "user\ntoken".to_string(),
        "refresh".to_string(),
        3600,
        User::new("u1", None),
    ))
    .await;
    let store = RestBookmarkStore::new(&mock_server.uri(), "test_anon_key", Client::new(), auth);

    match store.list("u1").await {
        Err(Error::InvalidHeader(name)) => assert_eq!(name, "Authorization"),
        other => panic!("Expected InvalidHeader error, got {:?}", other),
    }
}
