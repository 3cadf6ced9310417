use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Store-assigned bookmark id.
///
/// Tables use either an identity column or a uuid, so both JSON numbers and
/// strings are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct BookmarkId(String);

impl BookmarkId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BookmarkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<i64> for BookmarkId {
    fn from(id: i64) -> Self {
        Self(id.to_string())
    }
}

impl From<&str> for BookmarkId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl<'de> Deserialize<'de> for BookmarkId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawId {
            Int(i64),
            Text(String),
        }

        Ok(match RawId::deserialize(deserializer)? {
            RawId::Int(id) => BookmarkId(id.to_string()),
            RawId::Text(id) => BookmarkId(id),
        })
    }
}

/// A row of the bookmarks table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bookmark {
    pub id: BookmarkId,
    pub title: String,
    pub url: String,
    /// Owner id, the auth user id
    pub user_id: String,
    pub created_at: DateTime<Utc>,
}

/// Insert payload; id and timestamp are assigned by the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewBookmark {
    pub title: String,
    pub url: String,
    pub user_id: String,
}

/// Newest first; ties keep their relative order
pub(crate) fn sort_newest_first(bookmarks: &mut [Bookmark]) {
    bookmarks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn id_accepts_numbers_and_strings() {
        let numeric: Bookmark = serde_json::from_value(json!({
            "id": 17,
            "title": "Docs",
            "url": "https://example.com/docs",
            "user_id": "u1",
            "created_at": "2024-05-01T10:00:00+00:00"
        }))
        .unwrap();
        assert_eq!(numeric.id, BookmarkId::from(17));

        let uuid: BookmarkId = serde_json::from_value(json!("4c9d7f0e-1b7a-4a53-9d8e-2d7c5f0b9a11")).unwrap();
        assert_eq!(uuid.as_str(), "4c9d7f0e-1b7a-4a53-9d8e-2d7c5f0b9a11");
    }

    #[test]
    fn sorts_newest_first() {
        let at = |s: &str| DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc);
        let row = |id: i64, created: &str| Bookmark {
            id: id.into(),
            title: format!("t{}", id),
            url: "https://example.com".into(),
            user_id: "u1".into(),
            created_at: at(created),
        };
        let mut rows = vec![
            row(1, "2024-01-01T00:00:00Z"),
            row(3, "2024-03-01T00:00:00Z"),
            row(2, "2024-02-01T00:00:00Z"),
        ];
        sort_newest_first(&mut rows);
        let ids: Vec<_> = rows.iter().map(|b| b.id.to_string()).collect();
        assert_eq!(ids, ["3", "2", "1"]);
    }
}
