//! Database operations through the PostgREST API

mod filter;
mod query;
mod types;

use reqwest::Client;
use serde::Serialize;

use query::Target;

pub use filter::*;
pub use query::{DeleteBuilder, InsertBuilder, SelectBuilder};
pub use types::*;

/// Client for database operations on one table
#[derive(Debug, Clone)]
pub struct PostgrestClient {
    target: Target,
}

impl PostgrestClient {
    /// Create a new PostgrestClient
    pub fn new(url: &str, key: &str, table: &str, client: Client) -> Self {
        Self {
            target: Target {
                url: format!("{}/rest/v1/{}", url.trim_end_matches('/'), table),
                key: key.to_string(),
                bearer: None,
                schema: None,
                client,
            },
        }
    }

    /// Send the user's access token instead of the anon key
    pub fn with_auth(mut self, token: &str) -> Self {
        self.target.bearer = Some(token.to_string());
        self
    }

    /// Target a schema other than the API's default
    pub fn with_schema(mut self, schema: &str) -> Self {
        self.target.schema = if schema == "public" {
            None
        } else {
            Some(schema.to_string())
        };
        self
    }

    /// The REST endpoint for the table
    pub fn url(&self) -> &str {
        &self.target.url
    }

    /// Select specific columns from the table
    pub fn select(&self, columns: &str) -> SelectBuilder {
        SelectBuilder::new(self.target.clone(), columns)
    }

    /// Insert data into the table
    pub fn insert<T: Serialize>(&self, values: T) -> InsertBuilder<T> {
        InsertBuilder::new(self.target.clone(), values)
    }

    /// Delete data from the table
    pub fn delete(&self) -> DeleteBuilder {
        DeleteBuilder::new(self.target.clone())
    }
}
