//! Query builders for PostgrestClient

use reqwest::Client;
use serde::{de::DeserializeOwned, Serialize};

use crate::error::Error;
use crate::fetch::{Fetch, FetchBuilder};
use crate::postgrest::filter::FilterOperator;
use crate::postgrest::types::{Order, RETURN_REPRESENTATION};

/// Where a request goes and which credentials it carries
#[derive(Debug, Clone)]
pub(crate) struct Target {
    pub(crate) url: String,
    pub(crate) key: String,
    pub(crate) bearer: Option<String>,
    pub(crate) schema: Option<String>,
    pub(crate) client: Client,
}

impl Target {
    fn apply<'a>(&self, fetch: FetchBuilder<'a>, profile_header: &'static str) -> FetchBuilder<'a> {
        let token = self.bearer.as_deref().unwrap_or(&self.key);
        let fetch = fetch.header("apikey", &self.key).bearer_auth(token);
        match &self.schema {
            Some(schema) => fetch.header(profile_header, schema),
            None => fetch,
        }
    }
}

/// Ordered query parameters
#[derive(Debug, Clone, Default)]
pub struct QueryBuilder {
    params: Vec<(String, String)>,
}

impl QueryBuilder {
    /// Create a new QueryBuilder
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a parameter, replacing any previous value for the same key
    pub fn add_param(&mut self, key: &str, value: &str) {
        self.params.retain(|(k, _)| k != key);
        self.params.push((key.to_string(), value.to_string()));
    }

    /// Get the query parameters
    pub fn get_params(&self) -> &[(String, String)] {
        &self.params
    }
}

/// Builder for SELECT queries
pub struct SelectBuilder {
    target: Target,
    query: QueryBuilder,
}

impl SelectBuilder {
    pub(crate) fn new(target: Target, columns: &str) -> Self {
        let mut query = QueryBuilder::new();
        query.add_param("select", columns);
        Self { target, query }
    }

    /// Filter rows with an arbitrary operator
    pub fn filter<T: ToString>(&mut self, column: &str, op: FilterOperator, value: T) -> &mut Self {
        self.query.add_param(column, &op.render(&value.to_string()));
        self
    }

    /// Filter rows where column equals a value
    pub fn eq<T: ToString>(&mut self, column: &str, value: T) -> &mut Self {
        self.filter(column, FilterOperator::Eq, value)
    }

    /// Order the results by a column
    pub fn order(&mut self, column: &str, order: Order) -> &mut Self {
        self.query
            .add_param("order", &format!("{}.{}", column, order.as_str()));
        self
    }

    /// Limit the number of rows returned
    pub fn limit(&mut self, count: u32) -> &mut Self {
        self.query.add_param("limit", &count.to_string());
        self
    }

    /// The query parameters this builder will send
    pub fn params(&self) -> &[(String, String)] {
        self.query.get_params()
    }

    /// Execute the query and return the results
    pub async fn execute<T: DeserializeOwned>(&self) -> Result<Vec<T>, Error> {
        let fetch = Fetch::get(&self.target.client, &self.target.url);
        self.target
            .apply(fetch, "Accept-Profile")
            .query(self.query.get_params())
            .execute::<Vec<T>>()
            .await
    }
}

/// Builder for INSERT queries
pub struct InsertBuilder<T: Serialize> {
    target: Target,
    values: T,
}

impl<T: Serialize> InsertBuilder<T> {
    pub(crate) fn new(target: Target, values: T) -> Self {
        Self { target, values }
    }

    /// Execute the insert and return the inserted rows
    pub async fn execute<R: DeserializeOwned>(&self) -> Result<Vec<R>, Error> {
        let fetch = Fetch::post(&self.target.client, &self.target.url);
        self.target
            .apply(fetch, "Content-Profile")
            .header("Prefer", RETURN_REPRESENTATION)
            .json(&self.values)?
            .execute::<Vec<R>>()
            .await
    }
}

/// Builder for DELETE queries
pub struct DeleteBuilder {
    target: Target,
    query: QueryBuilder,
}

impl DeleteBuilder {
    pub(crate) fn new(target: Target) -> Self {
        Self {
            target,
            query: QueryBuilder::new(),
        }
    }

    /// Filter rows where column equals a value
    pub fn eq<V: ToString>(&mut self, column: &str, value: V) -> &mut Self {
        self.query
            .add_param(column, &FilterOperator::Eq.render(&value.to_string()));
        self
    }

    /// Execute the delete and return the deleted rows
    pub async fn execute<R: DeserializeOwned>(&self) -> Result<Vec<R>, Error> {
        if self.query.get_params().is_empty() {
            return Err(Error::database("refusing to delete without a filter"));
        }

        let fetch = Fetch::delete(&self.target.client, &self.target.url);
        self.target
            .apply(fetch, "Content-Profile")
            .header("Prefer", RETURN_REPRESENTATION)
            .query(self.query.get_params())
            .execute::<Vec<R>>()
            .await
    }
}
