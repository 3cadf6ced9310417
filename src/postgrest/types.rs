//! Types for the PostgrestClient

/// `Prefer` header asking writes to return the affected rows
pub(crate) const RETURN_REPRESENTATION: &str = "return=representation";

/// Sort direction for `order`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Ascending,
    Descending,
}

impl Order {
    pub fn as_str(&self) -> &'static str {
        match self {
            Order::Ascending => "asc",
            Order::Descending => "desc",
        }
    }
}
