//! Filter operations for PostgrestClient

/// Operator for filter expressions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOperator {
    /// Equal to
    Eq,

    /// Not equal to
    Neq,

    /// Greater than
    Gt,

    /// Less than
    Lt,

    /// In a list of values
    In,
}

impl FilterOperator {
    /// Convert the operator to its string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOperator::Eq => "eq",
            FilterOperator::Neq => "neq",
            FilterOperator::Gt => "gt",
            FilterOperator::Lt => "lt",
            FilterOperator::In => "in",
        }
    }

    /// Render the right-hand side of a `column=op.value` query parameter
    pub fn render(&self, value: &str) -> String {
        match self {
            FilterOperator::In => format!("in.({})", value),
            op => format!("{}.{}", op.as_str(), value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_postgrest_filters() {
        assert_eq!(FilterOperator::Eq.render("u1"), "eq.u1");
        assert_eq!(FilterOperator::Neq.render("3"), "neq.3");
        assert_eq!(FilterOperator::In.render("1,2"), "in.(1,2)");
    }
}
