use std::fmt;

use crate::RpcError;

/// A literal on the right-hand side of a comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterLiteral {
    Text(String),
    Integer(i64),
    Bool(bool),
}

impl FilterLiteral {
    fn render(&self) -> String {
        match self {
            Self::Text(value) => format!("'{}'", escape_filter_literal(value)),
            Self::Integer(value) => value.to_string(),
            Self::Bool(value) => value.to_string(),
        }
    }
}

impl From<&str> for FilterLiteral {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FilterLiteral {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&String> for FilterLiteral {
    fn from(value: &String) -> Self {
        Self::Text(value.clone())
    }
}

impl From<i64> for FilterLiteral {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<bool> for FilterLiteral {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// Doubles single quotes so `value` can sit inside a quoted filter literal.
pub fn escape_filter_literal(value: &str) -> String {
    value.replace('\'', "''")
}

fn validate_field_name(field: &str) -> Result<&str, RpcError> {
    let field = field.trim();
    let mut chars = field.chars();
    let valid_head = chars
        .next()
        .map(|ch| ch.is_ascii_alphabetic() || ch == '_')
        .unwrap_or(false);
    let valid_tail = chars.all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '_' | '.' | '/'));
    if valid_head && valid_tail {
        Ok(field)
    } else {
        Err(RpcError::InvalidFilter(format!(
            "field name '{field}' is not a valid identifier"
        )))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// OData-style filter expression. Literals are escaped on construction, so a built
/// expression is always safe to send.
pub struct FilterExpr(String);

impl FilterExpr {
    pub fn eq(field: &str, value: impl Into<FilterLiteral>) -> Result<Self, RpcError> {
        let field = validate_field_name(field)?;
        Ok(Self(format!("{field} eq {}", value.into().render())))
    }

    /// `field eq v1 or field eq v2 ...`; rejects an empty value list.
    pub fn any_eq<I, V>(field: &str, values: I) -> Result<Self, RpcError>
    where
        I: IntoIterator<Item = V>,
        V: Into<FilterLiteral>,
    {
        let field = validate_field_name(field)?;
        let clauses = values
            .into_iter()
            .map(|value| format!("{field} eq {}", value.into().render()))
            .collect::<Vec<_>>();
        if clauses.is_empty() {
            return Err(RpcError::InvalidFilter(format!(
                "no values supplied for '{field}'"
            )));
        }
        Ok(Self(clauses.join(" or ")))
    }

    pub fn and(self, other: FilterExpr) -> Self {
        Self(format!("({}) and ({})", self.0, other.0))
    }

    pub fn or(self, other: FilterExpr) -> Self {
        Self(format!("({}) or ({})", self.0, other.0))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for FilterExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
