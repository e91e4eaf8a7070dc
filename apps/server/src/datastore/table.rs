use std::fmt;
use std::str::FromStr;

/// A validated `table` or `schema.table` identifier.
///
/// Table names come from configuration and cannot be bound as query
/// parameters, so they are restricted to ASCII identifiers and always
/// rendered quoted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableName {
    parts: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
#[error("invalid table name: {0:?}")]
pub struct InvalidTableName(pub String);

impl TableName {
    pub fn parse(raw: &str) -> Result<Self, InvalidTableName> {
        let parts: Vec<&str> = raw.split('.').collect();
        if parts.len() > 2 || !parts.iter().all(|p| is_identifier(p)) {
            return Err(InvalidTableName(raw.to_string()));
        }

        Ok(Self {
            parts: parts.into_iter().map(str::to_string).collect(),
        })
    }

    /// Quoted form safe to interpolate into SQL
    pub fn quoted(&self) -> String {
        self.parts
            .iter()
            .map(|p| format!("\"{}\"", p))
            .collect::<Vec<_>>()
            .join(".")
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    s.len() <= 63 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl FromStr for TableName {
    type Err = InvalidTableName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.parts.join("."))
    }
}
