//! Structured link objects
//!
//! The links table stores the owner of a file as an opaque string. Callers
//! that reference rows of their own tables use [`LinkObject`], whose
//! canonical form is `table.id` or `table.id.field`. The field is only
//! needed when one row owns several independent files (`users.7.avatar`
//! vs `users.7.banner`).

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::StorageError;

fn object_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([A-Za-z0-9_]+)\.([0-9]+)(?:\.([A-Za-z0-9_]+))?$")
            .expect("link object pattern is valid")
    })
}

fn is_name(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Owner of a file, always in a form that parses back from its `Display`
/// output.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LinkObject {
    table: String,
    id: i64,
    field: Option<String>,
}

impl LinkObject {
    /// `table` must be a non-empty `[A-Za-z0-9_]` name and `id` not
    /// negative.
    pub fn new(table: impl Into<String>, id: i64) -> Result<Self, StorageError> {
        let table = table.into();
        if !is_name(&table) || id < 0 {
            return Err(StorageError::InvalidLinkObject(format!("{}.{}", table, id)));
        }
        Ok(Self {
            table,
            id,
            field: None,
        })
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Result<Self, StorageError> {
        let field = field.into();
        if !is_name(&field) {
            return Err(StorageError::InvalidLinkObject(format!("{}.{}", self, field)));
        }
        self.field = Some(field);
        Ok(self)
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn field(&self) -> Option<&str> {
        self.field.as_deref()
    }
}

impl fmt::Display for LinkObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.table, self.id)?;
        if let Some(field) = &self.field {
            write!(f, ".{}", field)?;
        }
        Ok(())
    }
}

impl FromStr for LinkObject {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || StorageError::InvalidLinkObject(s.to_string());
        let caps = object_regex().captures(s).ok_or_else(invalid)?;
        let id = caps[2].parse::<i64>().map_err(|_| invalid())?;
        Ok(Self {
            table: caps[1].to_string(),
            id,
            field: caps.get(3).map(|m| m.as_str().to_string()),
        })
    }
}

impl Serialize for LinkObject {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for LinkObject {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
