//! Database/collection namespaces.

use crate::error::ProtocolError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// A `database.collection` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace {
    database: String,
    collection: String,
}

impl Namespace {
    pub fn new(
        database: impl Into<String>,
        collection: impl Into<String>,
    ) -> Result<Self, ProtocolError> {
        let database = database.into();
        let collection = collection.into();
        if database.is_empty() || database.contains('.') || collection.is_empty() {
            return Err(ProtocolError::InvalidNamespace(format!(
                "{}.{}",
                database, collection
            )));
        }
        Ok(Self {
            database,
            collection,
        })
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Returns `database.collection`.
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.database, self.collection)
    }
}

impl FromStr for Namespace {
    type Err = ProtocolError;

    /// Splits on the first dot; collection names may themselves contain dots.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (db, coll) = s
            .split_once('.')
            .ok_or_else(|| ProtocolError::InvalidNamespace(s.to_string()))?;
        Self::new(db, coll)
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.collection)
    }
}

// Namespaces travel on the wire as their full name.
impl Serialize for Namespace {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.full_name())
    }
}

impl<'de> Deserialize<'de> for Namespace {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
