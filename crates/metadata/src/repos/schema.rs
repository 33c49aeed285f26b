//! Schema introspection.

use crate::error::MetadataResult;
use async_trait::async_trait;
use std::fmt;

/// A database object an operation depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchemaObject {
    Table(&'static str),
    Column {
        table: &'static str,
        column: &'static str,
    },
    Function(&'static str),
}

impl fmt::Display for SchemaObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Table(name) => write!(f, "table {name}"),
            Self::Column { table, column } => write!(f, "column {table}.{column}"),
            Self::Function(name) => write!(f, "function {name}"),
        }
    }
}

/// Answers "does object X exist?" against the live catalog.
#[async_trait]
pub trait SchemaProbe: Send + Sync {
    async fn object_exists(&self, object: &SchemaObject) -> MetadataResult<bool>;
}
