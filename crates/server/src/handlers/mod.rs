//! HTTP request handlers.

pub mod admin;
pub mod cleanup;
pub mod common;
pub mod projects;
pub mod reconcile;

pub use admin::*;
pub use cleanup::*;
pub use common::*;
pub use projects::*;
pub use reconcile::*;
