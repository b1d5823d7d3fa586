//! # NLP Common Library
//!
//! Shared code for the NLP annotation service including:
//! - Entity and category domain types
//! - Character offset helpers for UTF-8 decision texts
//! - Bootstrap configuration loading
//! - Common error type

pub mod config;
pub mod entity;
pub mod error;
pub mod text;

pub use entity::{Category, Checklist, Entity, EntitySource};
pub use error::{Error, Result};
pub use text::CharIndex;
