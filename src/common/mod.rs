//! Common types and utilities shared across tierpool.
//!
//! This module contains fundamental primitives used throughout the codebase:
//! - Configuration constants and [`Config`]
//! - Error types
//! - Identifiers ([`PageId`], [`PageSizeType`])
//! - Busy-wait backoff

pub mod backoff;
pub mod config;
pub mod error;
mod page_id;

pub use config::Config;
pub use error::{Error, Result};
pub use page_id::{
    PageId, PageSizeType, MAX_PAGE_INDEX, NUM_PAGE_SIZE_TYPES, PAGE_INDEX_BITS,
    PAGE_SIZE_TYPE_BITS,
};
