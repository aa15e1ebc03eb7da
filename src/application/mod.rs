//! Sync services: the resource seam, page accumulation, optimistic
//! mutations and the `FeedSync` facade.

pub mod client;
pub mod error;
pub mod feed;
pub mod mutation;
pub mod pagination;
