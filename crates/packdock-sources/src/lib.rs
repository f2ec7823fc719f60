//! Upstream clients for packdock.
//!
//! This crate talks to the outside world: the upstream package registry and
//! the binary mirror sources. Every request goes through the single
//! [`HttpBackend`] abstraction so timeout, redirect, and compression policy
//! stay centralized and tests can swap in a canned backend.

mod adapter;
mod error;
mod http;
mod item;
mod json_index;
mod listing;
mod paged_api;
mod registry;

pub use adapter::{BinarySource, SourceKind, SourceRegistry};
pub use error::SourceError;
pub use http::{HttpBackend, JsonResponse, ReqwestBackend, TextResponse};
pub use item::{FetchResult, SizeValue, SourceItem};
pub use json_index::JsonIndexSource;
pub use listing::DirListingSource;
pub use paged_api::PagedApiSource;
pub use registry::RegistryClient;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;
