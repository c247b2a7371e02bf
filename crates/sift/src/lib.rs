//! Sift: a paginate-and-filter collection pipeline.
//!
//! A [`CollectionDataProvider`] builds a query for a resource, runs it through
//! an ordered list of extensions (filters, pagination) and returns either the
//! result one of them supplies or the plainly executed query. Two backends are
//! provided: SQL via SeaQuery ([`orm`]) and aggregation pipelines ([`odm`]).

pub mod config;
pub mod context;
pub mod error;
pub mod extension;
pub mod filter;
pub mod manager;
pub mod metadata;
pub mod odm;
pub mod orm;
pub mod pagination;
pub mod pipeline;
pub mod provider;

pub use context::{Context, FilterValue};
pub use error::{MetadataError, ProviderError, ProviderResult};
pub use extension::{Backend, CollectionExtension, Extension, ResultCollectionExtension};
pub use metadata::{MetadataRegistry, StorageType};
pub use pagination::{Pagination, PaginationOptions, Paginator};
pub use provider::{CollectionDataProvider, CollectionResult};
