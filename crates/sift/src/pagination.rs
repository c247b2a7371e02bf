//! Pagination policy and the paginated result type.
//!
//! The policy resolves every attribute operation first, then resource, then
//! the global [`PaginationOptions`]. Client-supplied values are only read when
//! the matching `client_*` attribute allows it, and are clamped rather than
//! rejected.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::context::{Context, FilterValue};
use crate::metadata::{MetadataRegistry, PaginationAttributes};

/// Global pagination defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaginationOptions {
    /// Whether collections are paginated at all.
    pub enabled: bool,
    /// Whether the client may toggle pagination.
    pub client_enabled: bool,
    /// Whether the client may choose the page size.
    pub client_items_per_page: bool,
    /// Default page size.
    pub items_per_page: u64,
    /// Upper bound for the page size.
    pub maximum_items_per_page: Option<u64>,
    /// Skip the total count.
    pub partial: bool,
    /// Whether the client may request partial pagination.
    pub client_partial: bool,
    pub page_parameter_name: String,
    pub enabled_parameter_name: String,
    pub items_per_page_parameter_name: String,
    pub partial_parameter_name: String,
}

impl Default for PaginationOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            client_enabled: false,
            client_items_per_page: false,
            items_per_page: 30,
            maximum_items_per_page: None,
            partial: false,
            client_partial: false,
            page_parameter_name: "page".to_string(),
            enabled_parameter_name: "pagination".to_string(),
            items_per_page_parameter_name: "itemsPerPage".to_string(),
            partial_parameter_name: "partial".to_string(),
        }
    }
}

/// Offset/limit window for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    /// Whether the total number of matching items should be computed.
    pub count_total: bool,
    pub offset: u64,
    pub limit: u64,
}

/// Decides whether and how a collection is paginated.
#[derive(Debug, Clone)]
pub struct Pagination {
    options: PaginationOptions,
    metadata: Arc<MetadataRegistry>,
}

impl Pagination {
    /// Create a policy over the given metadata.
    pub fn new(options: PaginationOptions, metadata: Arc<MetadataRegistry>) -> Self {
        Self { options, metadata }
    }

    /// Global defaults.
    pub fn options(&self) -> &PaginationOptions {
        &self.options
    }

    fn attribute<T>(
        &self,
        resource: &str,
        operation: Option<&str>,
        pick: impl Fn(&PaginationAttributes) -> Option<T>,
    ) -> Option<T> {
        self.metadata
            .resource(resource)
            .and_then(|meta| meta.pagination_attribute(operation, pick))
    }

    fn client_value<'a>(&self, context: &'a Context, name: &str) -> Option<&'a str> {
        context.filter(name).and_then(FilterValue::as_str)
    }

    /// Whether pagination applies to this resource and operation.
    pub fn is_enabled(&self, resource: &str, operation: Option<&str>, context: &Context) -> bool {
        let enabled = self
            .attribute(resource, operation, |p| p.enabled)
            .unwrap_or(self.options.enabled);
        let client_enabled = self
            .attribute(resource, operation, |p| p.client_enabled)
            .unwrap_or(self.options.client_enabled);

        if client_enabled
            && let Some(requested) = self
                .client_value(context, &self.options.enabled_parameter_name)
                .and_then(parse_bool)
        {
            return requested;
        }
        enabled
    }

    /// Whether the total count is skipped.
    pub fn is_partial_enabled(
        &self,
        resource: &str,
        operation: Option<&str>,
        context: &Context,
    ) -> bool {
        let partial = self
            .attribute(resource, operation, |p| p.partial)
            .unwrap_or(self.options.partial);
        let client_partial = self
            .attribute(resource, operation, |p| p.client_partial)
            .unwrap_or(self.options.client_partial);

        if client_partial
            && let Some(requested) = self
                .client_value(context, &self.options.partial_parameter_name)
                .and_then(parse_bool)
        {
            return requested;
        }
        partial
    }

    /// Requested page, 1-indexed. Missing or malformed values give page 1.
    pub fn get_page(&self, context: &Context) -> u64 {
        self.client_value(context, &self.options.page_parameter_name)
            .and_then(|raw| raw.trim().parse::<i64>().ok())
            .map(|page| page.max(1) as u64)
            .unwrap_or(1)
    }

    /// Page size after client override and clamping.
    pub fn get_limit(&self, resource: &str, operation: Option<&str>, context: &Context) -> u64 {
        let mut limit = self
            .attribute(resource, operation, |p| p.items_per_page)
            .unwrap_or(self.options.items_per_page);

        let client_items_per_page = self
            .attribute(resource, operation, |p| p.client_items_per_page)
            .unwrap_or(self.options.client_items_per_page);
        if client_items_per_page
            && let Some(requested) = self
                .client_value(context, &self.options.items_per_page_parameter_name)
                .and_then(|raw| raw.trim().parse::<i64>().ok())
        {
            limit = requested.max(0) as u64;
        }

        let maximum = self
            .attribute(resource, operation, |p| p.maximum_items_per_page)
            .or(self.options.maximum_items_per_page);
        if let Some(maximum) = maximum {
            limit = limit.min(maximum);
        }
        limit.min(MAX_WINDOW_BOUND)
    }

    /// Offset of the requested page. Zero when the limit is zero.
    pub fn get_offset(&self, resource: &str, operation: Option<&str>, context: &Context) -> u64 {
        let limit = self.get_limit(resource, operation, context);
        if limit == 0 {
            return 0;
        }
        (self.get_page(context) - 1)
            .saturating_mul(limit)
            .min(MAX_WINDOW_BOUND)
    }

    /// Full window for this request.
    pub fn get_pagination(
        &self,
        resource: &str,
        operation: Option<&str>,
        context: &Context,
    ) -> PageWindow {
        PageWindow {
            count_total: !self.is_partial_enabled(resource, operation, context),
            offset: self.get_offset(resource, operation, context),
            limit: self.get_limit(resource, operation, context),
        }
    }
}

/// Offsets and limits are bound as signed 64-bit parameters.
const MAX_WINDOW_BOUND: u64 = i64::MAX as u64;

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Some(true),
        "0" | "false" | "off" | "no" | "" => Some(false),
        _ => None,
    }
}

/// A page of items produced by a paginating extension.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(into = "PageView")]
pub struct Paginator {
    items: Vec<serde_json::Value>,
    offset: u64,
    limit: u64,
    total_items: Option<u64>,
}

impl Paginator {
    /// Create a paginator. `total_items` is `None` for partial pagination.
    pub fn new(
        items: Vec<serde_json::Value>,
        offset: u64,
        limit: u64,
        total_items: Option<u64>,
    ) -> Self {
        Self {
            items,
            offset,
            limit,
            total_items,
        }
    }

    /// Items on this page.
    pub fn items(&self) -> &[serde_json::Value] {
        &self.items
    }

    /// Consume the paginator, keeping only the items.
    pub fn into_items(self) -> Vec<serde_json::Value> {
        self.items
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn items_per_page(&self) -> u64 {
        self.limit
    }

    /// Total matching items, if counted.
    pub fn total_items(&self) -> Option<u64> {
        self.total_items
    }

    /// Current page, 1-indexed.
    pub fn current_page(&self) -> u64 {
        if self.limit == 0 {
            1
        } else {
            self.offset / self.limit + 1
        }
    }

    /// Last page, if the total is known. Never less than 1.
    pub fn last_page(&self) -> Option<u64> {
        let total = self.total_items?;
        if self.limit == 0 {
            return Some(1);
        }
        Some(total.div_ceil(self.limit).max(1))
    }

    /// Whether a following page exists. Without a total, a full page is
    /// assumed to have a successor.
    pub fn has_next(&self) -> bool {
        match self.last_page() {
            Some(last) => self.current_page() < last,
            None => self.limit > 0 && self.items.len() as u64 >= self.limit,
        }
    }

    pub fn has_previous(&self) -> bool {
        self.current_page() > 1
    }
}

/// Serialized form of a [`Paginator`].
#[derive(Debug, Serialize)]
struct PageView {
    items: Vec<serde_json::Value>,
    current_page: u64,
    items_per_page: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    total_items: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_page: Option<u64>,
    has_next: bool,
    has_previous: bool,
}

impl From<Paginator> for PageView {
    fn from(paginator: Paginator) -> Self {
        Self {
            current_page: paginator.current_page(),
            items_per_page: paginator.items_per_page(),
            total_items: paginator.total_items(),
            last_page: paginator.last_page(),
            has_next: paginator.has_next(),
            has_previous: paginator.has_previous(),
            items: paginator.items,
        }
    }
}
