//! Error types for collection providers and resource metadata.
//!
//! Filter input never produces an error: unmapped, disabled or malformed
//! parameters are skipped. What remains are configuration problems, which
//! always name the resource involved, and backend failures.

use thiserror::Error;

/// Errors raised while resolving or producing a resource collection.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// No manager is registered for the resource.
    #[error("resource '{resource}': no manager is registered")]
    NoManager { resource: String },

    /// The resource resolves to a manager whose repository cannot create the
    /// builder this provider needs.
    #[error("resource '{resource}': repository cannot create {capability}")]
    MissingBuilderCapability {
        resource: String,
        capability: &'static str,
    },

    /// The backend returned a result that doesn't have the expected shape.
    #[error("resource '{resource}': malformed result: {reason}")]
    MalformedResult { resource: String, reason: String },

    /// The underlying query or aggregation failed.
    #[error("backend query failed: {0:#}")]
    Backend(#[from] anyhow::Error),
}

impl ProviderError {
    /// Create a missing builder capability error.
    pub fn missing_capability(resource: impl Into<String>, capability: &'static str) -> Self {
        Self::MissingBuilderCapability {
            resource: resource.into(),
            capability,
        }
    }

    /// Create a malformed result error.
    pub fn malformed(resource: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedResult {
            resource: resource.into(),
            reason: reason.into(),
        }
    }
}

/// Result type alias using ProviderError.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Errors raised while loading resource metadata.
#[derive(Debug, Error)]
pub enum MetadataError {
    /// The metadata file could not be read.
    #[error("failed to read resource metadata from {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The metadata document is not valid TOML or uses an unknown storage type.
    #[error("failed to parse resource metadata: {0}")]
    Parse(#[from] toml::de::Error),

    /// An association points to a resource that isn't declared.
    #[error(
        "resource '{resource}': association '{association}' targets unknown resource '{target}'"
    )]
    UnknownAssociationTarget {
        resource: String,
        association: String,
        target: String,
    },

    /// A resource references a filter id that isn't declared.
    #[error("resource '{resource}': references undeclared filter '{filter}'")]
    UnknownFilter { resource: String, filter: String },

    /// A filter restricts itself to a property path the resource can't resolve.
    #[error("filter '{filter}': property '{property}' is not mapped on any resource using it")]
    UnmappedFilterProperty { filter: String, property: String },
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn capability_error_names_resource() {
        let err = ProviderError::missing_capability("Dummy", "an aggregation builder");
        let msg = err.to_string();
        assert!(msg.contains("Dummy"));
        assert!(msg.contains("aggregation builder"));
    }

    #[test]
    fn backend_error_keeps_context_chain() {
        let inner = anyhow::anyhow!("connection refused").context("failed to fetch collection");
        let msg = ProviderError::from(inner).to_string();
        assert!(msg.contains("failed to fetch collection"));
        assert!(msg.contains("connection refused"));
    }

    #[test]
    fn unknown_target_lists_all_names() {
        let err = MetadataError::UnknownAssociationTarget {
            resource: "Dummy".to_string(),
            association: "relatedDummy".to_string(),
            target: "Missing".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("Dummy"));
        assert!(msg.contains("relatedDummy"));
        assert!(msg.contains("Missing"));
    }
}
