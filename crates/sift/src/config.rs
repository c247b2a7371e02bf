//! Configuration loaded from environment variables.

use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::pagination::PaginationOptions;

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the resource metadata TOML (default: ./resources.toml).
    pub resources_path: PathBuf,

    /// PostgreSQL connection URL. Only needed to run relational collections.
    pub database_url: Option<String>,

    /// Maximum database connections in pool (default: 5).
    pub database_max_connections: u32,

    /// Global pagination defaults.
    pub pagination: PaginationOptions,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let resources_path = lookup("SIFT_RESOURCES")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./resources.toml"));

        let database_url = lookup("DATABASE_URL");

        let database_max_connections = lookup("DATABASE_MAX_CONNECTIONS")
            .unwrap_or_else(|| "5".to_string())
            .parse()
            .context("DATABASE_MAX_CONNECTIONS must be a valid u32")?;

        let defaults = PaginationOptions::default();
        let flag = |key: &str, default: bool| -> Result<bool> {
            match lookup(key) {
                None => Ok(default),
                Some(raw) => parse_flag(&raw).with_context(|| format!("{key} must be a boolean")),
            }
        };

        let items_per_page = match lookup("SIFT_ITEMS_PER_PAGE") {
            None => defaults.items_per_page,
            Some(raw) => raw
                .trim()
                .parse()
                .context("SIFT_ITEMS_PER_PAGE must be a valid u64")?,
        };

        let maximum_items_per_page = match lookup("SIFT_MAXIMUM_ITEMS_PER_PAGE") {
            None => defaults.maximum_items_per_page,
            Some(raw) => Some(
                raw.trim()
                    .parse()
                    .context("SIFT_MAXIMUM_ITEMS_PER_PAGE must be a valid u64")?,
            ),
        };

        let pagination = PaginationOptions {
            enabled: flag("SIFT_PAGINATION_ENABLED", defaults.enabled)?,
            client_enabled: flag("SIFT_CLIENT_ENABLED", defaults.client_enabled)?,
            client_items_per_page: flag(
                "SIFT_CLIENT_ITEMS_PER_PAGE",
                defaults.client_items_per_page,
            )?,
            partial: flag("SIFT_PARTIAL", defaults.partial)?,
            items_per_page,
            maximum_items_per_page,
            ..defaults
        };

        Ok(Self {
            resources_path,
            database_url,
            database_max_connections,
            pagination,
        })
    }
}

fn parse_flag(raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => anyhow::bail!("unrecognized boolean '{other}'"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let config = config(&[]).unwrap();
        assert_eq!(config.resources_path, PathBuf::from("./resources.toml"));
        assert!(config.database_url.is_none());
        assert_eq!(config.database_max_connections, 5);
        assert!(config.pagination.enabled);
        assert_eq!(config.pagination.items_per_page, 30);
        assert!(!config.pagination.partial);
    }

    #[test]
    fn pagination_overrides() {
        let config = config(&[
            ("SIFT_ITEMS_PER_PAGE", "10"),
            ("SIFT_MAXIMUM_ITEMS_PER_PAGE", "50"),
            ("SIFT_CLIENT_ITEMS_PER_PAGE", "true"),
            ("SIFT_PARTIAL", "1"),
            ("SIFT_PAGINATION_ENABLED", "off"),
        ])
        .unwrap();
        assert_eq!(config.pagination.items_per_page, 10);
        assert_eq!(config.pagination.maximum_items_per_page, Some(50));
        assert!(config.pagination.client_items_per_page);
        assert!(config.pagination.partial);
        assert!(!config.pagination.enabled);
        assert_eq!(config.pagination.page_parameter_name, "page");
    }

    #[test]
    fn invalid_values_name_the_variable() {
        let err = config(&[("SIFT_ITEMS_PER_PAGE", "ten")]).unwrap_err();
        assert!(err.to_string().contains("SIFT_ITEMS_PER_PAGE"));

        let err = config(&[("SIFT_PARTIAL", "maybe")]).unwrap_err();
        assert!(err.to_string().contains("SIFT_PARTIAL"));
    }
}
