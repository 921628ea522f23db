//! # Planner Configuration Module
//!
//! Configuration for the database connection, the ingredient generator and
//! the ingredient cache. Values come from the environment (a `.env` file is
//! loaded first by the binary); anything unset falls back to the defaults
//! below.

use anyhow::{Context, Result};
use std::env;
use std::str::FromStr;

// Constants for cache trust
pub const DEFAULT_MIN_CONFIRMATIONS: i32 = 3;
pub const DEFAULT_MIN_CACHEABLE_INGREDIENTS: usize = 3;

// Constants for the generator client
pub const DEFAULT_GENERATOR_URL: &str = "https://api.openai.com/v1/chat/completions";
pub const DEFAULT_GENERATOR_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_GENERATOR_TIMEOUT_SECS: u64 = 30;

pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Trust rules of the ingredient cache
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    /// Confirmations needed before an entry is served without generating
    pub min_confirmations: i32,
    /// Shorter generated lists are used but never written to the cache
    pub min_cacheable_ingredients: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            min_confirmations: DEFAULT_MIN_CONFIRMATIONS,
            min_cacheable_ingredients: DEFAULT_MIN_CACHEABLE_INGREDIENTS,
        }
    }
}

/// Connection settings for the ingredient generator
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratorConfig {
    /// OpenAI-compatible chat completions endpoint
    pub endpoint: String,
    pub api_key: Option<String>,
    pub model: String,
    /// Timeout for a whole generation request in seconds
    pub timeout_secs: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_GENERATOR_URL.to_string(),
            api_key: None,
            model: DEFAULT_GENERATOR_MODEL.to_string(),
            timeout_secs: DEFAULT_GENERATOR_TIMEOUT_SECS,
        }
    }
}

/// Complete configuration of the planner binary
#[derive(Debug, Clone, PartialEq)]
pub struct PlannerConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub generator: GeneratorConfig,
    pub cache: CacheConfig,
}

impl PlannerConfig {
    /// Read the configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from any key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL").context("DATABASE_URL must be set")?;

        let generator_defaults = GeneratorConfig::default();
        let generator = GeneratorConfig {
            endpoint: lookup("GENERATOR_URL").unwrap_or(generator_defaults.endpoint),
            api_key: lookup("GENERATOR_API_KEY").filter(|key| !key.trim().is_empty()),
            model: lookup("GENERATOR_MODEL").unwrap_or(generator_defaults.model),
            timeout_secs: parse_or(&lookup, "GENERATOR_TIMEOUT_SECS", generator_defaults.timeout_secs)?,
        };

        let cache_defaults = CacheConfig::default();
        let cache = CacheConfig {
            min_confirmations: parse_or(&lookup, "CACHE_MIN_CONFIRMATIONS", cache_defaults.min_confirmations)?,
            min_cacheable_ingredients: parse_or(
                &lookup,
                "CACHE_MIN_INGREDIENTS",
                cache_defaults.min_cacheable_ingredients,
            )?,
        };

        Ok(Self {
            database_url,
            max_connections: parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", DEFAULT_MAX_CONNECTIONS)?,
            generator,
            cache,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} has an invalid value: {raw}")),
        None => Ok(default),
    }
}
