//! Engine configuration.

use trellis_foundation::CacheConfig;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Configuration for an [`Engine`](crate::Engine).
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EngineConfig {
    /// Memo of normalized conditions.
    pub normalize_cache: CacheConfig,

    /// Sharing registry cache.
    pub registry_cache: CacheConfig,

    /// Deepest chain of rule-triggered fact changes allowed in one call.
    pub max_chain_depth: u32,

    /// Most activations fired in one top-level call.
    pub max_activations: usize,

    /// Reject facts of unregistered types instead of storing them inert.
    pub strict_types: bool,

    /// Trace buffer size; `None` disables tracing.
    pub trace_capacity: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            normalize_cache: CacheConfig::with_capacity(1024),
            registry_cache: CacheConfig::with_capacity(4096),
            max_chain_depth: 64,
            max_activations: 10_000,
            strict_types: false,
            trace_capacity: None,
        }
    }
}

impl EngineConfig {
    /// Creates a configuration for development: strict types and a trace
    /// buffer of 10 000 records.
    #[must_use]
    pub fn development() -> Self {
        Self {
            strict_types: true,
            trace_capacity: Some(10_000),
            ..Self::default()
        }
    }

    /// Builder method to set the normalizer memo configuration.
    #[must_use]
    pub fn with_normalize_cache(mut self, cache: CacheConfig) -> Self {
        self.normalize_cache = cache;
        self
    }

    /// Builder method to set the sharing registry configuration.
    #[must_use]
    pub fn with_registry_cache(mut self, cache: CacheConfig) -> Self {
        self.registry_cache = cache;
        self
    }

    /// Builder method to set the maximum chain depth.
    #[must_use]
    pub fn with_max_chain_depth(mut self, depth: u32) -> Self {
        self.max_chain_depth = depth;
        self
    }

    /// Builder method to set the activation limit.
    #[must_use]
    pub fn with_max_activations(mut self, limit: usize) -> Self {
        self.max_activations = limit;
        self
    }

    /// Builder method to enable/disable strict typing.
    #[must_use]
    pub fn with_strict_types(mut self, strict: bool) -> Self {
        self.strict_types = strict;
        self
    }

    /// Builder method to set the trace buffer size.
    #[must_use]
    pub fn with_trace_capacity(mut self, capacity: Option<usize>) -> Self {
        self.trace_capacity = capacity;
        self
    }
}
