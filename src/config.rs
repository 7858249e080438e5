//! Runtime configuration.

/// Tunables for a [`Runtime`](crate::Runtime).
///
/// ```
/// use tether::RuntimeConfig;
///
/// let config = RuntimeConfig::new()
///     .detailed_errors(false)
///     .max_conversion_depth(4);
/// assert!(!config.detailed_errors);
/// assert_eq!(config.max_conversion_depth, 4);
/// assert_eq!(config.life_support_shrink_threshold, 16);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Include host and native type names in cast error messages.
    pub detailed_errors: bool,
    /// Capacity above which the life-support stack is shrunk after a frame pops.
    pub life_support_shrink_threshold: usize,
    /// Nesting limit for implicit casts and conversions within one load.
    pub max_conversion_depth: usize,
}

impl RuntimeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn detailed_errors(mut self, enabled: bool) -> Self {
        self.detailed_errors = enabled;
        self
    }

    pub fn life_support_shrink_threshold(mut self, threshold: usize) -> Self {
        self.life_support_shrink_threshold = threshold;
        self
    }

    pub fn max_conversion_depth(mut self, depth: usize) -> Self {
        self.max_conversion_depth = depth;
        self
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            detailed_errors: true,
            life_support_shrink_threshold: 16,
            max_conversion_depth: 8,
        }
    }
}
