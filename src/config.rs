//! Tunable parameters of the samplers and volume estimators.

/// Configuration for region sampling and volume estimation.
///
/// Use `SamplerConfig::default()` for standard settings and the `with_*`
/// methods to adjust individual knobs:
///
/// ```
/// use stagen::config::SamplerConfig;
///
/// let config = SamplerConfig::default().with_mixing_steps(128);
/// assert_eq!(config.mixing_steps, 128);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct SamplerConfig {
    /// Hit-and-run steps taken from the interior point for every sample (default: 64).
    pub mixing_steps: usize,
    /// Monte-Carlo draws per volume estimate (default: 10_000).
    pub volume_samples: usize,
    /// Upper bound on rejection-sampling attempts (default: 100_000).
    pub max_rejections: usize,
    /// Feasible draws averaged into the interior starting point (default: 32).
    pub interior_samples: usize,
    /// Slack below which a constraint counts as violated (default: 1e-9).
    pub tolerance: f64,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            mixing_steps: 64,
            volume_samples: 10_000,
            max_rejections: 100_000,
            interior_samples: 32,
            tolerance: 1e-9,
        }
    }
}

impl SamplerConfig {
    pub fn with_mixing_steps(mut self, steps: usize) -> Self {
        self.mixing_steps = steps;
        self
    }

    pub fn with_volume_samples(mut self, samples: usize) -> Self {
        self.volume_samples = samples;
        self
    }

    pub fn with_max_rejections(mut self, attempts: usize) -> Self {
        self.max_rejections = attempts;
        self
    }

    pub fn with_interior_samples(mut self, samples: usize) -> Self {
        self.interior_samples = samples;
        self
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }
}
