//! Execution configuration for grouped convolution layers.

use serde::{Deserialize, Serialize};

use gconv_core::{GconvError, Result, DEFAULT_LANE};

/// Execution settings shared by every layer built from one context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecConfig {
    /// Channels interleaved per spatial position in packed tensors.
    pub lane_width: usize,

    /// Run group sub-kernels on the rayon pool.
    pub parallel_groups: bool,

    /// Smallest group count that is worth dispatching in parallel.
    pub min_parallel_groups: usize,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            lane_width: DEFAULT_LANE,
            parallel_groups: false,
            min_parallel_groups: 2,
        }
    }
}

impl ExecConfig {
    /// Enable group parallelism.
    pub fn parallel(mut self) -> Self {
        self.parallel_groups = true;
        self
    }

    pub fn with_lane_width(mut self, lane_width: usize) -> Self {
        self.lane_width = lane_width;
        self
    }

    /// Load a config from JSON; missing fields take defaults.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: ExecConfig = serde_json::from_str(text)
            .map_err(|e| GconvError::InvalidParam(format!("exec config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.lane_width == 0 {
            return Err(GconvError::InvalidParam("lane_width must be >= 1".into()));
        }
        Ok(())
    }

    /// Whether `groups` sub-kernels should run in parallel.
    pub fn runs_parallel(&self, groups: usize) -> bool {
        self.parallel_groups && groups >= self.min_parallel_groups.max(2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let c = ExecConfig::default();
        assert_eq!(c.lane_width, 4);
        assert!(!c.parallel_groups);
        assert_eq!(c.min_parallel_groups, 2);
        assert!(!c.runs_parallel(8));
    }

    #[test]
    fn test_from_json() {
        let c = ExecConfig::from_json(r#"{"parallel_groups": true, "min_parallel_groups": 4}"#).unwrap();
        assert_eq!(c.lane_width, 4);
        assert!(c.runs_parallel(4));
        assert!(!c.runs_parallel(3));

        assert!(ExecConfig::from_json(r#"{"lane_width": 0}"#).is_err());
        assert!(ExecConfig::from_json("[]").is_err());
    }
}
