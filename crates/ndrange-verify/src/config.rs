//! Scenario configuration
//!
//! [`ScenarioConfig::default`] is the reference scenario. Environment
//! variables override individual extents:
//!
//! - `NDRANGE_BUFFER_LEN` - vector buffer length in elements
//! - `NDRANGE_GLOBAL_SIZE` - two-dimensional global size, e.g. `16,64`
//! - `NDRANGE_LOCAL_SIZE` - local size of the reference dispatches
//! - `NDRANGE_ALT_LOCAL_SIZE` - local size of the partition-sensitivity dispatch
//! - `NDRANGE_BARRIER_LEN` - barrier buffer length; the barrier range becomes
//!   one work-group covering every element except the two edges

use crate::barrier_model::BarrierRange;
use crate::error::{ConformanceError, Result};
use crate::index_model::IndexSpace;
use std::env;

/// Largest vector or barrier buffer, in elements (64 MiB of `i32`)
pub const MAX_BUFFER_LEN: usize = 1 << 24;

/// Extents of one verification run
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ScenarioConfig {
    /// Elements in each vector buffer
    pub buffer_len: usize,
    /// Global size of the vector-combine dispatches
    pub global: [usize; 2],
    /// Local size of the source-built and binary-rebuilt dispatches
    pub local: [usize; 2],
    /// Local size of the partition-sensitivity dispatch
    pub alt_local: [usize; 2],
    /// Elements in each barrier buffer
    pub barrier_len: usize,
    /// First active index of the barrier dispatch
    pub barrier_offset: usize,
    /// Work-items in the barrier dispatch
    pub barrier_global: usize,
    /// Work-group size of the barrier dispatch
    pub barrier_local: usize,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            buffer_len: 1024,
            global: [16, 64],
            local: [4, 8],
            alt_local: [2, 8],
            barrier_len: 8,
            barrier_offset: 1,
            barrier_global: 6,
            barrier_local: 6,
        }
    }
}

impl ScenarioConfig {
    /// Reference scenario with environment overrides applied
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(len) = read_var("NDRANGE_BUFFER_LEN")? {
            config.buffer_len = parse_count("NDRANGE_BUFFER_LEN", &len)?;
        }
        if let Some(global) = read_var("NDRANGE_GLOBAL_SIZE")? {
            config.global = parse_pair("NDRANGE_GLOBAL_SIZE", &global)?;
        }
        if let Some(local) = read_var("NDRANGE_LOCAL_SIZE")? {
            config.local = parse_pair("NDRANGE_LOCAL_SIZE", &local)?;
        }
        if let Some(local) = read_var("NDRANGE_ALT_LOCAL_SIZE")? {
            config.alt_local = parse_pair("NDRANGE_ALT_LOCAL_SIZE", &local)?;
        }
        if let Some(len) = read_var("NDRANGE_BARRIER_LEN")? {
            let len = parse_count("NDRANGE_BARRIER_LEN", &len)?;
            config.barrier_len = len;
            config.barrier_offset = 1;
            config.barrier_global = len.saturating_sub(2);
            config.barrier_local = config.barrier_global;
        }

        Ok(config)
    }

    /// Check every extent against the models and the buffers
    pub fn validate(&self) -> Result<()> {
        if self.buffer_len == 0 {
            return Err(ConformanceError::InvalidConfig("buffer length must be non-zero".to_string()));
        }
        for (name, len) in [("buffer", self.buffer_len), ("barrier buffer", self.barrier_len)] {
            if len > MAX_BUFFER_LEN {
                return Err(ConformanceError::InvalidConfig(format!(
                    "{name} length {len} exceeds the maximum of {MAX_BUFFER_LEN} elements"
                )));
            }
        }
        for (name, local) in [("local", self.local), ("alternate local", self.alt_local)] {
            IndexSpace::new(self.global, local)
                .validate(self.buffer_len)
                .map_err(|e| ConformanceError::InvalidConfig(format!("{name} size: {e}")))?;
        }
        self.barrier_range()
            .validate(self.barrier_len)
            .map_err(|e| ConformanceError::InvalidConfig(format!("barrier: {e}")))
    }

    /// Index space of the reference dispatches
    pub fn reference_space(&self) -> IndexSpace {
        IndexSpace::new(self.global, self.local)
    }

    /// Index space of the partition-sensitivity dispatch
    pub fn alternate_space(&self) -> IndexSpace {
        IndexSpace::new(self.global, self.alt_local)
    }

    pub fn barrier_range(&self) -> BarrierRange {
        BarrierRange {
            offset: self.barrier_offset,
            global: self.barrier_global,
            local: self.barrier_local,
        }
    }
}

fn read_var(name: &str) -> Result<Option<String>> {
    match env::var(name) {
        Ok(value) if value.trim().is_empty() => Ok(None),
        Ok(value) => Ok(Some(value)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(env::VarError::NotUnicode(_)) => Err(ConformanceError::InvalidConfig(format!("{name} is not valid UTF-8"))),
    }
}

fn parse_count(name: &str, value: &str) -> Result<usize> {
    value
        .trim()
        .parse::<usize>()
        .map_err(|e| ConformanceError::InvalidConfig(format!("{name}={value:?}: {e}")))
}

fn parse_pair(name: &str, value: &str) -> Result<[usize; 2]> {
    let parts = value
        .split(',')
        .map(|part| parse_count(name, part))
        .collect::<Result<Vec<_>>>()?;
    match parts.as_slice() {
        [x, y] => Ok([*x, *y]),
        _ => Err(ConformanceError::InvalidConfig(format!(
            "{name}={value:?}: expected two comma-separated sizes"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: [&str; 5] = [
        "NDRANGE_BUFFER_LEN",
        "NDRANGE_GLOBAL_SIZE",
        "NDRANGE_LOCAL_SIZE",
        "NDRANGE_ALT_LOCAL_SIZE",
        "NDRANGE_BARRIER_LEN",
    ];

    fn clear_env() {
        for var in VARS {
            env::remove_var(var);
        }
    }

    #[test]
    fn test_default_is_valid() {
        ScenarioConfig::default().validate().unwrap();
    }

    #[test]
    #[serial]
    fn test_from_env_defaults() {
        clear_env();
        assert_eq!(ScenarioConfig::from_env().unwrap(), ScenarioConfig::default());
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        clear_env();
        env::set_var("NDRANGE_BUFFER_LEN", "2048");
        env::set_var("NDRANGE_GLOBAL_SIZE", "32, 64");
        env::set_var("NDRANGE_BARRIER_LEN", "16");

        let config = ScenarioConfig::from_env().unwrap();
        clear_env();

        assert_eq!(config.buffer_len, 2048);
        assert_eq!(config.global, [32, 64]);
        assert_eq!(config.local, [4, 8]);
        assert_eq!(config.barrier_range().global, 14);
        assert_eq!(config.barrier_range().local, 14);
        config.validate().unwrap();
    }

    #[test]
    #[serial]
    fn test_from_env_rejects_malformed_sizes() {
        clear_env();
        env::set_var("NDRANGE_LOCAL_SIZE", "4");
        let err = ScenarioConfig::from_env().unwrap_err();
        clear_env();
        assert!(matches!(err, ConformanceError::InvalidConfig(_)));

        env::set_var("NDRANGE_BUFFER_LEN", "many");
        let err = ScenarioConfig::from_env().unwrap_err();
        clear_env();
        assert!(err.to_string().contains("NDRANGE_BUFFER_LEN"));
    }

    #[test]
    fn test_validate_rejects_bad_extents() {
        let too_small = ScenarioConfig {
            buffer_len: 512,
            ..ScenarioConfig::default()
        };
        assert!(too_small.validate().is_err());

        let not_dividing = ScenarioConfig {
            alt_local: [3, 8],
            ..ScenarioConfig::default()
        };
        assert!(not_dividing.validate().is_err());

        let unshifted = ScenarioConfig {
            barrier_offset: 0,
            ..ScenarioConfig::default()
        };
        assert!(unshifted.validate().is_err());

        let short_barrier = ScenarioConfig {
            barrier_len: 6,
            barrier_global: 4,
            barrier_local: 4,
            ..ScenarioConfig::default()
        };
        assert!(short_barrier.validate().is_err());
    }

    #[test]
    fn test_validate_bounds_buffer_lengths() {
        let at_limit = ScenarioConfig {
            buffer_len: MAX_BUFFER_LEN,
            ..ScenarioConfig::default()
        };
        assert!(at_limit.validate().is_ok());

        let oversized = ScenarioConfig {
            buffer_len: usize::MAX / 2,
            ..ScenarioConfig::default()
        };
        let err = oversized.validate().unwrap_err();
        assert!(matches!(err, ConformanceError::InvalidConfig(_)));
        assert!(err.to_string().contains("exceeds the maximum"));

        let oversized_barrier = ScenarioConfig {
            barrier_len: MAX_BUFFER_LEN + 1,
            barrier_global: MAX_BUFFER_LEN - 1,
            barrier_local: MAX_BUFFER_LEN - 1,
            ..ScenarioConfig::default()
        };
        assert!(matches!(
            oversized_barrier.validate(),
            Err(ConformanceError::InvalidConfig(_))
        ));
    }

    #[test]
    #[serial]
    fn test_oversized_length_from_env_fails_validation() {
        clear_env();
        env::set_var("NDRANGE_BUFFER_LEN", (usize::MAX / 2).to_string());
        let config = ScenarioConfig::from_env();
        clear_env();
        assert!(matches!(config.unwrap().validate(), Err(ConformanceError::InvalidConfig(_))));
    }
}
