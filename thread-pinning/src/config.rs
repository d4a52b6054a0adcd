use {
    crate::striping::DEFAULT_PINNING_STEP,
    serde_derive::{Deserialize, Serialize},
};

/// Striping parameters for a pinner.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PinningConfig {
    /// Stride between consecutive threads, in positions of the affinity mask. Must be >= 1.
    pub pinning_step: usize,
    /// Added to every logical thread index before placement. Setting it to 1
    /// leaves the first CPU of the mask to the thread that owns the pool.
    pub index_offset: usize,
}

impl Default for PinningConfig {
    fn default() -> Self {
        Self {
            pinning_step: DEFAULT_PINNING_STEP,
            index_offset: 0,
        }
    }
}

#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoreAllocation {
    ///Use OS default allocation (i.e. do not alter core affinity)
    #[default]
    OsDefault,
    ///Pin each worker to a single core of the process mask, striped by the given parameters
    Striped(PinningConfig),
}

impl CoreAllocation {
    pub fn pinning(&self) -> Option<&PinningConfig> {
        match self {
            CoreAllocation::OsDefault => None,
            CoreAllocation::Striped(config) => Some(config),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RayonConfig {
    pub worker_threads: usize,
    pub stack_size_bytes: usize,
    pub core_allocation: CoreAllocation,
}

impl Default for RayonConfig {
    fn default() -> Self {
        Self {
            core_allocation: CoreAllocation::OsDefault,
            worker_threads: 4,
            stack_size_bytes: 2 * 1024 * 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PinningConfig::default();
        assert_eq!(config.pinning_step, 1);
        assert_eq!(config.index_offset, 0);
        assert_eq!(RayonConfig::default().core_allocation.pinning(), None);
    }

    #[test]
    fn test_parse_partial_config() {
        let config: RayonConfig = serde_json::from_str(
            r#"{ "worker_threads": 8, "core_allocation": { "Striped": { "pinning_step": 2 } } }"#,
        )
        .unwrap();
        assert_eq!(config.worker_threads, 8);
        assert_eq!(config.stack_size_bytes, 2 * 1024 * 1024);
        assert_eq!(
            config.core_allocation.pinning(),
            Some(&PinningConfig {
                pinning_step: 2,
                index_offset: 0,
            })
        );

        let config: RayonConfig = serde_json::from_str(r#"{ "core_allocation": "OsDefault" }"#).unwrap();
        assert_eq!(config.core_allocation, CoreAllocation::OsDefault);
        assert_eq!(config.worker_threads, 4);
    }
}
