use std::collections::HashMap;

use crate::error::{Error, Result};

const ENV_HYBRID_PUNCTUATE: &str = "NUMAFLOW_HYBRID_PUNCTUATE";
const DEFAULT_HYBRID_PUNCTUATE: bool = true;

/// Construction-time configuration of a [crate::PunctuationScheduler]. Every scheduler carries its
/// own copy, so two schedulers in the same process can run with different policies.
#[derive(Debug, Clone, PartialEq)]
pub struct PunctuationConfig {
    /// When enabled, a schedule is also due once `armed_at + interval` is behind the wall clock,
    /// even if event time has not reached its deadline (e.g. the source stopped producing).
    pub hybrid_punctuate: bool,
}

impl Default for PunctuationConfig {
    fn default() -> Self {
        PunctuationConfig {
            hybrid_punctuate: DEFAULT_HYBRID_PUNCTUATE,
        }
    }
}

impl PunctuationConfig {
    /// Loads the config from the given environment variables. Unknown keys are ignored, missing
    /// keys fall back to the defaults.
    pub fn load(
        env_vars: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>,
    ) -> Result<Self> {
        let env_vars: HashMap<String, String> = env_vars
            .into_iter()
            .map(|(key, val)| (key.into(), val.into()))
            .filter(|(key, _val)| key == ENV_HYBRID_PUNCTUATE)
            .collect();

        let hybrid_punctuate = match env_vars.get(ENV_HYBRID_PUNCTUATE) {
            None => DEFAULT_HYBRID_PUNCTUATE,
            Some(val) => val.trim().to_lowercase().parse::<bool>().map_err(|e| {
                Error::Config(format!(
                    "Invalid value {val:?} for {ENV_HYBRID_PUNCTUATE}: {e}"
                ))
            })?,
        };

        Ok(Self { hybrid_punctuate })
    }

    pub fn with_hybrid_punctuate(mut self, enabled: bool) -> Self {
        self.hybrid_punctuate = enabled;
        self
    }
}
