//! Lowering configuration.

use std::path::Path;

use serde::Deserialize;

use crate::error::{CompilerError, Result};

fn default_ctor_capacity() -> u64 {
    4
}

fn default_true() -> bool {
    true
}

/// Knobs for array lowering, loadable from JSON.
///
/// ```json
/// { "array_ctor_initial_capacity": 8, "assume_contiguous_boxes": false }
/// ```
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct LoweringOptions {
    /// Element capacity of a growable array-constructor buffer before the first doubling.
    #[serde(default = "default_ctor_capacity")]
    pub array_ctor_initial_capacity: u64,

    /// Treat every descriptor as contiguous and skip runtime contiguity tests.
    #[serde(default)]
    pub assume_contiguous_boxes: bool,

    /// Run the SSA verifier in `finish_function`.
    #[serde(default = "default_true")]
    pub verify_output: bool,
}

impl Default for LoweringOptions {
    fn default() -> Self {
        LoweringOptions {
            array_ctor_initial_capacity: default_ctor_capacity(),
            assume_contiguous_boxes: false,
            verify_output: true,
        }
    }
}

impl LoweringOptions {
    pub fn from_json(text: &str) -> Result<Self> {
        let options: LoweringOptions =
            serde_json::from_str(text).map_err(|e| CompilerError::Config(e.to_string()))?;
        options.validate()?;
        Ok(options)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    fn validate(&self) -> Result<()> {
        if self.array_ctor_initial_capacity == 0 {
            return Err(CompilerError::Config(
                "array_ctor_initial_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
