use std::str::FromStr;

use simple_error::{bail, SimpleError};

/// Configuration of the program transformation engine.
#[derive(Debug, Clone)]
pub struct TransformConfig {
    /// Cap on iterations per For loop during speculative unrolling.
    pub max_unroll_iterations: usize,

    /// Cap on nested For-loop levels unrolled in a single pass.
    pub max_nested_unrollings: usize,

    /// Maximum descendant count of a callee body eligible for inlining.
    pub inline_call_node_threshold: usize,

    /// Whether to run the cone rewriter after program transformation.
    pub cone_rewriter_enabled: bool,
}

impl Default for TransformConfig {
    fn default() -> Self {
        TransformConfig {
            max_unroll_iterations: 1 << 20,
            max_nested_unrollings: 4,
            inline_call_node_threshold: 20,
            cone_rewriter_enabled: false,
        }
    }
}

impl TransformConfig {
    pub fn apply_knob(&mut self, knob: &OptimizationKnob) -> Result<(), SimpleError> {
        match knob.key.as_str() {
            "max_unroll_iterations" => {
                self.max_unroll_iterations = parse_value(&knob.key, &knob.value)?;
            }
            "max_nested_unrollings" => {
                self.max_nested_unrollings = parse_value(&knob.key, &knob.value)?;
            }
            "inline_call_node_threshold" => {
                self.inline_call_node_threshold = parse_value(&knob.key, &knob.value)?;
            }
            "cone_rewriter_enabled" => {
                self.cone_rewriter_enabled = parse_value(&knob.key, &knob.value)?;
            }
            unknown => bail!("unrecognized option '{}'", unknown),
        }
        Ok(())
    }
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T, SimpleError> {
    match value.parse() {
        Ok(parsed) => Ok(parsed),
        Err(_) => Err(SimpleError::new(format!("invalid value '{}' for option '{}'", value, key))),
    }
}

/// A `key=value` engine option given on the command line.
#[derive(Debug, Clone)]
pub struct OptimizationKnob {
    pub key: String,
    pub value: String,
}

impl FromStr for OptimizationKnob {
    type Err = SimpleError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.split_once('=') {
            Some((key, value)) if !key.is_empty() && !value.is_empty() => Ok(OptimizationKnob {
                key: key.trim().to_string(),
                value: value.trim().to_string(),
            }),
            _ => bail!("options must be of the form key=value, got '{}'", input),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = TransformConfig::default();
        assert_eq!(config.max_unroll_iterations, 1 << 20);
        assert_eq!(config.max_nested_unrollings, 4);
        assert_eq!(config.inline_call_node_threshold, 20);
        assert!(!config.cone_rewriter_enabled);
    }

    #[test]
    fn knobs_parse_and_apply() {
        let mut config = TransformConfig::default();
        let knob: OptimizationKnob = "max_unroll_iterations=64".parse().unwrap();
        config.apply_knob(&knob).unwrap();
        assert_eq!(config.max_unroll_iterations, 64);

        let knob: OptimizationKnob = "cone_rewriter_enabled=true".parse().unwrap();
        config.apply_knob(&knob).unwrap();
        assert!(config.cone_rewriter_enabled);
    }

    #[test]
    fn malformed_knobs_are_rejected() {
        assert!("no_equals_sign".parse::<OptimizationKnob>().is_err());
        let mut config = TransformConfig::default();
        let knob: OptimizationKnob = "unknown_option=1".parse().unwrap();
        assert!(config.apply_knob(&knob).is_err());
    }
}
