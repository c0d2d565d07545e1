//! Configuration and result types for path tracing.

use nalgebra::DVector;
use serde::{Deserialize, Serialize};

use crate::error::QreError;

/// Settings for one call to [`trace`](super::trace).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceConfig {
    /// Initial step size along the curve.
    pub step_size: f64,
    /// Largest factor by which the step size may shrink (or grow) per step.
    pub max_decel: f64,
    /// When set and positive, stop exactly where the parameter equals this
    /// value instead of at the domain boundary.
    pub target: Option<f64>,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            step_size: 0.03,
            max_decel: 1.1,
            target: None,
        }
    }
}

impl TraceConfig {
    pub fn with_target(mut self, target: f64) -> Self {
        self.target = Some(target);
        self
    }

    pub fn validate(&self) -> Result<(), QreError> {
        if !(self.step_size.is_finite() && self.step_size > 0.0) {
            return Err(QreError::InvalidConfig(format!(
                "step size must be positive, got {}",
                self.step_size
            )));
        }
        if !(self.max_decel.is_finite() && self.max_decel > 1.0) {
            return Err(QreError::InvalidConfig(format!(
                "maximum deceleration must exceed 1, got {}",
                self.max_decel
            )));
        }
        if let Some(target) = self.target {
            if !target.is_finite() {
                return Err(QreError::InvalidConfig(format!(
                    "target parameter must be finite, got {target}"
                )));
            }
        }
        Ok(())
    }

    /// The configured target, if it is active.
    pub(crate) fn active_target(&self) -> Option<f64> {
        self.target.filter(|t| *t > 0.0)
    }
}

/// Why a trace stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Termination {
    /// The parameter left `[0, max_param)`.
    LeftDomain,
    /// Targeted mode drove the criterion to zero.
    Converged,
    /// The step size collapsed before any other stopping condition held.
    Stalled,
}

#[derive(Debug, Clone)]
pub struct TraceOutcome {
    pub termination: Termination,
    /// Number of accepted predictor-corrector steps.
    pub steps: usize,
    /// First accepted point past a criterion sign change, if one was seen.
    pub bracket: Option<DVector<f64>>,
}

impl TraceOutcome {
    pub fn is_stalled(&self) -> bool {
        self.termination == Termination::Stalled
    }
}

/// Label of one record in a traced path.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum RecordTag {
    /// An accepted step at this parameter value.
    Lambda(f64),
    /// The final point of the trace.
    Terminal,
}

/// One point of a traced path with its probabilities recovered from logs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathRecord {
    pub tag: RecordTag,
    pub probabilities: Vec<f64>,
}

impl PathRecord {
    pub fn from_point(point: &DVector<f64>, terminal: bool) -> Self {
        let last = point.len() - 1;
        let tag = if terminal {
            RecordTag::Terminal
        } else {
            RecordTag::Lambda(point[last])
        };
        Self {
            tag,
            probabilities: point.rows(0, last).iter().map(|x| x.exp()).collect(),
        }
    }

    pub fn lambda(&self) -> Option<f64> {
        match self.tag {
            RecordTag::Lambda(lambda) => Some(lambda),
            RecordTag::Terminal => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.tag == RecordTag::Terminal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_documented_values() {
        let config = TraceConfig::default();
        assert_eq!(config.step_size, 0.03);
        assert_eq!(config.max_decel, 1.1);
        assert!(config.target.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_config_fills_defaults() {
        let config: TraceConfig =
            serde_json::from_str(r#"{ "target": 2.5 }"#).expect("config should parse");
        assert_eq!(config.step_size, 0.03);
        assert_eq!(config.active_target(), Some(2.5));
    }

    #[test]
    fn non_positive_target_is_inactive() {
        let config = TraceConfig::default().with_target(0.0);
        assert!(config.validate().is_ok());
        assert_eq!(config.active_target(), None);
    }

    #[test]
    fn validate_rejects_bad_settings() {
        let shrinkless = TraceConfig {
            max_decel: 1.0,
            ..TraceConfig::default()
        };
        let message = format!("{}", shrinkless.validate().expect_err("expected error"));
        assert!(message.contains("maximum deceleration"));

        let negative = TraceConfig {
            step_size: -0.1,
            ..TraceConfig::default()
        };
        assert!(negative.validate().is_err());
    }

    #[test]
    fn record_from_point_exponentiates() {
        let point = DVector::from_vec(vec![0.0, (0.25f64).ln(), 3.0]);
        let record = PathRecord::from_point(&point, false);
        assert_eq!(record.lambda(), Some(3.0));
        assert!((record.probabilities[0] - 1.0).abs() < 1e-15);
        assert!((record.probabilities[1] - 0.25).abs() < 1e-15);

        let terminal = PathRecord::from_point(&point, true);
        assert!(terminal.is_terminal());
        assert_eq!(terminal.lambda(), None);
    }
}
