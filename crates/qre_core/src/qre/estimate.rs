//! Maximum-likelihood sweeps along the logit correspondence.
//!
//! Observed strategy frequencies weight the log-probabilities; the tracer's
//! criterion becomes the derivative of the log-likelihood along the curve, so
//! targeted mode lands on every likelihood-stationary point in turn.

use anyhow::Result;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use super::StrategicQreSystem;
use crate::continuation::{tangent_at, trace, EquationSystem, Termination, TraceConfig};
use crate::error::QreError;
use crate::traits::StrategicGame;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorSettings {
    pub trace: TraceConfig,
    /// Upper bound on λ for the whole sweep.
    pub max_lambda: f64,
    /// How many times the sweep resumes after a stationary point.
    pub max_restarts: usize,
}

impl Default for EstimatorSettings {
    fn default() -> Self {
        Self {
            trace: TraceConfig::default(),
            max_lambda: 1000.0,
            max_restarts: 64,
        }
    }
}

impl EstimatorSettings {
    pub fn validate(&self) -> Result<(), QreError> {
        self.trace.validate()?;
        if self.trace.active_target().is_some() {
            return Err(QreError::InvalidConfig(
                "likelihood sweeps cannot use a target parameter".to_string(),
            ));
        }
        if !(self.max_lambda.is_finite() && self.max_lambda > 0.0) {
            return Err(QreError::InvalidConfig(format!(
                "maximum λ must be positive and finite, got {}",
                self.max_lambda
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LikelihoodCandidate {
    pub lambda: f64,
    pub log_likelihood: f64,
    pub profile: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Estimate {
    /// Highest log-likelihood among the stationary points and the ends of the
    /// sweep.
    pub best: LikelihoodCandidate,
    /// Stationary points in the order the sweep found them.
    pub candidates: Vec<LikelihoodCandidate>,
    /// How the last trace of the sweep ended.
    pub termination: Termination,
}

/// Delegates to `inner`, except that the criterion at `start` is pinned to a
/// value taken just past the stationary point the sweep resumes from.
struct Resumed<'s, S: ?Sized> {
    inner: &'s S,
    start: Option<(DVector<f64>, f64)>,
}

impl<S: EquationSystem + ?Sized> EquationSystem for Resumed<'_, S> {
    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn residuals(&self, point: &DVector<f64>, out: &mut DVector<f64>) -> Result<()> {
        self.inner.residuals(point, out)
    }

    fn jacobian(&self, point: &DVector<f64>, out: &mut DMatrix<f64>) -> Result<()> {
        self.inner.jacobian(point, out)
    }

    fn criterion(&self, point: &DVector<f64>, tangent: &DVector<f64>) -> f64 {
        match &self.start {
            Some((start, value)) if start == point => *value,
            _ => self.inner.criterion(point, tangent),
        }
    }
}

fn candidate<G: StrategicGame + ?Sized>(
    system: &StrategicQreSystem<'_, G>,
    point: &DVector<f64>,
) -> LikelihoodCandidate {
    LikelihoodCandidate {
        lambda: point[system.layout().lambda_index()],
        log_likelihood: system.log_likelihood(point).unwrap_or(f64::NEG_INFINITY),
        profile: system.layout().probabilities(point),
    }
}

/// Sweeps the logit correspondence of `game` from the uniform profile and
/// returns the point of highest likelihood for the observed `frequencies`
/// (one non-negative count per strategy, in layout order).
pub fn estimate<G: StrategicGame + ?Sized>(
    game: &G,
    frequencies: &[f64],
    settings: &EstimatorSettings,
) -> Result<Estimate> {
    settings.validate()?;
    let system = StrategicQreSystem::new(game)?.with_likelihood_weights(frequencies)?;

    let mut x = system.start_point(0.0)?;
    let origin = candidate(&system, &x);
    let mut omega = 1.0;
    let mut ignore = |_: &DVector<f64>, _: bool| {};
    let mut candidates = Vec::new();
    let mut start = None;
    let mut restarts = 0usize;

    log::info!(
        "estimating {} strategy probabilities up to λ={}",
        system.dimension(),
        settings.max_lambda
    );

    let termination = loop {
        let resumed = Resumed {
            inner: &system,
            start: start.take(),
        };
        let outcome = trace(
            &mut x,
            &resumed,
            &mut ignore,
            settings.max_lambda,
            &mut omega,
            &settings.trace,
        )?;
        if outcome.termination != Termination::Converged {
            break outcome.termination;
        }

        let found = candidate(&system, &x);
        log::debug!(
            "likelihood stationary at λ={:.6} (log-likelihood {:.6})",
            found.lambda,
            found.log_likelihood
        );
        candidates.push(found);

        if matches!(&resumed.start, Some((previous, _)) if *previous == x) {
            break Termination::Converged;
        }
        if restarts >= settings.max_restarts {
            log::warn!(
                "likelihood sweep stopped after {} restarts at λ={:.6}",
                restarts,
                x[system.layout().lambda_index()]
            );
            break Termination::Converged;
        }
        let Some(bracket) = outcome.bracket else {
            break Termination::Converged;
        };
        let past = system.criterion(&bracket, &tangent_at(&system, &bracket)?);
        start = Some((x.clone(), past));
        restarts += 1;
    };

    let last = candidate(&system, &x);
    let best = candidates
        .iter()
        .chain([&origin, &last])
        .max_by(|a, b| a.log_likelihood.total_cmp(&b.log_likelihood))
        .cloned()
        .unwrap_or(last.clone());

    log::info!(
        "estimate at λ={:.6} with log-likelihood {:.6} ({} stationary points)",
        best.lambda,
        best.log_likelihood,
        candidates.len()
    );

    Ok(Estimate {
        best,
        candidates,
        termination,
    })
}
