//! Logit quantal response equilibrium equation systems.
//!
//! For every group `g` with members `r` (reference) and `i`:
//!
//! ```text
//! Σ_{i∈g} exp(x_i) - 1 = 0
//! (x_i - x_r) - λ (payoff(i) - payoff(r)) = 0
//! ```
//!
//! The state holds log-probabilities, so cross-group Jacobian entries carry
//! the chain-rule factor `p_j = exp(x_j)`. When the trace starts from a
//! non-uniform profile `p⁰`, the ratio equations are shifted by
//! `log p⁰_i - log p⁰_r` so that `p⁰` solves the system at λ = 0.

pub mod agent;
pub mod estimate;
pub mod layout;
pub mod strategic;

pub use agent::AgentQreSystem;
pub use estimate::{estimate, Estimate, EstimatorSettings, LikelihoodCandidate};
pub use layout::{Group, ProfileLayout};
pub use strategic::StrategicQreSystem;

use anyhow::Result;
use nalgebra::{DMatrix, DVector};

use crate::continuation::{trace, StepObserver, TraceConfig, TraceOutcome};
use crate::traits::{ExtensiveGame, StrategicGame};

/// Payoff oracle addressed by flat variable index.
pub(crate) trait FlatPayoffs {
    fn layout(&self) -> &ProfileLayout;

    /// Log-probabilities of the starting profile.
    fn prior_logs(&self) -> &[f64];

    fn payoff(&self, profile: &[f64], var: usize) -> Result<f64>;

    /// Derivative of `payoff(var)` with respect to the probability of `other`.
    fn payoff_derivative(&self, profile: &[f64], var: usize, other: usize) -> Result<f64>;
}

pub(crate) fn logit_residuals<P: FlatPayoffs + ?Sized>(
    payoffs: &P,
    point: &DVector<f64>,
    out: &mut DVector<f64>,
) -> Result<()> {
    let layout = payoffs.layout();
    debug_assert_eq!(point.len(), layout.dimension() + 1);
    debug_assert_eq!(out.len(), layout.dimension());

    let lambda = point[layout.lambda_index()];
    let profile = layout.probabilities(point);
    let prior = payoffs.prior_logs();

    for group in layout.groups() {
        let r = group.reference();
        out[r] = profile[group.members()].iter().sum::<f64>() - 1.0;
        if group.len == 1 {
            continue;
        }

        let reference = payoffs.payoff(&profile, r)?;
        for i in group.members().skip(1) {
            let gain = payoffs.payoff(&profile, i)? - reference;
            out[i] = (point[i] - point[r]) - (prior[i] - prior[r]) - lambda * gain;
        }
    }
    Ok(())
}

pub(crate) fn logit_jacobian<P: FlatPayoffs + ?Sized>(
    payoffs: &P,
    point: &DVector<f64>,
    out: &mut DMatrix<f64>,
) -> Result<()> {
    let layout = payoffs.layout();
    let n = layout.dimension();
    debug_assert_eq!(out.nrows(), n);
    debug_assert_eq!(out.ncols(), n + 1);

    let lambda = point[layout.lambda_index()];
    let profile = layout.probabilities(point);
    out.fill(0.0);

    let mut reference_derivs = vec![0.0; n];
    for group in layout.groups() {
        let r = group.reference();
        for k in group.members() {
            out[(r, k)] = profile[k];
        }
        if group.len == 1 {
            continue;
        }

        let reference = payoffs.payoff(&profile, r)?;
        for j in 0..n {
            if !layout.same_group(r, j) {
                reference_derivs[j] = payoffs.payoff_derivative(&profile, r, j)?;
            }
        }

        for i in group.members().skip(1) {
            out[(i, r)] = -1.0;
            out[(i, i)] = 1.0;
            for j in 0..n {
                if layout.same_group(i, j) {
                    continue;
                }
                let cross = payoffs.payoff_derivative(&profile, i, j)? - reference_derivs[j];
                out[(i, j)] = -lambda * profile[j] * cross;
            }
            out[(i, n)] = reference - payoffs.payoff(&profile, i)?;
        }
    }
    Ok(())
}

/// Traces the logit correspondence of a strategic game from `profile` at
/// λ = 0 up to `max_lambda`. Returns the final point with the outcome.
pub fn trace_strategic<G, O>(
    game: &G,
    profile: &[f64],
    max_lambda: f64,
    config: &TraceConfig,
    observer: &mut O,
) -> Result<(DVector<f64>, TraceOutcome)>
where
    G: StrategicGame + ?Sized,
    O: StepObserver + ?Sized,
{
    let system = StrategicQreSystem::from_profile(game, profile)?;
    let mut x = system.start_point(0.0)?;
    let mut omega = 1.0;
    let outcome = trace(&mut x, &system, observer, max_lambda, &mut omega, config)?;
    Ok((x, outcome))
}

/// Agent-form counterpart of [`trace_strategic`] for extensive games.
pub fn trace_agent<G, O>(
    game: &G,
    behavior: &[f64],
    max_lambda: f64,
    config: &TraceConfig,
    observer: &mut O,
) -> Result<(DVector<f64>, TraceOutcome)>
where
    G: ExtensiveGame + ?Sized,
    O: StepObserver + ?Sized,
{
    let system = AgentQreSystem::from_profile(game, behavior)?;
    let mut x = system.start_point(0.0)?;
    let mut omega = 1.0;
    let outcome = trace(&mut x, &system, observer, max_lambda, &mut omega, config)?;
    Ok((x, outcome))
}
