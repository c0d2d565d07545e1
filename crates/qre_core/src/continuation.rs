//! Euler-Newton path tracing for implicitly defined curves `F(x) = 0`.
//!
//! The engine is generic over [`EquationSystem`] and [`StepObserver`]; all
//! linear algebra goes through the Givens kernel in [`crate::linalg`].

pub mod problem;
pub mod recorder;
pub mod types;

pub use problem::{EquationSystem, StepObserver};
pub use recorder::PathRecorder;
pub use types::{PathRecord, RecordTag, Termination, TraceConfig, TraceOutcome};

use anyhow::Result;
use nalgebra::{DMatrix, DVector};

use crate::error::QreError;
use crate::linalg::{back_substitute_and_project, qr_decompose, tangent_from};

/// Corrections longer than this reject the step outright.
const MAX_DIST: f64 = 0.4;
/// Largest accepted ratio between consecutive corrections.
const MAX_CONTRACTION: f64 = 0.6;
/// Corrector stops once a correction is shorter than this.
const CORRECTOR_TOL: f64 = 1e-4;
/// Keeps the contraction ratio finite when the previous correction is ~0.
const ETA: f64 = 0.1;
/// Gain applied to the square-rooted distance and contraction ratios when
/// estimating how much the next step should shrink.
const DECEL_GAIN: f64 = 2.0;
const MIN_STEP: f64 = 1e-8;
const MAX_CORRECTOR_ITERATIONS: usize = 100;

/// Jacobian storage and its QR factors at one point.
struct Factorization {
    jac: DMatrix<f64>,
    b: DMatrix<f64>,
    q: DMatrix<f64>,
}

impl Factorization {
    fn new(dim: usize) -> Self {
        Self {
            jac: DMatrix::zeros(dim, dim + 1),
            b: DMatrix::zeros(dim + 1, dim),
            q: DMatrix::zeros(dim + 1, dim + 1),
        }
    }

    fn factor<S: EquationSystem + ?Sized>(
        &mut self,
        system: &S,
        point: &DVector<f64>,
    ) -> Result<()> {
        system.jacobian(point, &mut self.jac)?;
        self.b.tr_copy_from(&self.jac);
        qr_decompose(&mut self.b, &mut self.q);
        Ok(())
    }
}

/// Scratch buffers for one trace, allocated once and reused by every step.
struct TraceWorkspace {
    factors: Factorization,
    u: DVector<f64>,
    t: DVector<f64>,
    new_t: DVector<f64>,
    y: DVector<f64>,
}

impl TraceWorkspace {
    fn new(dim: usize) -> Self {
        Self {
            factors: Factorization::new(dim),
            u: DVector::zeros(dim + 1),
            t: DVector::zeros(dim + 1),
            new_t: DVector::zeros(dim + 1),
            y: DVector::zeros(dim),
        }
    }
}

/// Newton-corrects `ws.u` back onto the curve using the Jacobian factored at
/// the predicted point. Returns the deceleration estimate on success and
/// `None` when the step must be rejected.
fn correct<S: EquationSystem + ?Sized>(
    system: &S,
    ws: &mut TraceWorkspace,
    max_decel: f64,
) -> Result<Option<f64>> {
    ws.factors.factor(system, &ws.u)?;

    let mut decel = 1.0 / max_decel;
    let mut previous = 0.0;
    for iter in 1..=MAX_CORRECTOR_ITERATIONS {
        system.residuals(&ws.u, &mut ws.y)?;
        let dist = back_substitute_and_project(&ws.factors.q, &ws.factors.b, &mut ws.u, &mut ws.y);

        if !(dist < MAX_DIST) {
            return Ok(None);
        }
        decel = decel.max((dist / MAX_DIST).sqrt() * DECEL_GAIN);

        if iter >= 2 {
            let contraction = dist / (previous + CORRECTOR_TOL * ETA);
            if contraction > MAX_CONTRACTION {
                return Ok(None);
            }
            decel = decel.max((contraction / MAX_CONTRACTION).sqrt() * DECEL_GAIN);
        }

        if dist <= CORRECTOR_TOL {
            return Ok(Some(decel));
        }
        previous = dist;
    }

    Ok(None)
}

/// Describes where a stalled trace gave up: the last parameter value and the
/// profile there, which need not be an equilibrium.
fn stall_report(point: &DVector<f64>, steps: usize) -> String {
    let last = point.len() - 1;
    let profile: Vec<f64> = point.rows(0, last).iter().map(|x| x.exp()).collect();
    format!(
        "tracing stalled at λ={:.6} after {} steps with profile {:?}",
        point[last], steps, profile
    )
}

/// Unit tangent of the curve at `point`. Its last coordinate has the sign of
/// the determinant of the Jacobian's leading square block.
pub fn tangent_at<S: EquationSystem + ?Sized>(
    system: &S,
    point: &DVector<f64>,
) -> Result<DVector<f64>> {
    let dim = system.dimension();
    if point.len() != dim + 1 {
        return Err(QreError::DimensionMismatch {
            expected: dim + 1,
            found: point.len(),
        }
        .into());
    }
    let mut factors = Factorization::new(dim);
    factors.factor(system, point)?;
    let mut tangent = DVector::zeros(dim + 1);
    tangent_from(&factors.q, &mut tangent);
    Ok(tangent)
}

/// Traces the curve defined by `system` from `x` while its last coordinate
/// stays in `[0, max_param)`.
///
/// `x` must already solve the system to working tolerance; on return it
/// holds the final point, which is also reported to `observer` as terminal.
/// `omega` is the orientation sign (+1 or -1) and is flipped in place each
/// time the curve's tangent reverses.
///
/// Errors come only from configuration validation and from `system` itself;
/// numerical trouble is reported through [`Termination::Stalled`].
pub fn trace<S, O>(
    x: &mut DVector<f64>,
    system: &S,
    observer: &mut O,
    max_param: f64,
    omega: &mut f64,
    config: &TraceConfig,
) -> Result<TraceOutcome>
where
    S: EquationSystem + ?Sized,
    O: StepObserver + ?Sized,
{
    config.validate()?;
    let dim = system.dimension();
    if x.len() != dim + 1 {
        return Err(QreError::DimensionMismatch {
            expected: dim + 1,
            found: x.len(),
        }
        .into());
    }
    if max_param.is_nan() {
        return Err(QreError::InvalidConfig("parameter bound is NaN".to_string()).into());
    }
    if *omega != 1.0 && *omega != -1.0 {
        return Err(QreError::InvalidConfig(format!("orientation must be ±1, got {omega}")).into());
    }

    let last = dim;
    let target = config.active_target();
    let criterion = |point: &DVector<f64>, tangent: &DVector<f64>| match target {
        Some(target) => point[last] - target,
        None => system.criterion(point, tangent),
    };

    let mut ws = TraceWorkspace::new(dim);
    ws.factors.factor(system, x)?;
    tangent_from(&ws.factors.q, &mut ws.t);

    let mut h = config.step_size;
    let mut targeted = false;
    let mut restart: Option<DVector<f64>> = None;
    let mut steps = 0usize;

    log::info!(
        "tracing {} equations from λ={:.6} towards {}",
        dim,
        x[last],
        max_param
    );

    let termination = loop {
        let lambda = x[last];
        if !(lambda >= 0.0 && lambda < max_param) {
            break Termination::LeftDomain;
        }
        if !(h.abs() > MIN_STEP) {
            break if targeted {
                Termination::Converged
            } else {
                Termination::Stalled
            };
        }

        // Predictor
        ws.u.copy_from(x);
        ws.u.axpy(h * *omega, &ws.t, 1.0);

        let decel = match correct(system, &mut ws, config.max_decel)? {
            Some(decel) => decel,
            None => {
                h /= config.max_decel;
                log::debug!("rejected step at λ={:.6}, step size now {:e}", lambda, h);
                if !(h.abs() > MIN_STEP) {
                    break Termination::Stalled;
                }
                continue;
            }
        };

        ws.factors.factor(system, &ws.u)?;
        tangent_from(&ws.factors.q, &mut ws.new_t);

        let before = criterion(&*x, &ws.t);
        let after = criterion(&ws.u, &ws.new_t);
        if !targeted && before * after < 0.0 {
            log::debug!("criterion changed sign near λ={:.6}", ws.u[last]);
            targeted = true;
            restart = Some(ws.u.clone());
        }
        if targeted {
            // Secant step towards the criterion's zero.
            let denom = after - before;
            h = if denom != 0.0 { -h * after / denom } else { 0.0 };
        } else {
            h = (h / decel.min(config.max_decel)).abs();
        }

        x.copy_from(&ws.u);
        steps += 1;
        observer.on_step(x, false);

        if ws.t.dot(&ws.new_t) < 0.0 {
            *omega = -*omega;
            log::debug!("orientation reversed at λ={:.6}", x[last]);
            observer.on_orientation_flip(x, *omega);
        }
        std::mem::swap(&mut ws.t, &mut ws.new_t);
    };

    if targeted && termination != Termination::Converged {
        if let Some(point) = &restart {
            x.copy_from(point);
        }
    }

    match termination {
        Termination::Stalled => log::warn!("{}", stall_report(x, steps)),
        _ => log::info!(
            "trace finished at λ={:.6} after {} steps ({:?})",
            x[last],
            steps,
            termination
        ),
    }
    observer.on_step(x, true);

    Ok(TraceOutcome {
        termination,
        steps,
        bracket: restart,
    })
}
