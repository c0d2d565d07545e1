use anyhow::Result;
use nalgebra::{DMatrix, DVector};

/// Core interface implemented by any system of `n-1` equations in `n`
/// unknowns whose solution set is traced as a curve.
///
/// The last coordinate of every point is the continuation parameter.
/// Implementations are read-only after construction, so one instance can be
/// shared by several traces.
pub trait EquationSystem {
    /// Number of equations. Points have one more coordinate than this.
    fn dimension(&self) -> usize;

    /// Evaluate the residuals F(point) into `out` (length `dimension()`).
    fn residuals(&self, point: &DVector<f64>, out: &mut DVector<f64>) -> Result<()>;

    /// Evaluate the Jacobian of F into `out` (`dimension() x dimension()+1`,
    /// one row per equation).
    fn jacobian(&self, point: &DVector<f64>, out: &mut DMatrix<f64>) -> Result<()>;

    /// Scalar whose sign change between consecutive accepted points switches
    /// the tracer into targeted mode. The default never changes sign.
    fn criterion(&self, _point: &DVector<f64>, _tangent: &DVector<f64>) -> f64 {
        -1.0
    }
}

impl<S: EquationSystem + ?Sized> EquationSystem for &S {
    fn dimension(&self) -> usize {
        (**self).dimension()
    }

    fn residuals(&self, point: &DVector<f64>, out: &mut DVector<f64>) -> Result<()> {
        (**self).residuals(point, out)
    }

    fn jacobian(&self, point: &DVector<f64>, out: &mut DMatrix<f64>) -> Result<()> {
        (**self).jacobian(point, out)
    }

    fn criterion(&self, point: &DVector<f64>, tangent: &DVector<f64>) -> f64 {
        (**self).criterion(point, tangent)
    }
}

/// Receives every accepted point of a trace, then the final point once with
/// `terminal` set.
pub trait StepObserver {
    fn on_step(&mut self, point: &DVector<f64>, terminal: bool);

    /// Called once for every reversal of the orientation sign, right after
    /// the accepted point at which it happened. `omega` is the new sign.
    fn on_orientation_flip(&mut self, _point: &DVector<f64>, _omega: f64) {}
}

impl<F> StepObserver for F
where
    F: FnMut(&DVector<f64>, bool),
{
    fn on_step(&mut self, point: &DVector<f64>, terminal: bool) {
        self(point, terminal)
    }
}
