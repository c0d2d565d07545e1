pub mod continuation;
pub mod error;
pub mod games;
pub mod linalg;
pub mod qre;
/// The `qre_core` crate traces logit quantal response equilibrium
/// correspondences of finite games by numerical path following.
///
/// Key components:
/// - **Linalg**: Givens QR kernel giving the curve tangent and Newton corrections.
/// - **Continuation**: Euler-Newton predictor-corrector over any `EquationSystem`.
/// - **QRE**: logit equation systems for strategic games (one group per player)
///   and extensive games (one group per information set), plus likelihood sweeps.
/// - **Games**: reference payoff oracles (`TableGame`, `GameTree`).
pub mod traits;

pub use continuation::{
    tangent_at, trace, EquationSystem, PathRecord, PathRecorder, RecordTag, StepObserver,
    Termination, TraceConfig, TraceOutcome,
};
pub use error::QreError;
pub use qre::{estimate, trace_agent, trace_strategic, AgentQreSystem, StrategicQreSystem};
