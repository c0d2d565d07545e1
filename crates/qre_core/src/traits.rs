use anyhow::Result;

/// A finite game in strategic (normal) form, seen through its payoff oracle.
///
/// Mixed profiles are passed as one flat slice of probabilities ordered by
/// player, then strategy. Errors raised by implementations are passed through
/// the equation systems and the tracer untouched.
pub trait StrategicGame {
    /// Number of players.
    fn num_players(&self) -> usize;

    /// Number of pure strategies available to `player`.
    fn num_strategies(&self, player: usize) -> usize;

    /// Human-readable name used in error messages.
    fn strategy_label(&self, player: usize, strategy: usize) -> String {
        format!("player {} strategy {}", player + 1, strategy + 1)
    }

    /// Expected payoff to `player` of playing `strategy` against `profile`.
    fn strategy_payoff(&self, profile: &[f64], player: usize, strategy: usize) -> Result<f64>;

    /// Derivative of [`strategy_payoff`](Self::strategy_payoff) for
    /// `(player, strategy)` with respect to the probability `other_player`
    /// assigns to `other_strategy`.
    fn payoff_derivative(
        &self,
        profile: &[f64],
        player: usize,
        strategy: usize,
        other_player: usize,
        other_strategy: usize,
    ) -> Result<f64>;
}

/// Position of one action in an extensive-form game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ActionRef {
    pub player: usize,
    pub infoset: usize,
    pub action: usize,
}

impl ActionRef {
    pub fn new(player: usize, infoset: usize, action: usize) -> Self {
        Self {
            player,
            infoset,
            action,
        }
    }
}

/// A finite game in extensive form, seen through its payoff oracle.
///
/// Behavior profiles are one flat slice of action probabilities ordered by
/// player, then information set, then action.
pub trait ExtensiveGame {
    fn num_players(&self) -> usize;

    fn num_infosets(&self, player: usize) -> usize;

    fn num_actions(&self, player: usize, infoset: usize) -> usize;

    fn action_label(&self, action: ActionRef) -> String {
        format!(
            "player {} infoset {} action {}",
            action.player + 1,
            action.infoset + 1,
            action.action + 1
        )
    }

    /// Expected payoff to the acting player of taking `action` at its
    /// information set under `behavior`.
    fn action_value(&self, behavior: &[f64], action: ActionRef) -> Result<f64>;

    /// Derivative of [`action_value`](Self::action_value) with respect to the
    /// probability of `other`.
    fn action_value_derivative(
        &self,
        behavior: &[f64],
        action: ActionRef,
        other: ActionRef,
    ) -> Result<f64>;
}
