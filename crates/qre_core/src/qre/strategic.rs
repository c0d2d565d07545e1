use anyhow::Result;
use nalgebra::{DMatrix, DVector};

use super::{logit_jacobian, logit_residuals, FlatPayoffs, ProfileLayout};
use crate::continuation::EquationSystem;
use crate::error::QreError;
use crate::traits::StrategicGame;

/// Logit equations over the mixed strategies of a strategic game: one group
/// per player.
pub struct StrategicQreSystem<'a, G: StrategicGame + ?Sized> {
    game: &'a G,
    layout: ProfileLayout,
    prior: Vec<f64>,
    weights: Option<DVector<f64>>,
}

impl<'a, G: StrategicGame + ?Sized> StrategicQreSystem<'a, G> {
    /// System whose λ = 0 solution is the uniform profile.
    pub fn new(game: &'a G) -> Result<Self, QreError> {
        let layout = Self::layout_for(game)?;
        let prior = layout.uniform_profile();
        Self::with_layout(game, layout, &prior)
    }

    /// System whose λ = 0 solution is `profile`.
    pub fn from_profile(game: &'a G, profile: &[f64]) -> Result<Self, QreError> {
        let layout = Self::layout_for(game)?;
        Self::with_layout(game, layout, profile)
    }

    fn layout_for(game: &G) -> Result<ProfileLayout, QreError> {
        let mut layout = ProfileLayout::new();
        for player in 0..game.num_players() {
            let labels = (0..game.num_strategies(player))
                .map(|s| game.strategy_label(player, s))
                .collect();
            layout.push_group(player, 0, labels)?;
        }
        Ok(layout)
    }

    fn with_layout(game: &'a G, layout: ProfileLayout, profile: &[f64]) -> Result<Self, QreError> {
        let start = layout.start_point(profile, 0.0)?;
        let prior = start.rows(0, layout.dimension()).iter().copied().collect();
        Ok(Self {
            game,
            layout,
            prior,
            weights: None,
        })
    }

    /// Turns the criterion into the derivative of the log-likelihood
    /// `Σ w_i x_i` along the curve, so tracing stops at likelihood extrema.
    pub fn with_likelihood_weights(mut self, weights: &[f64]) -> Result<Self, QreError> {
        if weights.len() != self.layout.dimension() {
            return Err(QreError::DimensionMismatch {
                expected: self.layout.dimension(),
                found: weights.len(),
            });
        }
        if let Some((var, &value)) = weights
            .iter()
            .enumerate()
            .find(|(_, w)| !(w.is_finite() && **w >= 0.0))
        {
            return Err(QreError::InvalidWeight {
                label: self.layout.label(var).to_string(),
                value,
            });
        }
        self.weights = Some(DVector::from_column_slice(weights));
        Ok(self)
    }

    pub fn layout(&self) -> &ProfileLayout {
        &self.layout
    }

    /// The starting profile placed at `lambda`.
    pub fn start_point(&self, lambda: f64) -> Result<DVector<f64>, QreError> {
        if !(lambda.is_finite() && lambda >= 0.0) {
            return Err(QreError::InvalidLambda(lambda));
        }
        let mut point = DVector::zeros(self.layout.dimension() + 1);
        point.rows_mut(0, self.layout.dimension()).copy_from_slice(&self.prior);
        point[self.layout.lambda_index()] = lambda;
        Ok(point)
    }

    /// `Σ w_i x_i` at `point`, if likelihood weights are set.
    pub fn log_likelihood(&self, point: &DVector<f64>) -> Option<f64> {
        self.weights
            .as_ref()
            .map(|w| w.dot(&point.rows(0, self.layout.dimension())))
    }
}

impl<G: StrategicGame + ?Sized> FlatPayoffs for StrategicQreSystem<'_, G> {
    fn layout(&self) -> &ProfileLayout {
        &self.layout
    }

    fn prior_logs(&self) -> &[f64] {
        &self.prior
    }

    fn payoff(&self, profile: &[f64], var: usize) -> Result<f64> {
        let group = self.layout.group_of(var);
        self.game
            .strategy_payoff(profile, group.player, var - group.offset)
    }

    fn payoff_derivative(&self, profile: &[f64], var: usize, other: usize) -> Result<f64> {
        let group = self.layout.group_of(var);
        let other_group = self.layout.group_of(other);
        self.game.payoff_derivative(
            profile,
            group.player,
            var - group.offset,
            other_group.player,
            other - other_group.offset,
        )
    }
}

impl<G: StrategicGame + ?Sized> EquationSystem for StrategicQreSystem<'_, G> {
    fn dimension(&self) -> usize {
        self.layout.dimension()
    }

    fn residuals(&self, point: &DVector<f64>, out: &mut DVector<f64>) -> Result<()> {
        logit_residuals(self, point, out)
    }

    fn jacobian(&self, point: &DVector<f64>, out: &mut DMatrix<f64>) -> Result<()> {
        logit_jacobian(self, point, out)
    }

    fn criterion(&self, _point: &DVector<f64>, tangent: &DVector<f64>) -> f64 {
        match &self.weights {
            Some(w) => w.dot(&tangent.rows(0, self.layout.dimension())),
            None => -1.0,
        }
    }
}
