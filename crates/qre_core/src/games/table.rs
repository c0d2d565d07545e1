use anyhow::Result;
use nalgebra::DMatrix;

use crate::error::QreError;
use crate::traits::StrategicGame;

/// N-player normal-form game stored as a dense payoff table.
///
/// Pure profiles are indexed in mixed radix with player 0 most significant;
/// each row holds one payoff per player.
#[derive(Debug, Clone)]
pub struct TableGame {
    strategies: Vec<usize>,
    offsets: Vec<usize>,
    payoffs: Vec<Vec<f64>>,
    labels: Option<Vec<Vec<String>>>,
}

impl TableGame {
    pub fn new(strategies: Vec<usize>, payoffs: Vec<Vec<f64>>) -> Result<Self, QreError> {
        if strategies.is_empty() {
            return Err(QreError::MalformedGame("a game needs at least one player".to_string()));
        }
        if let Some(player) = strategies.iter().position(|&s| s == 0) {
            return Err(QreError::MalformedGame(format!(
                "player {} has no strategies",
                player + 1
            )));
        }
        let profiles: usize = strategies.iter().product();
        if payoffs.len() != profiles {
            return Err(QreError::MalformedGame(format!(
                "expected {} payoff rows, got {}",
                profiles,
                payoffs.len()
            )));
        }
        for (k, row) in payoffs.iter().enumerate() {
            if row.len() != strategies.len() {
                return Err(QreError::MalformedGame(format!(
                    "payoff row {} has {} entries for {} players",
                    k,
                    row.len(),
                    strategies.len()
                )));
            }
            if row.iter().any(|v| !v.is_finite()) {
                return Err(QreError::MalformedGame(format!("payoff row {k} is not finite")));
            }
        }

        let offsets = strategies
            .iter()
            .scan(0, |acc, &s| {
                let offset = *acc;
                *acc += s;
                Some(offset)
            })
            .collect();
        Ok(Self {
            strategies,
            offsets,
            payoffs,
            labels: None,
        })
    }

    /// Two-player game with row payoffs `a` and column payoffs `b`.
    pub fn bimatrix(a: &DMatrix<f64>, b: &DMatrix<f64>) -> Result<Self, QreError> {
        if a.shape() != b.shape() {
            return Err(QreError::MalformedGame(format!(
                "payoff matrices differ in shape: {:?} and {:?}",
                a.shape(),
                b.shape()
            )));
        }
        let (rows, cols) = a.shape();
        let payoffs = (0..rows)
            .flat_map(|i| (0..cols).map(move |j| (i, j)))
            .map(|(i, j)| vec![a[(i, j)], b[(i, j)]])
            .collect();
        Self::new(vec![rows, cols], payoffs)
    }

    /// Names strategies for error messages; one list per player.
    pub fn with_labels(mut self, labels: Vec<Vec<String>>) -> Result<Self, QreError> {
        let shape: Vec<usize> = labels.iter().map(Vec::len).collect();
        if shape != self.strategies {
            return Err(QreError::MalformedGame(format!(
                "labels cover {:?} strategies, game has {:?}",
                shape, self.strategies
            )));
        }
        self.labels = Some(labels);
        Ok(self)
    }

    fn check_profile(&self, profile: &[f64]) -> Result<(), QreError> {
        let expected: usize = self.strategies.iter().sum();
        if profile.len() != expected {
            return Err(QreError::DimensionMismatch {
                expected,
                found: profile.len(),
            });
        }
        Ok(())
    }

    /// Σ over pure profiles with the `fixed` players' strategies pinned of the
    /// payoff to `player`, weighted by every other player's probability.
    fn weighted_sum(&self, profile: &[f64], player: usize, fixed: &[(usize, usize)]) -> f64 {
        let players = self.strategies.len();
        let mut digits = vec![0usize; players];
        let mut total = 0.0;
        for row in &self.payoffs {
            let pinned = fixed.iter().all(|&(p, s)| digits[p] == s);
            if pinned {
                let weight: f64 = (0..players)
                    .filter(|p| !fixed.iter().any(|&(q, _)| q == *p))
                    .map(|p| profile[self.offsets[p] + digits[p]])
                    .product();
                total += weight * row[player];
            }

            // Advance the mixed-radix counter, least significant player last.
            for p in (0..players).rev() {
                digits[p] += 1;
                if digits[p] < self.strategies[p] {
                    break;
                }
                digits[p] = 0;
            }
        }
        total
    }
}

impl StrategicGame for TableGame {
    fn num_players(&self) -> usize {
        self.strategies.len()
    }

    fn num_strategies(&self, player: usize) -> usize {
        self.strategies[player]
    }

    fn strategy_label(&self, player: usize, strategy: usize) -> String {
        match &self.labels {
            Some(labels) => labels[player][strategy].clone(),
            None => format!("player {} strategy {}", player + 1, strategy + 1),
        }
    }

    fn strategy_payoff(&self, profile: &[f64], player: usize, strategy: usize) -> Result<f64> {
        self.check_profile(profile)?;
        Ok(self.weighted_sum(profile, player, &[(player, strategy)]))
    }

    fn payoff_derivative(
        &self,
        profile: &[f64],
        player: usize,
        strategy: usize,
        other_player: usize,
        other_strategy: usize,
    ) -> Result<f64> {
        self.check_profile(profile)?;
        if other_player == player {
            return Ok(0.0);
        }
        Ok(self.weighted_sum(
            profile,
            player,
            &[(player, strategy), (other_player, other_strategy)],
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matching_pennies() -> TableGame {
        let a = DMatrix::from_row_slice(2, 2, &[1.0, -1.0, -1.0, 1.0]);
        TableGame::bimatrix(&a, &(-&a)).expect("valid bimatrix")
    }

    #[test]
    fn bimatrix_rows_follow_row_player_first() {
        let a = DMatrix::from_row_slice(2, 3, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let b = a.map(|v| 10.0 * v);
        let game = TableGame::bimatrix(&a, &b).expect("valid bimatrix");
        assert_eq!(game.num_strategies(0), 2);
        assert_eq!(game.num_strategies(1), 3);

        // Pure profile (row 1, column 2).
        let profile = [0.0, 1.0, 0.0, 0.0, 1.0];
        let row = game.strategy_payoff(&profile, 0, 1).expect("payoff");
        let col = game.strategy_payoff(&profile, 1, 2).expect("payoff");
        assert_eq!(row, 6.0);
        assert_eq!(col, 60.0);
    }

    #[test]
    fn expected_payoff_mixes_opponents() {
        let game = matching_pennies();
        let profile = [0.3, 0.7, 0.25, 0.75];
        let heads = game.strategy_payoff(&profile, 0, 0).expect("payoff");
        assert!((heads - (0.25 - 0.75)).abs() < 1e-15);
        let tails = game.strategy_payoff(&profile, 1, 1).expect("payoff");
        assert!((tails - (0.3 - 0.7)).abs() < 1e-15);
    }

    #[test]
    fn derivatives_match_finite_differences() {
        let payoffs = (0..12)
            .map(|k| {
                let k = k as f64;
                vec![k.sin(), (2.0 * k).cos(), k * 0.1]
            })
            .collect();
        let game = TableGame::new(vec![2, 3, 2], payoffs).expect("valid table");
        let profile = [0.4, 0.6, 0.2, 0.3, 0.5, 0.9, 0.1];
        let offsets = [0, 2, 5];
        let eps = 1e-6;

        for player in 0..3 {
            for strategy in 0..game.num_strategies(player) {
                for other in 0..3 {
                    for other_strategy in 0..game.num_strategies(other) {
                        let var = offsets[other] + other_strategy;
                        let mut plus = profile;
                        plus[var] += eps;
                        let mut minus = profile;
                        minus[var] -= eps;
                        let numeric = (game.strategy_payoff(&plus, player, strategy).expect("payoff")
                            - game.strategy_payoff(&minus, player, strategy).expect("payoff"))
                            / (2.0 * eps);
                        let analytic = game
                            .payoff_derivative(&profile, player, strategy, other, other_strategy)
                            .expect("derivative");
                        assert!((numeric - analytic).abs() < 1e-8);
                    }
                }
            }
        }
    }

    #[test]
    fn malformed_tables_are_rejected() {
        assert!(matches!(
            TableGame::new(vec![2, 2], vec![vec![0.0, 0.0]; 3]),
            Err(QreError::MalformedGame(_))
        ));
        assert!(matches!(
            TableGame::new(vec![2, 0], Vec::new()),
            Err(QreError::MalformedGame(_))
        ));
        assert!(matches!(
            TableGame::new(vec![1], vec![vec![f64::NAN]]),
            Err(QreError::MalformedGame(_))
        ));
        let a = DMatrix::zeros(2, 2);
        let b = DMatrix::zeros(2, 3);
        assert!(TableGame::bimatrix(&a, &b).is_err());
    }

    #[test]
    fn labels_replace_default_names() {
        let game = matching_pennies()
            .with_labels(vec![
                vec!["heads".into(), "tails".into()],
                vec!["heads".into(), "tails".into()],
            ])
            .expect("labels fit");
        assert_eq!(game.strategy_label(1, 1), "tails");
        assert_eq!(matching_pennies().strategy_label(1, 0), "player 2 strategy 1");
        assert!(matching_pennies().with_labels(vec![vec!["x".into()]]).is_err());
    }

    #[test]
    fn wrong_profile_length_is_an_error() {
        let err = matching_pennies()
            .strategy_payoff(&[0.5; 3], 0, 0)
            .expect_err("short profile");
        assert!(format!("{err}").contains("expected 4, got 3"));
    }
}
