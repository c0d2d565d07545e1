use anyhow::Result;
use nalgebra::{DMatrix, DVector};

use super::{logit_jacobian, logit_residuals, FlatPayoffs, ProfileLayout};
use crate::continuation::EquationSystem;
use crate::error::QreError;
use crate::traits::{ActionRef, ExtensiveGame};

/// Logit equations over behavior strategies of an extensive game: one group
/// per information set (agent quantal response equilibrium).
pub struct AgentQreSystem<'a, G: ExtensiveGame + ?Sized> {
    game: &'a G,
    layout: ProfileLayout,
    prior: Vec<f64>,
}

impl<'a, G: ExtensiveGame + ?Sized> AgentQreSystem<'a, G> {
    pub fn new(game: &'a G) -> Result<Self, QreError> {
        let layout = Self::layout_for(game)?;
        let prior = layout.uniform_profile();
        Self::with_layout(game, layout, &prior)
    }

    pub fn from_profile(game: &'a G, behavior: &[f64]) -> Result<Self, QreError> {
        let layout = Self::layout_for(game)?;
        Self::with_layout(game, layout, behavior)
    }

    fn layout_for(game: &G) -> Result<ProfileLayout, QreError> {
        let mut layout = ProfileLayout::new();
        for player in 0..game.num_players() {
            for infoset in 0..game.num_infosets(player) {
                let labels = (0..game.num_actions(player, infoset))
                    .map(|a| game.action_label(ActionRef::new(player, infoset, a)))
                    .collect();
                layout.push_group(player, infoset, labels)?;
            }
        }
        Ok(layout)
    }

    fn with_layout(game: &'a G, layout: ProfileLayout, behavior: &[f64]) -> Result<Self, QreError> {
        let start = layout.start_point(behavior, 0.0)?;
        let prior = start.rows(0, layout.dimension()).iter().copied().collect();
        Ok(Self {
            game,
            layout,
            prior,
        })
    }

    pub fn layout(&self) -> &ProfileLayout {
        &self.layout
    }

    pub fn start_point(&self, lambda: f64) -> Result<DVector<f64>, QreError> {
        if !(lambda.is_finite() && lambda >= 0.0) {
            return Err(QreError::InvalidLambda(lambda));
        }
        let mut point = DVector::zeros(self.layout.dimension() + 1);
        point.rows_mut(0, self.layout.dimension()).copy_from_slice(&self.prior);
        point[self.layout.lambda_index()] = lambda;
        Ok(point)
    }

    fn action(&self, var: usize) -> ActionRef {
        let group = self.layout.group_of(var);
        ActionRef::new(group.player, group.index, var - group.offset)
    }
}

impl<G: ExtensiveGame + ?Sized> FlatPayoffs for AgentQreSystem<'_, G> {
    fn layout(&self) -> &ProfileLayout {
        &self.layout
    }

    fn prior_logs(&self) -> &[f64] {
        &self.prior
    }

    fn payoff(&self, profile: &[f64], var: usize) -> Result<f64> {
        self.game.action_value(profile, self.action(var))
    }

    fn payoff_derivative(&self, profile: &[f64], var: usize, other: usize) -> Result<f64> {
        self.game
            .action_value_derivative(profile, self.action(var), self.action(other))
    }
}

impl<G: ExtensiveGame + ?Sized> EquationSystem for AgentQreSystem<'_, G> {
    fn dimension(&self) -> usize {
        self.layout.dimension()
    }

    fn residuals(&self, point: &DVector<f64>, out: &mut DVector<f64>) -> Result<()> {
        logit_residuals(self, point, out)
    }

    fn jacobian(&self, point: &DVector<f64>, out: &mut DMatrix<f64>) -> Result<()> {
        logit_jacobian(self, point, out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::continuation::{PathRecorder, Termination, TraceConfig};
    use crate::games::GameTree;
    use crate::qre::test_support::assert_jacobian_matches;
    use crate::qre::trace_agent;

    /// Player 1 stays out (1, 2) or enters; player 2 then fights (-1, -1) or
    /// accommodates (2, 1).
    fn entry_game() -> GameTree {
        let mut tree = GameTree::new(2);
        let entrant = tree.add_infoset(0, &["out", "in"]).expect("infoset");
        let incumbent = tree.add_infoset(1, &["fight", "accommodate"]).expect("infoset");
        let out = tree.terminal(vec![1.0, 2.0]).expect("terminal");
        let fight = tree.terminal(vec![-1.0, -1.0]).expect("terminal");
        let accommodate = tree.terminal(vec![2.0, 1.0]).expect("terminal");
        let response = tree
            .decision(1, incumbent, vec![fight, accommodate])
            .expect("decision");
        let root = tree.decision(0, entrant, vec![out, response]).expect("decision");
        tree.set_root(root).expect("root");
        tree
    }

    /// Chance deals a high or low card to player 1, who raises or folds;
    /// player 2 sees only the raise and calls or folds.
    fn card_game() -> GameTree {
        let mut tree = GameTree::new(2);
        let high = tree.add_infoset(0, &["raise", "fold"]).expect("infoset");
        let low = tree.add_infoset(0, &["raise", "fold"]).expect("infoset");
        let respond = tree.add_infoset(1, &["call", "fold"]).expect("infoset");

        let deal = |tree: &mut GameTree, infoset: usize, showdown: f64| {
            let call = tree.terminal(vec![2.0 * showdown, -2.0 * showdown]).expect("terminal");
            let pass = tree.terminal(vec![1.0, -1.0]).expect("terminal");
            let response = tree.decision(1, respond, vec![call, pass]).expect("decision");
            let fold = tree.terminal(vec![-1.0, 1.0]).expect("terminal");
            tree.decision(0, infoset, vec![response, fold]).expect("decision")
        };
        let high_node = deal(&mut tree, high, 1.0);
        let low_node = deal(&mut tree, low, -1.0);
        let root = tree
            .chance(vec![0.5, 0.5], vec![high_node, low_node])
            .expect("chance");
        tree.set_root(root).expect("root");
        tree
    }

    #[test]
    fn layout_follows_player_then_infoset_order() {
        let tree = card_game();
        let system = AgentQreSystem::new(&tree).expect("system builds");
        let groups = system.layout().groups();
        assert_eq!(groups.len(), 3);
        assert_eq!((groups[1].player, groups[1].index, groups[1].offset), (0, 1, 2));
        assert_eq!((groups[2].player, groups[2].index, groups[2].offset), (1, 0, 4));
        assert_eq!(system.dimension(), 6);
    }

    #[test]
    fn jacobian_matches_finite_differences() {
        let tree = card_game();
        let behavior = [0.7, 0.3, 0.4, 0.6, 0.55, 0.45];
        let system = AgentQreSystem::from_profile(&tree, &behavior).expect("system builds");
        let point = system.start_point(2.3).expect("valid start");
        assert_jacobian_matches(&system, &point);

        let entry = entry_game();
        let system = AgentQreSystem::from_profile(&entry, &[0.2, 0.8, 0.6, 0.4]).expect("system builds");
        let point = system.start_point(0.9).expect("valid start");
        assert_jacobian_matches(&system, &point);
    }

    #[test]
    fn entry_game_reaches_subgame_perfect_equilibrium() {
        let tree = entry_game();
        let mut recorder = PathRecorder::new();
        let (_, outcome) = trace_agent(&tree, &[0.5; 4], 30.0, &TraceConfig::default(), &mut recorder)
            .expect("trace should succeed");

        assert_eq!(outcome.termination, Termination::LeftDomain);
        let terminal = recorder.terminal().expect("terminal record");
        let expected = [0.0, 1.0, 0.0, 1.0];
        for (p, e) in terminal.probabilities.iter().zip(expected) {
            assert!((p - e).abs() < 1e-3, "terminal profile {:?}", terminal.probabilities);
        }
    }

    #[test]
    fn every_reported_profile_sums_to_one_per_infoset() {
        let tree = card_game();
        let mut recorder = PathRecorder::new();
        trace_agent(&tree, &[0.5; 6], 5.0, &TraceConfig::default(), &mut recorder)
            .expect("trace should succeed");

        assert!(recorder.records.len() > 2);
        for record in &recorder.records {
            for pair in record.probabilities.chunks(2) {
                assert!((pair[0] + pair[1] - 1.0).abs() < 1e-4);
            }
        }
    }

    #[test]
    fn zero_probability_action_is_named() {
        let tree = entry_game();
        let err = AgentQreSystem::from_profile(&tree, &[0.5, 0.5, 0.0, 1.0])
            .err()
            .expect("zero probability must be rejected");
        assert!(format!("{err}").contains("fight at player 2 infoset 1"));
    }
}
