//! Extensive-form games as an arena of nodes.
//!
//! Nodes are added bottom-up: a node's children must exist before it does,
//! and every node has at most one parent, so the arena is always a forest.
//! Perfect recall is assumed and not checked; with it every behavior
//! probability appears at most once on any path, which makes the reach
//! products below affine in each single probability.

use anyhow::Result;

use crate::error::QreError;
use crate::traits::{ActionRef, ExtensiveGame};

/// Tolerance on chance probabilities summing to one.
const CHANCE_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone)]
enum Node {
    Terminal {
        payoffs: Vec<f64>,
    },
    Chance {
        probs: Vec<f64>,
        children: Vec<usize>,
    },
    Decision {
        player: usize,
        infoset: usize,
        children: Vec<usize>,
    },
}

#[derive(Debug, Clone, Default)]
pub struct GameTree {
    players: usize,
    nodes: Vec<Node>,
    /// `(parent node, branch)` for every node that has been attached.
    parents: Vec<Option<(usize, usize)>>,
    /// Action names, per player and information set.
    actions: Vec<Vec<Vec<String>>>,
    root: Option<usize>,
}

impl GameTree {
    pub fn new(players: usize) -> Self {
        Self {
            players,
            actions: vec![Vec::new(); players],
            ..Self::default()
        }
    }

    /// Declares the next information set of `player` and returns its index.
    pub fn add_infoset(&mut self, player: usize, actions: &[&str]) -> Result<usize, QreError> {
        if player >= self.players {
            return Err(QreError::MalformedGame(format!(
                "player {} does not exist in a {}-player game",
                player + 1,
                self.players
            )));
        }
        if actions.is_empty() {
            return Err(QreError::EmptyGroup(format!(
                "player {} infoset {}",
                player + 1,
                self.actions[player].len() + 1
            )));
        }
        self.actions[player].push(actions.iter().map(|a| a.to_string()).collect());
        Ok(self.actions[player].len() - 1)
    }

    pub fn terminal(&mut self, payoffs: Vec<f64>) -> Result<usize, QreError> {
        if payoffs.len() != self.players {
            return Err(QreError::MalformedGame(format!(
                "terminal has {} payoffs for {} players",
                payoffs.len(),
                self.players
            )));
        }
        if payoffs.iter().any(|v| !v.is_finite()) {
            return Err(QreError::MalformedGame("terminal payoff is not finite".to_string()));
        }
        Ok(self.push(Node::Terminal { payoffs }))
    }

    pub fn chance(&mut self, probs: Vec<f64>, children: Vec<usize>) -> Result<usize, QreError> {
        if probs.is_empty() || probs.len() != children.len() {
            return Err(QreError::MalformedGame(format!(
                "chance node has {} probabilities for {} children",
                probs.len(),
                children.len()
            )));
        }
        if probs.iter().any(|p| !(p.is_finite() && *p >= 0.0))
            || (probs.iter().sum::<f64>() - 1.0).abs() > CHANCE_TOLERANCE
        {
            return Err(QreError::MalformedGame(format!(
                "chance probabilities {probs:?} do not form a distribution"
            )));
        }
        self.check_children(&children)?;
        Ok(self.attach(Node::Chance { probs, children }))
    }

    pub fn decision(
        &mut self,
        player: usize,
        infoset: usize,
        children: Vec<usize>,
    ) -> Result<usize, QreError> {
        let actions = self
            .actions
            .get(player)
            .and_then(|sets| sets.get(infoset))
            .map(Vec::len)
            .ok_or_else(|| {
                QreError::MalformedGame(format!(
                    "player {} has no infoset {}",
                    player + 1,
                    infoset + 1
                ))
            })?;
        if children.len() != actions {
            return Err(QreError::MalformedGame(format!(
                "decision node has {} children for {} actions",
                children.len(),
                actions
            )));
        }
        self.check_children(&children)?;
        Ok(self.attach(Node::Decision {
            player,
            infoset,
            children,
        }))
    }

    pub fn set_root(&mut self, node: usize) -> Result<(), QreError> {
        if node >= self.nodes.len() || self.parents[node].is_some() {
            return Err(QreError::MalformedGame(format!(
                "node {node} cannot be the root"
            )));
        }
        self.root = Some(node);
        Ok(())
    }

    fn check_children(&self, children: &[usize]) -> Result<(), QreError> {
        for (i, &child) in children.iter().enumerate() {
            if child >= self.nodes.len() {
                return Err(QreError::MalformedGame(format!("node {child} does not exist")));
            }
            if self.parents[child].is_some() || children[..i].contains(&child) {
                return Err(QreError::MalformedGame(format!(
                    "node {child} already has a parent"
                )));
            }
        }
        Ok(())
    }

    fn push(&mut self, node: Node) -> usize {
        self.nodes.push(node);
        self.parents.push(None);
        self.nodes.len() - 1
    }

    fn attach(&mut self, node: Node) -> usize {
        let children = match &node {
            Node::Chance { children, .. } | Node::Decision { children, .. } => children.clone(),
            Node::Terminal { .. } => Vec::new(),
        };
        let id = self.push(node);
        for (branch, child) in children.into_iter().enumerate() {
            self.parents[child] = Some((id, branch));
        }
        id
    }

    /// Flat index of `action` in a behavior profile.
    fn var(&self, action: ActionRef) -> usize {
        let before: usize = self.actions[..action.player]
            .iter()
            .flatten()
            .map(Vec::len)
            .sum();
        let within: usize = self.actions[action.player][..action.infoset]
            .iter()
            .map(Vec::len)
            .sum();
        before + within + action.action
    }

    fn check_behavior(&self, behavior: &[f64]) -> Result<usize, QreError> {
        let root = self
            .root
            .ok_or_else(|| QreError::MalformedGame("tree has no root".to_string()))?;
        let expected: usize = self.actions.iter().flatten().map(Vec::len).sum();
        if behavior.len() != expected {
            return Err(QreError::DimensionMismatch {
                expected,
                found: behavior.len(),
            });
        }
        Ok(root)
    }

    /// Expected payoff to `player` from `node` on.
    fn value(&self, node: usize, player: usize, prob: &impl Fn(usize) -> f64) -> f64 {
        match &self.nodes[node] {
            Node::Terminal { payoffs } => payoffs[player],
            Node::Chance { probs, children } => probs
                .iter()
                .zip(children)
                .map(|(p, &child)| p * self.value(child, player, prob))
                .sum(),
            Node::Decision {
                player: mover,
                infoset,
                children,
            } => children
                .iter()
                .enumerate()
                .map(|(a, &child)| {
                    prob(self.var(ActionRef::new(*mover, *infoset, a)))
                        * self.value(child, player, prob)
                })
                .sum(),
        }
    }

    /// Probability that chance and everyone but `player` lead from `root` to
    /// `node`, or `None` if `node` is not below `root`.
    fn outside_reach(
        &self,
        root: usize,
        mut node: usize,
        player: usize,
        prob: &impl Fn(usize) -> f64,
    ) -> Option<f64> {
        let mut reach = 1.0;
        while node != root {
            let (parent, branch) = self.parents[node]?;
            reach *= match &self.nodes[parent] {
                Node::Chance { probs, .. } => probs[branch],
                Node::Decision {
                    player: mover,
                    infoset,
                    ..
                } if *mover != player => prob(self.var(ActionRef::new(*mover, *infoset, branch))),
                _ => 1.0,
            };
            node = parent;
        }
        Some(reach)
    }

    /// Numerator and denominator of the conditional value of `action`: the
    /// belief-weighted sum of its continuation values and the total weight.
    /// With `equal_weights` every member node of the information set counts
    /// once regardless of how likely it is to be reached.
    fn conditional(
        &self,
        root: usize,
        action: ActionRef,
        prob: &impl Fn(usize) -> f64,
        equal_weights: bool,
    ) -> (f64, f64) {
        let mut numerator = 0.0;
        let mut denominator = 0.0;
        for (id, node) in self.nodes.iter().enumerate() {
            let Node::Decision {
                player,
                infoset,
                children,
            } = node
            else {
                continue;
            };
            if *player != action.player || *infoset != action.infoset {
                continue;
            }
            if let Some(reach) = self.outside_reach(root, id, action.player, prob) {
                let weight = if equal_weights { 1.0 } else { reach };
                numerator += weight * self.value(children[action.action], action.player, prob);
                denominator += weight;
            }
        }
        (numerator, denominator)
    }
}

impl ExtensiveGame for GameTree {
    fn num_players(&self) -> usize {
        self.players
    }

    fn num_infosets(&self, player: usize) -> usize {
        self.actions[player].len()
    }

    fn num_actions(&self, player: usize, infoset: usize) -> usize {
        self.actions[player][infoset].len()
    }

    fn action_label(&self, action: ActionRef) -> String {
        format!(
            "{} at player {} infoset {}",
            self.actions[action.player][action.infoset][action.action],
            action.player + 1,
            action.infoset + 1
        )
    }

    /// Conditional expected payoff of `action` given that its information set
    /// is reached, with beliefs from chance and the other players' behavior.
    /// An unreachable information set weighs its nodes equally.
    fn action_value(&self, behavior: &[f64], action: ActionRef) -> Result<f64> {
        let root = self.check_behavior(behavior)?;
        let prob = |var: usize| behavior[var];
        let (mut numerator, mut denominator) = self.conditional(root, action, &prob, false);
        if denominator == 0.0 {
            (numerator, denominator) = self.conditional(root, action, &prob, true);
            if denominator == 0.0 {
                return Ok(0.0);
            }
        }
        Ok(numerator / denominator)
    }

    fn action_value_derivative(
        &self,
        behavior: &[f64],
        action: ActionRef,
        other: ActionRef,
    ) -> Result<f64> {
        let root = self.check_behavior(behavior)?;
        let target = self.var(other);
        let pinned = |value: f64| move |var: usize| if var == target { value } else { behavior[var] };

        let prob = |var: usize| behavior[var];
        let (mut n, mut d) = self.conditional(root, action, &prob, false);
        // Differentiate the same weighting that `action_value` falls back to.
        let equal_weights = d == 0.0;
        if equal_weights {
            (n, d) = self.conditional(root, action, &prob, true);
            if d == 0.0 {
                return Ok(0.0);
            }
        }
        let (n1, d1) = self.conditional(root, action, &pinned(1.0), equal_weights);
        let (n0, d0) = self.conditional(root, action, &pinned(0.0), equal_weights);
        let (dn, dd) = (n1 - n0, d1 - d0);
        Ok((dn * d - n * dd) / (d * d))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::games::TableGame;
    use crate::traits::StrategicGame;
    use nalgebra::DMatrix;

    /// Simultaneous-move game as a tree: player 2 cannot see player 1's move.
    fn simultaneous(a: &DMatrix<f64>, b: &DMatrix<f64>) -> GameTree {
        let mut tree = GameTree::new(2);
        let row = tree.add_infoset(0, &["top", "bottom"]).expect("infoset");
        let col = tree.add_infoset(1, &["left", "right"]).expect("infoset");
        let branches = (0..2)
            .map(|i| {
                let leaves = (0..2)
                    .map(|j| tree.terminal(vec![a[(i, j)], b[(i, j)]]).expect("terminal"))
                    .collect();
                tree.decision(1, col, leaves).expect("decision")
            })
            .collect();
        let root = tree.decision(0, row, branches).expect("decision");
        tree.set_root(root).expect("root");
        tree
    }

    /// Chance picks a type, player 1 signals, player 2 sees only the signal.
    fn signalling() -> GameTree {
        let mut tree = GameTree::new(2);
        let strong = tree.add_infoset(0, &["beer", "quiche"]).expect("infoset");
        let weak = tree.add_infoset(0, &["beer", "quiche"]).expect("infoset");
        let after_beer = tree.add_infoset(1, &["duel", "retreat"]).expect("infoset");
        let after_quiche = tree.add_infoset(1, &["duel", "retreat"]).expect("infoset");

        let typed = |tree: &mut GameTree, infoset: usize, duel: [f64; 2], retreat: [f64; 2]| {
            let responses = [after_beer, after_quiche]
                .into_iter()
                .enumerate()
                .map(|(signal, response)| {
                    let bonus = if signal == 0 { 1.0 } else { 0.0 };
                    let d = tree
                        .terminal(vec![duel[0] + bonus, duel[1]])
                        .expect("terminal");
                    let r = tree
                        .terminal(vec![retreat[0] + bonus, retreat[1]])
                        .expect("terminal");
                    tree.decision(1, response, vec![d, r]).expect("decision")
                })
                .collect();
            tree.decision(0, infoset, responses).expect("decision")
        };
        let strong_node = typed(&mut tree, strong, [0.0, -1.0], [2.0, 0.0]);
        let weak_node = typed(&mut tree, weak, [-1.0, 1.0], [1.0, 0.0]);
        let root = tree
            .chance(vec![0.9, 0.1], vec![strong_node, weak_node])
            .expect("chance");
        tree.set_root(root).expect("root");
        tree
    }

    fn each_action(tree: &GameTree) -> Vec<ActionRef> {
        (0..tree.num_players())
            .flat_map(|p| {
                (0..tree.num_infosets(p)).flat_map(move |i| {
                    (0..tree.num_actions(p, i)).map(move |a| ActionRef::new(p, i, a))
                })
            })
            .collect()
    }

    #[test]
    fn simultaneous_tree_matches_table() {
        let a = DMatrix::from_row_slice(2, 2, &[3.0, 0.0, 5.0, 1.0]);
        let b = DMatrix::from_row_slice(2, 2, &[2.0, -1.0, 4.0, 0.5]);
        let tree = simultaneous(&a, &b);
        let table = TableGame::bimatrix(&a, &b).expect("valid bimatrix");
        let profile = [0.35, 0.65, 0.8, 0.2];

        for player in 0..2 {
            for s in 0..2 {
                let from_tree = tree
                    .action_value(&profile, ActionRef::new(player, 0, s))
                    .expect("value");
                let from_table = table.strategy_payoff(&profile, player, s).expect("payoff");
                assert!((from_tree - from_table).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn beliefs_follow_chance_and_signals() {
        let tree = signalling();
        let behavior = [0.8, 0.2, 0.3, 0.7, 0.5, 0.5, 0.5, 0.5];
        // After beer, player 2 believes strong with 0.9 * 0.8 vs 0.1 * 0.3.
        let strong = 0.9 * 0.8;
        let weak = 0.1 * 0.3;
        let duel = (strong * -1.0 + weak * 1.0) / (strong + weak);
        let value = tree
            .action_value(&behavior, ActionRef::new(1, 0, 0))
            .expect("value");
        assert!((value - duel).abs() < 1e-12);
    }

    fn assert_derivatives_match(tree: &GameTree, behavior: &[f64]) {
        let actions = each_action(tree);
        let eps = 1e-6;

        for &action in &actions {
            for &other in &actions {
                let var = tree.var(other);
                let mut plus = behavior.to_vec();
                plus[var] += eps;
                let mut minus = behavior.to_vec();
                minus[var] -= eps;
                let numeric = (tree.action_value(&plus, action).expect("value")
                    - tree.action_value(&minus, action).expect("value"))
                    / (2.0 * eps);
                let analytic = tree
                    .action_value_derivative(behavior, action, other)
                    .expect("derivative");
                assert!(
                    (numeric - analytic).abs() < 1e-6,
                    "{action:?} by {other:?}: {analytic} vs {numeric}"
                );
            }
        }
    }

    /// Chance never takes the branch on which player 2 moves; player 1
    /// moves again after player 2's first action.
    fn dead_branch() -> GameTree {
        let mut tree = GameTree::new(2);
        let opening = tree.add_infoset(0, &["left", "right"]).expect("infoset");
        let hidden = tree.add_infoset(1, &["a", "b"]).expect("infoset");
        let follow_up = tree.add_infoset(0, &["x", "y"]).expect("infoset");

        let l = tree.terminal(vec![1.0, 0.0]).expect("terminal");
        let r = tree.terminal(vec![0.0, 1.0]).expect("terminal");
        let live = tree.decision(0, opening, vec![l, r]).expect("decision");

        let x = tree.terminal(vec![2.0, 5.0]).expect("terminal");
        let y = tree.terminal(vec![-1.0, 0.0]).expect("terminal");
        let after_a = tree.decision(0, follow_up, vec![x, y]).expect("decision");
        let b = tree.terminal(vec![0.0, 3.0]).expect("terminal");
        let dead = tree.decision(1, hidden, vec![after_a, b]).expect("decision");

        let root = tree.chance(vec![1.0, 0.0], vec![live, dead]).expect("chance");
        tree.set_root(root).expect("root");
        tree
    }

    #[test]
    fn derivatives_match_finite_differences() {
        let tree = signalling();
        assert_derivatives_match(&tree, &[0.8, 0.2, 0.3, 0.7, 0.6, 0.4, 0.25, 0.75]);

        // Player 1's infosets come first: opening, follow-up, then player 2.
        let tree = dead_branch();
        let behavior = [0.4, 0.6, 0.7, 0.3, 0.45, 0.55];
        assert_derivatives_match(&tree, &behavior);
        let by_x = tree
            .action_value_derivative(&behavior, ActionRef::new(1, 0, 0), ActionRef::new(0, 1, 0))
            .expect("derivative");
        assert!((by_x - 5.0).abs() < 1e-12);
    }

    #[test]
    fn unreached_infoset_weighs_nodes_equally() {
        let tree = signalling();
        // Neither type ever drinks beer.
        let behavior = [0.0, 1.0, 0.0, 1.0, 0.5, 0.5, 0.5, 0.5];
        let value = tree
            .action_value(&behavior, ActionRef::new(1, 0, 1))
            .expect("value");
        assert_eq!(value, 0.0);
        let derivative = tree
            .action_value_derivative(&behavior, ActionRef::new(1, 0, 0), ActionRef::new(0, 0, 0))
            .expect("derivative");
        assert_eq!(derivative, 0.0);
    }

    #[test]
    fn builder_rejects_malformed_trees() {
        let mut tree = GameTree::new(2);
        let set = tree.add_infoset(0, &["a", "b"]).expect("infoset");
        assert!(tree.add_infoset(2, &["a"]).is_err());
        assert!(matches!(tree.add_infoset(1, &[]), Err(QreError::EmptyGroup(_))));
        assert!(tree.terminal(vec![1.0]).is_err());

        let leaf = tree.terminal(vec![1.0, 0.0]).expect("terminal");
        let other = tree.terminal(vec![0.0, 1.0]).expect("terminal");
        assert!(tree.decision(0, set, vec![leaf]).is_err());
        assert!(tree.decision(0, set, vec![leaf, leaf]).is_err());
        assert!(tree.chance(vec![0.5, 0.6], vec![leaf, other]).is_err());
        assert!(tree.decision(1, 0, vec![leaf, other]).is_err());

        let node = tree.decision(0, set, vec![leaf, other]).expect("decision");
        assert!(tree.chance(vec![1.0], vec![leaf]).is_err());
        assert!(tree.set_root(leaf).is_err());
        assert!(tree.action_value(&[0.5, 0.5], ActionRef::new(0, 0, 0)).is_err());
        tree.set_root(node).expect("root");
        assert!(tree.action_value(&[0.5, 0.5], ActionRef::new(0, 0, 0)).is_ok());
        assert!(tree.action_value(&[0.5], ActionRef::new(0, 0, 0)).is_err());
    }
}
