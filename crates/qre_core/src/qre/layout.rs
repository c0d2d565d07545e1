//! Canonical flattening of `(player, group, member)` into state indices.
//!
//! Each group (a player's strategy set, or one information set's actions)
//! owns a contiguous block of variables. The equation with the same index as
//! the group's first member is its sum-to-one equation; every other member's
//! index is the row of its ratio equation. The parameter λ comes last.

use nalgebra::DVector;

use crate::error::QreError;

/// Largest deviation from 1 tolerated in a group's starting probabilities.
const NORMALIZATION_TOLERANCE: f64 = 1e-9;

/// One block of variables that shares a sum-to-one equation: a player's
/// strategies, or the actions at one information set.
#[derive(Debug, Clone, PartialEq)]
pub struct Group {
    pub player: usize,
    /// Information set within the player; always 0 for strategic games.
    pub index: usize,
    /// Index of the first member in the flat state.
    pub offset: usize,
    pub len: usize,
}

impl Group {
    /// Flat indices of the group's members.
    pub fn members(&self) -> std::ops::Range<usize> {
        self.offset..self.offset + self.len
    }

    /// The reference member the ratio equations compare against.
    pub fn reference(&self) -> usize {
        self.offset
    }

    fn name(&self) -> String {
        format!("player {} group {}", self.player + 1, self.index + 1)
    }
}

/// Bijection between `(player, group, member)` and flat state indices, with
/// a label per variable for error messages.
#[derive(Debug, Clone, Default)]
pub struct ProfileLayout {
    groups: Vec<Group>,
    owner: Vec<usize>,
    labels: Vec<String>,
}

impl ProfileLayout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends the next group in canonical order. `labels` names its members
    /// and fixes their count, which must be positive.
    pub fn push_group(
        &mut self,
        player: usize,
        index: usize,
        labels: Vec<String>,
    ) -> Result<(), QreError> {
        let group = Group {
            player,
            index,
            offset: self.labels.len(),
            len: labels.len(),
        };
        if labels.is_empty() {
            return Err(QreError::EmptyGroup(group.name()));
        }
        self.owner
            .extend(std::iter::repeat(self.groups.len()).take(labels.len()));
        self.labels.extend(labels);
        self.groups.push(group);
        Ok(())
    }

    /// Number of probability variables (and of equations).
    pub fn dimension(&self) -> usize {
        self.labels.len()
    }

    /// Position of λ in a point: right after the last probability.
    pub fn lambda_index(&self) -> usize {
        self.dimension()
    }

    /// Groups in canonical order.
    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    /// The group that owns variable `var`.
    pub fn group_of(&self, var: usize) -> &Group {
        &self.groups[self.owner[var]]
    }

    pub(crate) fn same_group(&self, a: usize, b: usize) -> bool {
        self.owner[a] == self.owner[b]
    }

    /// Name of variable `var`, as given to [`push_group`](Self::push_group).
    pub fn label(&self, var: usize) -> &str {
        &self.labels[var]
    }

    /// Equal probability for every member of each group.
    pub fn uniform_profile(&self) -> Vec<f64> {
        let mut profile = vec![0.0; self.dimension()];
        for group in &self.groups {
            let p = 1.0 / group.len as f64;
            profile[group.members()].fill(p);
        }
        profile
    }

    /// Builds the log-space starting point for `profile` at `lambda`.
    ///
    /// Every probability must be positive and finite, and every group must
    /// sum to one; otherwise the point would not lie on the curve.
    pub fn start_point(&self, profile: &[f64], lambda: f64) -> Result<DVector<f64>, QreError> {
        if profile.len() != self.dimension() {
            return Err(QreError::DimensionMismatch {
                expected: self.dimension(),
                found: profile.len(),
            });
        }
        if !(lambda.is_finite() && lambda >= 0.0) {
            return Err(QreError::InvalidLambda(lambda));
        }
        let mut point = DVector::zeros(self.dimension() + 1);
        for (var, &p) in profile.iter().enumerate() {
            if !(p.is_finite() && p > 0.0) {
                return Err(QreError::NonPositiveProbability {
                    label: self.labels[var].clone(),
                    value: p,
                });
            }
            point[var] = p.ln();
        }
        for group in &self.groups {
            let sum: f64 = profile[group.members()].iter().sum();
            if (sum - 1.0).abs() > NORMALIZATION_TOLERANCE {
                return Err(QreError::UnnormalizedGroup {
                    group: group.name(),
                    sum,
                });
            }
        }
        point[self.lambda_index()] = lambda;
        Ok(point)
    }

    /// Probabilities encoded by the log-space part of `point`.
    pub fn probabilities(&self, point: &DVector<f64>) -> Vec<f64> {
        point.rows(0, self.dimension()).iter().map(|x| x.exp()).collect()
    }
}
