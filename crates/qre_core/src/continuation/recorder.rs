use nalgebra::DVector;
use serde::{Deserialize, Serialize};

use super::problem::StepObserver;
use super::types::PathRecord;

/// Observer that keeps every reported point as a [`PathRecord`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PathRecorder {
    pub records: Vec<PathRecord>,
    /// Parameter values at which the orientation sign reversed.
    pub flips: Vec<f64>,
    /// Raw reported points, kept only when `keep_points` is set.
    #[serde(skip)]
    pub points: Vec<DVector<f64>>,
    #[serde(skip)]
    keep_points: bool,
}

impl PathRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also keep the raw log-space points.
    pub fn keeping_points() -> Self {
        Self {
            keep_points: true,
            ..Self::default()
        }
    }

    pub fn terminal(&self) -> Option<&PathRecord> {
        self.records.iter().rev().find(|r| r.is_terminal())
    }

    pub fn lambdas(&self) -> Vec<f64> {
        self.records.iter().filter_map(|r| r.lambda()).collect()
    }
}

impl StepObserver for PathRecorder {
    fn on_step(&mut self, point: &DVector<f64>, terminal: bool) {
        self.records.push(PathRecord::from_point(point, terminal));
        if self.keep_points {
            self.points.push(point.clone());
        }
    }

    fn on_orientation_flip(&mut self, point: &DVector<f64>, _omega: f64) {
        self.flips.push(point[point.len() - 1]);
    }
}
