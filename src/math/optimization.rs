//! Optimization on the probability simplex
//!
//! This module implements projected-gradient ascent/descent with Armijo
//! backtracking for smooth objectives over `{x : x_i >= 0, sum x_i = 1}`,
//! together with the Euclidean projection onto that set.

use nalgebra::DVector;
use serde::{Deserialize, Serialize};

/// Optimization problem type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptimizationType {
    Minimize,
    Maximize,
}

/// Result of an optimization procedure
#[derive(Debug, Clone)]
pub struct OptimizationResult {
    /// Final solution vector (always feasible)
    pub solution: DVector<f64>,
    /// Objective at the solution
    pub objective_value: f64,
    /// Number of iterations performed
    pub iterations: usize,
    /// Whether the algorithm converged
    pub converged: bool,
    /// Norm of the last projected step direction
    pub gradient_norm: f64,
}

/// Projected-gradient optimizer with backtracking line search
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProjectedGradientOptimizer {
    /// Largest coordinate move of the first trial step in each iteration
    pub learning_rate: f64,
    /// Maximum number of iterations
    pub max_iterations: usize,
    /// Convergence tolerance on the accepted step norm
    pub tolerance: f64,
    /// Sufficient-increase constant of the Armijo condition
    pub armijo: f64,
    /// Maximum step halvings per iteration
    pub max_backtracks: usize,
}

impl Default for ProjectedGradientOptimizer {
    fn default() -> Self {
        Self::new(0.5, 10_000, 1e-10)
    }
}

impl ProjectedGradientOptimizer {
    pub fn new(learning_rate: f64, max_iterations: usize, tolerance: f64) -> Self {
        Self {
            learning_rate,
            max_iterations,
            tolerance,
            armijo: 1e-4,
            max_backtracks: 50,
        }
    }

    pub fn with_armijo(mut self, armijo: f64) -> Self {
        self.armijo = armijo;
        self
    }

    pub fn with_max_backtracks(mut self, max_backtracks: usize) -> Self {
        self.max_backtracks = max_backtracks;
        self
    }

    /// Optimize `objective` over the simplex starting from `initial_point`
    /// (projected first if infeasible).
    ///
    /// Converges when an accepted step is shorter than `tolerance` or when
    /// no step along the projected gradient improves the objective. Stops
    /// unconverged on a non-finite objective or gradient.
    pub fn optimize<F, G>(
        &self,
        objective: F,
        gradient: G,
        initial_point: &DVector<f64>,
        optimization_type: OptimizationType,
    ) -> OptimizationResult
    where
        F: Fn(&DVector<f64>) -> f64,
        G: Fn(&DVector<f64>) -> DVector<f64>,
    {
        // Work on `sign * f` so both directions are an ascent.
        let sign = match optimization_type {
            OptimizationType::Maximize => 1.0,
            OptimizationType::Minimize => -1.0,
        };

        let mut x = project_onto_simplex(initial_point);
        let mut fx = sign * objective(&x);
        let mut converged = false;
        let mut gradient_norm = f64::INFINITY;
        let mut iterations = 0;

        while fx.is_finite() && iterations < self.max_iterations {
            iterations += 1;
            let grad = gradient(&x) * sign;
            if grad.iter().any(|g| !g.is_finite()) {
                break;
            }
            let scale = grad.amax();
            if scale == 0.0 {
                gradient_norm = 0.0;
                converged = true;
                break;
            }

            let mut step = self.learning_rate / scale;
            let mut accepted = None;
            for _ in 0..=self.max_backtracks {
                let candidate = project_onto_simplex(&(&x + &grad * step));
                let direction = &candidate - &x;
                let f_candidate = sign * objective(&candidate);
                if f_candidate.is_finite() && f_candidate >= fx + self.armijo * grad.dot(&direction) {
                    accepted = Some((candidate, f_candidate, direction.norm()));
                    break;
                }
                step *= 0.5;
            }

            match accepted {
                Some((candidate, f_candidate, moved)) => {
                    x = candidate;
                    fx = f_candidate;
                    gradient_norm = moved;
                    if moved < self.tolerance {
                        converged = true;
                        break;
                    }
                }
                None => {
                    // No ascent left at machine precision.
                    converged = true;
                    break;
                }
            }
        }

        OptimizationResult {
            solution: x,
            objective_value: sign * fx,
            iterations,
            converged: converged && fx.is_finite(),
            gradient_norm,
        }
    }
}

/// Euclidean projection onto `{x : x_i >= 0, sum x_i = 1}` (sort-based).
pub fn project_onto_simplex(v: &DVector<f64>) -> DVector<f64> {
    let n = v.len();
    if n == 0 {
        return v.clone();
    }
    let mut sorted: Vec<f64> = v.iter().copied().collect();
    sorted.sort_by(|a, b| b.total_cmp(a));

    let mut cumulative = 0.0;
    let mut theta = 0.0;
    for (k, u) in sorted.iter().enumerate() {
        cumulative += u;
        let candidate = (cumulative - 1.0) / (k + 1) as f64;
        if u - candidate > 0.0 {
            theta = candidate;
        }
    }
    v.map(|x| (x - theta).max(0.0))
}
