//! Numerical optimization.

pub mod optimization;

pub use optimization::{project_onto_simplex, OptimizationResult, OptimizationType, ProjectedGradientOptimizer};
