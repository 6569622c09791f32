use std::sync::{Arc, PoisonError, RwLock};

use thiserror::Error;

use crate::frame::TwistThreshold;

/// Tunable solver parameters.
///
/// A weight of zero disables the matching goal entirely.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Parameters {
    pub center_joints_weight: f64,
    pub avoid_joint_limits_weight: f64,
    pub minimal_displacement_weight: f64,
    /// Total cost a configuration must stay below to be accepted.
    pub cost_threshold: f64,
    /// Weight of orientation error relative to position error.
    pub rotation_scale: f64,
    /// Position (m) and orientation (rad) tolerance of every tip.
    pub twist_threshold: f64,
    /// Finite-difference step of the gradient.
    pub gd_step_size: f64,
    /// Improvements smaller than this count as a stall.
    pub gd_min_cost_delta: f64,
    /// Stalled steps before a worker restarts from a perturbed best.
    pub gd_stall_iterations: usize,
    /// First restart perturbation, as a fraction of each joint's span.
    pub restart_radius: f64,
    /// Worker threads per search, 0 for one per available core.
    pub threads: usize,
    /// Base seed of the workers' random streams, random when unset.
    pub rng_seed: Option<u64>,
}

impl Default for Parameters {
    fn default() -> Self {
        Self {
            center_joints_weight: 0.0,
            avoid_joint_limits_weight: 0.0,
            minimal_displacement_weight: 0.0,
            cost_threshold: 0.001,
            rotation_scale: 0.5,
            twist_threshold: 0.001,
            gd_step_size: 1e-4,
            gd_min_cost_delta: 1e-12,
            gd_stall_iterations: 8,
            restart_radius: 0.2,
            threads: 0,
            rng_seed: None,
        }
    }
}

/// Errors that can occur when validating [`Parameters`].
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParameterError {
    #[error("{name} must be finite and non-negative, got {value}")]
    Negative { name: &'static str, value: f64 },

    #[error("{name} must be finite and positive, got {value}")]
    NotPositive { name: &'static str, value: f64 },
}

impl Parameters {
    /// # Errors
    ///
    /// Returns an error if a weight, scale or radius is negative or not
    /// finite, or if a threshold or step size is not strictly positive.
    pub fn validate(&self) -> Result<(), ParameterError> {
        let non_negative = [
            ("center_joints_weight", self.center_joints_weight),
            ("avoid_joint_limits_weight", self.avoid_joint_limits_weight),
            ("minimal_displacement_weight", self.minimal_displacement_weight),
            ("rotation_scale", self.rotation_scale),
            ("gd_min_cost_delta", self.gd_min_cost_delta),
            ("restart_radius", self.restart_radius),
        ];
        for (name, value) in non_negative {
            if !value.is_finite() || value < 0.0 {
                return Err(ParameterError::Negative { name, value });
            }
        }

        let positive = [
            ("cost_threshold", self.cost_threshold),
            ("twist_threshold", self.twist_threshold),
            ("gd_step_size", self.gd_step_size),
        ];
        for (name, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(ParameterError::NotPositive { name, value });
            }
        }
        Ok(())
    }

    pub fn twist_threshold(&self) -> TwistThreshold {
        TwistThreshold::uniform(self.twist_threshold)
    }
}

/// Shared, updatable parameter source.
///
/// Searches take a [`snapshot`](Self::snapshot) when they start, so an
/// [`update`](Self::update) never changes the parameters of a running search.
#[derive(Debug, Clone, Default)]
pub struct ParameterStore {
    current: Arc<RwLock<Arc<Parameters>>>,
}

impl ParameterStore {
    /// # Errors
    ///
    /// Returns an error if `parameters` fail validation.
    pub fn new(parameters: Parameters) -> Result<Self, ParameterError> {
        parameters.validate()?;
        Ok(Self {
            current: Arc::new(RwLock::new(Arc::new(parameters))),
        })
    }

    pub fn snapshot(&self) -> Arc<Parameters> {
        let guard = self.current.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    /// Replaces the parameters seen by searches started after this call.
    ///
    /// # Errors
    ///
    /// Returns an error, leaving the current parameters in place, if
    /// `parameters` fail validation.
    pub fn update(&self, parameters: Parameters) -> Result<(), ParameterError> {
        parameters.validate()?;
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        *guard = Arc::new(parameters);
        Ok(())
    }
}
