//! Weighted secondary objectives added to the pose-matching cost.

use std::{fmt, sync::Arc};

use nalgebra::Isometry3;

use crate::{
    params::Parameters,
    robot::{wrap_angle, JointKind, Robot},
};

/// A scalar cost over a configuration and the tip poses it produces.
///
/// Objectives are evaluated concurrently by every search worker and must not
/// mutate any state.
pub trait Objective: Send + Sync {
    fn name(&self) -> &str;

    fn cost(&self, variables: &[f64], tip_poses: &[Isometry3<f64>]) -> f64;
}

/// Pulls every bounded joint toward the middle of its range.
#[derive(Debug, Clone, PartialEq)]
pub struct CenterJoints {
    // (mid, factor), None for continuous joints
    joints: Vec<Option<(f64, f64)>>,
}

impl CenterJoints {
    pub fn new(robot: &Robot) -> Self {
        let joints = robot
            .variables()
            .iter()
            .map(|v| {
                (v.span() > 0.0).then_some((v.mid(), v.minimal_displacement_factor))
            })
            .collect();
        Self { joints }
    }
}

impl Objective for CenterJoints {
    fn name(&self) -> &str {
        "center_joints"
    }

    fn cost(&self, variables: &[f64], _: &[Isometry3<f64>]) -> f64 {
        variables
            .iter()
            .zip(&self.joints)
            .filter_map(|(q, joint)| joint.map(|(mid, factor)| ((q - mid) * factor).powi(2)))
            .sum()
    }
}

/// Penalizes joints close to either limit; zero at mid-range, unbounded at
/// the limit itself.
#[derive(Debug, Clone, PartialEq)]
pub struct AvoidJointLimits {
    // (min, span, factor), None for continuous joints
    joints: Vec<Option<(f64, f64, f64)>>,
}

impl AvoidJointLimits {
    const MIN_DISTANCE: f64 = 1e-6;

    pub fn new(robot: &Robot) -> Self {
        let joints = robot
            .variables()
            .iter()
            .map(|v| {
                let span = v.span();
                v.limits
                    .filter(|_| span > 0.0)
                    .map(|l| (l.min, span, v.minimal_displacement_factor))
            })
            .collect();
        Self { joints }
    }
}

impl Objective for AvoidJointLimits {
    fn name(&self) -> &str {
        "avoid_joint_limits"
    }

    fn cost(&self, variables: &[f64], _: &[Isometry3<f64>]) -> f64 {
        variables
            .iter()
            .zip(&self.joints)
            .filter_map(|(q, joint)| {
                joint.map(|(min, span, factor)| {
                    let lower = ((q - min) / span).clamp(Self::MIN_DISTANCE, 1.0);
                    let upper = (1.0 - (q - min) / span).clamp(Self::MIN_DISTANCE, 1.0);
                    (1.0 / lower + 1.0 / upper - 4.0) * factor
                })
            })
            .sum()
    }
}

/// Keeps the configuration close to the seed of the search.
#[derive(Debug, Clone, PartialEq)]
pub struct MinimalDisplacement {
    // (seed, factor, continuous)
    joints: Vec<(f64, f64, bool)>,
}

impl MinimalDisplacement {
    pub fn new(robot: &Robot, seed: &[f64]) -> Self {
        let joints = robot
            .variables()
            .iter()
            .zip(seed)
            .map(|(v, s)| (*s, v.minimal_displacement_factor, v.kind == JointKind::Continuous))
            .collect();
        Self { joints }
    }
}

impl Objective for MinimalDisplacement {
    fn name(&self) -> &str {
        "minimal_displacement"
    }

    fn cost(&self, variables: &[f64], _: &[Isometry3<f64>]) -> f64 {
        variables
            .iter()
            .zip(&self.joints)
            .map(|(q, (seed, factor, continuous))| {
                let delta = if *continuous {
                    wrap_angle(q - seed)
                } else {
                    q - seed
                };
                (delta * factor).powi(2)
            })
            .sum()
    }
}

/// Everything a caller-supplied cost function gets to look at.
#[derive(Debug, Clone, Copy)]
pub struct CostContext<'a> {
    /// The requested pose this cost was registered for.
    pub target: &'a Isometry3<f64>,
    pub variables: &'a [f64],
    pub tip_poses: &'a [Isometry3<f64>],
    pub seed: &'a [f64],
}

pub type ExternalCostFn = dyn Fn(&CostContext<'_>) -> f64 + Send + Sync;

/// A caller-supplied cost bound to one requested pose.
pub struct ExternalCost {
    target: Isometry3<f64>,
    seed: Arc<[f64]>,
    function: Arc<ExternalCostFn>,
}

impl ExternalCost {
    pub fn new(target: Isometry3<f64>, seed: Arc<[f64]>, function: Arc<ExternalCostFn>) -> Self {
        Self {
            target,
            seed,
            function,
        }
    }
}

impl Objective for ExternalCost {
    fn name(&self) -> &str {
        "external"
    }

    fn cost(&self, variables: &[f64], tip_poses: &[Isometry3<f64>]) -> f64 {
        (self.function)(&CostContext {
            target: &self.target,
            variables,
            tip_poses,
            seed: &self.seed[..],
        })
    }
}

pub struct Goal {
    objective: Box<dyn Objective>,
    weight: f64,
}

impl Goal {
    pub fn name(&self) -> &str {
        self.objective.name()
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }

    pub fn cost(&self, variables: &[f64], tip_poses: &[Isometry3<f64>]) -> f64 {
        self.weight * self.objective.cost(variables, tip_poses)
    }
}

impl fmt::Debug for Goal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Goal")
            .field("name", &self.name())
            .field("weight", &self.weight)
            .finish()
    }
}

/// The active goals of one search; goals without a positive weight are
/// never stored.
#[derive(Debug, Default)]
pub struct GoalSet {
    goals: Vec<Goal>,
}

impl GoalSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `objective` if `weight` is positive and finite.
    ///
    /// Returns whether the goal was added.
    pub fn push(&mut self, objective: impl Objective + 'static, weight: f64) -> bool {
        if !(weight.is_finite() && weight > 0.0) {
            return false;
        }
        self.goals.push(Goal {
            objective: Box::new(objective),
            weight,
        });
        true
    }

    /// Builds the goals of one search from a parameter snapshot.
    ///
    /// `external` adds one goal of weight 1 per entry of `targets`.
    pub fn from_parameters(
        robot: &Robot,
        params: &Parameters,
        seed: &[f64],
        targets: &[Isometry3<f64>],
        external: Option<&Arc<ExternalCostFn>>,
    ) -> Self {
        let mut goals = Self::new();
        goals.push(CenterJoints::new(robot), params.center_joints_weight);
        goals.push(AvoidJointLimits::new(robot), params.avoid_joint_limits_weight);
        goals.push(
            MinimalDisplacement::new(robot, seed),
            params.minimal_displacement_weight,
        );
        if let Some(function) = external {
            let seed: Arc<[f64]> = seed.into();
            for target in targets {
                goals.push(
                    ExternalCost::new(*target, Arc::clone(&seed), Arc::clone(function)),
                    1.0,
                );
            }
        }
        goals
    }

    pub fn len(&self) -> usize {
        self.goals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.goals.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Goal> {
        self.goals.iter()
    }

    /// Weighted sum of all goal costs.
    pub fn cost(&self, variables: &[f64], tip_poses: &[Isometry3<f64>]) -> f64 {
        self.goals
            .iter()
            .map(|goal| goal.cost(variables, tip_poses))
            .sum()
    }
}
