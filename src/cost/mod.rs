use std::sync::Arc;

use nalgebra::Isometry3;

use crate::{
    frame::{make_frame_tests, make_pose_costs, FrameTest, PoseCost},
    goal::{ExternalCostFn, GoalSet},
    params::Parameters,
    robot::Robot,
};

/// Pose-matching cost of every tip plus the weighted goals.
#[derive(Debug)]
pub struct CostFunction {
    pose_costs: Vec<PoseCost>,
    goals: GoalSet,
}

impl CostFunction {
    pub fn new(pose_costs: Vec<PoseCost>, goals: GoalSet) -> Self {
        Self { pose_costs, goals }
    }

    pub fn goals(&self) -> &GoalSet {
        &self.goals
    }

    pub fn cost(&self, variables: &[f64], tip_poses: &[Isometry3<f64>]) -> f64 {
        let pose_cost: f64 = self
            .pose_costs
            .iter()
            .zip(tip_poses)
            .map(|(cost, pose)| cost.cost(pose))
            .sum();
        pose_cost + self.goals.cost(variables, tip_poses)
    }
}

/// Accepts a configuration when every tip is within its tolerance and the
/// total cost is below the threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct SolutionTest {
    frame_tests: Vec<FrameTest>,
    cost_threshold: f64,
}

impl SolutionTest {
    pub fn new(frame_tests: Vec<FrameTest>, cost_threshold: f64) -> Self {
        Self {
            frame_tests,
            cost_threshold,
        }
    }

    pub fn frames_pass(&self, tip_poses: &[Isometry3<f64>]) -> bool {
        self.frame_tests
            .iter()
            .zip(tip_poses)
            .all(|(test, pose)| test.test(pose))
    }

    pub fn accepts(&self, cost: f64, tip_poses: &[Isometry3<f64>]) -> bool {
        self.frames_pass(tip_poses) && cost < self.cost_threshold
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    pub cost: f64,
    pub accepted: bool,
}

/// Everything one search call needs, read-only for its whole duration.
#[derive(Debug)]
pub struct Problem<'a> {
    robot: &'a Robot,
    cost: CostFunction,
    test: SolutionTest,
}

impl<'a> Problem<'a> {
    /// # Panics
    ///
    /// Panics if the number of pose costs or frame tests differs from the
    /// number of tips of `robot`.
    pub fn new(robot: &'a Robot, cost: CostFunction, test: SolutionTest) -> Self {
        assert_eq!(
            cost.pose_costs.len(),
            robot.tip_count(),
            "one pose cost per tip is required"
        );
        assert_eq!(
            test.frame_tests.len(),
            robot.tip_count(),
            "one frame test per tip is required"
        );
        Self { robot, cost, test }
    }

    /// Assembles the cost function and solution test for `goal_frames`,
    /// given in the base frame of `robot`.
    pub fn from_goal_frames(
        robot: &'a Robot,
        goal_frames: &[Isometry3<f64>],
        params: &Parameters,
        seed: &[f64],
        external: Option<&Arc<ExternalCostFn>>,
    ) -> Self {
        let frame_tests = make_frame_tests(goal_frames, params.twist_threshold());
        let pose_costs = make_pose_costs(goal_frames, params.rotation_scale);
        let goals = GoalSet::from_parameters(robot, params, seed, goal_frames, external);
        Self::new(
            robot,
            CostFunction::new(pose_costs, goals),
            SolutionTest::new(frame_tests, params.cost_threshold),
        )
    }

    pub fn robot(&self) -> &'a Robot {
        self.robot
    }

    pub fn cost_function(&self) -> &CostFunction {
        &self.cost
    }

    pub fn solution_test(&self) -> &SolutionTest {
        &self.test
    }

    /// Total cost of `variables`, one FK evaluation.
    pub fn cost(&self, variables: &[f64]) -> f64 {
        let poses = self.robot.fk(variables);
        self.cost.cost(variables, &poses)
    }

    /// Total cost and acceptance of `variables`, one FK evaluation.
    pub fn evaluate(&self, variables: &[f64]) -> Evaluation {
        let poses = self.robot.fk(variables);
        let cost = self.cost.cost(variables, &poses);
        Evaluation {
            cost,
            accepted: self.test.accepts(cost, &poses),
        }
    }
}
