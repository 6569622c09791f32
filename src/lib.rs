//! # kidy-ik is a time-bounded numerical inverse kinematics solver.
//! It searches joint configurations that bring one or more tip links of a
//! URDF robot to target poses, optionally shaped by weighted secondary goals.

// #![deny(missing_docs)]
#![deny(unsafe_code)]

mod cost;
mod error;
mod frame;
mod goal;
mod kinematics;
mod multi_body;
mod params;
mod plugin;
mod robot;
mod search;

pub use cost::{CostFunction, Evaluation, Problem, SolutionTest};
pub use error::{ModelError, RequestError};
pub use frame::{
    angular_error, linear_error, make_frame_tests, make_pose_costs, FrameTest, PoseCost,
    TwistThreshold,
};
pub use goal::{
    AvoidJointLimits, CenterJoints, CostContext, ExternalCost, ExternalCostFn, Goal, GoalSet,
    MinimalDisplacement, Objective,
};
pub use multi_body::{Link, MultiBody};
pub use params::{ParameterError, ParameterStore, Parameters};
pub use plugin::{
    IkPlugin, IkRequest, IkResponse, IkStatus, KinematicsSolver, QueryOptions, SolutionCallback,
};
pub use robot::{wrap_angle, JointKind, Limits, Robot, Variable};
pub use search::{derive_seed, ik_search, SearchConfig, SearchOutcome};
