use std::{fmt, sync::Arc, time::Duration};

use nalgebra::Isometry3;
use tracing::info;

use crate::{
    cost::Problem,
    goal::ExternalCostFn,
    multi_body::MultiBody,
    params::ParameterStore,
    robot::Robot,
    search::{ik_search, SearchConfig, SearchOutcome},
    ModelError, RequestError,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryOptions {
    /// Return the best configuration seen instead of failing on timeout.
    pub return_approximate_solution: bool,
}

/// Called once per search with the first target pose, the returned
/// solution and its status.
pub type SolutionCallback<'a> = &'a dyn Fn(&Isometry3<f64>, &[f64], IkStatus);

/// One inverse kinematics query.
pub struct IkRequest<'a> {
    /// Target pose of every tip, in the caller frame.
    pub poses: &'a [Isometry3<f64>],
    pub seed: &'a [f64],
    pub timeout: Duration,
    pub options: QueryOptions,
    /// Pose of the solver's base frame in the caller frame.
    pub base_frame: Isometry3<f64>,
    /// Extra cost added once per target pose with weight 1.
    pub cost_function: Option<Arc<ExternalCostFn>>,
    pub solution_callback: Option<SolutionCallback<'a>>,
}

impl<'a> IkRequest<'a> {
    pub fn new(poses: &'a [Isometry3<f64>], seed: &'a [f64], timeout: Duration) -> Self {
        Self {
            poses,
            seed,
            timeout,
            options: QueryOptions::default(),
            base_frame: Isometry3::identity(),
            cost_function: None,
            solution_callback: None,
        }
    }

    pub fn with_options(mut self, options: QueryOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_base_frame(mut self, base_frame: Isometry3<f64>) -> Self {
        self.base_frame = base_frame;
        self
    }

    pub fn with_cost_function(mut self, cost_function: Arc<ExternalCostFn>) -> Self {
        self.cost_function = Some(cost_function);
        self
    }

    pub fn with_solution_callback(mut self, callback: SolutionCallback<'a>) -> Self {
        self.solution_callback = Some(callback);
        self
    }
}

impl fmt::Debug for IkRequest<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IkRequest")
            .field("poses", &self.poses)
            .field("seed", &self.seed)
            .field("timeout", &self.timeout)
            .field("options", &self.options)
            .field("base_frame", &self.base_frame)
            .field("cost_function", &self.cost_function.is_some())
            .field("solution_callback", &self.solution_callback.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IkStatus {
    Success,
    /// Best effort after timeout; the acceptance test did not pass.
    Approximate,
    NoSolution,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IkResponse {
    /// The solution, or the unchanged seed on [`IkStatus::NoSolution`].
    pub solution: Vec<f64>,
    pub status: IkStatus,
}

impl IkResponse {
    pub fn is_success(&self) -> bool {
        self.status == IkStatus::Success
    }

    pub fn is_approximate(&self) -> bool {
        self.status == IkStatus::Approximate
    }
}

/// What a host framework sees of a kinematics solver.
pub trait KinematicsSolver {
    fn group_name(&self) -> &str;

    fn base_frame(&self) -> &str;

    fn tip_frames(&self) -> &[String];

    /// Names of the active joints, in configuration order.
    fn joint_names(&self) -> &[String];

    fn link_names(&self) -> &[String];

    fn search_position_ik(&self, request: &IkRequest<'_>) -> Result<IkResponse, RequestError>;

    /// Poses of `link_names` in the base frame.
    fn get_position_fk(
        &self,
        link_names: &[&str],
        joint_values: &[f64],
    ) -> Result<Vec<Isometry3<f64>>, RequestError>;

    /// Single-pose search in the base frame.
    fn search_pose(
        &self,
        pose: &Isometry3<f64>,
        seed: &[f64],
        timeout: Duration,
        options: QueryOptions,
    ) -> Result<IkResponse, RequestError> {
        let poses = [*pose];
        self.search_position_ik(&IkRequest::new(&poses, seed, timeout).with_options(options))
    }

    fn search_pose_with_callback(
        &self,
        pose: &Isometry3<f64>,
        seed: &[f64],
        timeout: Duration,
        callback: SolutionCallback<'_>,
        options: QueryOptions,
    ) -> Result<IkResponse, RequestError> {
        let poses = [*pose];
        self.search_position_ik(
            &IkRequest::new(&poses, seed, timeout)
                .with_options(options)
                .with_solution_callback(callback),
        )
    }
}

/// Solver for one planning group of a robot.
#[derive(Debug, Clone)]
pub struct IkPlugin {
    group_name: String,
    robot: Robot,
    joint_names: Vec<String>,
    parameters: ParameterStore,
}

impl IkPlugin {
    /// Builds the solver for the joints between `base_frame` and
    /// `tip_frames`. A leading `/` on a frame name is ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if a frame is missing from `multi_body`, a tip is
    /// not below the base, or no active joint moves the tips.
    pub fn initialize(
        multi_body: &MultiBody,
        group_name: &str,
        base_frame: &str,
        tip_frames: &[&str],
        parameters: ParameterStore,
    ) -> Result<IkPlugin, ModelError> {
        let strip = |frame: &'_ str| frame.strip_prefix('/').unwrap_or(frame).to_owned();
        let base_frame = strip(base_frame);
        let tip_frames: Vec<String> = tip_frames.iter().map(|tip| strip(*tip)).collect();
        let tips: Vec<&str> = tip_frames.iter().map(String::as_str).collect();

        let robot = Robot::from_multi_body(multi_body, &base_frame, &tips)?;
        let joint_names = robot.joint_names();
        info!(
            group = group_name,
            base = %base_frame,
            tips = ?tip_frames,
            joints = joint_names.len(),
            "initialized ik solver"
        );

        Ok(IkPlugin {
            group_name: group_name.to_owned(),
            robot,
            joint_names,
            parameters,
        })
    }

    pub fn robot(&self) -> &Robot {
        &self.robot
    }

    /// Handle to the parameters; updates apply to the next search.
    pub fn parameters(&self) -> &ParameterStore {
        &self.parameters
    }

    fn validate(&self, request: &IkRequest<'_>) -> Result<(), RequestError> {
        if request.poses.is_empty() {
            return Err(RequestError::EmptyPoses);
        }
        if request.poses.len() != self.robot.tip_count() {
            return Err(RequestError::PoseCount {
                expected: self.robot.tip_count(),
                actual: request.poses.len(),
            });
        }
        if request.seed.len() != self.robot.variable_count() {
            return Err(RequestError::JointCount {
                expected: self.robot.variable_count(),
                actual: request.seed.len(),
            });
        }
        Ok(())
    }
}

impl KinematicsSolver for IkPlugin {
    fn group_name(&self) -> &str {
        &self.group_name
    }

    fn base_frame(&self) -> &str {
        self.robot.base_frame()
    }

    fn tip_frames(&self) -> &[String] {
        self.robot.tip_frames()
    }

    fn joint_names(&self) -> &[String] {
        &self.joint_names
    }

    // same as the tips
    fn link_names(&self) -> &[String] {
        self.robot.tip_frames()
    }

    fn search_position_ik(&self, request: &IkRequest<'_>) -> Result<IkResponse, RequestError> {
        self.validate(request)?;
        let params = self.parameters.snapshot();

        let to_base = request.base_frame.inverse();
        let goal_frames: Vec<Isometry3<f64>> =
            request.poses.iter().map(|pose| to_base * pose).collect();
        let problem = Problem::from_goal_frames(
            &self.robot,
            &goal_frames,
            &params,
            request.seed,
            request.cost_function.as_ref(),
        );
        let config = SearchConfig::from_parameters(
            &params,
            request.timeout,
            request.options.return_approximate_solution,
        );

        let (solution, status) = match ik_search(&problem, request.seed, &config) {
            SearchOutcome::Found { variables, .. } => {
                (self.robot.enforce_bounds(&variables), IkStatus::Success)
            }
            SearchOutcome::Approximate { variables, .. } => {
                (self.robot.enforce_bounds(&variables), IkStatus::Approximate)
            }
            SearchOutcome::NoSolution => (request.seed.to_vec(), IkStatus::NoSolution),
        };

        if let Some(callback) = request.solution_callback {
            callback(&request.poses[0], &solution, status);
        }
        Ok(IkResponse { solution, status })
    }

    fn get_position_fk(
        &self,
        link_names: &[&str],
        joint_values: &[f64],
    ) -> Result<Vec<Isometry3<f64>>, RequestError> {
        if joint_values.len() != self.robot.variable_count() {
            return Err(RequestError::JointCount {
                expected: self.robot.variable_count(),
                actual: joint_values.len(),
            });
        }
        let poses = self.robot.link_poses(joint_values);
        link_names
            .iter()
            .map(|name| {
                let name = name.strip_prefix('/').unwrap_or(name);
                poses
                    .iter()
                    .find(|(link, _)| *link == name)
                    .map(|(_, pose)| *pose)
                    .ok_or_else(|| RequestError::UnknownLink {
                        name: name.to_owned(),
                    })
            })
            .collect()
    }
}
