use nalgebra::Isometry3;

/// Euclidean distance between the origins of two poses.
pub fn linear_error(pose: &Isometry3<f64>, goal: &Isometry3<f64>) -> f64 {
    (goal.translation.vector - pose.translation.vector).norm()
}

/// Geodesic distance between the orientations of two poses, in `[0, pi]`.
pub fn angular_error(pose: &Isometry3<f64>, goal: &Isometry3<f64>) -> f64 {
    pose.rotation.angle_to(&goal.rotation)
}

/// Tolerance band around a goal pose.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TwistThreshold {
    /// Maximum position error in m.
    pub linear: f64,
    /// Maximum orientation error in rad.
    pub angular: f64,
}

impl TwistThreshold {
    pub fn new(linear: f64, angular: f64) -> Self {
        Self { linear, angular }
    }

    /// Same bound for position and orientation.
    pub fn uniform(threshold: f64) -> Self {
        Self::new(threshold, threshold)
    }
}

/// Checks whether an achieved tip pose is close enough to its goal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameTest {
    goal: Isometry3<f64>,
    threshold: TwistThreshold,
}

impl FrameTest {
    pub fn new(goal: Isometry3<f64>, threshold: TwistThreshold) -> Self {
        Self { goal, threshold }
    }

    pub fn goal(&self) -> &Isometry3<f64> {
        &self.goal
    }

    pub fn threshold(&self) -> TwistThreshold {
        self.threshold
    }

    pub fn test(&self, pose: &Isometry3<f64>) -> bool {
        linear_error(pose, &self.goal) < self.threshold.linear
            && angular_error(pose, &self.goal) < self.threshold.angular
    }
}

/// Squared pose error of one tip, with the orientation term scaled by
/// `rotation_scale`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoseCost {
    goal: Isometry3<f64>,
    rotation_scale: f64,
}

impl PoseCost {
    pub fn new(goal: Isometry3<f64>, rotation_scale: f64) -> Self {
        Self {
            goal,
            rotation_scale,
        }
    }

    pub fn cost(&self, pose: &Isometry3<f64>) -> f64 {
        let linear = linear_error(pose, &self.goal);
        let angular = angular_error(pose, &self.goal) * self.rotation_scale;
        linear * linear + angular * angular
    }
}

pub fn make_frame_tests(goals: &[Isometry3<f64>], threshold: TwistThreshold) -> Vec<FrameTest> {
    goals
        .iter()
        .map(|goal| FrameTest::new(*goal, threshold))
        .collect()
}

pub fn make_pose_costs(goals: &[Isometry3<f64>], rotation_scale: f64) -> Vec<PoseCost> {
    goals
        .iter()
        .map(|goal| PoseCost::new(*goal, rotation_scale))
        .collect()
}
