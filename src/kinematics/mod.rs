use nalgebra::{Isometry3, Translation3, UnitQuaternion};

use crate::robot::{Motion, Robot};

impl Motion {
    fn transform(&self, variables: &[f64]) -> Isometry3<f64> {
        match *self {
            Motion::Fixed => Isometry3::identity(),
            Motion::Rotation { axis, variable } => Isometry3::from_parts(
                Translation3::identity(),
                UnitQuaternion::from_axis_angle(&axis, variables[variable]),
            ),
            Motion::Translation { axis, variable } => Isometry3::from_parts(
                Translation3::from(axis.into_inner() * variables[variable]),
                UnitQuaternion::identity(),
            ),
        }
    }
}

impl Robot {
    /// Poses of the tip links in the base frame, in tip order.
    ///
    /// # Panics
    ///
    /// Panics if `variables.len() != self.variable_count()`.
    pub fn fk(&self, variables: &[f64]) -> Vec<Isometry3<f64>> {
        let poses = self.segment_poses(variables);
        self.tip_segments
            .iter()
            .map(|segment| segment.map_or_else(Isometry3::identity, |index| poses[index]))
            .collect()
    }

    /// Poses of the base link and every link between it and the tips.
    pub fn link_poses(&self, variables: &[f64]) -> Vec<(&str, Isometry3<f64>)> {
        let poses = self.segment_poses(variables);
        std::iter::once((self.base_frame(), Isometry3::identity()))
            .chain(
                self.segments
                    .iter()
                    .zip(poses)
                    .map(|(segment, pose)| (segment.link.as_str(), pose)),
            )
            .collect()
    }

    fn segment_poses(&self, variables: &[f64]) -> Vec<Isometry3<f64>> {
        assert_eq!(
            variables.len(),
            self.variable_count(),
            "configuration length must equal the number of active joints"
        );
        let mut poses: Vec<Isometry3<f64>> = Vec::with_capacity(self.segments.len());
        for segment in &self.segments {
            let parent = segment
                .parent
                .map_or_else(Isometry3::identity, |index| poses[index]);
            poses.push(parent * segment.origin * segment.motion.transform(variables));
        }
        poses
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::MultiBody;
    use approx::assert_relative_eq;
    use core::f64::consts::FRAC_PI_2;
    use nalgebra::Vector3;

    fn robot(file: &str, base: &str, tips: &[&str]) -> Robot {
        let multi_body = MultiBody::from_urdf(file).unwrap();
        Robot::from_multi_body(&multi_body, base, tips).unwrap()
    }

    #[test]
    fn test_fk_single_revolute() {
        let robot = robot("urdf/single_revolute.urdf", "base_link", &["tool"]);
        let pose = robot.fk(&[1.0])[0];
        assert_relative_eq!(
            pose.translation.vector,
            Vector3::new(0.5 * 1f64.cos(), 0.5 * 1f64.sin(), 0.1),
            epsilon = 1e-12
        );
        assert_relative_eq!(pose.rotation.angle(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_fk_planar_arm() {
        let robot = robot("urdf/planar_arm.urdf", "base_link", &["tool"]);

        let pose = robot.fk(&[0.0; 5])[0];
        assert_relative_eq!(
            pose.translation.vector,
            Vector3::new(0.9, 0.0, 0.3),
            epsilon = 1e-12
        );

        let pose = robot.fk(&[0.2, FRAC_PI_2, 0.0, 0.0, 0.0])[0];
        assert_relative_eq!(
            pose.translation.vector,
            Vector3::new(0.0, 0.9, 0.5),
            epsilon = 1e-12
        );

        // elbow turns the forearm toward +y
        let pose = robot.fk(&[0.0, 0.0, FRAC_PI_2, 0.0, 0.0])[0];
        assert_relative_eq!(
            pose.translation.vector,
            Vector3::new(0.4, 0.5, 0.3),
            epsilon = 1e-12
        );

        // roll about the tool axis leaves the position alone
        let rolled = robot.fk(&[0.0, 0.0, 0.0, 0.0, 1.3])[0];
        assert_relative_eq!(
            rolled.translation.vector,
            Vector3::new(0.9, 0.0, 0.3),
            epsilon = 1e-12
        );
        assert_relative_eq!(rolled.rotation.angle(), 1.3, epsilon = 1e-12);
    }

    #[test]
    fn test_fk_from_root() {
        let robot = robot("urdf/planar_arm.urdf", "world", &["tool", "camera"]);
        let poses = robot.fk(&[0.0; 5]);
        assert_eq!(poses.len(), 2);
        assert_relative_eq!(poses[0].translation.z, 0.35, epsilon = 1e-12);
        assert_relative_eq!(
            poses[1].translation.vector,
            Vector3::new(0.2, 0.0, 0.85),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_fk_two_tips() {
        let robot = robot("urdf/dual_arm.urdf", "base_link", &["left_tip", "right_tip"]);
        let poses = robot.fk(&[0.0, 0.0, 0.0]);
        assert_relative_eq!(
            poses[0].translation.vector,
            Vector3::new(0.4, 0.2, 0.3),
            epsilon = 1e-12
        );
        assert_relative_eq!(
            poses[1].translation.vector,
            Vector3::new(0.4, -0.2, 0.3),
            epsilon = 1e-12
        );

        // the shared torso joint moves both tips
        let poses = robot.fk(&[FRAC_PI_2, 0.0, 0.0]);
        assert_relative_eq!(
            poses[0].translation.vector,
            Vector3::new(-0.2, 0.4, 0.3),
            epsilon = 1e-12
        );
        assert_relative_eq!(
            poses[1].translation.vector,
            Vector3::new(0.2, 0.4, 0.3),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_fk_deterministic() {
        let robot = robot("urdf/planar_arm.urdf", "base_link", &["tool"]);
        let q = [0.31, -1.2, 0.7, 1.9, -2.4];
        let first = robot.fk(&q);
        for _ in 0..10 {
            assert_eq!(robot.fk(&q), first);
        }
    }

    #[test]
    fn test_link_poses() {
        let robot = robot("urdf/planar_arm.urdf", "base_link", &["tool"]);
        let poses = robot.link_poses(&[0.0; 5]);
        let names: Vec<_> = poses.iter().map(|(name, _)| *name).collect();
        assert_eq!(
            names,
            ["base_link", "column", "upper_arm", "forearm", "wrist", "flange", "tool"]
        );
        assert_relative_eq!(poses[3].1.translation.x, 0.4, epsilon = 1e-12);
    }

    #[test]
    #[should_panic(expected = "configuration length")]
    fn test_fk_wrong_length() {
        let robot = robot("urdf/single_revolute.urdf", "base_link", &["tool"]);
        robot.fk(&[0.0, 1.0]);
    }
}
