use std::f64::consts::{PI, TAU};

use nalgebra::{Isometry3, Unit, Vector3};
use tracing::warn;

use crate::{multi_body::MultiBody, ModelError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JointKind {
    Revolute,
    Continuous,
    Prismatic,
}

/// Position limits of a bounded joint, in rad or m.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Limits {
    pub min: f64,
    pub max: f64,
}

/// One active joint, i.e. one entry of the configuration vector.
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub name: String,
    pub kind: JointKind,
    /// `None` for continuous joints.
    pub limits: Option<Limits>,
    pub max_velocity: f64,
    /// Per-joint weight shared by the posture goals.
    pub minimal_displacement_factor: f64,
}

impl Variable {
    /// Width of the position range, zero for continuous joints.
    pub fn span(&self) -> f64 {
        self.limits.map_or(0.0, |l| l.max - l.min)
    }

    /// Midpoint of the position range, zero for continuous joints.
    pub fn mid(&self) -> f64 {
        self.limits.map_or(0.0, |l| 0.5 * (l.min + l.max))
    }

    /// Range explored by random restarts; a full turn for continuous joints.
    pub fn search_span(&self) -> f64 {
        match self.limits {
            Some(l) => l.max - l.min,
            None => TAU,
        }
    }

    /// Projects `value` onto the feasible set of this joint.
    pub fn clamp(&self, value: f64) -> f64 {
        if !value.is_finite() {
            return self.mid();
        }
        match self.limits {
            Some(l) => value.clamp(l.min, l.max),
            None => wrap_angle(value),
        }
    }
}

/// Wraps an angle into `[-pi, pi)`.
pub fn wrap_angle(angle: f64) -> f64 {
    if (-PI..PI).contains(&angle) {
        return angle;
    }
    let wrapped = (angle + PI).rem_euclid(TAU) - PI;
    // rem_euclid may round up to TAU
    if wrapped >= PI {
        wrapped - TAU
    } else {
        wrapped
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum Motion {
    Fixed,
    Rotation {
        axis: Unit<Vector3<f64>>,
        variable: usize,
    },
    Translation {
        axis: Unit<Vector3<f64>>,
        variable: usize,
    },
}

/// A link of the controlled subtree and the joint that moves it.
#[derive(Debug, Clone)]
pub(crate) struct Segment {
    pub(crate) link: String,
    /// Parent segment, `None` when the parent is the base link.
    pub(crate) parent: Option<usize>,
    pub(crate) origin: Isometry3<f64>,
    pub(crate) motion: Motion,
}

/// Kinematic model of the joints between a base link and one or more tips.
///
/// Built once and read-only afterwards, so a single `Robot` can be shared by
/// any number of concurrent searches.
#[derive(Debug, Clone)]
pub struct Robot {
    base_frame: String,
    tip_frames: Vec<String>,
    variables: Vec<Variable>,
    // parents always precede their children
    pub(crate) segments: Vec<Segment>,
    // `None` when the tip is the base link itself
    pub(crate) tip_segments: Vec<Option<usize>>,
}

impl Robot {
    pub fn from_multi_body(
        multi_body: &MultiBody,
        base_frame: &str,
        tip_frames: &[&str],
    ) -> Result<Robot, ModelError> {
        if tip_frames.is_empty() {
            return Err(ModelError::NoTips);
        }
        let find = |name: &str| {
            multi_body
                .link_index(name)
                .ok_or_else(|| ModelError::LinkNotFound {
                    name: name.to_owned(),
                })
        };
        let base = find(base_frame)?;

        let mut segments: Vec<Segment> = vec![];
        let mut variables: Vec<Variable> = vec![];
        let mut tip_segments = vec![];
        // link index -> segment index
        let mut visited: Vec<(usize, usize)> = vec![];

        for tip_frame in tip_frames {
            let tip = find(tip_frame)?;
            let path = multi_body
                .path(base, tip)
                .ok_or_else(|| ModelError::NotDescendant {
                    base: base_frame.to_owned(),
                    tip: (*tip_frame).to_owned(),
                })?;

            let mut parent = None;
            for index in path.into_iter().skip(1) {
                if let Some((_, segment)) = visited.iter().find(|(link, _)| *link == index) {
                    parent = Some(*segment);
                    continue;
                }
                let Some(link) = multi_body.get_link(index) else {
                    return Err(ModelError::LinkNotFound {
                        name: format!("#{index}"),
                    });
                };
                let motion = match &link.joint {
                    Some(joint) => joint_motion(joint, &mut variables),
                    None => Motion::Fixed,
                };
                segments.push(Segment {
                    link: link.name.clone(),
                    parent,
                    origin: link.local_zero_pose,
                    motion,
                });
                let segment = segments.len() - 1;
                visited.push((index, segment));
                parent = Some(segment);
            }
            tip_segments.push(parent);
        }

        if variables.is_empty() {
            return Err(ModelError::NoActiveJoints {
                base: base_frame.to_owned(),
            });
        }

        let factor = 1.0 / variables.len() as f64;
        for variable in &mut variables {
            variable.minimal_displacement_factor = factor;
        }

        Ok(Robot {
            base_frame: base_frame.to_owned(),
            tip_frames: tip_frames.iter().map(|tip| (*tip).to_owned()).collect(),
            variables,
            segments,
            tip_segments,
        })
    }

    pub fn base_frame(&self) -> &str {
        &self.base_frame
    }

    pub fn tip_frames(&self) -> &[String] {
        &self.tip_frames
    }

    pub fn tip_count(&self) -> usize {
        self.tip_frames.len()
    }

    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    pub fn variable_count(&self) -> usize {
        self.variables.len()
    }

    pub fn joint_names(&self) -> Vec<String> {
        self.variables.iter().map(|v| v.name.clone()).collect()
    }

    /// Wraps continuous joints and clamps bounded joints in place.
    ///
    /// # Panics
    ///
    /// Panics if `variables.len() != self.variable_count()`.
    pub fn clamp(&self, variables: &mut [f64]) {
        assert_eq!(
            variables.len(),
            self.variable_count(),
            "configuration length must equal the number of active joints"
        );
        for (value, variable) in variables.iter_mut().zip(&self.variables) {
            *value = variable.clamp(*value);
        }
    }

    /// Returns a copy of `variables` projected onto the joint limits.
    pub fn enforce_bounds(&self, variables: &[f64]) -> Vec<f64> {
        let mut bounded = variables.to_vec();
        self.clamp(&mut bounded);
        bounded
    }
}

fn joint_motion(joint: &urdf_rs::Joint, variables: &mut Vec<Variable>) -> Motion {
    let kind = match joint.joint_type {
        urdf_rs::JointType::Revolute => JointKind::Revolute,
        urdf_rs::JointType::Continuous => JointKind::Continuous,
        urdf_rs::JointType::Prismatic => JointKind::Prismatic,
        urdf_rs::JointType::Fixed => return Motion::Fixed,
        _ => {
            warn!(joint = %joint.name, "unsupported joint type, holding it at zero");
            return Motion::Fixed;
        }
    };
    let xyz = joint.axis.xyz.0;
    let Some(axis) = Unit::try_new(Vector3::new(xyz[0], xyz[1], xyz[2]), f64::EPSILON) else {
        warn!(joint = %joint.name, "joint axis has zero length, holding it at zero");
        return Motion::Fixed;
    };

    let limits = match kind {
        JointKind::Continuous => None,
        _ => Some(Limits {
            min: joint.limit.lower.min(joint.limit.upper),
            max: joint.limit.lower.max(joint.limit.upper),
        }),
    };
    variables.push(Variable {
        name: joint.name.clone(),
        kind,
        limits,
        max_velocity: joint.limit.velocity,
        minimal_displacement_factor: 1.0,
    });
    let variable = variables.len() - 1;

    match kind {
        JointKind::Prismatic => Motion::Translation { axis, variable },
        _ => Motion::Rotation { axis, variable },
    }
}
