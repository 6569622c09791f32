use std::{collections::HashMap, path::Path};

use nalgebra::{Isometry3, Translation3, UnitQuaternion};
use petgraph::graphmap::DiGraphMap;
use urdf_rs::{read_file, read_from_string};

use crate::ModelError;

#[derive(Debug, Clone)]
pub struct Link {
    pub name: String,
    /// Joint connecting this link to its parent, `None` for the root.
    pub joint: Option<urdf_rs::Joint>,
    /// Parent joint origin, identity for the root.
    pub local_zero_pose: Isometry3<f64>,
}

/// Link tree of a URDF robot.
#[derive(Debug, Clone)]
pub struct MultiBody {
    // link index graph, parent -> child
    graph: DiGraphMap<usize, ()>,
    // map index -> link
    link_map: HashMap<usize, Link>,
    root_index: usize,
    leafs_index: Vec<usize>,
    name: String,
}

impl MultiBody {
    pub fn from_urdf(path: impl AsRef<Path>) -> Result<MultiBody, ModelError> {
        let robot = read_file(path)?;
        MultiBody::from_robot(robot)
    }

    pub fn from_urdf_str(xml: &str) -> Result<MultiBody, ModelError> {
        let robot = read_from_string(xml)?;
        MultiBody::from_robot(robot)
    }

    pub fn from_robot(robot: urdf_rs::Robot) -> Result<MultiBody, ModelError> {
        parse_robot(robot)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root_index(&self) -> usize {
        self.root_index
    }

    pub fn leafs(&self) -> &[usize] {
        &self.leafs_index
    }

    pub fn link_count(&self) -> usize {
        self.link_map.len()
    }

    pub fn get_link(&self, index: usize) -> Option<&Link> {
        self.link_map.get(&index)
    }

    pub fn link_index(&self, name: &str) -> Option<usize> {
        self.link_map
            .iter()
            .find(|(_, link)| link.name == name)
            .map(|(index, _)| *index)
    }

    pub fn parent(&self, index: usize) -> Option<usize> {
        self.graph
            .neighbors_directed(index, petgraph::Direction::Incoming)
            .next()
    }

    pub fn children(&self, index: usize) -> Vec<usize> {
        self.graph
            .neighbors_directed(index, petgraph::Direction::Outgoing)
            .collect()
    }

    /// Link indexes from `start` down to `end`, both included.
    ///
    /// Returns `None` when `end` is not `start` or one of its descendants.
    pub fn path(&self, start: usize, end: usize) -> Option<Vec<usize>> {
        let mut chain = vec![];
        let mut current = end;
        loop {
            chain.push(current);
            if current == start {
                break;
            }
            current = self.parent(current)?;
        }
        chain.reverse();
        Some(chain)
    }
}

fn parse_robot(robot: urdf_rs::Robot) -> Result<MultiBody, ModelError> {
    let index_of: HashMap<&str, usize> = robot
        .links
        .iter()
        .enumerate()
        .map(|(index, link)| (link.name.as_str(), index))
        .collect();

    let mut graph = DiGraphMap::new();
    for index in 0..robot.links.len() {
        graph.add_node(index);
    }

    // child index -> parent joint
    let mut parent_joint: HashMap<usize, &urdf_rs::Joint> = HashMap::new();
    for joint in &robot.joints {
        let lookup = |name: &str| {
            index_of
                .get(name)
                .copied()
                .ok_or_else(|| ModelError::LinkNotFound {
                    name: name.to_owned(),
                })
        };
        let parent = lookup(&joint.parent.link)?;
        let child = lookup(&joint.child.link)?;
        graph.add_edge(parent, child, ());
        parent_joint.insert(child, joint);
    }

    let roots: Vec<usize> = (0..robot.links.len())
        .filter(|index| !parent_joint.contains_key(index))
        .collect();
    let root_index = match roots.as_slice() {
        [root] => *root,
        [] => {
            return Err(ModelError::NoRoot {
                robot: robot.name.clone(),
            })
        }
        _ => {
            return Err(ModelError::MultipleRoots {
                robot: robot.name.clone(),
                roots: roots
                    .iter()
                    .map(|index| robot.links[*index].name.clone())
                    .collect(),
            })
        }
    };

    let leafs_index = (0..robot.links.len())
        .filter(|index| {
            graph
                .neighbors_directed(*index, petgraph::Direction::Outgoing)
                .next()
                .is_none()
        })
        .collect();

    let link_map = robot
        .links
        .iter()
        .enumerate()
        .map(|(index, link)| {
            let joint = parent_joint.get(&index).map(|joint| (*joint).clone());
            let local_zero_pose = joint
                .as_ref()
                .map_or_else(Isometry3::identity, joint_relative_pose);
            (
                index,
                Link {
                    name: link.name.clone(),
                    joint,
                    local_zero_pose,
                },
            )
        })
        .collect();

    Ok(MultiBody {
        graph,
        link_map,
        root_index,
        leafs_index,
        name: robot.name,
    })
}

fn joint_relative_pose(joint: &urdf_rs::Joint) -> Isometry3<f64> {
    origin_to_isometry(&joint.origin)
}

fn origin_to_isometry(origin: &urdf_rs::Pose) -> Isometry3<f64> {
    let rpy = origin.rpy.0;
    let xyz = origin.xyz.0;
    Isometry3::from_parts(
        Translation3::new(xyz[0], xyz[1], xyz[2]),
        UnitQuaternion::from_euler_angles(rpy[0], rpy[1], rpy[2]),
    )
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;
    use core::f64::consts::FRAC_PI_2;
    use nalgebra::Vector3;

    #[test]
    fn test_from_urdf() {
        let multi_body = MultiBody::from_urdf("urdf/planar_arm.urdf").unwrap();
        assert_eq!(multi_body.name(), "planar_arm");
        assert_eq!(multi_body.link_count(), 9);

        let root = multi_body.root_index();
        assert_eq!(multi_body.get_link(root).unwrap().name, "world");
        assert!(multi_body.get_link(root).unwrap().joint.is_none());

        let mut leafs: Vec<_> = multi_body
            .leafs()
            .iter()
            .map(|index| multi_body.get_link(*index).unwrap().name.as_str())
            .collect();
        leafs.sort_unstable();
        assert_eq!(leafs, ["camera", "tool"]);
    }

    #[test]
    fn test_parent_children() {
        let multi_body = MultiBody::from_urdf("urdf/dual_arm.urdf").unwrap();
        let torso = multi_body.link_index("torso").unwrap();
        let base = multi_body.link_index("base_link").unwrap();
        assert_eq!(multi_body.parent(torso), Some(base));
        assert_eq!(multi_body.parent(base), None);

        let mut children: Vec<_> = multi_body
            .children(torso)
            .into_iter()
            .map(|index| multi_body.get_link(index).unwrap().name.clone())
            .collect();
        children.sort_unstable();
        assert_eq!(children, ["left_arm", "right_arm"]);
    }

    #[test]
    fn test_path() {
        let multi_body = MultiBody::from_urdf("urdf/dual_arm.urdf").unwrap();
        let base = multi_body.link_index("base_link").unwrap();
        let left_tip = multi_body.link_index("left_tip").unwrap();
        let right_arm = multi_body.link_index("right_arm").unwrap();

        let names: Vec<_> = multi_body
            .path(base, left_tip)
            .unwrap()
            .into_iter()
            .map(|index| multi_body.get_link(index).unwrap().name.clone())
            .collect();
        assert_eq!(names, ["base_link", "torso", "left_arm", "left_tip"]);

        assert_eq!(multi_body.path(left_tip, left_tip), Some(vec![left_tip]));
        assert_eq!(multi_body.path(right_arm, left_tip), None);
    }

    #[test]
    fn test_origin() {
        let multi_body = MultiBody::from_urdf("urdf/planar_arm.urdf").unwrap();
        let camera = multi_body.link_index("camera").unwrap();
        let pose = multi_body.get_link(camera).unwrap().local_zero_pose;
        assert_relative_eq!(pose.translation.x, 0.2, epsilon = 1e-12);
        assert_relative_eq!(pose.translation.z, 0.8, epsilon = 1e-12);
        // pitch by pi/2 turns +x into -z
        let x = pose.rotation * Vector3::x();
        assert_relative_eq!(x, -Vector3::z(), epsilon = 1e-12);
        assert_relative_eq!(pose.rotation.angle(), FRAC_PI_2, epsilon = 1e-12);
    }

    #[test]
    fn test_missing_link() {
        let xml = r#"
            <robot name="broken">
                <link name="base"/>
                <joint name="j" type="fixed">
                    <parent link="base"/><child link="ghost"/>
                </joint>
            </robot>
        "#;
        let err = MultiBody::from_urdf_str(xml).unwrap_err();
        assert!(matches!(err, ModelError::LinkNotFound { name } if name == "ghost"));
    }

    #[test]
    fn test_multiple_roots() {
        let xml = r#"
            <robot name="split">
                <link name="a"/>
                <link name="b"/>
            </robot>
        "#;
        let err = MultiBody::from_urdf_str(xml).unwrap_err();
        assert!(matches!(err, ModelError::MultipleRoots { .. }));
    }
}
