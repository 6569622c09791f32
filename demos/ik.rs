use std::time::{Duration, Instant};

use kidy_ik::{IkPlugin, KinematicsSolver, MultiBody, ParameterStore, Parameters, QueryOptions};
use nalgebra::{Isometry3, Translation3, UnitQuaternion};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("kidy_ik=debug".parse()?)
                .add_directive("warn".parse()?),
        )
        .init();

    let multi_body = MultiBody::from_urdf("urdf/planar_arm.urdf")?;
    let parameters = ParameterStore::new(Parameters {
        minimal_displacement_weight: 1e-4,
        ..Parameters::default()
    })?;
    let plugin = IkPlugin::initialize(&multi_body, "arm", "/base_link", &["/tool"], parameters)?;

    let target = Isometry3::from_parts(
        Translation3::new(0.45, 0.35, 0.4),
        UnitQuaternion::from_euler_angles(0.3, 0., 1.1),
    );
    let seed = [0.25, 0., 0., 0., 0.];

    let start = Instant::now();
    let response = plugin.search_pose(
        &target,
        &seed,
        Duration::from_millis(200),
        QueryOptions {
            return_approximate_solution: true,
        },
    )?;
    println!("{:?} in {:?}", response.status, start.elapsed());
    for (name, value) in plugin.joint_names().iter().zip(&response.solution) {
        println!("{name:>12}: {value:.4}");
    }

    let reached = plugin.get_position_fk(&["tool"], &response.solution)?[0];
    println!(
        "position error {:.2e} m, orientation error {:.2e} rad",
        kidy_ik::linear_error(&reached, &target),
        kidy_ik::angular_error(&reached, &target)
    );
    Ok(())
}
