// tests/avoidance.rs
use glam::Vec2;
use proptest::prelude::*;
use std::sync::Arc;
use swarm_robot::avoidance::{project_away, projection, swerve_around};
use swarm_robot::{AvoidanceConfig, LocalAir, ManualClock, Robot, RobotConfig, SimBody};

fn vec2(range: f32) -> impl Strategy<Value = Vec2> {
    (-range..range, -range..range).prop_map(|(x, y)| Vec2::new(x, y))
}

fn obstacle() -> impl Strategy<Value = Vec2> {
    vec2(1.4).prop_filter("obstacle must not coincide with the robot", |o| {
        o.length() > 0.01
    })
}

proptest! {
    #[test]
    fn test_clear_path_is_identity(target in vec2(10.0), last in vec2(10.0)) {
        let cfg = AvoidanceConfig::default();
        prop_assert_eq!(project_away(target, &[], last, &cfg), target);
        prop_assert_eq!(swerve_around(target, &[], &cfg), target);
    }

    #[test]
    fn test_receding_target_is_untouched(o in obstacle(), target in vec2(10.0), last in vec2(10.0)) {
        prop_assume!(projection(o, target) <= 0.0);
        let cfg = AvoidanceConfig::default();
        prop_assert_eq!(project_away(target, &[o], last, &cfg), target);
        prop_assert_eq!(swerve_around(target, &[o], &cfg), target);
    }

    #[test]
    fn test_soft_deflection_turns_away(
        o in obstacle(),
        p in 0.1f32..0.79,
        side in -10.0f32..10.0,
        last in vec2(10.0),
    ) {
        let target = o * p + o.perp().normalize() * side;
        let cfg = AvoidanceConfig::default();
        let corrected = project_away(target, &[o], last, &cfg);
        let axis = o.normalize();
        // The obstacle-aligned component flips sign: it now points away.
        prop_assert!(corrected.dot(axis) < target.dot(axis));
        prop_assert!(corrected.dot(axis) < 0.0);
        // The perpendicular component is preserved.
        prop_assert!((corrected.perp_dot(axis) - target.perp_dot(axis)).abs() < 1e-3);
    }

    #[test]
    fn test_hard_swerve_never_heads_at_obstacle(
        o in obstacle(),
        p in 0.81f32..20.0,
        side in -10.0f32..10.0,
        last in vec2(10.0),
    ) {
        let target = o * p + o.perp().normalize() * side;
        let cfg = AvoidanceConfig::default();
        let corrected = project_away(target, &[o], last, &cfg);
        prop_assert!(corrected.dot(o) < 0.0);
        prop_assert!((corrected.length() - cfg.swerve_gain * o.length()).abs() < 1e-3);
    }

    #[test]
    fn test_rotating_policy_is_perpendicular_or_retreating(
        obstacles in prop::collection::vec(obstacle(), 1..6),
        target in vec2(10.0),
    ) {
        let cfg = AvoidanceConfig::default();
        let nearest = *obstacles
            .iter()
            .min_by(|a, b| a.length_squared().total_cmp(&b.length_squared()))
            .unwrap();
        prop_assume!(projection(nearest, target) > 0.0);
        let corrected = swerve_around(target, &obstacles, &cfg);
        prop_assert!(corrected.dot(nearest) <= 1e-4 * target.length() * nearest.length());
    }
}

#[test]
fn test_robot_correction_caches_last_target() {
    let clock = ManualClock::new(0.0);
    let air = LocalAir::new();
    let network = air.join("solo", Arc::new(clock.clone()), None);
    let body = SimBody::new(Vec2::ZERO, 0.0);
    let mut robot = Robot::new(body, network, Arc::new(clock), RobotConfig::default());

    let target = Vec2::new(0.3, -2.0);
    assert_eq!(robot.correct_target(target), target);
    assert_eq!(robot.state().last_target, target);
    assert_eq!(robot.correct_target_rotating(-target), -target);
    assert_eq!(robot.state().last_target, -target);
}
