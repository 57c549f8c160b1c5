// tests/robot_control.rs
use glam::Vec2;
use std::f32::consts::{FRAC_PI_2, PI};
use std::sync::Arc;
use std::time::Duration;
use swarm_robot::{
    Body, Clock, LocalAir, LocalNetwork, ManualClock, Message, Network, ObstacleGrid, Robot,
    RobotConfig, SimBody, SystemClock,
};

fn setup(body: SimBody) -> (Robot<SimBody, LocalNetwork>, LocalNetwork, ManualClock) {
    let clock = ManualClock::new(0.0);
    let air = LocalAir::new();
    let network = air.join("R1", Arc::new(clock.clone()), None);
    let observer = air.join("observer", Arc::new(clock.clone()), None);
    observer.start_broadcasting().unwrap();
    let robot = Robot::new(body, network, Arc::new(clock.clone()), RobotConfig::default());
    (robot, observer, clock)
}

/// Obstacles at the corners of a 4 m square plus `extra`, on 0.5 m cells.
fn arena(extra: &[Vec2]) -> Arc<ObstacleGrid> {
    let mut points = vec![Vec2::ZERO, Vec2::new(4.0, 4.0)];
    points.extend_from_slice(extra);
    Arc::new(ObstacleGrid::build(points, 0.5, None).unwrap())
}

#[test]
fn test_lifecycle_is_idempotent() {
    let (mut robot, _observer, _clock) = setup(SimBody::new(Vec2::ZERO, 0.0));
    assert!(!robot.is_working());
    assert!(robot.broadcast_state().is_none());

    robot.turn_on().unwrap();
    robot.turn_on().unwrap();
    assert!(robot.is_working());
    assert!(robot.state().is_broadcasting);
    assert!(robot.network().is_broadcasting());

    robot.turn_off().unwrap();
    robot.turn_off().unwrap();
    assert!(!robot.is_working());
    assert!(!robot.network().is_broadcasting());
}

#[test]
fn test_kinematics_ignored_while_off() {
    let (mut robot, _observer, _clock) = setup(SimBody::new(Vec2::ZERO, 0.0));
    robot.move_forward(1.0, None);
    assert_eq!(robot.rotate(1.0), 0.0);
    assert_eq!(robot.position(), Vec2::ZERO);
    assert_eq!(robot.heading(), 0.0);
}

#[test]
fn test_obstacle_in_front_forces_zero_speed() {
    let body = SimBody::new(Vec2::new(2.01, 2.0), 0.0).with_obstacles(arena(&[Vec2::new(2.0, 2.0)]));
    let (mut robot, _observer, _clock) = setup(body);
    robot.turn_on().unwrap();
    assert!(robot.obstacle_in_front());
    assert!(robot.obstacle_near());

    robot.move_forward(1.0, Some(0.1));
    assert_eq!(robot.position(), Vec2::new(2.01, 2.0));
}

#[test]
fn test_align_takes_shortest_turn() {
    let (mut robot, _observer, _clock) = setup(SimBody::new(Vec2::ZERO, 0.9 * PI));
    robot.turn_on().unwrap();
    let dtheta = robot.align(Vec2::new(-1.0, -0.1));
    assert!(dtheta > 0.0 && dtheta < 0.2 * PI, "turned {dtheta}");
    let heading = robot.heading();
    let target = Vec2::new(-1.0, -0.1).to_angle();
    assert!((Vec2::from_angle(heading) - Vec2::from_angle(target)).length() < 1e-5);

    let dtheta = robot.align(Vec2::new(0.0, 1.0));
    assert!(dtheta < 0.0);
    assert!((robot.heading().rem_euclid(2.0 * PI) - FRAC_PI_2).abs() < 1e-4);
}

#[test]
fn test_go_to_reaches_target_and_times_out() {
    let (mut robot, _observer, clock) = setup(SimBody::new(Vec2::ZERO, 0.0));
    robot.turn_on().unwrap();
    assert!(robot.go_to(Vec2::new(3.0, 4.0), 0.1, 120.0));
    assert!((robot.position() - Vec2::new(3.0, 4.0)).length() < 0.1);

    let reached = robot.follow_path([Vec2::new(3.0, 0.0), Vec2::new(0.0, 0.0)], 0.1, 60.0);
    assert_eq!(reached, 2);

    robot.turn_off().unwrap();
    let start = clock.now();
    assert!(!robot.go_to(Vec2::new(10.0, 0.0), 0.1, 5.0));
    assert!(clock.now() - start >= 5.0);
}

#[test]
fn test_broadcasts_reach_peers() {
    let body = SimBody::new(Vec2::new(1.8, 2.0), 0.0).with_obstacles(arena(&[Vec2::new(2.0, 2.0)]));
    let (mut robot, observer, _clock) = setup(body);
    robot.turn_on().unwrap();

    assert!(matches!(robot.broadcast_state(), Some(Message::State { .. })));
    let seen = observer.agents_state();
    assert_eq!(seen[0].id, "R1");
    assert_eq!(seen[0].position, Some(Vec2::new(1.8, 2.0)));

    assert!(matches!(
        robot.broadcast_state_obstacles(),
        Some(Message::StateObstacles { .. })
    ));
    assert!(matches!(robot.broadcast_obstacles(), Some(Message::Obstacles { .. })));
    let reports = observer.obstacle_reports();
    assert!(reports["R1"].iter().any(|o| o.distance(Vec2::new(2.0, 2.0)) < 0.01));

    robot.broadcast_goto(Vec2::new(1.0, -2.5));
    robot.broadcast_rendezvous();
    assert_eq!(
        observer.incomings(),
        vec!["goto 1.80 2.00".to_string(), "goto 1.00 -2.50".to_string()]
    );
}

#[test]
fn test_obstacle_free_broadcast_falls_back_to_state() {
    let (mut robot, _observer, _clock) = setup(SimBody::new(Vec2::ZERO, 0.0));
    robot.turn_on().unwrap();
    assert!(matches!(robot.broadcast_state_obstacles(), Some(Message::State { .. })));
    assert!(robot.broadcast_obstacles().is_none());
}

#[test]
fn test_correction_deflects_near_obstacle() {
    let body = SimBody::new(Vec2::new(1.8, 2.0), 0.0).with_obstacles(arena(&[Vec2::new(2.0, 2.0)]));
    let (mut robot, _observer, _clock) = setup(body);
    let obstacles = robot.obstacle_coordinates();
    assert_eq!(obstacles.len(), 1);

    // Shallow approach: soft deflection keeps going but turns away.
    let target = Vec2::new(0.1, 1.0);
    let corrected = robot.correct_target(target);
    assert!(corrected.x < 0.0);
    assert!((corrected.y - 1.0).abs() < 1e-5);

    // Head on: hard swerve, side chosen from the previous target (upward).
    let corrected = robot.correct_target(Vec2::new(1.0, 0.0));
    assert!(corrected.y > 0.0 && corrected.x < 0.0);
}

#[test]
fn test_frontal_projection_of_sensed_wall() {
    let (robot, _observer, _clock) = setup(SimBody::new(Vec2::ZERO, 0.0));
    let wall = [Vec2::new(-1.0, 2.0), Vec2::new(0.0, 2.0), Vec2::new(1.0, 2.0)];
    let p = robot.frontal_obstacle_coordinates(&wall).unwrap();
    assert!((p - Vec2::new(0.0, 2.0)).length() < 1e-5);
}

#[test]
fn test_telemetry_starts_and_joins() {
    let air = LocalAir::new();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let network = air.join("T", Arc::clone(&clock), None);
    let config = RobotConfig {
        telemetry_join_timeout: Duration::from_secs(2),
        ..Default::default()
    };
    let mut robot = Robot::new(SimBody::new(Vec2::ZERO, 0.0), network, clock, config);
    robot.turn_on().unwrap();
    robot.start_telemetry(0.01).unwrap();
    robot.start_telemetry(0.01).unwrap();
    std::thread::sleep(Duration::from_millis(50));
    robot.body().lock().move_forward(1.0, None);
    robot.turn_off().unwrap();
    robot.stop_telemetry().unwrap();
}
