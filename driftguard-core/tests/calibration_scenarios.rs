//! End-to-end calibration scenarios
//!
//! Drives the engines through realistic sample streams via the public API
//! only: still-window accumulation for the accelerometer, a rotation batch
//! for the magnetometer, and the gyroscope-to-over-temperature pipeline that
//! mirrors how a host wires the engines together.

use driftguard_core::{
    AccelCalConfig, AccelCalibrator, GyroCalConfig, GyroCalibrator, MagCalConfig, MagCalibrator,
    OverTempCompensator, OverTempConfig, ThreeAxisCalData,
};

const G: f32 = 9.80665;
const NS_PER_MS: u64 = 1_000_000;
const NS_PER_SEC: u64 = 1_000_000_000;

/// 14 directions spread over the unit sphere
fn directions() -> [[f32; 3]; 14] {
    let mut dirs = [[0.0f32; 3]; 14];
    let axes: [[f32; 3]; 6] = [
        [1.0, 0.0, 0.0], [-1.0, 0.0, 0.0],
        [0.0, 1.0, 0.0], [0.0, -1.0, 0.0],
        [0.0, 0.0, 1.0], [0.0, 0.0, -1.0],
    ];
    dirs[..6].copy_from_slice(&axes);
    let d = 1.0 / 3.0f32.sqrt();
    let mut i = 6;
    for sx in [-d, d] {
        for sy in [-d, d] {
            for sz in [-d, d] {
                dirs[i] = [sx, sy, sz];
                i += 1;
            }
        }
    }
    dirs
}

#[test]
fn test_identity_correction_after_reset() {
    let mut cal = ThreeAxisCalData {
        scale: [[1.2, 0.0, 0.0], [0.1, 0.8, 0.0], [0.0, 0.2, 1.1]],
        bias: [0.5, -0.5, 0.25],
        cal_time: 123,
    };
    cal.reset();

    for x in [
        [0.0, 0.0, 0.0],
        [1.0, -2.0, 3.0],
        [9.81, 0.001, -45.0],
    ] {
        assert_eq!(cal.correct(&x), x);
    }
}

#[test]
fn test_accel_six_cluster_scenario() {
    let mut cal = AccelCalibrator::new(AccelCalConfig::default());
    let true_bias = [0.02, -0.01, 0.015]; // m/s²

    let dirs: [[f32; 3]; 6] = [
        [1.0, 0.0, 0.0], [-1.0, 0.0, 0.0],
        [0.0, 1.0, 0.0], [0.0, -1.0, 0.0],
        [0.0, 0.0, 1.0], [0.0, 0.0, -1.0],
    ];

    // Five visits to each of the six axis-aligned orientations, each visit
    // long enough (2 s at 20 Hz) that any leftover mixed window completes
    // and at least one clean still window lands in the bucket
    let mut t = 0u64;
    for _round in 0..5 {
        for dir in dirs {
            let sample = [
                G * dir[0] + true_bias[0],
                G * dir[1] + true_bias[1],
                G * dir[2] + true_bias[2],
            ];
            for _ in 0..40 {
                cal.update(t, &sample, 22.0);
                t += 50 * NS_PER_MS;
            }
            t += NS_PER_MS;
        }
    }

    // Exactly one edge-triggered notification
    assert!(cal.new_calibration_available());
    assert!(!cal.new_calibration_available());

    let candidate = cal.new_bias().expect("candidate should be pending");
    for i in 0..3 {
        assert!(
            (candidate[i] - true_bias[i]).abs() < 0.01 * G,
            "axis {}: recovered {} vs true {}",
            i, candidate[i], true_bias[i]
        );
    }

    // Swap in at a "sensor powered down" moment and verify the correction
    assert!(cal.apply_new_bias());
    let corrected = cal.remove_bias(&[true_bias[0], true_bias[1], G + true_bias[2]]);
    assert!(corrected[0].abs() < 0.01 * G);
    assert!(corrected[1].abs() < 0.01 * G);
    assert!((corrected[2] - G).abs() < 0.01 * G);
}

#[test]
fn test_mag_rotation_scenario() {
    let mut cal = MagCalibrator::new(MagCalConfig::default());
    let hard_iron = [14.0, -9.0, 4.0];
    let field = 52.0;

    let dirs = directions();
    let mut t = 0u64;
    for i in 0..60 {
        let u = dirs[i % dirs.len()];
        let m = [
            hard_iron[0] + field * u[0],
            hard_iron[1] + field * u[1],
            hard_iron[2] + field * u[2],
        ];
        cal.update(t, &m);
        t += 55 * NS_PER_MS;
    }

    assert!(cal.new_calibration_available());
    let bias = cal.bias();
    for i in 0..3 {
        assert!((bias[i] - hard_iron[i]).abs() < 0.1, "axis {}: {}", i, bias[i]);
    }
    assert!((cal.local_field() - field).abs() < 0.1);

    // Corrected readings sit on the centered sphere
    let corrected = cal.correct(&[hard_iron[0] + field, hard_iron[1], hard_iron[2]]);
    let norm = (corrected[0] * corrected[0]
        + corrected[1] * corrected[1]
        + corrected[2] * corrected[2])
        .sqrt();
    assert!((norm - field).abs() < 0.2);
}

#[test]
fn test_gyro_feeds_over_temp_pipeline() {
    let mut gyro = GyroCalibrator::new(GyroCalConfig::default());
    let mut otc = OverTempCompensator::new(OverTempConfig::default());

    // Two still periods at different die temperatures, biases on a known
    // temperature trend: bias_x = 1e-4 · temp
    let mut t = 0u64;
    for temp in [20.0f32, 40.0] {
        let bias = [1e-4 * temp, 0.0, 0.0];
        for _ in 0..(10 * 20) {
            gyro.update_accel(t, &[0.0, 0.0, G]);
            gyro.update(t, &bias, temp);
            t += 50 * NS_PER_MS;
        }

        if gyro.new_calibration_available() {
            otc.update(t, &gyro.bias(), gyro.temperature());
        }

        // Motion gap between the periods so the watchdog and period state
        // start cleanly at the next temperature
        t += 5 * NS_PER_SEC;
    }

    assert_eq!(otc.point_count(), 2);
    assert!(!otc.is_initial());
    assert!((otc.slope()[0] - 1e-4).abs() < 1e-5, "slope {}", otc.slope()[0]);

    // Query at an unvisited temperature: compensation interpolates the trend
    otc.set_temperature(t, 30.0);
    let offset = otc.offset();
    assert!(
        (offset[0] - 1e-4 * 30.0).abs() < 5e-4,
        "compensated {} vs expected {}",
        offset[0],
        1e-4 * 30.0
    );
}

#[test]
fn test_restored_calibration_survives_round_trip() {
    // Host persists an accel bias and a gyro bias, then restores both
    let mut accel = AccelCalibrator::new(AccelCalConfig::default());
    let mut gyro = GyroCalibrator::new(GyroCalConfig::default());

    accel.set_bias([0.03, -0.02, 0.01], 77).unwrap();
    gyro.set_bias([0.005, 0.0, -0.008], 31.5, 78).unwrap();

    assert_eq!(accel.bias(), [0.03, -0.02, 0.01]);
    assert_eq!(accel.calibration().cal_time, 77);
    assert_eq!(gyro.bias(), [0.005, 0.0, -0.008]);
    assert!((gyro.temperature() - 31.5).abs() < 1e-6);

    // Restored bias is applied immediately
    assert_eq!(gyro.remove_bias(&[0.005, 0.0, -0.008]), [0.0; 3]);
}
