//! Basic gyroscope calibration walkthrough
//!
//! Simulates a device sitting still on a desk, feeds the sample stream to
//! the gyroscope engine, and hands the published bias to the
//! over-temperature model.
//!
//! Run with: cargo run --example 01_gyro_calibration

use driftguard_core::{
    GyroCalConfig, GyroCalibrator, OverTempCompensator, OverTempConfig,
};

const NS_PER_MS: u64 = 1_000_000;

fn main() {
    let mut gyro = GyroCalibrator::new(GyroCalConfig::default());
    let mut otc = OverTempCompensator::new(OverTempConfig::default());

    // A real host would forward driver samples; here the device is
    // motionless with a small constant bias at 24 °C
    let true_bias = [0.004, -0.002, 0.001]; // rad/s
    let die_temp = 24.0;

    let mut t = 0u64;
    for _ in 0..200 {
        gyro.update_accel(t, &[0.0, 0.0, 9.80665]);
        gyro.update(t, &true_bias, die_temp);
        t += 50 * NS_PER_MS;

        if gyro.new_calibration_available() {
            let bias = gyro.bias();
            println!(
                "calibration at t={} ms: bias = [{:.4}, {:.4}, {:.4}] rad/s, temp = {:.1} °C, confidence = {:.2}",
                t / NS_PER_MS,
                bias[0], bias[1], bias[2],
                gyro.temperature(),
                gyro.confidence(),
            );
            otc.update(t, &bias, gyro.temperature());
        }
    }

    // Later, at a different die temperature, ask the model for the bias
    otc.set_temperature(t, 30.0);
    let compensated = otc.offset();
    println!(
        "compensated bias at 30 °C: [{:.4}, {:.4}, {:.4}] rad/s",
        compensated[0], compensated[1], compensated[2]
    );

    let corrected = gyro.remove_bias(&true_bias);
    println!(
        "corrected still reading: [{:.5}, {:.5}, {:.5}] rad/s",
        corrected[0], corrected[1], corrected[2]
    );
}
