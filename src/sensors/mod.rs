//! Decoded device telemetry and the hazard predicates derived from it.

mod history;
pub use history::{DistanceHistory, DEFAULT_FAR_DISTANCE_CM, HISTORY_LEN};

use bitflags::bitflags;
use serde::Serialize;

/// Raw accelerometer counts per g.
pub const ACCEL_COUNTS_PER_G: f32 = 16384.0;

/// Raw gyroscope counts per degree per second.
pub const GYRO_COUNTS_PER_DPS: f32 = 131.0;

/// Distance value the device reports when nothing is in range.
pub const DISTANCE_TOO_FAR: f32 = -1.0;

/// Distance value the device reports when an object is closer than it can measure.
pub const DISTANCE_TOO_CLOSE: f32 = -2.0;

bitflags! {
    /// Floor sensor flags as sent by the device. They are active low:
    /// a set bit means that sensor does not see the floor.
    ///
    /// # Members
    /// * [IrFlags::FRONT_NO_FLOOR] - Bit 0, the front sensor sees no floor
    /// * [IrFlags::BACK_NO_FLOOR] - Bit 1, the back sensor sees no floor
    pub struct IrFlags: u8 {
        const FRONT_NO_FLOOR = 0b0000_0001;
        const BACK_NO_FLOOR = 0b0000_0010;
    }
}

/// A sensor packet exactly as it travels on the wire, before unit scaling.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorPacket {
    pub distance: f32,
    pub accel: [i16; 3],
    pub gyro: [i16; 3],
    pub temperature: f32,
    pub ir_flags: u8,
    pub battery: u8,
}

/// What the ultrasonic sensor actually reported.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DistanceReading {
    /// A measured distance in centimeters
    Measured(f32),
    /// Nothing in range
    TooFar,
    /// Closer than the sensor can measure
    TooClose,
}

impl DistanceReading {
    pub fn from_raw(distance: f32) -> Self {
        if !distance.is_finite() || distance == DISTANCE_TOO_FAR {
            DistanceReading::TooFar
        } else if distance == DISTANCE_TOO_CLOSE || distance < 0.0 {
            DistanceReading::TooClose
        } else {
            DistanceReading::Measured(distance)
        }
    }
}

/// IMU sample in physical units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ImuReading {
    /// g
    pub acceleration_x: f32,
    pub acceleration_y: f32,
    pub acceleration_z: f32,
    /// degrees per second
    pub gyroscope_x: f32,
    pub gyroscope_y: f32,
    pub gyroscope_z: f32,
    /// degrees Celsius
    pub temperature: f32,
}

/// One decoded sensor packet.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorFrame {
    /// Raw ultrasonic value in centimeters, which may be a sentinel
    pub distance_cm: f32,
    pub imu: ImuReading,
    /// True when the front IR sensor sees the floor
    pub ir_front: bool,
    /// True when the back IR sensor sees the floor
    pub ir_back: bool,
    /// Battery charge, 0 to 100
    pub battery: u8,
}

impl From<SensorPacket> for SensorFrame {
    fn from(p: SensorPacket) -> Self {
        let flags = IrFlags::from_bits_truncate(p.ir_flags);
        SensorFrame {
            distance_cm: p.distance,
            imu: ImuReading {
                acceleration_x: p.accel[0] as f32 / ACCEL_COUNTS_PER_G,
                acceleration_y: p.accel[1] as f32 / ACCEL_COUNTS_PER_G,
                acceleration_z: p.accel[2] as f32 / ACCEL_COUNTS_PER_G,
                gyroscope_x: p.gyro[0] as f32 / GYRO_COUNTS_PER_DPS,
                gyroscope_y: p.gyro[1] as f32 / GYRO_COUNTS_PER_DPS,
                gyroscope_z: p.gyro[2] as f32 / GYRO_COUNTS_PER_DPS,
                temperature: p.temperature,
            },
            ir_front: !flags.contains(IrFlags::FRONT_NO_FLOOR),
            ir_back: !flags.contains(IrFlags::BACK_NO_FLOOR),
            battery: p.battery.min(100),
        }
    }
}

impl SensorFrame {
    pub fn distance(&self) -> DistanceReading {
        DistanceReading::from_raw(self.distance_cm)
    }

    /// True when something is closer than `threshold_cm`.
    /// A "too close" reading counts, a "too far" reading never does.
    pub fn is_obstacle_detected(&self, threshold_cm: f32) -> bool {
        match self.distance() {
            DistanceReading::Measured(d) => d < threshold_cm,
            DistanceReading::TooClose => true,
            DistanceReading::TooFar => false,
        }
    }

    /// True unless both IR sensors see the floor.
    pub fn check_cliff(&self) -> bool {
        !(self.ir_front && self.ir_back)
    }
}
