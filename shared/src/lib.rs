use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fmt;

pub mod protocol;

pub use protocol::{Packet, Request, Response};

pub const MAX_VELOCITY: f64 = 1.0;
pub const MIN_DURATION: f64 = 1.0;
pub const MAX_YAW_ROTATIONS: f64 = 1.0;

pub const BATTERY_EMPTY_VOLTAGE: f64 = 3.4;
pub const BATTERY_FULL_VOLTAGE: f64 = 4.18;

pub const PICKUP_ZONE: (f64, f64) = (2.2, 1.6);
pub const ZONE_RADIUS: f64 = 0.25;
pub const ZONE_ALTITUDE: f64 = 0.2;

pub const MAX_CARRY_WEIGHT: f64 = 3.0;
pub const MAX_PENDING_PACKAGES: usize = 20;
pub const PACKAGE_WEIGHTS: [f64; 3] = [0.5, 0.75, 1.0];

/// Drop-off points shared by every swarm, on the floor of arena 0.
pub const COORDINATE_POOL: [Vector3; 8] = [
    Vector3::new(2.6, 0.6, 0.0),
    Vector3::new(2.4, 3.4, 0.0),
    Vector3::new(0.6, 2.2, 0.0),
    Vector3::new(1.4, 3.2, 0.0),
    Vector3::new(1.0, 1.6, 0.0),
    Vector3::new(3.6, 0.6, 0.0),
    Vector3::new(3.2, 3.2, 0.0),
    Vector3::new(3.4, 1.4, 0.0),
];

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Default)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector3 {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn distance(&self, other: &Vector3) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    pub fn planar_distance(&self, x: f64, y: f64) -> f64 {
        let dx = self.x - x;
        let dy = self.y - y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// A closed, axis-aligned flight volume in arena-local coordinates together
/// with the offset that maps it into the driver's global frame.
///
/// Arenas are immutable once built. Clamping a target into the box is the
/// caller's job; the arena only translates between frames.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Arena {
    pub id: u32,
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
    pub min_z: f64,
    pub max_z: f64,
    pub offset_x: f64,
    pub offset_y: f64,
    pub offset_z: f64,
}

impl Arena {
    pub fn new(
        id: u32,
        (min_x, max_x): (f64, f64),
        (min_y, max_y): (f64, f64),
        (min_z, max_z): (f64, f64),
        offset: Vector3,
    ) -> Self {
        Self {
            id,
            min_x,
            max_x,
            min_y,
            max_y,
            min_z,
            max_z,
            offset_x: offset.x,
            offset_y: offset.y,
            offset_z: offset.z,
        }
    }

    /// Looks up one of the fixed arenas of the flight hall.
    pub fn by_id(id: u32) -> Option<Arena> {
        match id {
            0 => Some(Arena::new(
                0,
                (-2.0, 2.0),
                (-2.0, 2.0),
                (0.0, 1.2),
                Vector3::new(2.0, 2.0, 0.0),
            )),
            1 => Some(Arena::new(
                1,
                (2.0, 6.0),
                (-2.0, 2.0),
                (0.0, 1.2),
                Vector3::new(-2.0, 2.0, 0.0),
            )),
            2 => Some(Arena::new(
                2,
                (2.0, 6.0),
                (-6.0, -2.0),
                (0.0, 1.2),
                Vector3::new(-2.0, 6.0, 0.0),
            )),
            _ => None,
        }
    }

    pub fn transform_x(&self, x: f64) -> f64 {
        x + self.offset_x
    }

    pub fn transform_y(&self, y: f64) -> f64 {
        y + self.offset_y
    }

    pub fn transform_z(&self, z: f64) -> f64 {
        z + self.offset_z
    }

    pub fn transform_x_inverse(&self, x: f64) -> f64 {
        x - self.offset_x
    }

    pub fn transform_y_inverse(&self, y: f64) -> f64 {
        y - self.offset_y
    }

    pub fn transform_z_inverse(&self, z: f64) -> f64 {
        z - self.offset_z
    }

    pub fn transform(&self, v: Vector3) -> Vector3 {
        Vector3::new(
            self.transform_x(v.x),
            self.transform_y(v.y),
            self.transform_z(v.z),
        )
    }

    pub fn transform_inverse(&self, v: Vector3) -> Vector3 {
        Vector3::new(
            self.transform_x_inverse(v.x),
            self.transform_y_inverse(v.y),
            self.transform_z_inverse(v.z),
        )
    }
}

/// Flight state of a single drone as tracked by the server.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub enum DroneState {
    #[default]
    Offline,
    Idle,
    Starting,
    Landing,
    Navigating,
    Hovering,
}

impl fmt::Display for DroneState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DroneState::Offline => "OFFLINE",
            DroneState::Idle => "IDLE",
            DroneState::Starting => "STARTING",
            DroneState::Landing => "LANDING",
            DroneState::Navigating => "NAVIGATING",
            DroneState::Hovering => "HOVERING",
        };
        f.write_str(name)
    }
}

/// Snapshot of a drone as reported to callers. `x`/`y` are arena-local,
/// `z` is passed through untouched.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct DroneStatus {
    pub id: String,
    pub var_x: f64,
    pub var_y: f64,
    pub var_z: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub yaw: f64,
    pub status: DroneState,
    pub is_connected: bool,
    pub battery_voltage: f64,
    pub battery_percentage: f64,
}

impl DroneStatus {
    pub fn position(&self) -> Vector3 {
        Vector3::new(self.x, self.y, self.z)
    }
}

/// Maps a cell voltage onto 0..=100 along the linear LiPo curve.
pub fn battery_percentage(voltage: f64) -> f64 {
    let percentage =
        (voltage - BATTERY_EMPTY_VOLTAGE) / (BATTERY_FULL_VOLTAGE - BATTERY_EMPTY_VOLTAGE) * 100.0;
    percentage.clamp(0.0, 100.0)
}

/// Wraps a yaw angle into `[0, 2π·rotations)`.
pub fn normalize_yaw(yaw: f64, rotations: f64) -> f64 {
    let period = 2.0 * rotations * PI;
    let wrapped = yaw.rem_euclid(period);
    // rem_euclid rounds tiny negative inputs up to the period itself
    if wrapped >= period {
        0.0
    } else {
        wrapped
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct TakeoffLandResult {
    pub duration: f64,
    pub target_z: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct GoToResult {
    pub duration: f64,
    pub target_x: f64,
    pub target_y: f64,
    pub target_z: f64,
    pub target_yaw: f64,
    pub relative: bool,
}

/// Radio parameters identifying the physical link of one drone.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct LinkConfig {
    pub radio_id: u32,
    pub channel: u32,
    pub address: String,
    pub data_rate: String,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            radio_id: 0,
            channel: 80,
            address: "E7E7E7E7E7".to_string(),
            data_rate: "2M".to_string(),
        }
    }
}

impl LinkConfig {
    pub fn uri(&self) -> String {
        format!(
            "radio://{}/{}/{}/{}",
            self.radio_id, self.channel, self.data_rate, self.address
        )
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Package {
    pub id: String,
    pub coordinates: Vector3,
    pub weight: f64,
    pub assigned_drone: Option<String>,
    pub picked: bool,
}

impl Package {
    pub fn new(id: String, coordinates: Vector3, weight: f64) -> Self {
        Self {
            id,
            coordinates,
            weight,
            assigned_drone: None,
            picked: false,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct DeliverySummary {
    pub swarm_id: String,
    pub delivered: u32,
    pub pending: usize,
    pub capacity_rejections: u32,
}

impl fmt::Display for DeliverySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Swarm {} has {} deliveries and {} still pending and {} weight exceeds on a drone.",
            self.swarm_id, self.delivered, self.pending, self.capacity_rejections
        )
    }
}
