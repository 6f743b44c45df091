use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// World name used when a host does not distinguish between worlds.
pub const DEFAULT_WORLD: &str = "world";

/// Stable identity of a player across sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlayerId(pub Uuid);

impl PlayerId {
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Name of a world, each of which is owned by exactly one simulation thread.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorldId(pub String);

impl WorldId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for WorldId {
    fn default() -> Self {
        Self::new(DEFAULT_WORLD)
    }
}

impl fmt::Display for WorldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A point in a world plus the facing of whoever stood there.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub world: WorldId,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub yaw: f32,
    pub pitch: f32,
}

impl Location {
    pub fn new(world: WorldId, x: f64, y: f64, z: f64) -> Self {
        Self {
            world,
            x,
            y,
            z,
            yaw: 0.0,
            pitch: 0.0,
        }
    }

    pub fn with_rotation(mut self, yaw: f32, pitch: f32) -> Self {
        self.yaw = yaw;
        self.pitch = pitch;
        self
    }

    /// Straight-line distance ignoring worlds.
    pub fn distance_xyz(&self, other: &Location) -> f64 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        let dz = other.z - self.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    /// Distance between two locations. Locations in different worlds are
    /// infinitely far apart.
    pub fn distance(&self, other: &Location) -> f64 {
        if self.world != other.world {
            return f64::INFINITY;
        }
        self.distance_xyz(other)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({:.1}, {:.1}, {:.1})",
            self.world, self.x, self.y, self.z
        )
    }
}

/// What the simulation thread observed about a player at one instant.
///
/// `valid` is false when the player's entity cannot be resolved (dead,
/// respawning or gone). A valid player may still lack a location when the
/// host could not read its transform this cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerSample {
    pub valid: bool,
    pub location: Option<Location>,
}

impl PlayerSample {
    pub fn at(location: Location) -> Self {
        Self {
            valid: true,
            location: Some(location),
        }
    }

    pub fn invalid() -> Self {
        Self {
            valid: false,
            location: None,
        }
    }

    pub fn valid_without_position() -> Self {
        Self {
            valid: true,
            location: None,
        }
    }

    /// Location only when the sample is valid.
    pub fn position(&self) -> Option<&Location> {
        if self.valid {
            self.location.as_ref()
        } else {
            None
        }
    }
}

/// Direction of a paired teleport request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestKind {
    /// Requester travels to the target.
    Direct,
    /// Target travels to the requester.
    Reverse,
}

/// Player-facing notifications raised by the core. Text and localization
/// belong to the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Notice {
    WarmupStarted { command: String, seconds: u32 },
    WarmupCountdown { command: String, seconds: u32 },
    WarmupCancelled { command: String },
    OnCooldown { command: String, seconds: u32 },
    Teleported { destination: Location },
    DeathLocationSaved { location: Location },
}
