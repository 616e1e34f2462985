//! Core telemetry types for drivesense.
//!
//! This module defines the canonical [`Snapshot`] and the transient
//! [`PartialUpdate`] that inbound messages are reduced to before merging.

use serde::{Deserialize, Serialize};

use crate::metrics::{self, DerivedMetrics};

/// One of the six raw sensor fields a partial update may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    /// Linear acceleration, x axis.
    Ax,
    /// Linear acceleration, y axis.
    Ay,
    /// Linear acceleration, z axis.
    Az,
    /// Angular rate, x axis.
    Gx,
    /// Angular rate, y axis.
    Gy,
    /// Angular rate, z axis.
    Gz,
}

impl Field {
    /// All raw fields in wire order.
    pub const ALL: [Field; 6] = [
        Field::Ax,
        Field::Ay,
        Field::Az,
        Field::Gx,
        Field::Gy,
        Field::Gz,
    ];

    /// Look up a field by its wire key (`"ax"`, `"gz"`, ...).
    #[must_use]
    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "ax" => Some(Self::Ax),
            "ay" => Some(Self::Ay),
            "az" => Some(Self::Az),
            "gx" => Some(Self::Gx),
            "gy" => Some(Self::Gy),
            "gz" => Some(Self::Gz),
            _ => None,
        }
    }

    /// The wire key for this field.
    #[must_use]
    pub fn key(self) -> &'static str {
        match self {
            Self::Ax => "ax",
            Self::Ay => "ay",
            Self::Az => "az",
            Self::Gx => "gx",
            Self::Gy => "gy",
            Self::Gz => "gz",
        }
    }
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

/// A three-axis reading.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Axes {
    /// X component.
    pub x: f64,
    /// Y component.
    pub y: f64,
    /// Z component.
    pub z: f64,
}

impl Axes {
    /// Create a reading from its three components.
    #[must_use]
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// A subset of the raw sensor fields extracted from one inbound message.
///
/// Fields left as `None` are not touched by a merge; they keep whatever the
/// snapshot held before.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PartialUpdate {
    ax: Option<f64>,
    ay: Option<f64>,
    az: Option<f64>,
    gx: Option<f64>,
    gy: Option<f64>,
    gz: Option<f64>,
}

impl PartialUpdate {
    /// An update that touches nothing.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// An update over `{ax, ay, az}`.
    #[must_use]
    pub fn acceleration(axes: Axes) -> Self {
        Self {
            ax: Some(axes.x),
            ay: Some(axes.y),
            az: Some(axes.z),
            ..Self::default()
        }
    }

    /// An update over `{gx, gy, gz}`.
    #[must_use]
    pub fn gyroscope(axes: Axes) -> Self {
        Self {
            gx: Some(axes.x),
            gy: Some(axes.y),
            gz: Some(axes.z),
            ..Self::default()
        }
    }

    /// An update over all six raw fields.
    #[must_use]
    pub fn combined(acceleration: Axes, gyroscope: Axes) -> Self {
        Self {
            gx: Some(gyroscope.x),
            gy: Some(gyroscope.y),
            gz: Some(gyroscope.z),
            ..Self::acceleration(acceleration)
        }
    }

    /// Set a single field, builder style.
    #[must_use]
    pub fn with(mut self, field: Field, value: f64) -> Self {
        self.set(field, value);
        self
    }

    /// Set a single field.
    pub fn set(&mut self, field: Field, value: f64) {
        *self.slot_mut(field) = Some(value);
    }

    /// The value carried for `field`, if any.
    #[must_use]
    pub fn get(&self, field: Field) -> Option<f64> {
        match field {
            Field::Ax => self.ax,
            Field::Ay => self.ay,
            Field::Az => self.az,
            Field::Gx => self.gx,
            Field::Gy => self.gy,
            Field::Gz => self.gz,
        }
    }

    /// Check whether the update carries no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        Field::ALL.iter().all(|f| self.get(*f).is_none())
    }

    /// The fields this update carries, in wire order.
    pub fn fields(&self) -> impl Iterator<Item = (Field, f64)> + '_ {
        Field::ALL
            .iter()
            .filter_map(|f| self.get(*f).map(|v| (*f, v)))
    }

    fn slot_mut(&mut self, field: Field) -> &mut Option<f64> {
        match field {
            Field::Ax => &mut self.ax,
            Field::Ay => &mut self.ay,
            Field::Az => &mut self.az,
            Field::Gx => &mut self.gx,
            Field::Gy => &mut self.gy,
            Field::Gz => &mut self.gz,
        }
    }
}

/// The canonical record of the latest readings plus derived safety metrics.
///
/// Serializes as a flat object with the keys
/// `ax, ay, az, gx, gy, gz, hb, ra, mts, timestamp`. Missing keys deserialize
/// to their defaults, so a record written by an older or partial writer still
/// loads with the full field set.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Snapshot {
    /// Linear acceleration, x axis.
    pub ax: f64,
    /// Linear acceleration, y axis.
    pub ay: f64,
    /// Linear acceleration, z axis.
    pub az: f64,
    /// Angular rate, x axis.
    pub gx: f64,
    /// Angular rate, y axis.
    pub gy: f64,
    /// Angular rate, z axis.
    pub gz: f64,
    /// Hard-braking flag (0 or 1).
    pub hb: u8,
    /// Rapid-acceleration flag (0 or 1).
    pub ra: u8,
    /// Maximum turnable speed estimate.
    pub mts: f64,
    /// Milliseconds since the Unix epoch of the last accepted update, 0 if none.
    pub timestamp: i64,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self::from_raw(Axes::default(), Axes::default(), 0)
    }
}

impl Snapshot {
    /// Build a snapshot from raw readings, deriving the metric fields.
    #[must_use]
    pub fn from_raw(acceleration: Axes, gyroscope: Axes, timestamp: i64) -> Self {
        let mut snapshot = Self {
            ax: acceleration.x,
            ay: acceleration.y,
            az: acceleration.z,
            gx: gyroscope.x,
            gy: gyroscope.y,
            gz: gyroscope.z,
            hb: 0,
            ra: 0,
            mts: 0.0,
            timestamp,
        };
        snapshot.recompute();
        snapshot
    }

    /// Apply `update` on top of this snapshot and return the result.
    ///
    /// The overlay order is: zeroed raw fields, then this snapshot's raw
    /// fields, then the update's fields. Fields the update does not carry keep
    /// their previous values. Derived fields are recomputed and `timestamp`
    /// is set to `timestamp_ms`.
    #[must_use]
    pub fn merged(&self, update: &PartialUpdate, timestamp_ms: i64) -> Self {
        let mut next = Self::from_raw(Axes::default(), Axes::default(), timestamp_ms);
        for field in Field::ALL {
            next.set_raw(field, self.raw(field));
        }
        for (field, value) in update.fields() {
            next.set_raw(field, value);
        }
        next.recompute();
        next
    }

    /// Recompute `hb`, `ra` and `mts` from the current raw fields.
    pub fn recompute(&mut self) {
        let DerivedMetrics { hb, ra, mts } = metrics::derive(self.ax, self.ay);
        self.hb = hb;
        self.ra = ra;
        self.mts = mts;
    }

    /// Read a raw field.
    #[must_use]
    pub fn raw(&self, field: Field) -> f64 {
        match field {
            Field::Ax => self.ax,
            Field::Ay => self.ay,
            Field::Az => self.az,
            Field::Gx => self.gx,
            Field::Gy => self.gy,
            Field::Gz => self.gz,
        }
    }

    /// The linear acceleration components.
    #[must_use]
    pub fn acceleration(&self) -> Axes {
        Axes::new(self.ax, self.ay, self.az)
    }

    /// The angular rate components.
    #[must_use]
    pub fn gyroscope(&self) -> Axes {
        Axes::new(self.gx, self.gy, self.gz)
    }

    fn set_raw(&mut self, field: Field, value: f64) {
        match field {
            Field::Ax => self.ax = value,
            Field::Ay => self.ay = value,
            Field::Az => self.az = value,
            Field::Gx => self.gx = value,
            Field::Gy => self.gy = value,
            Field::Gz => self.gz = value,
        }
    }
}
