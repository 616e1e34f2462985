//! Derived safety metrics.
//!
//! Hard braking and rapid acceleration share one unsigned threshold on the
//! longitudinal axis, so a reading cannot tell the two apart by sign. The
//! turnable-speed estimate is unclamped and goes negative once lateral
//! acceleration exceeds [`LATERAL_LIMIT`].

/// Magnitude of `ax` above which both `hb` and `ra` are raised.
pub const LONGITUDINAL_THRESHOLD: f64 = 1.5;

/// Tyre friction coefficient used by the turnable-speed estimate.
pub const FRICTION_COEFFICIENT: f64 = 0.8;

/// Gravitational acceleration in m/s².
pub const GRAVITY: f64 = 9.8;

/// Reference curve radius in metres.
pub const CURVE_RADIUS: f64 = 10.0;

/// Lateral acceleration at which the turnable-speed estimate reaches zero.
pub const LATERAL_LIMIT: f64 = 10.0;

/// The three metric fields derived from a snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DerivedMetrics {
    /// Hard-braking flag.
    pub hb: u8,
    /// Rapid-acceleration flag.
    pub ra: u8,
    /// Maximum turnable speed.
    pub mts: f64,
}

/// Derive `hb`, `ra` and `mts` from the longitudinal and lateral components.
#[must_use]
pub fn derive(ax: f64, ay: f64) -> DerivedMetrics {
    let accel_mag = ax.abs();
    let flag = u8::from(accel_mag > LONGITUDINAL_THRESHOLD);

    let lateral = ay.abs();
    let mts =
        (FRICTION_COEFFICIENT * GRAVITY * CURVE_RADIUS).sqrt() * (1.0 - lateral / LATERAL_LIMIT);

    DerivedMetrics {
        hb: flag,
        ra: flag,
        mts,
    }
}
