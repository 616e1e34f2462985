//! Datagram payload decoding.
//!
//! Two grammars are tried in order:
//!
//! 1. **Structured**: a JSON object with an optional `acceleration` group and/or
//!    an optional `gyroscope` group, each holding `x`, `y` and `z`:
//!
//!    ```text
//!    {"acceleration": {"x": 0.1, "y": -0.2, "z": 9.8}, "gyroscope": {"x": 0, "y": 0, "z": 0.3}}
//!    ```
//!
//!    A component that does not convert to a number reads as zero.
//!
//! 2. **Tagged tuple**: four comma-separated tokens, `<tag>,<a>,<b>,<c>`:
//!
//!    ```text
//!    Rotation,0.01,0.02,0.03
//!    Linear Accel,0.5,2.0,-1.0
//!    ```
//!
//!    The tag is matched case-insensitively: `rotation` feeds the gyroscope
//!    fields and anything starting with `linear` feeds the acceleration fields.
//!
//! Decoding is pure. Failures are returned as [`Decoded::Rejected`] so the
//! caller can log the reason and move on.

use serde_json::{Map, Value};
use thiserror::Error;

use crate::snapshot::{Axes, PartialUpdate};

/// Key of the acceleration group in the structured grammar.
const ACCELERATION_KEY: &str = "acceleration";

/// Key of the gyroscope group in the structured grammar.
const GYROSCOPE_KEY: &str = "gyroscope";

/// Tag selecting the gyroscope fields in the tuple grammar.
const ROTATION_TAG: &str = "rotation";

/// Tag prefix selecting the acceleration fields in the tuple grammar.
const LINEAR_TAG_PREFIX: &str = "linear";

/// Number of tokens in a tagged tuple.
const TUPLE_ARITY: usize = 4;

/// Why a payload was dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RejectReason {
    /// One of the tuple's value tokens is not a finite number.
    #[error("non-numeric payload")]
    NonNumeric,

    /// The tuple's tag names no known sensor.
    #[error("unrecognized sensor type: {0}")]
    UnrecognizedSensor(String),

    /// The payload is neither a structured object nor a four-token tuple.
    #[error("unexpected payload format ({tokens} tokens)")]
    UnexpectedFormat {
        /// How many comma-separated tokens the payload had.
        tokens: usize,
    },
}

/// The outcome of decoding one payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    /// Linear acceleration only.
    Acceleration(Axes),
    /// Angular rate only.
    Gyroscope(Axes),
    /// Both groups from one structured payload.
    Combined {
        /// Linear acceleration.
        acceleration: Axes,
        /// Angular rate.
        gyroscope: Axes,
    },
    /// The payload was dropped.
    Rejected(RejectReason),
}

impl Decoded {
    /// Convert into the update to merge, or `None` for a rejection.
    #[must_use]
    pub fn into_update(self) -> Option<PartialUpdate> {
        match self {
            Self::Acceleration(axes) => Some(PartialUpdate::acceleration(axes)),
            Self::Gyroscope(axes) => Some(PartialUpdate::gyroscope(axes)),
            Self::Combined {
                acceleration,
                gyroscope,
            } => Some(PartialUpdate::combined(acceleration, gyroscope)),
            Self::Rejected(_) => None,
        }
    }

    /// Check whether the payload was dropped.
    #[must_use]
    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }

    /// Short name of the variant, for logging.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Acceleration(_) => "acceleration",
            Self::Gyroscope(_) => "gyroscope",
            Self::Combined { .. } => "combined",
            Self::Rejected(_) => "rejected",
        }
    }
}

/// Decode a raw datagram.
///
/// Invalid UTF-8 is replaced rather than rejected, and surrounding whitespace
/// is trimmed before either grammar is tried.
#[must_use]
pub fn decode(bytes: &[u8]) -> Decoded {
    let text = String::from_utf8_lossy(bytes);
    decode_str(text.trim())
}

/// Decode an already-trimmed text payload.
fn decode_str(raw: &str) -> Decoded {
    if let Some(decoded) = decode_structured(raw) {
        return decoded;
    }
    decode_tuple(raw)
}

/// Try the structured grammar. `None` means "fall through to the tuple grammar".
fn decode_structured(raw: &str) -> Option<Decoded> {
    let Ok(Value::Object(object)) = serde_json::from_str::<Value>(raw) else {
        return None;
    };

    let acceleration = group(&object, ACCELERATION_KEY);
    let gyroscope = group(&object, GYROSCOPE_KEY);

    match (acceleration, gyroscope) {
        (Some(acceleration), Some(gyroscope)) => Some(Decoded::Combined {
            acceleration,
            gyroscope,
        }),
        (Some(acceleration), None) => Some(Decoded::Acceleration(acceleration)),
        (None, Some(gyroscope)) => Some(Decoded::Gyroscope(gyroscope)),
        (None, None) => None,
    }
}

/// Read a three-axis group, treating falsy values (`null`, `false`, `0`, `""`)
/// as absent.
fn group(object: &Map<String, Value>, key: &str) -> Option<Axes> {
    let value = object.get(key).filter(|v| is_truthy(v))?;
    let component = |name: &str| value.get(name).map_or(0.0, coerce_number);
    Some(Axes::new(component("x"), component("y"), component("z")))
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Lenient numeric conversion: anything that does not yield a finite number
/// becomes zero.
fn coerce_number(value: &Value) -> f64 {
    let number = match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::Bool(b) => f64::from(u8::from(*b)),
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                0.0
            } else {
                s.parse::<f64>().unwrap_or(0.0)
            }
        }
        Value::Null | Value::Array(_) | Value::Object(_) => 0.0,
    };
    if number.is_finite() {
        number
    } else {
        0.0
    }
}

fn decode_tuple(raw: &str) -> Decoded {
    let parts: Vec<&str> = raw.split(',').map(str::trim).collect();
    if parts.len() != TUPLE_ARITY {
        return Decoded::Rejected(RejectReason::UnexpectedFormat {
            tokens: parts.len(),
        });
    }

    let (Some(a), Some(b), Some(c)) = (
        parse_finite(parts[1]),
        parse_finite(parts[2]),
        parse_finite(parts[3]),
    ) else {
        return Decoded::Rejected(RejectReason::NonNumeric);
    };
    let axes = Axes::new(a, b, c);

    let tag = parts[0].to_lowercase();
    if tag == ROTATION_TAG {
        Decoded::Gyroscope(axes)
    } else if tag.starts_with(LINEAR_TAG_PREFIX) {
        Decoded::Acceleration(axes)
    } else {
        Decoded::Rejected(RejectReason::UnrecognizedSensor(parts[0].to_string()))
    }
}

fn parse_finite(token: &str) -> Option<f64> {
    token.parse::<f64>().ok().filter(|v| v.is_finite())
}
