//! Duration parsing and serde codecs for floe.
//!
//! Durations in config files and annotations are accepted either as a
//! human string (`"5m"`, `"30s"`) or as a plain count of milliseconds,
//! and always serialized back out as milliseconds.
//!
//! # Example
//!
//! ```
//! use floe_duration::{deserialize_duration, serialize_duration};
//! use serde::{Deserialize, Serialize};
//! use std::time::Duration;
//!
//! #[derive(Serialize, Deserialize)]
//! struct Config {
//!     #[serde(with = "floe_duration")]
//!     timeout: Duration,
//! }
//! ```

use std::fmt;
use std::time::Duration;

use serde::de::{self, Visitor};
use serde::{Deserializer, Serializer};

/// Deserialize a [`Duration`] from either a humantime string or milliseconds.
pub fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    struct DurationVisitor;

    impl<'de> Visitor<'de> for DurationVisitor {
        type Value = Duration;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a humantime duration string or a number of milliseconds")
        }

        fn visit_str<E>(self, v: &str) -> Result<Duration, E>
        where
            E: de::Error,
        {
            humantime::parse_duration(v).map_err(de::Error::custom)
        }

        fn visit_u64<E>(self, v: u64) -> Result<Duration, E>
        where
            E: de::Error,
        {
            Ok(Duration::from_millis(v))
        }

        fn visit_i64<E>(self, v: i64) -> Result<Duration, E>
        where
            E: de::Error,
        {
            if v < 0 {
                return Err(de::Error::custom("duration milliseconds must not be negative"));
            }
            Ok(Duration::from_millis(v as u64))
        }
    }

    deserializer.deserialize_any(DurationVisitor)
}

/// Serialize a [`Duration`] as a plain count of milliseconds.
pub fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_u64(duration.as_millis() as u64)
}

/// Deserialize an `Option<Duration>`, accepting `null`, a humantime string, or milliseconds.
pub fn deserialize_duration_opt<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    struct OptVisitor;

    impl<'de> Visitor<'de> for OptVisitor {
        type Value = Option<Duration>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("null or a duration")
        }

        fn visit_none<E>(self) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(None)
        }

        fn visit_unit<E>(self) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(None)
        }

        fn visit_some<D2>(self, deserializer: D2) -> Result<Self::Value, D2::Error>
        where
            D2: Deserializer<'de>,
        {
            deserialize_duration(deserializer).map(Some)
        }
    }

    deserializer.deserialize_option(OptVisitor)
}

/// Serialize an `Option<Duration>` as milliseconds or `null`.
pub fn serialize_duration_opt<S>(
    duration: &Option<Duration>,
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match duration {
        Some(d) => serializer.serialize_u64(d.as_millis() as u64),
        None => serializer.serialize_none(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    struct Wrapper {
        #[serde(
            deserialize_with = "deserialize_duration",
            serialize_with = "serialize_duration"
        )]
        d: Duration,
    }

    #[test]
    fn parses_humantime_string() {
        let w: Wrapper = serde_json::from_str(r#"{"d":"5m"}"#).unwrap();
        assert_eq!(w.d, Duration::from_secs(300));
    }

    #[test]
    fn parses_millis_number() {
        let w: Wrapper = serde_json::from_str(r#"{"d":1500}"#).unwrap();
        assert_eq!(w.d, Duration::from_millis(1500));
    }

    #[test]
    fn serializes_as_millis() {
        let w = Wrapper { d: Duration::from_secs(2) };
        let json = serde_json::to_string(&w).unwrap();
        assert_eq!(json, r#"{"d":2000}"#);
    }

    #[test]
    fn toml_table_accepts_string_form() {
        #[derive(Deserialize)]
        struct T {
            #[serde(deserialize_with = "deserialize_duration")]
            gate_timeout: Duration,
        }
        let t: T = toml::from_str("gate_timeout = \"5m\"").unwrap();
        assert_eq!(t.gate_timeout, Duration::from_secs(300));
    }

    proptest::proptest! {
        #[test]
        fn round_trip_millis(ms in 0u64..1_000_000_000) {
            let w = Wrapper { d: Duration::from_millis(ms) };
            let json = serde_json::to_string(&w).unwrap();
            let back: Wrapper = serde_json::from_str(&json).unwrap();
            proptest::prop_assert_eq!(back.d, w.d);
        }
    }
}
