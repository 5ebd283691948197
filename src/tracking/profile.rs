//! Power/precision presets and the sampling parameters they resolve to.
//!
//! Resolution is total: unknown codes and names fall back to
//! [`Profile::Economy`] rather than failing, so a corrupted settings file can
//! never stop a session from starting.

use std::fmt;
use std::time::Duration;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

const HEARTBEAT_MIN: Duration = Duration::from_secs(30);
const HEARTBEAT_MAX: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Profile {
    Precision,
    Balanced,
    #[default]
    Economy,
    MaxEconomy,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    HighAccuracy,
    BalancedPower,
}

/// Parameters handed to the provider subscription.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingParams {
    pub interval: Duration,
    pub min_interval: Duration,
    pub min_distance_m: f32,
    pub max_batch_delay: Duration,
    pub priority: Priority,
}

impl SamplingParams {
    /// Twice the nominal interval, clamped to 30 s ..= 5 min.
    pub fn heartbeat_period(&self) -> Duration {
        (self.interval * 2).clamp(HEARTBEAT_MIN, HEARTBEAT_MAX)
    }
}

impl Profile {
    pub const ALL: [Profile; 4] = [
        Profile::Precision,
        Profile::Balanced,
        Profile::Economy,
        Profile::MaxEconomy,
    ];

    pub fn from_code(code: i64) -> Self {
        match code {
            0 => Profile::Precision,
            1 => Profile::Balanced,
            3 => Profile::MaxEconomy,
            _ => Profile::Economy,
        }
    }

    pub fn code(&self) -> i64 {
        match self {
            Profile::Precision => 0,
            Profile::Balanced => 1,
            Profile::Economy => 2,
            Profile::MaxEconomy => 3,
        }
    }

    /// Case-insensitive; `-` and `_` are interchangeable.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "precision" => Profile::Precision,
            "balanced" => Profile::Balanced,
            "max_economy" => Profile::MaxEconomy,
            _ => Profile::Economy,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Profile::Precision => "precision",
            Profile::Balanced => "balanced",
            Profile::Economy => "economy",
            Profile::MaxEconomy => "max_economy",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Profile::Precision => "fix every 5 s, no distance filter, highest drain",
            Profile::Balanced => "fix every 30 s or 10 m, moderate drain",
            Profile::Economy => "fix every 2 min or 50 m, low drain",
            Profile::MaxEconomy => "fix every 5 min or 100 m, lowest drain",
        }
    }

    pub fn resolve(&self) -> SamplingParams {
        match self {
            Profile::Precision => SamplingParams {
                interval: Duration::from_secs(5),
                min_interval: Duration::from_secs(3),
                min_distance_m: 0.0,
                max_batch_delay: Duration::from_secs(5),
                priority: Priority::HighAccuracy,
            },
            Profile::Balanced => SamplingParams {
                interval: Duration::from_secs(30),
                min_interval: Duration::from_secs(15),
                min_distance_m: 10.0,
                max_batch_delay: Duration::from_secs(60),
                priority: Priority::BalancedPower,
            },
            Profile::Economy => SamplingParams {
                interval: Duration::from_secs(120),
                min_interval: Duration::from_secs(60),
                min_distance_m: 50.0,
                max_batch_delay: Duration::from_secs(180),
                priority: Priority::BalancedPower,
            },
            Profile::MaxEconomy => SamplingParams {
                interval: Duration::from_secs(300),
                min_interval: Duration::from_secs(180),
                min_distance_m: 100.0,
                max_batch_delay: Duration::from_secs(600),
                priority: Priority::BalancedPower,
            },
        }
    }
}

/// Resolve a raw persisted profile code.
pub fn resolve(code: i64) -> SamplingParams {
    Profile::from_code(code).resolve()
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Profile {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

struct ProfileVisitor;

impl<'de> de::Visitor<'de> for ProfileVisitor {
    type Value = Profile;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a profile name or numeric code")
    }

    fn visit_i64<E: de::Error>(self, value: i64) -> Result<Profile, E> {
        Ok(Profile::from_code(value))
    }

    fn visit_u64<E: de::Error>(self, value: u64) -> Result<Profile, E> {
        Ok(i64::try_from(value)
            .map(Profile::from_code)
            .unwrap_or_default())
    }

    fn visit_f64<E: de::Error>(self, _value: f64) -> Result<Profile, E> {
        Ok(Profile::Economy)
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<Profile, E> {
        Ok(Profile::from_name(value))
    }

    fn visit_bool<E: de::Error>(self, _value: bool) -> Result<Profile, E> {
        Ok(Profile::Economy)
    }

    fn visit_unit<E: de::Error>(self) -> Result<Profile, E> {
        Ok(Profile::Economy)
    }

    fn visit_seq<A: de::SeqAccess<'de>>(self, mut seq: A) -> Result<Profile, A::Error> {
        while seq.next_element::<de::IgnoredAny>()?.is_some() {}
        Ok(Profile::Economy)
    }

    fn visit_map<A: de::MapAccess<'de>>(self, mut map: A) -> Result<Profile, A::Error> {
        while map.next_entry::<de::IgnoredAny, de::IgnoredAny>()?.is_some() {}
        Ok(Profile::Economy)
    }
}

impl<'de> Deserialize<'de> for Profile {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(ProfileVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_code_resolves() {
        for code in [-1, 0, 1, 2, 3, 4, 99, i64::MIN, i64::MAX] {
            let params = resolve(code);
            assert!(params.interval >= params.min_interval);
        }
    }

    #[test]
    fn unknown_codes_match_economy() {
        let economy = Profile::Economy.resolve();
        assert_eq!(resolve(2), economy);
        assert_eq!(resolve(-7), economy);
        assert_eq!(resolve(42), economy);
        assert_eq!(Profile::from_name("turbo"), Profile::Economy);
    }

    #[test]
    fn presets_get_more_conservative() {
        let params: Vec<SamplingParams> = Profile::ALL.iter().map(Profile::resolve).collect();
        for pair in params.windows(2) {
            assert!(pair[0].interval < pair[1].interval);
            assert!(pair[0].min_interval < pair[1].min_interval);
            assert!(pair[0].min_distance_m < pair[1].min_distance_m);
            assert!(pair[0].max_batch_delay < pair[1].max_batch_delay);
        }
    }

    #[test]
    fn economy_matches_table() {
        let params = Profile::Economy.resolve();
        assert_eq!(params.interval, Duration::from_secs(120));
        assert_eq!(params.min_interval, Duration::from_secs(60));
        assert_eq!(params.min_distance_m, 50.0);
        assert_eq!(params.max_batch_delay, Duration::from_secs(180));
    }

    #[test]
    fn heartbeat_period_is_clamped() {
        assert_eq!(
            Profile::Precision.resolve().heartbeat_period(),
            Duration::from_secs(30)
        );
        assert_eq!(
            Profile::Balanced.resolve().heartbeat_period(),
            Duration::from_secs(60)
        );
        assert_eq!(
            Profile::Economy.resolve().heartbeat_period(),
            Duration::from_secs(240)
        );
        assert_eq!(
            Profile::MaxEconomy.resolve().heartbeat_period(),
            Duration::from_secs(300)
        );
    }

    #[test]
    fn code_and_name_round_trip() {
        for profile in Profile::ALL {
            assert_eq!(Profile::from_code(profile.code()), profile);
            assert_eq!(Profile::from_name(profile.as_str()), profile);
        }
        assert_eq!(Profile::from_name("Max-Economy"), Profile::MaxEconomy);
    }

    #[test]
    fn lenient_deserialization() {
        let from_name: Profile = serde_json::from_str("\"balanced\"").unwrap();
        let from_code: Profile = serde_json::from_str("0").unwrap();
        let garbage: Profile = serde_json::from_str("\"???\"").unwrap();
        let negative: Profile = serde_json::from_str("-3").unwrap();
        let null: Profile = serde_json::from_str("null").unwrap();
        let object: Profile = serde_json::from_str(r#"{"bad": [1, {"x": 2}]}"#).unwrap();
        let array: Profile = serde_json::from_str("[1, \"precision\"]").unwrap();

        assert_eq!(from_name, Profile::Balanced);
        assert_eq!(from_code, Profile::Precision);
        assert_eq!(garbage, Profile::Economy);
        assert_eq!(negative, Profile::Economy);
        assert_eq!(null, Profile::Economy);
        assert_eq!(object, Profile::Economy);
        assert_eq!(array, Profile::Economy);
        assert_eq!(
            serde_json::to_string(&Profile::MaxEconomy).unwrap(),
            "\"max_economy\""
        );
    }
}
