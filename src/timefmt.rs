//! Wall clock times travel as `HH:MM`, `HH:MM:SS` is accepted as input as well.
use chrono::NaiveTime;
use serde::{de, Deserialize, Deserializer, Serializer};

pub fn parse(value: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(value, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M:%S"))
        .ok()
}

pub fn format(time: &NaiveTime) -> String {
    time.format("%H:%M").to_string()
}

pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format(time))
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
    let value = String::deserialize(deserializer)?;

    parse(&value).ok_or_else(|| {
        de::Error::custom(format!("invalid time '{}', expected HH:MM", value))
    })
}
