//! Serde (de)serialization for [`std::time::Duration`] as human-readable
//! strings (`"30s"`, `"500ms"`, `"2m"`), for use in configuration structs
//! with `#[serde(with = "relay_core::duration_serde")]`.

use std::time::Duration;

use serde::{Deserializer, Serializer};

pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&format!("{}ms", duration.as_millis()))
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;
    use serde_json::Value;

    let value = Value::deserialize(deserializer)?;
    match value {
        Value::String(s) => parse_duration_string(&s).map_err(Error::custom),
        Value::Number(n) => n
            .as_u64()
            .map(Duration::from_millis)
            .ok_or_else(|| Error::custom("duration must be a non-negative integer of milliseconds")),
        _ => Err(Error::custom("invalid duration format")),
    }
}

pub fn parse_duration_string(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }
    if let Some(stripped) = s.strip_suffix("ms") {
        let num: u64 = stripped
            .parse()
            .map_err(|_| format!("invalid number: {stripped}"))?;
        return Ok(Duration::from_millis(num));
    }
    if let Some(stripped) = s.strip_suffix('h') {
        let num: u64 = stripped
            .parse()
            .map_err(|_| format!("invalid number: {stripped}"))?;
        return Ok(Duration::from_secs(num * 3600));
    }
    if let Some(stripped) = s.strip_suffix('m') {
        let num: u64 = stripped
            .parse()
            .map_err(|_| format!("invalid number: {stripped}"))?;
        return Ok(Duration::from_secs(num * 60));
    }
    if let Some(stripped) = s.strip_suffix('s') {
        let num: f64 = stripped
            .parse()
            .map_err(|_| format!("invalid number: {stripped}"))?;
        let secs = num.trunc() as u64;
        let nanos = (num.fract() * 1_000_000_000.0).round() as u32;
        return Ok(Duration::new(secs, nanos));
    }
    let num: u64 = s
        .parse()
        .map_err(|_| format!("invalid duration string: {s}"))?;
    Ok(Duration::from_millis(num))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_milliseconds() {
        assert_eq!(parse_duration_string("17500ms").unwrap(), Duration::from_millis(17500));
    }

    #[test]
    fn parses_seconds() {
        assert_eq!(parse_duration_string("30s").unwrap(), Duration::from_secs(30));
    }

    #[test]
    fn parses_bare_number_as_milliseconds() {
        assert_eq!(parse_duration_string("5000").unwrap(), Duration::from_millis(5000));
    }

    #[test]
    fn rejects_empty_string() {
        assert!(parse_duration_string("").is_err());
    }
}
