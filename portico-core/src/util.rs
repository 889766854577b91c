//! Small shared helpers: duration config fields.

use std::time::Duration;

/// Parse a config duration: `250ms`, `30s`, `5m`, `2h`, or a bare number
/// of seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(secs) = s.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let split = s.find(|c: char| !c.is_ascii_digit())?;
    let (num, unit) = s.split_at(split);
    let value: u64 = num.parse().ok()?;
    match unit {
        "ms" => Some(Duration::from_millis(value)),
        "s" => Some(Duration::from_secs(value)),
        "m" => Some(Duration::from_secs(value * 60)),
        "h" => Some(Duration::from_secs(value * 3600)),
        _ => None,
    }
}

fn format_duration(d: &Duration) -> String {
    if d.subsec_nanos() != 0 {
        format!("{}ms", d.as_millis())
    } else {
        format!("{}s", d.as_secs())
    }
}

/// Serde adapter for `Option<Duration>` config fields accepting either a
/// string with a unit suffix or a bare number of seconds.
pub mod duration_opt {
    use super::*;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Secs(u64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_str(&format_duration(d)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        let raw: Option<Raw> = Option::deserialize(deserializer)?;
        match raw {
            None => Ok(None),
            Some(Raw::Secs(secs)) => Ok(Some(Duration::from_secs(secs))),
            Some(Raw::Text(text)) => parse_duration(&text)
                .map(Some)
                .ok_or_else(|| D::Error::custom(format!("invalid duration {text:?}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_parse() {
        assert_eq!(parse_duration("250ms"), Some(Duration::from_millis(250)));
        assert_eq!(parse_duration("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("5m"), Some(Duration::from_secs(300)));
        assert_eq!(parse_duration("2h"), Some(Duration::from_secs(7200)));
        assert_eq!(parse_duration("15"), Some(Duration::from_secs(15)));
        assert_eq!(parse_duration("abc"), None);
        assert_eq!(parse_duration("10d"), None);
    }

    #[test]
    fn serde_round_trip() {
        #[derive(serde::Serialize, serde::Deserialize)]
        struct T {
            #[serde(default, with = "duration_opt")]
            grace_period: Option<Duration>,
        }

        let t: T = serde_json::from_str(r#"{"grace_period": "10s"}"#).unwrap();
        assert_eq!(t.grace_period, Some(Duration::from_secs(10)));

        let t: T = serde_json::from_str(r#"{"grace_period": 7}"#).unwrap();
        assert_eq!(t.grace_period, Some(Duration::from_secs(7)));

        let t: T = serde_json::from_str(r#"{}"#).unwrap();
        assert_eq!(t.grace_period, None);

        let json = serde_json::to_string(&T {
            grace_period: Some(Duration::from_secs(10)),
        })
        .unwrap();
        assert_eq!(json, r#"{"grace_period":"10s"}"#);
    }
}
