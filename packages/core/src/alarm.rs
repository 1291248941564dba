//! Alarm and TimeStamp records attached to every attribute value.

use chrono::Utc;

use crate::{Error, Result, Value};

/// Alarm severity, serialized as its index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum AlarmSeverity {
    #[default]
    No,
    Minor,
    Major,
    Invalid,
    Undefined,
}

impl AlarmSeverity {
    const ALL: [AlarmSeverity; 5] = [
        AlarmSeverity::No,
        AlarmSeverity::Minor,
        AlarmSeverity::Major,
        AlarmSeverity::Invalid,
        AlarmSeverity::Undefined,
    ];

    pub fn from_index(i: i64) -> Option<Self> {
        usize::try_from(i).ok().and_then(|i| Self::ALL.get(i).copied())
    }
}

/// Alarm status, serialized as its index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AlarmStatus {
    #[default]
    No,
    Device,
    Driver,
    Record,
    Db,
    Conf,
    Undefined,
    Client,
}

impl AlarmStatus {
    const ALL: [AlarmStatus; 8] = [
        AlarmStatus::No,
        AlarmStatus::Device,
        AlarmStatus::Driver,
        AlarmStatus::Record,
        AlarmStatus::Db,
        AlarmStatus::Conf,
        AlarmStatus::Undefined,
        AlarmStatus::Client,
    ];

    pub fn from_index(i: i64) -> Option<Self> {
        usize::try_from(i).ok().and_then(|i| Self::ALL.get(i).copied())
    }
}

/// An alarm: severity, status and a message.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Alarm {
    pub severity: AlarmSeverity,
    pub status: AlarmStatus,
    pub message: String,
}

impl Alarm {
    pub const TYPEID: &'static str = "alarm_t";

    /// No alarm.
    pub fn ok() -> Self {
        Alarm::default()
    }

    pub fn new(severity: AlarmSeverity, status: AlarmStatus, message: impl Into<String>) -> Self {
        Alarm {
            severity,
            status,
            message: message.into(),
        }
    }

    /// A MAJOR alarm raised by the software itself.
    pub fn major(message: impl Into<String>) -> Self {
        Alarm::new(AlarmSeverity::Major, AlarmStatus::Client, message)
    }

    /// An INVALID alarm, used when a value source disconnects.
    pub fn invalid(message: impl Into<String>) -> Self {
        Alarm::new(AlarmSeverity::Invalid, AlarmStatus::Device, message)
    }

    pub fn to_value(&self) -> Value {
        Value::from([
            ("typeid", Value::from(Self::TYPEID)),
            ("severity", Value::from(self.severity as i64)),
            ("status", Value::from(self.status as i64)),
            ("message", Value::from(self.message.as_str())),
        ])
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        let severity = value
            .field("severity")
            .and_then(Value::as_i64)
            .and_then(AlarmSeverity::from_index)
            .ok_or_else(|| Error::Validation(format!("bad alarm severity in {}", value)))?;
        let status = value
            .field("status")
            .and_then(Value::as_i64)
            .and_then(AlarmStatus::from_index)
            .ok_or_else(|| Error::Validation(format!("bad alarm status in {}", value)))?;
        let message = value
            .field("message")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Ok(Alarm {
            severity,
            status,
            message,
        })
    }
}

/// Seconds and nanoseconds since the UNIX epoch plus a user tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TimeStamp {
    pub seconds_past_epoch: i64,
    pub nanoseconds: i64,
    pub user_tag: i64,
}

impl TimeStamp {
    pub const TYPEID: &'static str = "time_t";

    /// The sentinel meaning "never set".
    pub fn zero() -> Self {
        TimeStamp::default()
    }

    pub fn now() -> Self {
        let now = Utc::now();
        TimeStamp {
            seconds_past_epoch: now.timestamp(),
            nanoseconds: i64::from(now.timestamp_subsec_nanos()),
            user_tag: 0,
        }
    }

    pub fn is_zero(&self) -> bool {
        *self == TimeStamp::zero()
    }

    pub fn to_value(&self) -> Value {
        Value::from([
            ("typeid", Value::from(Self::TYPEID)),
            ("secondsPastEpoch", Value::from(self.seconds_past_epoch)),
            ("nanoseconds", Value::from(self.nanoseconds)),
            ("userTag", Value::from(self.user_tag)),
        ])
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        let get = |name: &str| value.field(name).and_then(Value::as_i64).unwrap_or(0);
        if !value.is_map() {
            return Err(Error::Validation(format!("expected a time_t, got {}", value)));
        }
        Ok(TimeStamp {
            seconds_past_epoch: get("secondsPastEpoch"),
            nanoseconds: get("nanoseconds"),
            user_tag: get("userTag"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alarm_serializes_as_integers() {
        let alarm = Alarm::major("boom");
        let v = alarm.to_value();
        assert_eq!(v.typeid(), Some("alarm_t"));
        assert_eq!(v.field("severity"), Some(&Value::from(2)));
        assert_eq!(v.field("status"), Some(&Value::from(7)));
        assert_eq!(Alarm::from_value(&v).unwrap(), alarm);
    }

    #[test]
    fn bad_severity_rejected() {
        let v = Value::from([("severity", 9), ("status", 0)]);
        assert!(Alarm::from_value(&v).is_err());
    }

    #[test]
    fn timestamp_now_is_after_zero() {
        let ts = TimeStamp::now();
        assert!(ts > TimeStamp::zero());
        assert!(!ts.is_zero());
        let back = TimeStamp::from_value(&ts.to_value()).unwrap();
        assert_eq!(back, ts);
    }
}
