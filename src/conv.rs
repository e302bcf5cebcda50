//! Conversions between standard library time types and their protobuf counterparts.

use crate::{Error, Result};
use std::time::{Duration, SystemTime};

/// Convert a standard duration to its wire form, saturating at the largest representable value.
pub(crate) fn duration_to_proto(duration: Duration) -> prost_types::Duration {
    prost_types::Duration {
        seconds: i64::try_from(duration.as_secs()).unwrap_or(i64::MAX),
        nanos: i32::try_from(duration.subsec_nanos()).unwrap_or(0),
    }
}

/// Convert a wire duration to a standard one. Negative durations clamp to zero.
pub(crate) fn duration_from_proto(duration: &prost_types::Duration) -> Duration {
    let seconds = u64::try_from(duration.seconds).unwrap_or(0);
    let nanos = u32::try_from(duration.nanos).unwrap_or(0);
    Duration::new(seconds, nanos)
}

/// Convert an optional wire duration, treating zero as unset.
pub(crate) fn nonzero_duration(duration: Option<&prost_types::Duration>) -> Option<Duration> {
    duration
        .map(duration_from_proto)
        .filter(|duration| !duration.is_zero())
}

pub(crate) fn timestamp_to_proto(time: SystemTime) -> prost_types::Timestamp {
    prost_types::Timestamp::from(time)
}

/// Convert a timestamp the server is required to send, naming the field if it is missing.
pub(crate) fn required_timestamp(
    timestamp: Option<&prost_types::Timestamp>,
    field: &str,
) -> Result<SystemTime> {
    let timestamp = timestamp.ok_or_else(|| Error::malformed(format!("missing {field}")))?;
    SystemTime::try_from(timestamp.clone())
        .map_err(|err| Error::malformed(format!("invalid {field}: {err}")))
}

/// Convert a timestamp the server may omit.
pub(crate) fn optional_timestamp(
    timestamp: Option<&prost_types::Timestamp>,
    field: &str,
) -> Result<Option<SystemTime>> {
    timestamp
        .map(|timestamp| required_timestamp(Some(timestamp), field))
        .transpose()
}

/// The current time in microseconds since the epoch.
pub(crate) fn now_micros() -> i64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_micros()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_duration() {
        let duration = Duration::new(90, 5);
        assert_eq!(duration_from_proto(&duration_to_proto(duration)), duration);
        assert_eq!(
            duration_from_proto(&prost_types::Duration { seconds: -3, nanos: 0 }),
            Duration::ZERO
        );
        assert_eq!(nonzero_duration(Some(&prost_types::Duration::default())), None);
    }

    #[test]
    fn test_timestamps() -> Result<(), Box<dyn std::error::Error>> {
        let time = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let proto = timestamp_to_proto(time);
        assert_eq!(required_timestamp(Some(&proto), "start_time")?, time);
        assert_eq!(optional_timestamp(None, "end_time")?, None);
        match required_timestamp(None, "expire_time") {
            Err(Error::Malformed(message)) => assert_eq!(message, "missing expire_time"),
            other => panic!("unexpected result: {other:?}"),
        }
        Ok(())
    }
}
