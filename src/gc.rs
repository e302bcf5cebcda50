//! Garbage-collection policies for column families.

use crate::conv::{duration_from_proto, duration_to_proto};
use crate::proto::admin::{gc_rule, GcRule};
use crate::{Error, Result};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Which cells of a column family become eligible for garbage collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GcPolicy {
    /// Cells are never collected.
    NoGc,
    /// Cells older than the given age are collected.
    MaxAge(Duration),
    /// Only the given number of most recent versions of each cell is kept.
    MaxVersions(i32),
    /// Cells are collected only if every sub-policy would collect them.
    Intersection(Vec<GcPolicy>),
    /// Cells are collected if any sub-policy would collect them.
    Union(Vec<GcPolicy>),
}

impl GcPolicy {
    /// A policy that collects cells only when all of `policies` agree.
    #[must_use]
    pub fn intersection(policies: impl IntoIterator<Item = Self>) -> Self {
        Self::Intersection(policies.into_iter().collect())
    }

    /// A policy that collects cells when any of `policies` would.
    #[must_use]
    pub fn union(policies: impl IntoIterator<Item = Self>) -> Self {
        Self::Union(policies.into_iter().collect())
    }

    /// The wire representation. [`GcPolicy::NoGc`] is an empty rule.
    #[must_use]
    pub fn to_proto(&self) -> GcRule {
        let rule = match self {
            Self::NoGc => None,
            Self::MaxAge(age) => Some(gc_rule::Rule::MaxAge(duration_to_proto(*age))),
            Self::MaxVersions(n) => Some(gc_rule::Rule::MaxNumVersions(*n)),
            Self::Intersection(policies) => {
                Some(gc_rule::Rule::Intersection(gc_rule::Intersection {
                    rules: policies.iter().map(Self::to_proto).collect(),
                }))
            }
            Self::Union(policies) => Some(gc_rule::Rule::Union(gc_rule::Union {
                rules: policies.iter().map(Self::to_proto).collect(),
            })),
        };
        GcRule { rule }
    }

    /// Interpret a rule received from the server. A missing rule means nothing is collected.
    #[must_use]
    pub fn from_proto(rule: Option<&GcRule>) -> Self {
        match rule.and_then(|rule| rule.rule.as_ref()) {
            None => Self::NoGc,
            Some(gc_rule::Rule::MaxAge(age)) => Self::MaxAge(duration_from_proto(age)),
            Some(gc_rule::Rule::MaxNumVersions(n)) => Self::MaxVersions(*n),
            Some(gc_rule::Rule::Intersection(inner)) => Self::Intersection(
                inner.rules.iter().map(|r| Self::from_proto(Some(r))).collect(),
            ),
            Some(gc_rule::Rule::Union(inner)) => {
                Self::Union(inner.rules.iter().map(|r| Self::from_proto(Some(r))).collect())
            }
        }
    }

    /// Write the policy, parenthesizing composite policies when `nested`.
    fn write(&self, f: &mut fmt::Formatter<'_>, nested: bool) -> fmt::Result {
        let (policies, separator) = match self {
            Self::NoGc => return Ok(()),
            Self::MaxAge(age) => return write!(f, "age() > {}", DurationDisplay(*age)),
            Self::MaxVersions(n) => return write!(f, "versions() > {n}"),
            Self::Intersection(policies) => (policies, " && "),
            Self::Union(policies) => (policies, " || "),
        };
        if nested {
            f.write_str("(")?;
        }
        let mut first = true;
        for policy in policies.iter().filter(|p| **p != Self::NoGc) {
            if !first {
                f.write_str(separator)?;
            }
            first = false;
            policy.write(f, true)?;
        }
        if nested {
            f.write_str(")")?;
        }
        Ok(())
    }
}

impl fmt::Display for GcPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write(f, false)
    }
}

/// Render a rule received from the server, or `<never>` when the family has none.
#[must_use]
pub fn gc_rule_to_string(rule: Option<&GcRule>) -> String {
    match rule {
        None => "<never>".to_owned(),
        Some(rule) => GcPolicy::from_proto(Some(rule)).to_string(),
    }
}

impl FromStr for GcPolicy {
    type Err = Error;

    /// Parse `never`, `maxage=<duration>`, `maxversions=<n>`, or several of the latter joined by
    /// ` and ` or ` or ` (but not both).
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s == "never" {
            return Ok(Self::NoGc);
        }
        let has_and = s.contains(" and ");
        let has_or = s.contains(" or ");
        if has_and && has_or {
            return Err(Error::invalid(format!(
                "cannot mix \"and\" and \"or\" in GC policy {s:?}"
            )));
        }
        if has_and || has_or {
            let separator = if has_and { " and " } else { " or " };
            let policies = s
                .split(separator)
                .map(parse_simple_policy)
                .collect::<Result<Vec<_>>>()?;
            return Ok(if has_and {
                Self::Intersection(policies)
            } else {
                Self::Union(policies)
            });
        }
        parse_simple_policy(s)
    }
}

fn parse_simple_policy(s: &str) -> Result<GcPolicy> {
    let s = s.trim();
    if let Some(age) = s.strip_prefix("maxage=") {
        return parse_duration(age).map(GcPolicy::MaxAge);
    }
    if let Some(versions) = s.strip_prefix("maxversions=") {
        return versions
            .parse()
            .map(GcPolicy::MaxVersions)
            .map_err(|_| Error::invalid(format!("bad number of versions {versions:?}")));
    }
    Err(Error::invalid(format!("bad GC policy {s:?}")))
}

/// Units accepted when parsing durations, longest suffix first so `ms` is not read as `m`.
const UNITS: [(&str, Duration); 7] = [
    ("ms", Duration::from_millis(1)),
    ("us", Duration::from_micros(1)),
    ("ns", Duration::from_nanos(1)),
    ("d", Duration::from_secs(86_400)),
    ("h", Duration::from_secs(3_600)),
    ("m", Duration::from_secs(60)),
    ("s", Duration::from_secs(1)),
];

/// Parse an integer followed by a unit, such as `5d` or `250ms`.
pub(crate) fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    for (suffix, unit) in UNITS {
        if let Some(count) = s.strip_suffix(suffix) {
            if let Ok(count) = count.parse::<u32>() {
                return Ok(unit * count);
            }
        }
    }
    Err(Error::invalid(format!("bad duration {s:?}")))
}

/// Formats a duration in the largest unit that represents it exactly.
struct DurationDisplay(Duration);

impl fmt::Display for DurationDisplay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let nanos = self.0.as_nanos();
        if nanos == 0 {
            return f.write_str("0s");
        }
        for (suffix, unit) in [
            ("d", 86_400_000_000_000),
            ("h", 3_600_000_000_000),
            ("m", 60_000_000_000),
            ("s", 1_000_000_000),
            ("ms", 1_000_000),
            ("us", 1_000),
        ] {
            if nanos % unit == 0 {
                return write!(f, "{}{suffix}", nanos / unit);
            }
        }
        write!(f, "{nanos}ns")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const DAY: Duration = Duration::from_secs(86_400);

    #[test]
    fn test_display() {
        assert_eq!(GcPolicy::MaxVersions(1).to_string(), "versions() > 1");
        assert_eq!(GcPolicy::MaxAge(DAY).to_string(), "age() > 1d");
        assert_eq!(GcPolicy::MaxAge(Duration::from_secs(90)).to_string(), "age() > 90s");
        assert_eq!(GcPolicy::MaxAge(Duration::from_millis(1500)).to_string(), "age() > 1500ms");
        assert_eq!(GcPolicy::NoGc.to_string(), "");

        let policy = GcPolicy::union([
            GcPolicy::MaxVersions(2),
            GcPolicy::intersection([GcPolicy::MaxAge(DAY * 5), GcPolicy::MaxVersions(1)]),
        ]);
        assert_eq!(
            policy.to_string(),
            "versions() > 2 || (age() > 5d && versions() > 1)"
        );
    }

    #[test]
    fn test_proto_conversion() {
        let policy = GcPolicy::intersection([
            GcPolicy::MaxAge(Duration::from_secs(3_600)),
            GcPolicy::union([GcPolicy::MaxVersions(3), GcPolicy::MaxVersions(4)]),
        ]);
        let proto = policy.to_proto();
        assert!(matches!(proto.rule, Some(gc_rule::Rule::Intersection(ref i)) if i.rules.len() == 2));
        assert_eq!(GcPolicy::from_proto(Some(&proto)), policy);
        assert_eq!(GcPolicy::from_proto(None), GcPolicy::NoGc);
        assert_eq!(GcPolicy::NoGc.to_proto(), GcRule::default());
    }

    #[test]
    fn test_rule_to_string() {
        assert_eq!(gc_rule_to_string(None), "<never>");
        assert_eq!(gc_rule_to_string(Some(&GcPolicy::MaxVersions(5).to_proto())), "versions() > 5");
    }

    #[test]
    fn test_parse() -> Result<(), Box<dyn std::error::Error>> {
        assert_eq!("never".parse::<GcPolicy>()?, GcPolicy::NoGc);
        assert_eq!("maxage=2h".parse::<GcPolicy>()?, GcPolicy::MaxAge(Duration::from_secs(7_200)));
        assert_eq!("maxage=10ms".parse::<GcPolicy>()?, GcPolicy::MaxAge(Duration::from_millis(10)));
        assert_eq!("maxversions=3".parse::<GcPolicy>()?, GcPolicy::MaxVersions(3));
        assert_eq!(
            "maxage=1d or maxversions=2".parse::<GcPolicy>()?,
            GcPolicy::union([GcPolicy::MaxAge(DAY), GcPolicy::MaxVersions(2)])
        );
        assert_eq!(
            "maxage=1d and maxversions=2".parse::<GcPolicy>()?,
            GcPolicy::intersection([GcPolicy::MaxAge(DAY), GcPolicy::MaxVersions(2)])
        );
        assert!("maxage=1d and maxversions=2 or maxversions=1".parse::<GcPolicy>().is_err());
        assert!("maxage=forever".parse::<GcPolicy>().is_err());
        assert!("sometimes".parse::<GcPolicy>().is_err());
        Ok(())
    }
}
