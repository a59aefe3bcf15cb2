//! Id and timestamp generation for converted turns

use chrono::{DateTime, SubsecRound, Utc};

/// Supplies ids and creation times to the converters.
///
/// Converters are otherwise pure; everything time- or randomness-dependent
/// goes through this trait so callers control ordering.
pub trait TurnStamper {
    /// A fresh turn id
    fn next_id(&mut self) -> String;

    /// The creation time for a turn, given the timestamp the input carried
    fn created_at(&mut self, explicit: Option<DateTime<Utc>>) -> DateTime<Utc>;
}

/// Random uuids and the wall clock, explicit timestamps kept as-is
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultStamper;

impl TurnStamper for DefaultStamper {
    fn next_id(&mut self) -> String {
        uuid::Uuid::new_v4().to_string()
    }

    fn created_at(&mut self, explicit: Option<DateTime<Utc>>) -> DateTime<Utc> {
        explicit.unwrap_or_else(now_millis)
    }
}

/// Current time at millisecond resolution
pub fn now_millis() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_default_stamper_keeps_explicit() {
        let ts = Utc.timestamp_millis_opt(42).unwrap();
        assert_eq!(DefaultStamper.created_at(Some(ts)), ts);
    }

    #[test]
    fn test_default_stamper_ids_are_unique() {
        let mut stamper = DefaultStamper;
        assert_ne!(stamper.next_id(), stamper.next_id());
    }

    #[test]
    fn test_now_millis_has_no_sub_millisecond_part() {
        assert_eq!(now_millis().timestamp_subsec_nanos() % 1_000_000, 0);
    }
}
