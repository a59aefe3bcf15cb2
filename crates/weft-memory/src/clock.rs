//! Monotonic timestamps for turns added to a list

use chrono::{DateTime, Duration, Utc};
use weft_message::{TurnStamper, stamp::now_millis};

/// Hands out strictly increasing creation times.
///
/// Resolution is one millisecond; a tie with the last issued time is broken
/// by adding one millisecond.
#[derive(Debug, Default, Clone)]
pub struct Clock {
    last: Option<DateTime<Utc>>,
}

impl Clock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next time for a turn without an explicit timestamp
    pub fn next(&mut self) -> DateTime<Utc> {
        self.next_after(now_millis())
    }

    /// Next time at or after `candidate`
    pub fn next_after(&mut self, candidate: DateTime<Utc>) -> DateTime<Utc> {
        let ts = match self.last {
            Some(last) if candidate <= last => last + Duration::milliseconds(1),
            _ => candidate,
        };
        self.last = Some(ts);
        ts
    }

    /// Record an externally fixed time so later turns sort after it
    pub fn observe(&mut self, ts: DateTime<Utc>) {
        if self.last.is_none_or(|last| ts > last) {
            self.last = Some(ts);
        }
    }

    pub fn last(&self) -> Option<DateTime<Utc>> {
        self.last
    }
}

/// Stamper used by a list while converting one `add` batch.
///
/// Explicit timestamps are kept and observed; everything else gets the
/// next monotonic time.
pub(crate) struct ListStamper<'a> {
    pub clock: &'a mut Clock,
}

impl TurnStamper for ListStamper<'_> {
    fn next_id(&mut self) -> String {
        uuid::Uuid::new_v4().to_string()
    }

    fn created_at(&mut self, explicit: Option<DateTime<Utc>>) -> DateTime<Utc> {
        match explicit {
            Some(ts) => {
                self.clock.observe(ts);
                ts
            }
            None => self.clock.next(),
        }
    }
}
