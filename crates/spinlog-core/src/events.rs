use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::input::Channel;

/// Every session state change produces an Event.
/// The capture loop logs them; `run --simulate` prints them as JSON lines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    SessionOpened {
        session_id: i64,
        user: String,
        at: DateTime<Utc>,
    },
    PedalLogged {
        session_id: i64,
        event_id: i64,
        at: DateTime<Utc>,
    },
    SessionClosed {
        session_id: i64,
        pedal_strokes: u64,
        at: DateTime<Utc>,
    },
    /// A session left open by an earlier process was closed at startup.
    SessionRecovered {
        session_id: i64,
        /// Timestamp written as the session end.
        end: DateTime<Utc>,
        /// True if `end` is the last pedal event, false if it is the
        /// detection time (session had no events).
        from_last_event: bool,
        at: DateTime<Utc>,
    },
    /// Edge on a channel the current state does not act on.
    EdgeIgnored {
        channel: Channel,
        at: DateTime<Utc>,
    },
}

impl Event {
    pub fn at(&self) -> DateTime<Utc> {
        match self {
            Event::SessionOpened { at, .. }
            | Event::PedalLogged { at, .. }
            | Event::SessionClosed { at, .. }
            | Event::SessionRecovered { at, .. }
            | Event::EdgeIgnored { at, .. } => *at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn serializes_with_type_tag() {
        let at = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let json = serde_json::to_value(Event::PedalLogged {
            session_id: 4,
            event_id: 12,
            at,
        })
        .unwrap();
        assert_eq!(json["type"], "PedalLogged");
        assert_eq!(json["session_id"], 4);
        assert_eq!(json["event_id"], 12);
    }

    #[test]
    fn channel_serializes_snake_case() {
        let at = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let json = serde_json::to_value(Event::EdgeIgnored {
            channel: Channel::StartStop,
            at,
        })
        .unwrap();
        assert_eq!(json["channel"], "start_stop");
        assert_eq!(
            Event::EdgeIgnored {
                channel: Channel::Pedal,
                at
            }
            .at(),
            at
        );
    }
}
