//! Property tests for workout lifecycle invariants.

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use proptest::prelude::*;
use spinlog_core::{Channel, Database, SessionMachine, SessionStore};

fn at(step: usize) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap() + TimeDelta::milliseconds(step as i64 * 250)
}

fn channel() -> impl Strategy<Value = Channel> {
    prop_oneof![3 => Just(Channel::Pedal), 1 => Just(Channel::StartStop)]
}

proptest! {
    /// Whatever the edge sequence, the store never holds two open workouts
    /// and the machine agrees with the store about which one is open.
    #[test]
    fn at_most_one_open_session(edges in prop::collection::vec(channel(), 0..80)) {
        let db = Database::open_memory().unwrap();
        let mut machine = SessionMachine::new("default");

        for (i, channel) in edges.iter().enumerate() {
            machine.handle(*channel, at(i), &db).unwrap();
            let open = db.open_sessions().unwrap();
            prop_assert!(open.len() <= 1);
            prop_assert_eq!(open.first().map(|s| s.id), machine.active_session());
        }

        machine.shutdown(at(edges.len()), &db).unwrap();
        prop_assert!(db.open_sessions().unwrap().is_empty());
    }

    /// Pedal events are only ever attributed to the session that was active.
    #[test]
    fn strokes_counted_per_session(edges in prop::collection::vec(channel(), 0..80)) {
        let db = Database::open_memory().unwrap();
        let mut machine = SessionMachine::new("default");
        let mut expected: Vec<(i64, usize)> = Vec::new();

        for (i, channel) in edges.iter().enumerate() {
            machine.handle(*channel, at(i), &db).unwrap();
            match (channel, machine.active_session()) {
                (Channel::StartStop, Some(id)) => expected.push((id, 0)),
                (Channel::Pedal, Some(_)) => {
                    if let Some(last) = expected.last_mut() {
                        last.1 += 1;
                    }
                }
                _ => {}
            }
        }

        let ids: Vec<i64> = db.sessions().unwrap().iter().map(|s| s.id).collect();
        prop_assert!(ids.windows(2).all(|w| w[0] < w[1]));
        for (id, strokes) in expected {
            prop_assert_eq!(db.events_since(id, None).unwrap().len(), strokes);
        }
    }
}
