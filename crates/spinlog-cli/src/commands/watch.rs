use std::path::Path;

use chrono::Utc;
use spinlog_core::{Config, Database, LiveCadence, LiveReading};
use tracing::warn;

pub fn run(config: &Config, once: bool, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let path = config.store_path()?;
    let mut store = Store::new(&path);
    let mut live = LiveCadence::new(config.pedaling_timeout());

    if once {
        return print_reading(&store.read(&mut live), json);
    }

    let shutdown = super::shutdown_on_signal()?;
    while !shutdown.is_requested() {
        print_reading(&store.read(&mut live), json)?;
        std::thread::sleep(config.refresh_interval());
    }
    Ok(())
}

/// Store handle that is (re)opened lazily on each tick.
struct Store<'a> {
    path: &'a Path,
    db: Option<Database>,
}

impl<'a> Store<'a> {
    fn new(path: &'a Path) -> Self {
        Self { path, db: None }
    }

    /// An unavailable store reads as no session; the open is retried next tick.
    fn read(&mut self, live: &mut LiveCadence) -> LiveReading {
        if self.db.is_none() {
            match Database::open(self.path) {
                Ok(db) => self.db = Some(db),
                Err(e) => warn!(error = %e, "store unavailable"),
            }
        }
        match &self.db {
            Some(db) => live.refresh(db, Utc::now()),
            None => LiveReading::NoSession,
        }
    }
}

fn print_reading(reading: &LiveReading, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    if json {
        println!("{}", serde_json::to_string(reading)?);
        return Ok(());
    }
    match reading {
        LiveReading::NoSession => println!("no workout in progress"),
        LiveReading::Active {
            session_id,
            current_rpm,
            series,
        } => {
            let strokes = series.iter().filter(|s| s.is_measured()).count();
            println!("workout {session_id}: {current_rpm:>5.1} rpm ({strokes} intervals)");
        }
    }
    Ok(())
}
