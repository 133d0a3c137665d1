use spinlog_core::{recover_open_sessions, Config, Database, Event, SystemClock};

pub fn run(config: &Config, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let db = Database::open(&config.store_path()?)?;
    let recovery = recover_open_sessions(&db, &SystemClock)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&recovery.events)?);
        return Ok(());
    }
    if recovery.is_empty() {
        println!("no open workouts");
    }
    for event in &recovery.events {
        if let Event::SessionRecovered {
            session_id,
            end,
            from_last_event,
            ..
        } = event
        {
            let basis = if *from_last_event {
                "last pedal stroke"
            } else {
                "now, no strokes recorded"
            };
            println!("closed workout {session_id} at {} ({basis})", end.to_rfc3339());
        }
    }
    Ok(())
}
