use clap::Subcommand;
use spinlog_core::{session_cadence, Config, Database, SessionStore};

#[derive(Subcommand)]
pub enum SessionsAction {
    /// List all workouts
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show one workout with its cadence
    Show {
        /// Workout id
        id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

pub fn run(action: SessionsAction, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let db = Database::open(&config.store_path()?)?;

    match action {
        SessionsAction::List { json } => {
            let sessions = db.sessions()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&sessions)?);
                return Ok(());
            }
            if sessions.is_empty() {
                println!("no workouts recorded");
                return Ok(());
            }
            for session in sessions {
                let end = session
                    .end
                    .map_or_else(|| "in progress".to_string(), |end| end.to_rfc3339());
                let strokes = db.event_count(session.id)?;
                println!(
                    "{:>4}  {:<12} {}  ->  {}  {} strokes",
                    session.id,
                    session.user,
                    session.begin.to_rfc3339(),
                    end,
                    strokes
                );
            }
        }
        SessionsAction::Show { id, json } => {
            let summary = session_cadence(&db, id, config.pedaling_timeout())?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
                return Ok(());
            }
            println!("Workout {} ({})", summary.session.id, summary.session.user);
            println!("  begin:    {}", summary.session.begin.to_rfc3339());
            match summary.duration_secs {
                Some(secs) => println!("  duration: {secs:.1}s"),
                None => println!("  duration: in progress"),
            }
            println!("  strokes:  {}", summary.pedal_strokes);
            println!("  average:  {:.1} rpm", summary.average_rpm);
            println!("  max:      {:.1} rpm", summary.max_rpm);
        }
    }
    Ok(())
}
