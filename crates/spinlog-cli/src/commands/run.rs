use std::io::BufRead;
use std::time::Duration;

use spinlog_core::input::{EdgeInjector, GpioBoard, SimulatedIndicator, SimulatedInput};
use spinlog_core::{
    CaptureLoop, Channel, Config, CoreError, Database, Indicator, InputSource, RunSummary,
    Shutdown, SystemClock,
};
use tracing::{info, warn};

pub fn run(config: &Config, simulate: bool) -> Result<(), Box<dyn std::error::Error>> {
    let shutdown = super::shutdown_on_signal()?;
    let db = Database::open(&config.store_path()?)?;

    let summary = if simulate {
        let debounce = Duration::from_millis(config.gpio.debounce_ms);
        let input = SimulatedInput::with_debounce(shutdown.clone(), debounce);
        let injector = input.injector();
        let reader_shutdown = shutdown.clone();
        std::thread::spawn(move || feed_stdin(&injector, &reader_shutdown));
        capture(&db, input, SimulatedIndicator::new(), config, true)?
    } else {
        let (input, indicator) = GpioBoard::open(&config.gpio, shutdown)?;
        capture(&db, input, indicator, config, false)?
    };

    info!(
        sessions = summary.sessions_closed,
        pedal_strokes = summary.pedal_strokes,
        recovered = summary.recovered,
        "done"
    );
    Ok(())
}

fn capture<I: InputSource, L: Indicator>(
    db: &Database,
    input: I,
    indicator: L,
    config: &Config,
    print_events: bool,
) -> Result<RunSummary, CoreError> {
    let mut capture = CaptureLoop::new(db, input, indicator, SystemClock)
        .user(config.capture.user.clone())
        .poll_interval(config.poll_interval());
    if print_events {
        capture = capture.on_event(|event| match serde_json::to_string(event) {
            Ok(line) => println!("{line}"),
            Err(e) => warn!(error = %e, "cannot serialize event"),
        });
    }
    capture.run()
}

const CONSUME_TIMEOUT: Duration = Duration::from_secs(1);

/// One edge per line: `p` or `s`, optionally followed by a delay in ms
/// before firing. The next line is read once the capture loop has handled
/// the edge. End of input requests shutdown.
fn feed_stdin(injector: &EdgeInjector, shutdown: &Shutdown) {
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        let mut words = line.split_whitespace();
        let channel = match words.next() {
            Some("p") => Channel::Pedal,
            Some("s") => Channel::StartStop,
            Some("q") => break,
            Some(other) => {
                warn!(input = other, "expected p, s or q");
                continue;
            }
            None => continue,
        };
        if let Some(ms) = words.next().and_then(|w| w.parse::<u64>().ok()) {
            std::thread::sleep(Duration::from_millis(ms));
        }
        if !injector.fire(channel) {
            warn!(%channel, "edge debounced");
        }
        // A pedal edge seen while idle is never taken, hence the timeout.
        injector.wait_handled(channel, CONSUME_TIMEOUT);
        if shutdown.is_requested() {
            return;
        }
    }
    shutdown.request();
}
