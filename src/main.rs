// Tumbler - Live pattern continuation for MIDI keyboards

mod cli;

use clap::Parser;
use cli::{Args, Command};
use std::io::BufRead;
use std::process::ExitCode;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use tumbler::midi::find_port;
use tumbler::{
    BackendOutput, Clock, ConfigError, EngineConfig, EngineError, MidiBackend, MidiCapture,
    MidiError, MidirBackend, TumbleEngine, create_note_channel, telemetry,
};

const CLIENT_NAME: &str = "tumbler";

// Capture thread sleep when the port is idle
const CAPTURE_IDLE: Duration = Duration::from_millis(1);
const LOOP_SLEEP: Duration = Duration::from_millis(1);

#[derive(Debug, thiserror::Error)]
enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Midi(#[from] MidiError),

    #[error("No {0} port matching '{1}' (try --list)")]
    NoPort(&'static str, String),
}

fn main() -> ExitCode {
    let args = Args::parse();
    telemetry::init_tracing("info");

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<(), AppError> {
    let mut config = EngineConfig::load_or_default(args.config.as_deref())?;
    args.apply(&mut config);
    config.validate()?;

    let scanner = MidirBackend::new(CLIENT_NAME);
    let inputs = scanner.enumerate_inputs();
    let outputs = scanner.enumerate_outputs();

    if args.list {
        println!("MIDI inputs:");
        for (i, port) in inputs.iter().enumerate() {
            println!("  {}: {}", i, port);
        }
        println!("MIDI outputs:");
        for (i, port) in outputs.iter().enumerate() {
            println!("  {}: {}", i, port);
        }
        return Ok(());
    }

    let input = find_port(&inputs, &args.input)
        .ok_or_else(|| AppError::NoPort("input", args.input.clone()))?;
    let output = find_port(&outputs, &args.output)
        .ok_or_else(|| AppError::NoPort("output", args.output.clone()))?;
    info!(input = %input, output = %output, "MIDI ports selected");

    let mut engine = TumbleEngine::new(config.clone(), Clock::monotonic())?;
    let (tx, mut rx) = create_note_channel(config.queue_capacity);
    let mut capture = MidiCapture::spawn(
        MidirBackend::new(CLIENT_NAME),
        &input,
        engine.clock().clone(),
        tx,
        CAPTURE_IDLE,
    )?;
    let mut out = BackendOutput::open(MidirBackend::new(CLIENT_NAME), &output)?;

    let commands = spawn_console();
    println!("{}", Command::HELP);

    let deadline = args
        .run_for
        .map(|secs| Instant::now() + Duration::from_secs_f64(secs.max(0.0).min(1.0e9)));

    'run: loop {
        while let Ok(command) = commands.try_recv() {
            if command == Command::Quit {
                break 'run;
            }
            apply_command(&mut engine, command);
        }

        engine.tick(&mut rx, &mut out);

        if deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }
        thread::sleep(LOOP_SLEEP);
    }

    engine.shutdown(&mut out);
    capture.stop();
    out.close();

    let stats = engine.stats();
    let captured = capture.stats();
    info!(
        notes = stats.notes_in,
        patterns = stats.patterns_started,
        declined = stats.patterns_declined,
        dropped_input = captured.dropped,
        "Session finished"
    );
    if let Some(anticipation) = engine.suggested_anticipation() {
        info!(ticks = anticipation, "Measured output delay");
    }
    Ok(())
}

fn apply_command(engine: &mut TumbleEngine, command: Command) {
    match command {
        Command::Quit => {}
        Command::ToggleDirection => {
            let direction = engine.toggle_direction();
            println!("Direction = {:?}", direction);
        }
        Command::LengthUp | Command::LengthDown => {
            let current = engine.trigger().sequence_length();
            let length = if command == Command::LengthUp {
                current + 1
            } else {
                current.saturating_sub(1)
            };
            match engine.set_sequence_length(length) {
                Ok(()) => println!("Sequence length = {}", length),
                Err(e) => warn!("{}", e),
            }
        }
        Command::MoreSensitive => println!("Tolerance = {:.3}", engine.increase_sensitivity()),
        Command::LessSensitive => println!("Tolerance = {:.3}", engine.decrease_sensitivity()),
        Command::Forward => {
            engine.forward_directions();
        }
        Command::Invert => {
            engine.invert_directions();
        }
        Command::Reverse => {
            engine.reverse_directions();
        }
        Command::Randomize => {
            engine.randomize_directions();
        }
        Command::Status => {
            let stats = engine.stats();
            println!(
                "Active patterns: {} | pending events: {} | started: {} | declined: {}",
                engine.slots().active_count(),
                engine.scheduler().len(),
                stats.patterns_started,
                stats.patterns_declined
            );
        }
    }
}

/// Read console commands on a separate thread
fn spawn_console() -> mpsc::Receiver<Command> {
    let (tx, rx) = mpsc::channel();
    let spawned = thread::Builder::new()
        .name("console".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                match Command::parse(&line) {
                    Some(command) => {
                        if tx.send(command).is_err() {
                            break;
                        }
                    }
                    None => println!("{}", Command::HELP),
                }
            }
        });
    if let Err(e) = spawned {
        warn!("Console disabled: {}", e);
    }
    rx
}
