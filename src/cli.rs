// Command line and console commands of the tumbler binary

use clap::Parser;
use std::path::PathBuf;
use tumbler::EngineConfig;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Continues rhythmically uniform phrases played on a MIDI keyboard")]
pub struct Args {
    /// Path to a RON config file (defaults to the per-user config if present)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// List MIDI ports and exit
    #[arg(long, default_value_t = false)]
    pub list: bool,

    /// Input port, by index or (partial) name
    #[arg(short, long, default_value = "0")]
    pub input: String,

    /// Output port, by index or (partial) name
    #[arg(short, long, default_value = "0")]
    pub output: String,

    /// Rhythm tolerance ratio in (0, 1) (overrides config)
    #[arg(long)]
    pub tolerance: Option<f64>,

    /// Notes per captured sequence (overrides config)
    #[arg(long)]
    pub length: Option<usize>,

    /// Output latency compensation in ms (overrides config)
    #[arg(long)]
    pub anticipation: Option<u32>,

    /// Scheduler poll interval in ms (overrides config)
    #[arg(long)]
    pub poll_ms: Option<u32>,

    /// Seed for the random generator (overrides config)
    #[arg(long)]
    pub seed: Option<u64>,

    /// Stop after this many seconds
    #[arg(long)]
    pub run_for: Option<f64>,
}

impl Args {
    /// Command-line values win over the file
    pub fn apply(&self, config: &mut EngineConfig) {
        if let Some(tolerance) = self.tolerance {
            config.tolerance = tolerance;
        }
        if let Some(length) = self.length {
            config.sequence_length = length;
        }
        if let Some(anticipation) = self.anticipation {
            config.anticipation_ms = anticipation;
        }
        if let Some(poll_ms) = self.poll_ms {
            config.poll_interval_ms = poll_ms;
        }
        if self.seed.is_some() {
            config.rng_seed = self.seed;
        }
    }
}

/// Console commands typed while the engine runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Quit,
    ToggleDirection,
    LengthUp,
    LengthDown,
    MoreSensitive,
    LessSensitive,
    Forward,
    Invert,
    Reverse,
    Randomize,
    Status,
}

impl Command {
    pub fn parse(line: &str) -> Option<Self> {
        match line.trim() {
            "q" | "quit" => Some(Command::Quit),
            "\\" | "d" => Some(Command::ToggleDirection),
            "=" => Some(Command::LengthUp),
            "-" => Some(Command::LengthDown),
            "." => Some(Command::MoreSensitive),
            "," => Some(Command::LessSensitive),
            "f" => Some(Command::Forward),
            "i" => Some(Command::Invert),
            "r" => Some(Command::Reverse),
            "x" => Some(Command::Randomize),
            "s" | "" => Some(Command::Status),
            _ => None,
        }
    }

    pub const HELP: &'static str = "Commands: q quit | \\ direction | = / - sequence length | \
        . / , sensitivity | f forward | i invert | r reverse | x randomize | s status";
}
