use clap::{Parser, Subcommand};
use piano2midi::{validate_input, Config, PianoToMidi};
use std::path::PathBuf;

/// Piano-to-MIDI Transcription System
#[derive(Parser)]
#[command(name = "piano2midi")]
#[command(about = "Transcribe piano recordings to MIDI")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Transcribe an audio file and write MIDI output
    Transcribe {
        /// Input audio file (WAV)
        input: PathBuf,

        /// Output directory for results
        #[arg(short, long, default_value = "./output")]
        output: PathBuf,

        /// Custom configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Tempo of the exported track (60-180 BPM)
        #[arg(long)]
        tempo: Option<f32>,

        /// Only process the first SEC seconds (0 = whole file)
        #[arg(long, value_name = "SEC")]
        max_duration: Option<f32>,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,

        /// Quiet output
        #[arg(short, long)]
        quiet: bool,
    },
    /// Validate configuration file
    ValidateConfig {
        /// Configuration file to validate
        config: PathBuf,
    },
    /// Show default configuration
    ShowConfig,
}

fn init_logging(verbose: bool, quiet: bool) {
    let level = if quiet {
        "warn"
    } else if verbose {
        "debug"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Transcribe {
            input,
            output,
            config,
            tempo,
            max_duration,
            verbose,
            quiet,
        } => {
            if verbose && quiet {
                anyhow::bail!("Cannot specify both --verbose and --quiet");
            }
            init_logging(verbose, quiet);

            // Load configuration
            let mut config = if let Some(config_path) = config {
                piano2midi::config::load_config(config_path)?
            } else {
                Config::default()
            };
            if let Some(tempo) = tempo {
                config.export.tempo_bpm = tempo;
            }
            if let Some(max_duration) = max_duration {
                config.audio.max_duration_sec = max_duration;
            }

            validate_input(&input, &config)?;

            let processor = PianoToMidi::new(config);

            if !quiet {
                println!("Processing {}...", input.display());
            }

            let transcription = processor.process(&input, &output)?;

            if !quiet {
                for note in &transcription.notes {
                    println!(
                        "  {:<4} {:>7.3}s  {:>6.3}s",
                        note.pitch.to_string(),
                        note.onset_sec,
                        note.duration_sec
                    );
                }
                println!(
                    "{} notes at {} BPM; results saved to {}",
                    transcription.notes.len(),
                    transcription.event_track.tempo_bpm,
                    output.display()
                );
            }
        }
        Commands::ValidateConfig { config } => {
            let config = piano2midi::config::load_config(config)?;
            println!("Configuration is valid");
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Commands::ShowConfig => {
            let config = Config::default();
            let json = serde_json::to_string_pretty(&config)?;
            println!("{}", json);
        }
    }

    Ok(())
}
