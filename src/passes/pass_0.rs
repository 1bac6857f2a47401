//! Pass 0: Preflight (trim and resample)

use crate::audio::{prepare_input, AudioState};
use crate::config::Config;
use crate::error::{Result as TranscriptionResult, TranscriptionError};
use log::{info, warn};

pub fn run(state: &mut AudioState, config: &Config) -> TranscriptionResult<()> {
    info!("Pass 0: Preflight");

    if state.input.is_empty() {
        return Err(TranscriptionError::EmptyInput(
            "input buffer has zero samples".to_string(),
        ));
    }
    if state.input.is_silent() {
        warn!("Input is silent; no notes will be produced");
    }

    let prepared = prepare_input(&state.input, config)?;
    if prepared.is_empty() {
        return Err(TranscriptionError::EmptyInput(
            "no samples left after trimming".to_string(),
        ));
    }

    info!(
        "  {} channel(s), {:.2}s at {} Hz",
        prepared.n_channels(),
        prepared.duration_sec(),
        prepared.sample_rate()
    );
    state.prepared = Some(prepared);

    info!("  ✓ Pass 0 complete");
    Ok(())
}
