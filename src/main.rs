//! audioldm: generate audio from text with AudioLDM on ONNX Runtime.
//!
//! Loads the checkpoint once, runs the selected mode and writes one WAV file
//! per generated waveform into the output directory.

use std::time::Instant;

use anyhow::{bail, Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use audioldm::audio::{samples_to_duration, write_wav, SAMPLE_RATE};
use audioldm::cli::{Cli, ModeArg};
use audioldm::generation::{
    style_transfer_with_progress, super_resolution_and_inpainting_with_progress,
    text_to_audio_with_progress,
};
use audioldm::models::LatentDiffusion;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run() {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse_args();
    if let Err(problem) = cli.validate() {
        bail!(problem);
    }

    let runtime = cli.runtime_config();
    info!(
        mode = ?cli.mode,
        model_dir = %runtime.effective_model_dir().display(),
        device = %runtime.device,
        "Starting audioldm"
    );

    let mut model = LatentDiffusion::load(&runtime).context("Failed to load AudioLDM checkpoint")?;

    let start_time = Instant::now();
    let on_progress = |step: usize, total: usize| {
        if step % 10 == 0 || step == total {
            info!("Progress: {}/{} steps", step, total);
        }
    };

    let waveforms = match cli.mode {
        ModeArg::Generation => {
            text_to_audio_with_progress(&mut model, &cli.text_to_audio_params(), on_progress)
        }
        ModeArg::Transfer => {
            style_transfer_with_progress(&mut model, &cli.style_transfer_params(), on_progress)
        }
        ModeArg::Inpaint => super_resolution_and_inpainting_with_progress(
            &mut model,
            &cli.inpainting_params(),
            on_progress,
        ),
    }
    .context("Generation failed")?;

    info!(
        outputs = waveforms.len(),
        seconds = %format!("{:.2}", start_time.elapsed().as_secs_f32()),
        "Generation complete"
    );

    std::fs::create_dir_all(&cli.output_dir)
        .with_context(|| format!("Failed to create {}", cli.output_dir.display()))?;

    for (i, samples) in waveforms.iter().enumerate() {
        let path = cli.output_path(i);
        write_wav(samples, &path, SAMPLE_RATE)
            .with_context(|| format!("Failed to save {}", path.display()))?;
        info!(
            path = %path.display(),
            duration = %format!("{:.2}s", samples_to_duration(samples.len(), SAMPLE_RATE)),
            "Saved"
        );
    }

    Ok(())
}
