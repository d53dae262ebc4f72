//! Command-line interface.
//!
//! Parses generation options and layers them over the environment runtime
//! configuration.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::config::{Device, RuntimeConfig};
use crate::generation::{InpaintingParams, StyleTransferParams, TextToAudioParams};
use crate::types::MaskRatios;

/// Generation mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    /// Text-to-audio, or audio-to-audio with --file-path
    #[default]
    Generation,
    /// Style transfer of --file-path toward the text
    Transfer,
    /// Super-resolution and inpainting of --file-path
    Inpaint,
}

/// Execution device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum DeviceArg {
    /// CUDA when available, else CPU
    #[default]
    Auto,
    Cpu,
    Cuda,
}

impl From<DeviceArg> for Device {
    fn from(arg: DeviceArg) -> Self {
        match arg {
            DeviceArg::Auto => Device::Auto,
            DeviceArg::Cpu => Device::Cpu,
            DeviceArg::Cuda => Device::Cuda,
        }
    }
}

/// audioldm: text-to-audio generation with latent diffusion
#[derive(Parser, Debug)]
#[command(name = "audioldm")]
#[command(about = "Text-to-audio generation, style transfer and inpainting with AudioLDM")]
#[command(version)]
pub struct Cli {
    /// Generation mode
    #[arg(long, value_enum, default_value_t = ModeArg::Generation)]
    pub mode: ModeArg,

    /// Text prompt describing the audio
    #[arg(short, long, default_value = "")]
    pub text: String,

    /// Reference WAV file
    #[arg(short, long)]
    pub file_path: Option<PathBuf>,

    /// Random seed
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Number of DDIM sampling steps
    #[arg(long, default_value_t = 200)]
    pub ddim_steps: usize,

    /// Duration of the generated audio in seconds
    #[arg(short, long, default_value_t = 10.0)]
    pub duration: f64,

    /// Number of outputs per prompt
    #[arg(short, long, default_value_t = 1)]
    pub batchsize: usize,

    /// Classifier-free guidance scale (1 disables guidance)
    #[arg(long, default_value_t = 2.5)]
    pub guidance_scale: f32,

    /// Candidates generated per output; the best by CLAP score is kept
    #[arg(short, long, default_value_t = 3)]
    pub n_candidates: usize,

    /// Style transfer strength in [0, 1]
    #[arg(long, default_value_t = 0.5)]
    pub transfer_strength: f64,

    /// Time range to regenerate, as fractions of the clip
    #[arg(long, num_args = 2, value_names = ["START", "END"])]
    pub time_mask: Option<Vec<f64>>,

    /// Frequency range to regenerate, as fractions of the mel bins
    #[arg(long, num_args = 2, value_names = ["START", "END"])]
    pub freq_mask: Option<Vec<f64>>,

    /// Directory containing the ONNX checkpoint
    #[arg(long)]
    pub model_dir: Option<PathBuf>,

    /// YAML or JSON model configuration
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Execution device (defaults to AUDIOLDM_DEVICE or auto)
    #[arg(long, value_enum)]
    pub device: Option<DeviceArg>,

    /// Intra-op threads for ONNX Runtime
    #[arg(long)]
    pub threads: Option<u32>,

    /// Directory for generated WAV files
    #[arg(short, long, default_value = "./output")]
    pub output_dir: PathBuf,
}

impl Cli {
    /// Parses command-line arguments.
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    /// Checks that the mode has the inputs it needs.
    pub fn validate(&self) -> Result<(), String> {
        if self.mode != ModeArg::Generation && self.file_path.is_none() {
            return Err(format!(
                "--mode {} requires --file-path",
                self.mode.to_possible_value().map(|v| v.get_name().to_string()).unwrap_or_default()
            ));
        }
        if self.mode == ModeArg::Generation && self.file_path.is_none() && self.text.is_empty() {
            return Err("provide --text or --file-path".to_string());
        }
        Ok(())
    }

    /// Runtime configuration from the environment, overridden by flags.
    pub fn runtime_config(&self) -> RuntimeConfig {
        let mut runtime = RuntimeConfig::from_env();
        if let Some(ref dir) = self.model_dir {
            runtime.model_dir = Some(dir.clone());
        }
        if let Some(ref path) = self.config {
            runtime.config_path = Some(path.clone());
        }
        if let Some(device) = self.device {
            runtime.device = device.into();
        }
        if self.threads.is_some() {
            runtime.threads = self.threads;
        }
        runtime
    }

    /// Mask ratios from the flags, defaulting to time (0.10, 0.15) and freq (1.0, 1.0).
    pub fn mask_ratios(&self) -> MaskRatios {
        let defaults = MaskRatios::default();
        let pair = |v: &Option<Vec<f64>>, fallback: (f64, f64)| match v.as_deref() {
            Some([start, end]) => (*start, *end),
            _ => fallback,
        };
        MaskRatios::new(
            pair(&self.time_mask, defaults.time),
            pair(&self.freq_mask, defaults.freq),
        )
    }

    pub fn text_to_audio_params(&self) -> TextToAudioParams {
        TextToAudioParams {
            text: self.text.clone(),
            audio_path: self.file_path.clone(),
            seed: self.seed,
            ddim_steps: self.ddim_steps,
            duration: self.duration,
            batchsize: self.batchsize,
            guidance_scale: self.guidance_scale,
            n_candidates: self.n_candidates,
        }
    }

    pub fn style_transfer_params(&self) -> StyleTransferParams {
        StyleTransferParams {
            text: self.text.clone(),
            audio_path: self.file_path.clone().unwrap_or_default(),
            transfer_strength: self.transfer_strength,
            seed: self.seed,
            duration: self.duration,
            batchsize: self.batchsize,
            guidance_scale: self.guidance_scale,
            ddim_steps: self.ddim_steps,
        }
    }

    pub fn inpainting_params(&self) -> InpaintingParams {
        InpaintingParams {
            text: self.text.clone(),
            audio_path: self.file_path.clone().unwrap_or_default(),
            seed: self.seed,
            ddim_steps: self.ddim_steps,
            duration: self.duration,
            batchsize: self.batchsize,
            guidance_scale: self.guidance_scale,
            n_candidates: self.n_candidates,
            mask: self.mask_ratios(),
        }
    }

    /// File stem for outputs: the prompt, or the reference file name.
    pub fn output_stem(&self) -> String {
        let source = if self.text.is_empty() {
            self.file_path
                .as_ref()
                .and_then(|p| p.file_stem())
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default()
        } else {
            self.text.clone()
        };
        let stem: String = source
            .chars()
            .take(64)
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        if stem.is_empty() {
            "audioldm".to_string()
        } else {
            stem
        }
    }

    /// Path of the `index`-th output file.
    pub fn output_path(&self, index: usize) -> PathBuf {
        self.output_dir.join(format!("{}_{}.wav", self.output_stem(), index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("audioldm").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn defaults_match_generation_defaults() {
        let cli = parse(&["-t", "a dog barking"]);
        assert_eq!(cli.mode, ModeArg::Generation);
        assert_eq!(cli.text_to_audio_params(), TextToAudioParams {
            text: "a dog barking".to_string(),
            ..Default::default()
        });
        assert_eq!(cli.output_dir, PathBuf::from("./output"));
        assert!(cli.validate().is_ok());
    }

    #[test]
    fn parses_masks() {
        let cli = parse(&[
            "--mode", "inpaint", "-t", "x", "-f", "in.wav",
            "--time-mask", "0.2", "0.4", "--freq-mask", "0.75", "1.0",
        ]);
        let mask = cli.mask_ratios();
        assert_eq!(mask.time, (0.2, 0.4));
        assert_eq!(mask.freq, (0.75, 1.0));
        assert_eq!(cli.inpainting_params().audio_path, PathBuf::from("in.wav"));
    }

    #[test]
    fn mask_defaults() {
        let cli = parse(&["-t", "x"]);
        assert_eq!(cli.mask_ratios(), MaskRatios::default());
    }

    #[test]
    fn mask_needs_two_values() {
        let result = Cli::try_parse_from(["audioldm", "-t", "x", "--time-mask", "0.2"]);
        assert!(result.is_err());
    }

    #[test]
    fn transfer_requires_file() {
        let cli = parse(&["--mode", "transfer", "-t", "x"]);
        let err = cli.validate().unwrap_err();
        assert!(err.contains("--file-path"));

        let cli = parse(&["--mode", "transfer", "-t", "x", "-f", "a.wav", "--transfer-strength", "0.8"]);
        assert!(cli.validate().is_ok());
        assert_eq!(cli.style_transfer_params().transfer_strength, 0.8);
    }

    #[test]
    fn generation_needs_text_or_file() {
        assert!(parse(&[]).validate().is_err());
        assert!(parse(&["-f", "ref.wav"]).validate().is_ok());
    }

    #[test]
    fn flags_override_runtime() {
        let cli = parse(&["-t", "x", "--device", "cpu", "--threads", "2", "--model-dir", "/models"]);
        let runtime = cli.runtime_config();
        assert_eq!(runtime.device, Device::Cpu);
        assert_eq!(runtime.threads, Some(2));
        assert_eq!(runtime.model_dir, Some(PathBuf::from("/models")));
    }

    #[test]
    fn output_names() {
        let cli = parse(&["-t", "rain on a roof!", "-o", "/tmp/out"]);
        assert_eq!(cli.output_stem(), "rain_on_a_roof_");
        assert_eq!(cli.output_path(1), PathBuf::from("/tmp/out/rain_on_a_roof__1.wav"));

        let cli = parse(&["-f", "/data/dog.wav"]);
        assert_eq!(cli.output_stem(), "dog");
    }
}
