//! Audio front end.
//!
//! Reads and normalizes reference recordings, resamples them to the model
//! rate, computes log-mel features and writes generated audio.

pub mod resample;
pub mod stft;
pub mod wav;

pub use resample::resample_mono;
pub use stft::{pad_spec, wav_to_fbank, Fbank, MelOutput, TacotronStft};
pub use wav::{
    read_wav, read_wav_file, samples_to_duration, write_wav, MIN_WAV_SAMPLES, SAMPLE_RATE,
};
