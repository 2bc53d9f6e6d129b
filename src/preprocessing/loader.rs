use crate::domain::entities::AudioClip;
use crate::domain::errors::AppError;
use dasp_rs::core::io::load;
use dasp_rs::signal_processing::resampling::resample;
use std::path::Path;

/// Decodes WAV files to mono and brings them to one sample rate.
pub struct AudioLoader {
    target_sample_rate: u32,
}

impl AudioLoader {
    pub fn new(target_sample_rate: u32) -> Self {
        AudioLoader { target_sample_rate }
    }

    pub fn load(&self, path: &Path) -> Result<AudioClip, AppError> {
        let path_str = path.to_str().ok_or_else(|| {
            AppError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("non UTF-8 path: {}", path.display()),
            ))
        })?;

        let audio_data = load(path_str, None, Some(true), None, None)?;
        let original_rate = audio_data.sample_rate;
        let samples = if original_rate != self.target_sample_rate {
            resample(&audio_data.samples, original_rate, self.target_sample_rate)?
        } else {
            audio_data.samples
        };

        Ok(AudioClip::new(samples, self.target_sample_rate))
    }
}
