use std::f32::consts::PI;
use std::fs;
use std::path::Path;

pub fn write_wav(path: &Path, samples: &[f32], sample_rate: u32) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for &s in samples {
        writer.write_sample((s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16).unwrap();
    }
    writer.finalize().unwrap();
}

pub fn tone(freq: f32, sample_rate: u32, seconds: f32) -> Vec<f32> {
    let n = (sample_rate as f32 * seconds) as usize;
    (0..n)
        .map(|i| 0.5 * (2.0 * PI * freq * i as f32 / sample_rate as f32).sin())
        .collect()
}

/// `<root>/<genre>/<genre>.0000N.wav`, five clips per genre at 22050 Hz.
pub fn genre_tree(root: &Path, genres: &[&str], clip: impl Fn(usize, usize) -> Vec<f32>) {
    genre_tree_at(root, genres, 22050, clip);
}

pub fn genre_tree_at(root: &Path, genres: &[&str], sample_rate: u32, clip: impl Fn(usize, usize) -> Vec<f32>) {
    for (g, genre) in genres.iter().enumerate() {
        let dir = root.join(genre);
        fs::create_dir_all(&dir).unwrap();
        for i in 0..5 {
            write_wav(&dir.join(format!("{genre}.{i:05}.wav")), &clip(g, i), sample_rate);
        }
    }
}

/// Time frames holding at least one non-zero value, i.e. before the zero padding.
pub fn filled_frames(feature: &ndarray::Array3<f32>) -> usize {
    feature
        .axis_iter(ndarray::Axis(1))
        .filter(|frame| frame.iter().any(|&v| v != 0.0))
        .count()
}
