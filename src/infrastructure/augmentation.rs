use crate::config::AugmentationConfig;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tch::{Kind, Tensor};

/// 3x3 homogeneous transform in `affine_grid` coordinates: it maps a
/// normalized output position (x, y in [-1, 1]) to the input position sampled.
pub type Affine = [[f64; 3]; 3];

pub const IDENTITY: Affine = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];

/// A random geometric perturbation of a spectrogram image.
pub trait Augmentation {
    fn sample(&self, rng: &mut StdRng, height: f64, width: f64) -> Affine;
    fn name(&self) -> &'static str;
}

pub fn compose(a: &Affine, b: &Affine) -> Affine {
    let mut out = [[0.0; 3]; 3];
    for (i, row) in out.iter_mut().enumerate() {
        for (j, v) in row.iter_mut().enumerate() {
            *v = (0..3).map(|k| a[i][k] * b[k][j]).sum();
        }
    }
    out
}

/// Applies one composed random affine warp per sample to channels-last
/// batches. Out-of-range pixels take the nearest edge value; the time axis is
/// never mirrored.
pub struct Augmenter {
    augmentations: Vec<Box<dyn Augmentation>>,
    rng: StdRng,
}

impl Augmenter {
    pub fn new(config: &AugmentationConfig, seed: u64) -> Self {
        let mut augmentations: Vec<Box<dyn Augmentation>> = Vec::new();
        if config.enabled {
            if config.rotation_range > 0.0 {
                augmentations.push(Box::new(Rotation { degrees: config.rotation_range }));
            }
            if config.width_shift_range > 0.0 || config.height_shift_range > 0.0 {
                augmentations.push(Box::new(Shift {
                    width_fraction: config.width_shift_range,
                    height_fraction: config.height_shift_range,
                }));
            }
            if config.zoom_range > 0.0 {
                augmentations.push(Box::new(Zoom { range: config.zoom_range }));
            }
        }
        Augmenter {
            augmentations,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.augmentations.iter().map(|a| a.name()).collect()
    }

    pub fn is_identity(&self) -> bool {
        self.augmentations.is_empty()
    }

    /// Draws one composed transform, returned as the top two rows.
    pub fn sample_theta(&mut self, height: f64, width: f64) -> [f64; 6] {
        let mut m = IDENTITY;
        for aug in &self.augmentations {
            m = compose(&m, &aug.sample(&mut self.rng, height, width));
        }
        [m[0][0], m[0][1], m[0][2], m[1][0], m[1][1], m[1][2]]
    }

    /// `(N, H, W, C)` in, same shape out.
    pub fn augment(&mut self, batch: &Tensor) -> Tensor {
        if self.is_identity() {
            return batch.shallow_clone();
        }
        let size = batch.size();
        let (n, h, w, c) = (size[0], size[1], size[2], size[3]);

        let mut thetas = Vec::with_capacity(n as usize * 6);
        for _ in 0..n {
            thetas.extend(self.sample_theta(h as f64, w as f64).iter().map(|&v| v as f32));
        }
        let theta = Tensor::from_slice(&thetas)
            .view([n, 2, 3])
            .to_kind(batch.kind())
            .to_device(batch.device());

        let nchw = batch.permute([0, 3, 1, 2]);
        let grid = Tensor::affine_grid_generator(&theta, [n, c, h, w], false);
        // interpolation 0 = bilinear, padding 1 = border
        nchw.grid_sampler(&grid, 0, 1, false)
            .permute([0, 2, 3, 1])
            .contiguous()
            .to_kind(Kind::Float)
    }
}

struct Rotation {
    degrees: f64,
}

impl Augmentation for Rotation {
    fn sample(&self, rng: &mut StdRng, height: f64, width: f64) -> Affine {
        let angle = rng.random_range(-self.degrees..=self.degrees).to_radians();
        let (sin, cos) = angle.sin_cos();
        // Rotate in pixel space, expressed in normalized coordinates.
        [
            [cos, -sin * height / width, 0.0],
            [sin * width / height, cos, 0.0],
            [0.0, 0.0, 1.0],
        ]
    }

    fn name(&self) -> &'static str { "rotation" }
}

struct Shift {
    width_fraction: f64,
    height_fraction: f64,
}

impl Augmentation for Shift {
    fn sample(&self, rng: &mut StdRng, _height: f64, _width: f64) -> Affine {
        let tx = rng.random_range(-self.width_fraction..=self.width_fraction);
        let ty = rng.random_range(-self.height_fraction..=self.height_fraction);
        // A fraction f of the extent is 2f in [-1, 1] coordinates.
        [[1.0, 0.0, 2.0 * tx], [0.0, 1.0, 2.0 * ty], [0.0, 0.0, 1.0]]
    }

    fn name(&self) -> &'static str { "shift" }
}

struct Zoom {
    range: f64,
}

impl Augmentation for Zoom {
    fn sample(&self, rng: &mut StdRng, _height: f64, _width: f64) -> Affine {
        let zx = rng.random_range(1.0 - self.range..=1.0 + self.range);
        let zy = rng.random_range(1.0 - self.range..=1.0 + self.range);
        [[zx, 0.0, 0.0], [0.0, zy, 0.0], [0.0, 0.0, 1.0]]
    }

    fn name(&self) -> &'static str { "zoom" }
}
