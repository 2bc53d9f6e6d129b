use crate::domain::errors::AppError;
use std::path::Path;
use tch::nn::{self, ModuleT};
use tch::{Device, Kind, Tensor};

pub const DEFAULT_L2_PENALTY: f64 = 1e-3;
const CONV_FILTERS: [i64; 3] = [64, 128, 256];
const DENSE_UNITS: [i64; 2] = [512, 256];
const SPATIAL_DROPOUT: f64 = 0.2;
const DENSE_DROPOUT: f64 = 0.5;

/// Three conv blocks, two dense blocks and a softmax head over a channels-last
/// `(N, H, W, C)` spectrogram batch.
pub struct GenreCnn {
    vs: nn::VarStore,
    net: nn::SequentialT,
    kernels: Vec<Tensor>,
    input_shape: [i64; 3],
    num_classes: i64,
    l2_penalty: f64,
}

fn batch_norm_config() -> nn::BatchNormConfig {
    // Keras-style BN: eps 1e-3, running stats updated with momentum 0.99.
    nn::BatchNormConfig {
        eps: 1e-3,
        momentum: 0.01,
        ..Default::default()
    }
}

fn conv_block(p: nn::Path, c_in: i64, c_out: i64, kernels: &mut Vec<Tensor>) -> nn::SequentialT {
    let conv_cfg = nn::ConvConfig {
        padding: 1,
        ..Default::default()
    };
    let conv = nn::conv2d(&p / "conv", c_in, c_out, 3, conv_cfg);
    kernels.push(conv.ws.shallow_clone());

    nn::seq_t()
        .add(conv)
        .add_fn(|xs| xs.relu())
        .add(nn::batch_norm2d(&p / "bn", c_out, batch_norm_config()))
        .add_fn(|xs| xs.max_pool2d_default(2))
        .add_fn_t(|xs, train| xs.feature_dropout(SPATIAL_DROPOUT, train))
}

fn dense_block(p: nn::Path, n_in: i64, n_out: i64, kernels: &mut Vec<Tensor>) -> nn::SequentialT {
    let dense = nn::linear(&p / "dense", n_in, n_out, Default::default());
    kernels.push(dense.ws.shallow_clone());

    nn::seq_t()
        .add(dense)
        .add_fn(|xs| xs.relu())
        .add(nn::batch_norm1d(&p / "bn", n_out, batch_norm_config()))
        .add_fn_t(|xs, train| xs.dropout(DENSE_DROPOUT, train))
}

impl GenreCnn {
    /// Builds a randomly initialized network for `(H, W, C)` inputs.
    pub fn new(device: Device, input_shape: [i64; 3], num_classes: i64) -> Result<Self, AppError> {
        let [height, width, channels] = input_shape;
        if input_shape.iter().any(|&d| d <= 0) || num_classes <= 0 {
            return Err(AppError::InvalidConfig(format!(
                "invalid model shape {input_shape:?} with {num_classes} classes"
            )));
        }
        let pooled = |mut d: i64| {
            for _ in CONV_FILTERS {
                d /= 2;
            }
            d
        };
        let (out_h, out_w) = (pooled(height), pooled(width));
        if out_h == 0 || out_w == 0 {
            return Err(AppError::InvalidConfig(format!(
                "input {height}x{width} is too small for {} pooling stages",
                CONV_FILTERS.len()
            )));
        }

        let vs = nn::VarStore::new(device);
        let root = vs.root();
        let mut kernels = Vec::new();
        let mut net = nn::seq_t();

        let mut c_in = channels;
        for (i, &filters) in CONV_FILTERS.iter().enumerate() {
            net = net.add(conv_block(&root / format!("block{}", i + 1), c_in, filters, &mut kernels));
            c_in = filters;
        }
        net = net.add_fn(|xs| xs.flat_view());

        let mut n_in = c_in * out_h * out_w;
        for (i, &units) in DENSE_UNITS.iter().enumerate() {
            net = net.add(dense_block(&root / format!("fc{}", i + 1), n_in, units, &mut kernels));
            n_in = units;
        }
        // The softmax head carries no weight penalty.
        net = net.add(nn::linear(&root / "output", n_in, num_classes, Default::default()));

        Ok(GenreCnn {
            vs,
            net,
            kernels,
            input_shape,
            num_classes,
            l2_penalty: DEFAULT_L2_PENALTY,
        })
    }

    pub fn with_l2_penalty(mut self, l2_penalty: f64) -> Self {
        self.l2_penalty = l2_penalty;
        self
    }

    /// Rebuilds the topology and reads weights saved by [`GenreCnn::save`].
    pub fn load(
        device: Device,
        input_shape: [i64; 3],
        num_classes: i64,
        path: impl AsRef<Path>,
    ) -> Result<Self, AppError> {
        let mut model = Self::new(device, input_shape, num_classes)?;
        model.vs.load(path)?;
        Ok(model)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), AppError> {
        self.vs.save(path)?;
        Ok(())
    }

    pub fn var_store(&self) -> &nn::VarStore {
        &self.vs
    }

    pub fn device(&self) -> Device {
        self.vs.device()
    }

    pub fn input_shape(&self) -> [i64; 3] {
        self.input_shape
    }

    pub fn num_classes(&self) -> i64 {
        self.num_classes
    }

    /// Pre-softmax scores, `(N, num_classes)`.
    pub fn logits_t(&self, xs: &Tensor, train: bool) -> Tensor {
        let nchw = xs.permute([0, 3, 1, 2]).contiguous();
        self.net.forward_t(&nchw, train)
    }

    /// Class probabilities, `(N, num_classes)`; each row sums to one.
    pub fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        self.logits_t(xs, train).softmax(-1, Kind::Float)
    }

    /// Batched inference-mode logits on the model's device, returned on CPU.
    pub fn predict_logits(&self, xs: &Tensor, batch_size: i64) -> Tensor {
        let device = self.device();
        tch::no_grad(|| {
            let batches: Vec<Tensor> = xs
                .split(batch_size, 0)
                .iter()
                .map(|bx| self.logits_t(&bx.to_device(device), false).to_device(Device::Cpu))
                .collect();
            Tensor::cat(&batches, 0)
        })
    }

    pub fn predict(&self, xs: &Tensor, batch_size: i64) -> Tensor {
        self.predict_logits(xs, batch_size).softmax(-1, Kind::Float)
    }

    /// `l2 * sum(w^2)` over the conv and hidden dense kernels.
    pub fn l2_loss(&self) -> Tensor {
        let sums: Vec<Tensor> = self
            .kernels
            .iter()
            .map(|w| w.square().sum(Kind::Float))
            .collect();
        Tensor::stack(&sums, 0).sum(Kind::Float) * self.l2_penalty
    }

    /// Deep copy of every variable, batch-norm running stats included.
    pub fn snapshot(&self) -> Vec<(String, Tensor)> {
        tch::no_grad(|| {
            self.vs
                .variables()
                .into_iter()
                .map(|(name, t)| (name, t.detach().copy()))
                .collect()
        })
    }

    pub fn restore(&self, snapshot: &[(String, Tensor)]) -> Result<(), AppError> {
        let mut variables = self.vs.variables();
        tch::no_grad(|| {
            for (name, saved) in snapshot {
                let var = variables.get_mut(name).ok_or_else(|| {
                    AppError::InvalidConfig(format!("snapshot variable {name} not in model"))
                })?;
                var.copy_(saved);
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_model(classes: i64) -> GenreCnn {
        GenreCnn::new(Device::Cpu, [32, 40, 1], classes).unwrap()
    }

    #[test]
    fn output_is_a_probability_distribution() {
        let model = small_model(10);
        let xs = Tensor::randn([3, 32, 40, 1], (Kind::Float, Device::Cpu));
        let probs = tch::no_grad(|| model.forward_t(&xs, false));
        assert_eq!(probs.size(), vec![3, 10]);
        let sums = probs.sum_dim_intlist(1, false, Kind::Float);
        for i in 0..3 {
            assert!((sums.double_value(&[i]) - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn full_size_input_gives_ten_classes() {
        let model = GenreCnn::new(Device::Cpu, [128, 250, 1], 10).unwrap();
        let xs = Tensor::zeros([2, 128, 250, 1], (Kind::Float, Device::Cpu));
        let probs = tch::no_grad(|| model.forward_t(&xs, false));
        assert_eq!(probs.size(), vec![2, 10]);
    }

    #[test]
    fn rejects_inputs_too_small_to_pool() {
        assert!(GenreCnn::new(Device::Cpu, [4, 250, 1], 10).is_err());
        assert!(GenreCnn::new(Device::Cpu, [128, 250, 1], 0).is_err());
    }

    #[test]
    fn l2_covers_conv_and_dense_kernels() {
        let model = small_model(2);
        assert_eq!(model.kernels.len(), 5);
        let penalty = model.l2_loss().double_value(&[]);
        let manual: f64 = model
            .kernels
            .iter()
            .map(|w| w.square().sum(Kind::Double).double_value(&[]))
            .sum::<f64>()
            * DEFAULT_L2_PENALTY;
        assert!(penalty > 0.0);
        assert!((penalty - manual).abs() / manual < 1e-4);
    }

    #[test]
    fn output_layer_is_not_penalized() {
        let model = small_model(2);
        let before = model.l2_loss().double_value(&[]);
        let variables = model.var_store().variables();
        tch::no_grad(|| {
            let _ = variables["output.weight"].shallow_clone().fill_(3.0);
        });
        let after = model.l2_loss().double_value(&[]);
        assert!((after - before).abs() < 1e-9 * before.max(1.0));
    }

    #[test]
    fn restore_reverts_weights() {
        let model = small_model(2);
        let saved = model.snapshot();
        let kernel = model.kernels[0].shallow_clone();
        let before = kernel.sum(Kind::Double).double_value(&[]);
        tch::no_grad(|| {
            let _ = kernel.shallow_clone().fill_(0.5);
        });
        assert_ne!(kernel.sum(Kind::Double).double_value(&[]), before);
        model.restore(&saved).unwrap();
        assert!((kernel.sum(Kind::Double).double_value(&[]) - before).abs() < 1e-9);
    }

    #[test]
    fn save_and_load_round_trip_predictions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.ot");
        let model = small_model(3);
        model.save(&path).unwrap();

        let loaded = GenreCnn::load(Device::Cpu, [32, 40, 1], 3, &path).unwrap();
        let xs = Tensor::randn([2, 32, 40, 1], (Kind::Float, Device::Cpu));
        let a = tch::no_grad(|| model.forward_t(&xs, false));
        let b = tch::no_grad(|| loaded.forward_t(&xs, false));
        assert!(a.allclose(&b, 1e-5, 1e-6, false));
    }
}
