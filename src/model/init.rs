use burn::{
    module::Param,
    nn::Initializer,
    prelude::*,
    tensor::Distribution,
};

use crate::{
    error::{ConfigError, Result},
    registry::InitializerSpec,
};

/// Rounds of resampling before out-of-range values are clamped.
const TRUNCATION_ROUNDS: usize = 8;

/// Normal samples restricted to two standard deviations around zero.
fn truncated_normal<B: Backend, const D: usize>(
    shape: [usize; D],
    stddev: f64,
    device: &B::Device,
) -> Tensor<B, D> {
    let bound = 2.0 * stddev;
    let distribution = Distribution::Normal(0.0, stddev);

    let mut values = Tensor::<B, D>::random(shape, distribution, device);
    for _ in 0..TRUNCATION_ROUNDS {
        let outside = values.clone().abs().greater_elem(bound);
        let fresh = Tensor::random(shape, distribution, device);
        values = values.mask_where(outside, fresh);
    }
    values.clamp(-bound, bound)
}

/// Materializes a kernel of `shape` for the given fans.
pub(crate) fn kernel<B: Backend, const D: usize>(
    spec: &InitializerSpec,
    shape: [usize; D],
    fan_in: usize,
    fan_out: usize,
    device: &B::Device,
) -> Result<Param<Tensor<B, D>>> {
    let fan_in_f = fan_in.max(1) as f64;
    let param = match spec {
        InitializerSpec::HeNormal => {
            Param::from_tensor(truncated_normal(shape, (2.0 / fan_in_f).sqrt(), device))
        }
        InitializerSpec::HeUniform => Initializer::KaimingUniform {
            gain: 2.0f64.sqrt(),
            fan_out_only: false,
        }
        .init_with(shape, Some(fan_in), Some(fan_out), device),
        InitializerSpec::Zeros => Initializer::Zeros.init(shape, device),
        InitializerSpec::TruncatedNormal { stddev } => {
            Param::from_tensor(truncated_normal(shape, *stddev, device))
        }
        InitializerSpec::RandomNormal { stddev } => Initializer::Normal {
            mean: 0.0,
            std: *stddev,
        }
        .init(shape, device),
        InitializerSpec::Torch => {
            let bound = 1.0 / fan_in_f.sqrt();
            Initializer::Uniform {
                min: -bound,
                max: bound,
            }
            .init(shape, device)
        }
        InitializerSpec::Custom(init) => {
            let values = init(&shape);
            let expected = shape.iter().product::<usize>();
            if values.len() != expected {
                return Err(ConfigError::InitializerShape {
                    expected,
                    actual: values.len(),
                });
            }
            Param::from_tensor(Tensor::from_data(TensorData::new(values, shape), device))
        }
    };

    Ok(param)
}

/// Biases start at zero, except under the torch scheme which draws them from
/// the same fan-in bound as the kernel.
pub(crate) fn bias<B: Backend>(
    spec: &InitializerSpec,
    size: usize,
    fan_in: usize,
    device: &B::Device,
) -> Param<Tensor<B, 1>> {
    match spec {
        InitializerSpec::Torch => {
            let bound = 1.0 / (fan_in.max(1) as f64).sqrt();
            Initializer::Uniform {
                min: -bound,
                max: bound,
            }
            .init([size], device)
        }
        _ => Initializer::Zeros.init([size], device),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    fn values(param: Param<Tensor<TestBackend, 4>>) -> Vec<f32> {
        param.val().into_data().to_vec::<f32>().unwrap()
    }

    #[test]
    fn he_normal_is_truncated_at_two_stddev() {
        let device = Default::default();
        let fan_in = 32 * 3 * 3;
        let stddev = (2.0 / fan_in as f32).sqrt();

        let weights = values(
            kernel::<TestBackend, 4>(
                &InitializerSpec::HeNormal,
                [64, 32, 3, 3],
                fan_in,
                64 * 9,
                &device,
            )
            .unwrap(),
        );

        let n = weights.len() as f32;
        let mean = weights.iter().sum::<f32>() / n;
        let std = (weights.iter().map(|w| (w - mean).powi(2)).sum::<f32>() / n).sqrt();

        assert!(weights.iter().all(|w| w.abs() <= 2.0 * stddev + 1e-6));
        assert!(mean.abs() < 0.05 * stddev);
        // a normal truncated at 2 sigma keeps about 88% of its spread
        assert!(std > 0.8 * stddev && std < 0.95 * stddev, "std {std}");
    }

    #[test]
    fn torch_scheme_bounds_kernel_and_bias() {
        let device = Default::default();
        let fan_in = 16 * 3 * 3;
        let bound = 1.0 / (fan_in as f32).sqrt();

        let weights = values(
            kernel::<TestBackend, 4>(&InitializerSpec::Torch, [8, 16, 3, 3], fan_in, 72, &device)
                .unwrap(),
        );
        let bias = bias::<TestBackend>(&InitializerSpec::Torch, 8, fan_in, &device)
            .val()
            .into_data()
            .to_vec::<f32>()
            .unwrap();

        assert!(weights.iter().all(|w| w.abs() <= bound));
        assert!(bias.iter().all(|b| b.abs() <= bound));
        assert!(bias.iter().any(|b| *b != 0.0));
    }

    #[test]
    fn bias_is_zero_by_default() {
        let device = Default::default();
        let bias = bias::<TestBackend>(&InitializerSpec::HeUniform, 4, 9, &device)
            .val()
            .into_data()
            .to_vec::<f32>()
            .unwrap();
        assert_eq!(bias, vec![0.0; 4]);
    }

    #[test]
    fn custom_initializer_fills_the_kernel() {
        let device = Default::default();
        let spec = InitializerSpec::custom(|shape| {
            (0..shape.iter().product::<usize>())
                .map(|i| i as f32)
                .collect()
        });

        let weights =
            values(kernel::<TestBackend, 4>(&spec, [2, 1, 1, 2], 2, 4, &device).unwrap());
        assert_eq!(weights, vec![0.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn custom_initializer_must_match_the_shape() {
        let device = Default::default();
        let spec = InitializerSpec::custom(|_| vec![0.5; 3]);

        let result = kernel::<TestBackend, 4>(&spec, [2, 1, 1, 2], 2, 4, &device);
        assert_eq!(
            result.err(),
            Some(ConfigError::InitializerShape {
                expected: 4,
                actual: 3
            })
        );
    }
}
