use burn::{
    module::RunningState,
    prelude::*,
    tensor::Distribution,
};

const EPSILON: f64 = 1e-12;

fn l2_normalize<B: Backend>(vector: Tensor<B, 2>) -> Tensor<B, 2> {
    let norm = vector
        .clone()
        .powf_scalar(2.0)
        .sum()
        .sqrt()
        .add_scalar(EPSILON)
        .reshape([1, 1]);
    vector.div(norm)
}

/// Divides a kernel by a running estimate of its largest singular value.
///
/// The kernel is viewed as a `[dim0, rest]` matrix `W`. The left singular
/// vector estimate `u` persists across calls and is refined by power
/// iteration on every forward pass; it is saved and restored with the owning
/// layer. Forward passes of one layer must not run concurrently, since the
/// estimate is updated in place.
#[derive(Module, Debug)]
pub struct SpectralNorm<B: Backend> {
    u: RunningState<Tensor<B, 2>>,
    iterations: usize,
}

impl<B: Backend> SpectralNorm<B> {
    pub fn new(rows: usize, iterations: usize, device: &B::Device) -> Self {
        let u = Tensor::random([rows, 1], Distribution::Normal(0.0, 1.0), device);

        Self {
            u: RunningState::new(l2_normalize(u)),
            iterations: iterations.max(1),
        }
    }

    /// The current singular vector estimate, `[rows, 1]`.
    pub fn estimate(&self) -> Tensor<B, 2> {
        self.u.value_sync()
    }

    pub fn forward<const D: usize>(&self, kernel: Tensor<B, D>) -> Tensor<B, D> {
        let shape = kernel.shape();
        let rows = shape.dims[0];
        let cols = shape.num_elements() / rows;

        let matrix = kernel.clone().reshape([rows, cols]);
        let frozen = matrix.clone().detach();

        let mut u = self.u.value().detach();
        let mut v = l2_normalize(frozen.clone().transpose().matmul(u.clone()));
        u = l2_normalize(frozen.clone().matmul(v.clone()));
        for _ in 1..self.iterations {
            v = l2_normalize(frozen.clone().transpose().matmul(u.clone()));
            u = l2_normalize(frozen.clone().matmul(v.clone()));
        }
        self.u.update(u.clone());

        let sigma = u.transpose().matmul(matrix.matmul(v));
        kernel.div(sigma.reshape([1usize; D]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn estimate_is_unit_norm() {
        let device = Default::default();
        let sn = SpectralNorm::<TestBackend>::new(16, 1, &device);

        let norm = sn
            .estimate()
            .powf_scalar(2.0)
            .sum()
            .sqrt()
            .into_scalar();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn sigma_estimates_increase_towards_the_dominant_singular_value() {
        let device = Default::default();
        let sn = SpectralNorm::<TestBackend>::new(2, 1, &device);
        sn.u
            .update(Tensor::from_floats([[1.0], [0.0]], &device));

        let kernel = Tensor::<TestBackend, 2>::from_floats([[2.0, 1.0], [1.0, 2.0]], &device);

        let mut previous = 0.0;
        for step in 0..8 {
            let normalized = sn.forward(kernel.clone());
            let sigma = 2.0 / normalized.slice([0..1, 0..1]).into_scalar();
            assert!(sigma + 1e-5 >= previous, "step {step}: {sigma} < {previous}");
            assert!(sigma <= 3.0 + 1e-4);
            previous = sigma;
        }
        assert!((previous - 3.0).abs() < 1e-3, "converged to {previous}");
    }

    #[test]
    fn normalized_kernel_keeps_its_shape() {
        let device = Default::default();
        let sn = SpectralNorm::<TestBackend>::new(8, 2, &device);
        let kernel = Tensor::<TestBackend, 4>::random([8, 3, 3, 3], Distribution::Default, &device);

        assert_eq!(sn.forward(kernel).dims(), [8, 3, 3, 3]);
    }
}
