//! Symbolic configuration tokens.
//!
//! Every string a model definition may use for an initializer, regularizer,
//! activation or layer alias is resolved here, and nowhere else. Unknown
//! tokens are errors, never silently mapped to a default.

use std::{any::Any, fmt, str::FromStr, sync::Arc};

use burn::tensor::{backend::Backend, Tensor};

use crate::error::ConfigError;

/// A caller-supplied kernel initializer: receives the kernel shape and
/// returns row-major values for it.
pub type InitializerFn = Arc<dyn Fn(&[usize]) -> Vec<f32> + Send + Sync>;

#[derive(Clone)]
pub enum InitializerSpec {
    HeNormal,
    HeUniform,
    Zeros,
    TruncatedNormal { stddev: f64 },
    RandomNormal { stddev: f64 },
    /// Fan-in scaled uniform for kernel and bias, as torch does by default.
    /// Disables the kernel regularizer.
    Torch,
    Custom(InitializerFn),
}

impl InitializerSpec {
    pub fn custom<F>(init: F) -> Self
    where
        F: Fn(&[usize]) -> Vec<f32> + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(init))
    }
}

impl fmt::Debug for InitializerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HeNormal => f.write_str("HeNormal"),
            Self::HeUniform => f.write_str("HeUniform"),
            Self::Zeros => f.write_str("Zeros"),
            Self::TruncatedNormal { stddev } => write!(f, "TruncatedNormal({stddev})"),
            Self::RandomNormal { stddev } => write!(f, "RandomNormal({stddev})"),
            Self::Torch => f.write_str("Torch"),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl PartialEq for InitializerSpec {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::TruncatedNormal { stddev: a }, Self::TruncatedNormal { stddev: b })
            | (Self::RandomNormal { stddev: a }, Self::RandomNormal { stddev: b }) => a == b,
            (Self::Custom(a), Self::Custom(b)) => Arc::ptr_eq(a, b),
            (a, b) => std::mem::discriminant(a) == std::mem::discriminant(b),
        }
    }
}

fn parse_stddev(token: &str, suffix: &str) -> Result<f64, ConfigError> {
    match suffix.parse::<f64>() {
        Ok(stddev) if stddev.is_finite() && stddev > 0.0 => Ok(stddev),
        _ => Err(ConfigError::UnknownInitializer(token.to_string())),
    }
}

impl FromStr for InitializerSpec {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "he_normal" => Ok(Self::HeNormal),
            "he_uniform" => Ok(Self::HeUniform),
            "zeros" | "zero" => Ok(Self::Zeros),
            "torch" => Ok(Self::Torch),
            _ => {
                if let Some(stddev) = s.strip_prefix("truncated_normal_") {
                    Ok(Self::TruncatedNormal {
                        stddev: parse_stddev(s, stddev)?,
                    })
                } else if let Some(stddev) = s.strip_prefix("random_normal_") {
                    Ok(Self::RandomNormal {
                        stddev: parse_stddev(s, stddev)?,
                    })
                } else {
                    Err(ConfigError::UnknownInitializer(s.to_string()))
                }
            }
        }
    }
}

/// A caller-supplied kernel penalty. Receives the flattened kernel and
/// returns a single-element loss.
pub type PenaltyFn<B> = Arc<dyn Fn(Tensor<B, 1>) -> Tensor<B, 1> + Send + Sync>;

/// A [`PenaltyFn`] with its backend erased, recovered when a layer is built.
#[derive(Clone)]
pub struct CustomRegularizer(Arc<dyn Any + Send + Sync>);

impl CustomRegularizer {
    fn for_backend<B: Backend>(&self) -> Option<PenaltyFn<B>> {
        self.0.downcast_ref::<PenaltyFn<B>>().cloned()
    }
}

#[derive(Clone)]
pub enum RegularizerSpec {
    None,
    L1,
    L2,
    /// Used as given: not scaled by the weight decay, and kept when it is zero.
    Custom(CustomRegularizer),
}

impl RegularizerSpec {
    pub fn custom<B, F>(penalty: F) -> Self
    where
        B: Backend,
        F: Fn(Tensor<B, 1>) -> Tensor<B, 1> + Send + Sync + 'static,
    {
        let penalty: PenaltyFn<B> = Arc::new(penalty);
        Self::Custom(CustomRegularizer(Arc::new(penalty)))
    }

    /// Scales the requested kind by the model-wide weight decay. A zero decay
    /// means no penalty for the symbolic kinds.
    pub fn resolve<B: Backend>(
        &self,
        weight_decay: f64,
    ) -> Result<Option<WeightPenalty<B>>, ConfigError> {
        let kind = match self {
            Self::Custom(custom) => {
                return custom
                    .for_backend::<B>()
                    .map(|penalty| Some(WeightPenalty::Custom(penalty)))
                    .ok_or(ConfigError::RegularizerBackend);
            }
            _ if weight_decay == 0.0 => return Ok(None),
            Self::None => return Ok(None),
            Self::L1 => PenaltyKind::L1,
            Self::L2 => PenaltyKind::L2,
        };
        Ok(Some(WeightPenalty::Scaled {
            kind,
            scale: weight_decay,
        }))
    }
}

impl fmt::Debug for RegularizerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::L1 => f.write_str("L1"),
            Self::L2 => f.write_str("L2"),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl PartialEq for RegularizerSpec {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Custom(a), Self::Custom(b)) => Arc::ptr_eq(&a.0, &b.0),
            (a, b) => std::mem::discriminant(a) == std::mem::discriminant(b),
        }
    }
}

impl FromStr for RegularizerSpec {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "l1" => Ok(Self::L1),
            "l2" => Ok(Self::L2),
            "none" => Ok(Self::None),
            _ => Err(ConfigError::UnknownRegularizer(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PenaltyKind {
    L1,
    L2,
}

/// A resolved kernel regularizer.
#[derive(Clone)]
pub enum WeightPenalty<B: Backend> {
    Scaled { kind: PenaltyKind, scale: f64 },
    Custom(PenaltyFn<B>),
}

impl<B: Backend> WeightPenalty<B> {
    pub fn penalty<const D: usize>(&self, weight: Tensor<B, D>) -> Tensor<B, 1> {
        match self {
            Self::Scaled { kind, scale } => {
                let total = match kind {
                    PenaltyKind::L1 => weight.abs().sum(),
                    PenaltyKind::L2 => weight.powf_scalar(2.0).sum(),
                };
                total.mul_scalar(*scale)
            }
            Self::Custom(penalty) => penalty(weight.flatten(0, D - 1)),
        }
    }
}

impl<B: Backend> fmt::Debug for WeightPenalty<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scaled { kind, scale } => write!(f, "{kind:?}({scale})"),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationSpec {
    Relu,
    Tanh,
    /// Learned slope per channel.
    PRelu,
    /// Fixed slope, see [`LEAKY_RELU_SLOPE`].
    LeakyRelu,
}

pub const LEAKY_RELU_SLOPE: f64 = 0.2;

impl FromStr for ActivationSpec {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "relu" => Ok(Self::Relu),
            "tanh" => Ok(Self::Tanh),
            "prelu" => Ok(Self::PRelu),
            "lrelu" => Ok(Self::LeakyRelu),
            _ => Err(ConfigError::UnknownActivation(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerKind {
    Conv2d,
    Conv3d,
    Dense,
}

impl LayerKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Conv2d => "conv2d",
            Self::Conv3d => "conv3d",
            Self::Dense => "dense",
        }
    }
}

/// What a layer alias such as `bn_sn_leaky_conv2d` asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerOverrides {
    pub kind: LayerKind,
    pub use_batchnorm: bool,
    pub use_sn: bool,
    pub activation: Option<ActivationSpec>,
}

/// Compiles a layer alias into configuration overrides.
///
/// The kind comes from the first of `conv2d`, `conv3d`, `dense`/`linear`
/// found anywhere in the name. The name is then split on `_`, `-` and `.`
/// and each recognized token switches one option on; token order is
/// irrelevant. Batch norm is not available on dense layers and spectral norm
/// is not available on 3-d convolutions, so those tokens are ignored there.
pub fn resolve_layer_name(name: &str) -> Option<LayerOverrides> {
    let kind = if name.contains("conv2d") {
        LayerKind::Conv2d
    } else if name.contains("conv3d") {
        LayerKind::Conv3d
    } else if name.contains("dense") || name.contains("linear") {
        LayerKind::Dense
    } else {
        return None;
    };

    let tokens: Vec<&str> = name.split(['_', '-', '.']).collect();
    let has = |aliases: &[&str]| tokens.iter().any(|token| aliases.contains(token));

    // later checks take precedence when several activations are named
    let mut activation = None;
    if has(&["relu"]) {
        activation = Some(ActivationSpec::Relu);
    }
    if has(&["leaky", "lrelu", "leakyrelu"]) {
        activation = Some(ActivationSpec::LeakyRelu);
    }
    if has(&["prelu"]) {
        activation = Some(ActivationSpec::PRelu);
    }
    if has(&["tanh"]) {
        activation = Some(ActivationSpec::Tanh);
    }

    Some(LayerOverrides {
        kind,
        use_batchnorm: kind != LayerKind::Dense && has(&["bn", "batchnorm"]),
        use_sn: kind != LayerKind::Conv3d && has(&["sn", "spectralnorm"]),
        activation,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use rstest::rstest;

    type TestBackend = NdArray<f32>;

    #[test]
    fn relu_alias_only_sets_activation() {
        let overrides = resolve_layer_name("relu_conv2d").unwrap();
        assert_eq!(
            overrides,
            LayerOverrides {
                kind: LayerKind::Conv2d,
                use_batchnorm: false,
                use_sn: false,
                activation: Some(ActivationSpec::Relu),
            }
        );
    }

    #[rstest]
    #[case("bn_sn_leaky_conv2d")]
    #[case("leaky_sn_bn_conv2d")]
    #[case("conv2d_bn_leaky_sn")]
    #[case("sn-lrelu-batchnorm-conv2d")]
    #[case("spectralnorm.leakyrelu.bn.conv2d")]
    fn alias_tokens_are_order_independent(#[case] name: &str) {
        let overrides = resolve_layer_name(name).unwrap();
        assert_eq!(overrides.kind, LayerKind::Conv2d);
        assert!(overrides.use_batchnorm);
        assert!(overrides.use_sn);
        assert_eq!(overrides.activation, Some(ActivationSpec::LeakyRelu));
    }

    #[test]
    fn prelu_is_not_mistaken_for_relu() {
        let overrides = resolve_layer_name("prelu_conv2d").unwrap();
        assert_eq!(overrides.activation, Some(ActivationSpec::PRelu));
    }

    #[test]
    fn kind_specific_tokens_are_dropped() {
        let dense = resolve_layer_name("bn_sn_tanh_linear").unwrap();
        assert_eq!(dense.kind, LayerKind::Dense);
        assert!(!dense.use_batchnorm);
        assert!(dense.use_sn);
        assert_eq!(dense.activation, Some(ActivationSpec::Tanh));

        let volume = resolve_layer_name("sn_bn_conv3d").unwrap();
        assert_eq!(volume.kind, LayerKind::Conv3d);
        assert!(volume.use_batchnorm);
        assert!(!volume.use_sn);
    }

    #[test]
    fn unrelated_names_do_not_resolve() {
        assert_eq!(resolve_layer_name("resblock"), None);
        assert_eq!(resolve_layer_name("bn_relu"), None);
    }

    #[rstest]
    #[case("he_normal", InitializerSpec::HeNormal)]
    #[case("he_uniform", InitializerSpec::HeUniform)]
    #[case("zero", InitializerSpec::Zeros)]
    #[case("torch", InitializerSpec::Torch)]
    #[case("truncated_normal_0.02", InitializerSpec::TruncatedNormal { stddev: 0.02 })]
    #[case("random_normal_0.5", InitializerSpec::RandomNormal { stddev: 0.5 })]
    fn initializer_tokens(#[case] token: &str, #[case] expected: InitializerSpec) {
        assert_eq!(token.parse::<InitializerSpec>().unwrap(), expected);
    }

    #[rstest]
    #[case("glorot_uniform")]
    #[case("truncated_normal")]
    #[case("random_normal_abc")]
    #[case("random_normal_-1")]
    fn unknown_initializers_fail(#[case] token: &str) {
        assert_eq!(
            token.parse::<InitializerSpec>(),
            Err(ConfigError::UnknownInitializer(token.to_string()))
        );
    }

    #[test]
    fn unknown_activation_and_regularizer_fail() {
        assert!("swish".parse::<ActivationSpec>().is_err());
        assert!("leaky".parse::<ActivationSpec>().is_err());
        assert!("l3".parse::<RegularizerSpec>().is_err());
    }

    fn scaled<B: Backend>(penalty: Option<WeightPenalty<B>>) -> Option<(PenaltyKind, f64)> {
        match penalty {
            Some(WeightPenalty::Scaled { kind, scale }) => Some((kind, scale)),
            _ => None,
        }
    }

    #[test]
    fn zero_weight_decay_disables_regularization() {
        let resolve = |spec: RegularizerSpec, wd| scaled(spec.resolve::<TestBackend>(wd).unwrap());

        assert_eq!(resolve(RegularizerSpec::L1, 0.0), None);
        assert_eq!(resolve(RegularizerSpec::L2, 0.0), None);
        assert_eq!(resolve(RegularizerSpec::None, 1e-4), None);
        assert_eq!(resolve(RegularizerSpec::L2, 1e-4), Some((PenaltyKind::L2, 1e-4)));
    }

    #[test]
    fn penalties_match_their_definition() {
        let device = Default::default();
        let weight = Tensor::<TestBackend, 2>::from_floats([[1.0, -2.0], [3.0, -4.0]], &device);

        let l1 = WeightPenalty::<TestBackend>::Scaled {
            kind: PenaltyKind::L1,
            scale: 0.5,
        };
        let l2 = WeightPenalty::<TestBackend>::Scaled {
            kind: PenaltyKind::L2,
            scale: 0.1,
        };
        let l1 = l1.penalty(weight.clone()).into_scalar();
        let l2 = l2.penalty(weight).into_scalar();
        assert!((l1 - 5.0).abs() < 1e-6);
        assert!((l2 - 3.0).abs() < 1e-5);
    }

    #[test]
    fn custom_penalty_ignores_weight_decay() {
        let device = Default::default();
        let weight = Tensor::<TestBackend, 2>::from_floats([[1.0, -2.0], [3.0, -4.0]], &device);
        let spec = RegularizerSpec::custom(|w: Tensor<TestBackend, 1>| w.max());

        for weight_decay in [0.0, 1e-4] {
            let penalty = spec.resolve::<TestBackend>(weight_decay).unwrap().unwrap();
            assert_eq!(penalty.penalty(weight.clone()).into_scalar(), 3.0);
        }
    }

    #[test]
    fn custom_penalty_is_bound_to_its_backend() {
        type Autodiffed = burn::backend::Autodiff<TestBackend>;
        let spec = RegularizerSpec::custom(|w: Tensor<TestBackend, 1>| w.sum());

        assert!(matches!(
            spec.resolve::<Autodiffed>(1e-4),
            Err(ConfigError::RegularizerBackend)
        ));
        assert_eq!(spec.clone(), spec);
        assert_ne!(spec, RegularizerSpec::custom(|w: Tensor<TestBackend, 1>| w.sum()));
    }
}
