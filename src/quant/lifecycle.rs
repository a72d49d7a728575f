//! Attaching observers and quantization parameters to a layer
//!
//! A [`LayerQuantization`] owns, for one layer, an observer plus placeholder
//! scale / zero-point per configured slot (input activation, weight, output
//! activation). Calibration feeds tensors through [`LayerQuantization::observe`];
//! [`LayerQuantization::freeze`] drops the observers and keeps the parameters,
//! which [`LayerQuantization::state_dict`] exposes under their persisted names.

use crate::io::{merge_names, StoredTensor};
use crate::quant::args::{QuantizationArgs, QuantizationStrategy};
use crate::quant::forward::fake_quantize;
use crate::quant::observer::{Observer, ObserverRegistry};
use crate::quant::params::QuantParams;
use crate::{Error, Result};
use ndarray::{ArrayD, ArrayViewD, IxDyn};
use safetensors::Dtype;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Which tensor of a layer a slot observes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SlotKind {
    Input,
    Weight,
    Output,
}

impl SlotKind {
    /// Prefix of the persisted parameter names
    pub fn base_name(self) -> &'static str {
        match self {
            SlotKind::Input => "input",
            SlotKind::Weight => "weight",
            SlotKind::Output => "output",
        }
    }
}

impl fmt::Display for SlotKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.base_name())
    }
}

/// Quantization arguments for every slot of the targeted layers
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct QuantizationScheme {
    /// Layer names or `re:<regex>` patterns the scheme applies to
    #[serde(default)]
    pub targets: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weights: Option<QuantizationArgs>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_activations: Option<QuantizationArgs>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_activations: Option<QuantizationArgs>,
}

impl QuantizationScheme {
    /// Arguments configured for a slot
    pub fn args_for(&self, kind: SlotKind) -> Option<&QuantizationArgs> {
        match kind {
            SlotKind::Input => self.input_activations.as_ref(),
            SlotKind::Weight => self.weights.as_ref(),
            SlotKind::Output => self.output_activations.as_ref(),
        }
    }
}

/// Where a layer is in the calibration lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuantizationStatus {
    /// Observers attached, nothing observed yet
    Initialized,
    /// At least one tensor observed
    Calibration,
    /// Observers dropped, parameters final
    Frozen,
}

/// On-disk precision of a scale tensor
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ScaleDtype {
    #[default]
    F16,
    BF16,
    F32,
}

impl ScaleDtype {
    /// Follow the weight precision when it is a standard float, else F16
    pub fn for_weight(dtype: Dtype) -> Self {
        match dtype {
            Dtype::BF16 => ScaleDtype::BF16,
            Dtype::F32 => ScaleDtype::F32,
            _ => ScaleDtype::F16,
        }
    }

    pub fn dtype(self) -> Dtype {
        match self {
            ScaleDtype::F16 => Dtype::F16,
            ScaleDtype::BF16 => Dtype::BF16,
            ScaleDtype::F32 => Dtype::F32,
        }
    }
}

/// Shape and storage dtype of a layer's weight
#[derive(Clone, Debug, PartialEq)]
pub struct WeightInfo {
    pub shape: Vec<usize>,
    pub dtype: Dtype,
}

impl WeightInfo {
    pub fn new(shape: Vec<usize>, dtype: Dtype) -> Self {
        Self { shape, dtype }
    }
}

/// Observer plus current parameters for one slot
#[derive(Debug)]
pub struct QuantizedSlot {
    kind: SlotKind,
    args: QuantizationArgs,
    observer: Option<Box<dyn Observer>>,
    expected_shape: Option<Vec<usize>>,
    scale: ArrayD<f32>,
    zero_point: Option<ArrayD<i32>>,
    scale_dtype: ScaleDtype,
}

impl QuantizedSlot {
    pub fn kind(&self) -> SlotKind {
        self.kind
    }

    pub fn args(&self) -> &QuantizationArgs {
        &self.args
    }

    pub fn scale(&self) -> &ArrayD<f32> {
        &self.scale
    }

    /// Stored zero-point; `None` when symmetric and not forced
    pub fn zero_point(&self) -> Option<&ArrayD<i32>> {
        self.zero_point.as_ref()
    }

    pub fn scale_dtype(&self) -> ScaleDtype {
        self.scale_dtype
    }

    /// Current parameters, with an all-zero zero-point when none is stored
    pub fn params(&self) -> QuantParams {
        QuantParams {
            scale: self.scale.clone(),
            zero_point: self
                .zero_point
                .clone()
                .unwrap_or_else(|| ArrayD::zeros(self.scale.raw_dim())),
        }
    }
}

/// Placeholder shape of a slot's scale / zero-point
///
/// Weights: `(O, 1)` per channel or token, `(O, I / g)` per group,
/// `(O / r, I / c)` per block. Everything else is `(1,)`.
pub fn expected_param_shape(
    kind: SlotKind,
    args: &QuantizationArgs,
    weight_shape: Option<&[usize]>,
) -> Result<Vec<usize>> {
    let shape = match (kind, weight_shape) {
        (SlotKind::Weight, Some(shape)) if shape.len() >= 2 => shape,
        _ => return Ok(vec![1]),
    };

    match args.strategy {
        QuantizationStrategy::Tensor => Ok(vec![1]),
        QuantizationStrategy::Channel | QuantizationStrategy::Token => Ok(vec![shape[0], 1]),
        QuantizationStrategy::Group => {
            let group_size = args.group_size_checked()?;
            if shape[1] % group_size != 0 {
                return Err(Error::Config(format!(
                    "weight with {} columns is not divisible by group_size {group_size}",
                    shape[1]
                )));
            }
            Ok(vec![shape[0], shape[1] / group_size])
        }
        QuantizationStrategy::Block => {
            let (rows, cols) = args.block_shape()?;
            if shape[0] % rows != 0 || shape[1] % cols != 0 {
                return Err(Error::Config(format!(
                    "weight shape {shape:?} is not divisible by block structure {rows}x{cols}"
                )));
            }
            Ok(vec![shape[0] / rows, shape[1] / cols])
        }
    }
}

/// Quantization state attached to one layer
#[derive(Debug)]
pub struct LayerQuantization {
    name: String,
    scheme: QuantizationScheme,
    status: QuantizationStatus,
    slots: Vec<QuantizedSlot>,
}

impl LayerQuantization {
    /// Attach observers and placeholder parameters for every slot in `scheme`
    ///
    /// # Arguments
    /// * `name` - Layer name, prefix of the persisted parameter names
    /// * `scheme` - Per-slot quantization arguments
    /// * `weight` - Weight shape/dtype; a weight scheme without it is skipped
    /// * `force_zero_point` - Store a zero-point even for symmetric slots
    pub fn initialize(
        name: impl Into<String>,
        scheme: QuantizationScheme,
        weight: Option<&WeightInfo>,
        force_zero_point: bool,
    ) -> Result<Self> {
        Self::initialize_with_registry(
            name,
            scheme,
            weight,
            force_zero_point,
            &ObserverRegistry::with_defaults(),
        )
    }

    /// [`LayerQuantization::initialize`] resolving observers through `registry`
    pub fn initialize_with_registry(
        name: impl Into<String>,
        scheme: QuantizationScheme,
        weight: Option<&WeightInfo>,
        force_zero_point: bool,
        registry: &ObserverRegistry,
    ) -> Result<Self> {
        let name = name.into();
        let mut slots = Vec::new();

        for kind in [SlotKind::Input, SlotKind::Weight, SlotKind::Output] {
            let Some(args) = scheme.args_for(kind) else {
                continue;
            };

            if kind == SlotKind::Weight && weight.is_none() {
                tracing::warn!(
                    layer = %name,
                    "layer targeted for weight quantization has no weight, skipping weight slot"
                );
                continue;
            }

            let observer = registry.load(&args.observer, args.clone())?;
            let weight_shape = weight.map(|w| w.shape.as_slice());
            let expected = expected_param_shape(kind, args, weight_shape)?;
            let scale_dtype = weight
                .map(|w| ScaleDtype::for_weight(w.dtype))
                .unwrap_or_default();

            let zero_point = (force_zero_point || !args.symmetric)
                .then(|| ArrayD::<i32>::zeros(IxDyn(&expected)));

            slots.push(QuantizedSlot {
                kind,
                args: args.clone(),
                observer: Some(observer),
                expected_shape: (kind == SlotKind::Weight).then(|| expected.clone()),
                scale: ArrayD::zeros(IxDyn(&expected)),
                zero_point,
                scale_dtype,
            });
        }

        tracing::debug!(layer = %name, slots = slots.len(), "initialized layer for quantization");

        Ok(Self {
            name,
            scheme,
            status: QuantizationStatus::Initialized,
            slots,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn scheme(&self) -> &QuantizationScheme {
        &self.scheme
    }

    pub fn status(&self) -> QuantizationStatus {
        self.status
    }

    pub fn slots(&self) -> &[QuantizedSlot] {
        &self.slots
    }

    pub fn slot(&self, kind: SlotKind) -> Option<&QuantizedSlot> {
        self.slots.iter().find(|s| s.kind == kind)
    }

    /// Feed a calibration tensor to the slot's observer and store the result
    ///
    /// # Errors
    ///
    /// Fails when the layer is frozen, the slot is not configured, the
    /// observer rejects the tensor, or a weight's parameters do not match
    /// their expected shape.
    pub fn observe(&mut self, kind: SlotKind, tensor: &ArrayViewD<'_, f32>) -> Result<QuantParams> {
        if self.status == QuantizationStatus::Frozen {
            return Err(Error::Calibration(format!(
                "layer {} is frozen, cannot observe {kind}",
                self.name
            )));
        }

        let layer = &self.name;
        let slot = self
            .slots
            .iter_mut()
            .find(|s| s.kind == kind)
            .ok_or_else(|| {
                Error::Calibration(format!("layer {layer} has no {kind} quantization slot"))
            })?;

        // reject a reshaped weight before the observer folds it into its running state
        if let Some(expected) = &slot.expected_shape {
            let incoming = expected_param_shape(kind, &slot.args, Some(tensor.shape()))?;
            if &incoming != expected {
                return Err(Error::ShapeMismatch {
                    expected: expected.clone(),
                    got: incoming,
                });
            }
        }

        let observer = slot.observer.as_mut().ok_or_else(|| {
            Error::Calibration(format!("layer {layer} has no {kind} observer"))
        })?;

        let mut params = observer.observe(tensor)?;

        if let Some(expected) = &slot.expected_shape {
            if params.len() != expected.iter().product::<usize>() {
                return Err(Error::ShapeMismatch {
                    expected: expected.clone(),
                    got: params.shape().to_vec(),
                });
            }
            params = reshape_params(params, expected)?;
        }

        slot.scale = params.scale.clone();
        if slot.zero_point.is_some() {
            slot.zero_point = Some(params.zero_point.clone());
        }
        self.status = QuantizationStatus::Calibration;

        Ok(params)
    }

    /// Fake-quantize a weight with the calibrated weight parameters
    pub fn fake_quantize_weight(&self, weight: &ArrayViewD<'_, f32>) -> Result<ArrayD<f32>> {
        let slot = self.slot(SlotKind::Weight).ok_or_else(|| {
            Error::Calibration(format!("layer {} has no weight quantization slot", self.name))
        })?;
        fake_quantize(weight, &slot.params(), &slot.args)
    }

    /// End calibration: drop observers, keep parameters
    pub fn freeze(&mut self) {
        for slot in &mut self.slots {
            slot.observer = None;
        }
        self.status = QuantizationStatus::Frozen;
    }

    /// Parameters under their persisted names
    ///
    /// `{layer}.{input|weight|output}_scale` and, where stored,
    /// `{layer}.{input|weight|output}_zero_point`.
    pub fn state_dict(&self) -> Result<BTreeMap<String, StoredTensor>> {
        let mut state = BTreeMap::new();
        for slot in &self.slots {
            let base = slot.kind.base_name();
            state.insert(
                merge_names(&self.name, &format!("{base}_scale")),
                StoredTensor::from_f32(&slot.scale, slot.scale_dtype.dtype())?,
            );
            if let Some(zero_point) = &slot.zero_point {
                state.insert(
                    merge_names(&self.name, &format!("{base}_zero_point")),
                    StoredTensor::from_i32(zero_point, slot.args.zero_point_dtype())?,
                );
            }
        }
        Ok(state)
    }
}

fn reshape_params(params: QuantParams, shape: &[usize]) -> Result<QuantParams> {
    let reshape_err = |e: ndarray::ShapeError| Error::Calibration(format!("reshape failed: {e}"));
    Ok(QuantParams {
        scale: params
            .scale
            .into_shape(IxDyn(shape))
            .map_err(reshape_err)?,
        zero_point: params
            .zero_point
            .into_shape(IxDyn(shape))
            .map_err(reshape_err)?,
    })
}
