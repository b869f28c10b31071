//! Explicit execution context.
//!
//! Device placement and seeding travel with the components that need them
//! instead of living in process-wide state.

use crate::Result;
use candle_core::{DType, Device, Shape, Tensor, Var};
use candle_nn::init::NormalOrUniform;
use candle_nn::var_builder::SimpleBackend;
use candle_nn::{Init, VarBuilder, VarMap};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal, Uniform};

/// Device, dtype and seed shared by the modules of one model.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub device: Device,
    pub dtype: DType,
    pub seed: u64,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::cpu(42)
    }
}

impl ExecutionContext {
    /// CPU context with `f32` tensors.
    pub fn cpu(seed: u64) -> Self {
        Self {
            device: Device::Cpu,
            dtype: DType::F32,
            seed,
        }
    }

    /// Context on an explicit device.
    pub fn new(device: Device, seed: u64) -> Self {
        Self {
            device,
            dtype: DType::F32,
            seed,
        }
    }

    /// Seeded host generator. Non-CPU devices also get their own generator
    /// seeded, which covers dropout masks drawn on the device.
    pub fn rng(&self) -> Result<ChaCha8Rng> {
        if !self.device.is_cpu() {
            self.device.set_seed(self.seed)?;
        }
        Ok(ChaCha8Rng::seed_from_u64(self.seed))
    }

    /// Variable builder over `varmap` on this context's device and dtype.
    ///
    /// Missing variables are initialized from a generator keyed on the
    /// context seed and the variable path, so two models built with the same
    /// seed start from identical parameters whatever order they are created
    /// in. Variables already present in `varmap` are reused.
    pub fn var_builder<'a>(&self, varmap: &'a VarMap) -> VarBuilder<'a> {
        let backend = SeededVarMap {
            varmap: varmap.clone(),
            seed: self.seed,
        };
        VarBuilder::from_backend(Box::new(backend), self.dtype, self.device.clone())
    }

    /// Dense `(rows, cols)` tensor from row-major data.
    pub fn tensor(&self, data: Vec<f32>, rows: usize, cols: usize) -> Result<Tensor> {
        Ok(Tensor::from_vec(data, (rows, cols), &self.device)?.to_dtype(self.dtype)?)
    }

    /// Dense tensor from a slice of equally long rows.
    pub fn tensor_from_rows(&self, rows: &[Vec<f32>]) -> Result<Tensor> {
        let cols = rows.first().map_or(0, Vec::len);
        if let Some(bad) = rows.iter().find(|r| r.len() != cols) {
            return Err(crate::Error::DimensionMismatch {
                expected: cols,
                got: bad.len(),
            });
        }
        let data: Vec<f32> = rows.iter().flatten().copied().collect();
        self.tensor(data, rows.len(), cols)
    }
}

/// [`VarMap`] whose fresh variables are drawn on the host from a
/// [`ChaCha8Rng`] instead of the device's unseeded generator.
struct SeededVarMap {
    varmap: VarMap,
    seed: u64,
}

impl SeededVarMap {
    fn rng_for(&self, path: &str) -> ChaCha8Rng {
        // FNV-1a over the path keeps streams stable across runs and builds
        let key = path.bytes().fold(0xcbf2_9ce4_8422_2325u64, |h, b| {
            (h ^ u64::from(b)).wrapping_mul(0x0100_0000_01b3)
        });
        ChaCha8Rng::seed_from_u64(self.seed ^ key)
    }

    fn sample(&self, shape: &Shape, path: &str, init: Init) -> candle_core::Result<Vec<f64>> {
        let count = shape.elem_count();
        let mut rng = self.rng_for(path);
        let uniform = |lo: f64, up: f64, rng: &mut ChaCha8Rng| -> Vec<f64> {
            if lo < up {
                let dist = Uniform::new(lo, up);
                (0..count).map(|_| dist.sample(rng)).collect()
            } else {
                vec![lo; count]
            }
        };
        let normal = |mean: f64, std: f64, rng: &mut ChaCha8Rng| {
            Normal::new(mean, std)
                .map(|dist| (0..count).map(|_| dist.sample(rng)).collect::<Vec<f64>>())
                .map_err(|e| candle_core::Error::Msg(format!("{path}: {e}")))
        };
        match init {
            Init::Const(value) => Ok(vec![value; count]),
            Init::Uniform { lo, up } => Ok(uniform(lo, up, &mut rng)),
            Init::Randn { mean, stdev } => normal(mean, stdev, &mut rng),
            Init::Kaiming {
                dist,
                fan,
                non_linearity,
            } => {
                let fan = fan.for_shape(shape).max(1);
                let std = non_linearity.gain() / (fan as f64).sqrt();
                match dist {
                    NormalOrUniform::Uniform => {
                        let bound = 3f64.sqrt() * std;
                        Ok(uniform(-bound, bound, &mut rng))
                    }
                    NormalOrUniform::Normal => normal(0.0, std, &mut rng),
                }
            }
        }
    }
}

impl SimpleBackend for SeededVarMap {
    fn get(
        &self,
        s: Shape,
        name: &str,
        h: Init,
        dtype: DType,
        dev: &Device,
    ) -> candle_core::Result<Tensor> {
        let mut data = self
            .varmap
            .data()
            .lock()
            .map_err(|_| candle_core::Error::Msg("variable map lock poisoned".to_string()))?;
        if let Some(var) = data.get(name) {
            if var.shape() != &s {
                candle_core::bail!("shape mismatch on {name}: {s:?} <> {:?}", var.shape());
            }
            return Ok(var.as_tensor().clone());
        }
        let values = self.sample(&s, name, h)?;
        let init = Tensor::from_vec(values, s, dev)?.to_dtype(dtype)?;
        let var = Var::from_tensor(&init)?;
        let tensor = var.as_tensor().clone();
        data.insert(name.to_string(), var);
        Ok(tensor)
    }

    fn contains_tensor(&self, name: &str) -> bool {
        self.varmap
            .data()
            .lock()
            .map(|data| data.contains_key(name))
            .unwrap_or(false)
    }
}
