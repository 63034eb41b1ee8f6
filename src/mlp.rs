use std::{collections::HashMap, sync::MutexGuard};

use candle_core::{DType, Tensor, Var};
use candle_nn::{AdamW, Linear, Module, Optimizer, ParamsAdamW, VarBuilder, VarMap, linear};

use crate::device::DEVICE;

/// Feed-forward Q-network: ReLU hidden layers, linear output head.
pub struct MultiLayerPerceptron {
    pub layers: Vec<Linear>,
    pub var_map: VarMap,
    pub topology: Vec<usize>,
    pub optimiser: AdamW,
}

fn lock_vars(var_map: &VarMap) -> Result<MutexGuard<'_, HashMap<String, Var>>, candle_core::Error> {
    var_map
        .data()
        .lock()
        .map_err(|_| candle_core::Error::Msg("variable map lock poisoned".to_string()))
}

impl MultiLayerPerceptron {
    pub fn new(
        topology: &[usize],
        learning_rate: f64,
        weight_decay: f64,
    ) -> Result<Self, candle_core::Error> {
        if topology.len() < 2 {
            return Err(candle_core::Error::Msg(format!(
                "topology needs at least an input and an output layer, got {topology:?}"
            )));
        }
        let vm = VarMap::new();
        let vb = VarBuilder::from_varmap(&vm, DType::F32, &DEVICE);
        let mut layers: Vec<Linear> = Vec::with_capacity(topology.len() - 1);

        for (i, pair) in topology.windows(2).enumerate() {
            layers.push(linear(pair[0], pair[1], vb.pp(i))?);
        }

        let optimiser = AdamW::new(
            vm.all_vars(),
            ParamsAdamW {
                lr: learning_rate,
                weight_decay,
                ..Default::default()
            },
        )?;

        Ok(Self {
            layers,
            topology: topology.to_vec(),
            var_map: vm,
            optimiser,
        })
    }

    pub fn output(&self, inputs: &Tensor) -> Result<Tensor, candle_core::Error> {
        let mut x = inputs.clone();
        for layer in self.layers.iter().take(self.layers.len() - 1) {
            x = layer.forward(&x)?.relu()?;
        }
        if let Some(last_layer) = self.layers.last() {
            x = last_layer.forward(&x)?;
        }
        Ok(x)
    }

    /// Overwrites this network's weights with a deep copy of `source`'s.
    pub fn copy_weights_from(&self, source: &Self) -> Result<(), candle_core::Error> {
        let source_vars = lock_vars(&source.var_map)?;
        let target_vars = lock_vars(&self.var_map)?;
        for (name, source_var) in source_vars.iter() {
            if let Some(target_var) = target_vars.get(name) {
                target_var.set(source_var.as_tensor())?;
            }
        }
        Ok(())
    }

    /// Independent network with identical weights and a fresh optimiser.
    pub fn try_clone(&self, learning_rate: f64, weight_decay: f64) -> Result<Self, candle_core::Error> {
        let copy = Self::new(&self.topology, learning_rate, weight_decay)?;
        copy.copy_weights_from(self)?;
        Ok(copy)
    }

    /// Every weight and bias, flattened in variable-name order.
    pub fn parameter_snapshot(&self) -> Result<Vec<f32>, candle_core::Error> {
        let vars = lock_vars(&self.var_map)?;
        let mut names: Vec<&String> = vars.keys().collect();
        names.sort();
        let mut flat = Vec::new();
        for name in names {
            flat.extend(vars[name].as_tensor().flatten_all()?.to_vec1::<f32>()?);
        }
        Ok(flat)
    }
}
