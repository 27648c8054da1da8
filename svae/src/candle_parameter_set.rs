use candle_core::{DType, Device, Result, Tensor};
use candle_nn::{VarBuilder, VarMap};
use std::collections::HashMap;

/// Named snapshot of trained parameters
///
/// Every tensor is a deep copy detached from the graph, so training
/// the model it came from afterwards does not change the snapshot.
#[derive(Clone, Debug, Default)]
pub struct ParameterSet {
    tensors: HashMap<String, Tensor>,
}

impl ParameterSet {
    pub fn from_var_map(variable_map: &VarMap) -> Result<Self> {
        let data = variable_map
            .data()
            .lock()
            .map_err(|e| candle_core::Error::Msg(format!("variable map lock: {}", e)))?;

        let tensors = data
            .iter()
            .map(|(name, var)| Ok((name.clone(), var.as_tensor().copy()?.detach())))
            .collect::<Result<HashMap<_, _>>>()?;

        Ok(Self { tensors })
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.tensors.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tensors.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tensors.keys().map(|s| s.as_str())
    }

    pub fn num_elements(&self) -> usize {
        self.tensors.values().map(|t| t.elem_count()).sum()
    }

    /// A variable builder serving these tensors as constants; asking
    /// for a missing name or a different shape is an error.
    pub fn to_var_builder(&self, dtype: DType, device: &Device) -> VarBuilder<'static> {
        VarBuilder::from_tensors(self.tensors.clone(), dtype, device)
    }
}
