/// Weight transfer between a VarMap and safetensors files
use std::collections::HashMap;
use std::path::Path;

use candle_core::Tensor;
use candle_nn::VarMap;

use crate::{MonolabError, Result};

/// Snapshot of every named parameter in the map
///
/// Tensors share storage with the live variables; serialize them before the
/// next optimizer step if a frozen copy is needed.
pub fn state_dict(varmap: &VarMap) -> Result<HashMap<String, Tensor>> {
    let data = varmap
        .data()
        .lock()
        .map_err(|e| MonolabError::Training(format!("Parameter map lock poisoned: {}", e)))?;

    Ok(data
        .iter()
        .map(|(name, var)| (name.clone(), var.as_tensor().clone()))
        .collect())
}

/// Load weights from a safetensors file into the existing variables
///
/// Every variable of the map must be present in the file with a matching
/// shape. `VarMap` clones share their storage, so loading through a clone
/// updates the model that owns the original.
pub fn load_weights<P: AsRef<Path>>(varmap: &VarMap, weights_path: P) -> Result<()> {
    let mut shared = varmap.clone();
    shared.load(weights_path.as_ref())?;
    log::info!("Loaded weights from {:?}", weights_path.as_ref());
    Ok(())
}
