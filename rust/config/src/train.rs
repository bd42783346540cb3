//! Arguments forwarded to the training program.

use serde::{Deserialize, Serialize};

/// Largest training proportion the training program accepts; the remaining
/// 20% of interactions are split between validation and test.
pub const MAX_TRAIN_PROPORTION: f64 = 0.8;

/// Training parameters for one run of `jodie.py`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TrainParams {
    /// Dataset / interaction network name (`data/<network>.csv`).
    pub network: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_epochs")]
    pub epochs: u32,
    /// Dimension of the dynamic embedding.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_dim: Option<u32>,
    /// Fraction of interactions (from the beginning) used for training.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub train_proportion: Option<f64>,
    /// Train with user state change alongside interaction prediction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_change: Option<bool>,
}

fn default_model() -> String {
    "jodie".into()
}

fn default_epochs() -> u32 {
    50
}

impl TrainParams {
    /// Parameters for `network` with the program's defaults for everything else.
    #[must_use]
    pub fn new(network: impl Into<String>) -> Self {
        Self {
            network: network.into(),
            model: default_model(),
            epochs: default_epochs(),
            embedding_dim: None,
            train_proportion: None,
            state_change: None,
        }
    }

    /// Check the values the training program would reject at startup.
    pub fn validate(&self) -> Result<(), ParamsError> {
        if self.network.trim().is_empty() {
            return Err(ParamsError::EmptyNetwork);
        }
        if self.model.trim().is_empty() {
            return Err(ParamsError::EmptyModel);
        }
        if self.epochs == 0 {
            return Err(ParamsError::ZeroEpochs);
        }
        if self.embedding_dim == Some(0) {
            return Err(ParamsError::ZeroEmbeddingDim);
        }
        if let Some(p) = self.train_proportion
            && !(p > 0.0 && p <= MAX_TRAIN_PROPORTION)
        {
            return Err(ParamsError::TrainProportion(p));
        }
        Ok(())
    }

    /// Convert to CLI arguments for subprocess invocation.
    ///
    /// `--network`, `--model` and `--epochs` always come first, in that order.
    #[must_use]
    pub fn to_cli_args(&self) -> Vec<String> {
        let mut args = vec![
            "--network".into(),
            self.network.clone(),
            "--model".into(),
            self.model.clone(),
            "--epochs".into(),
            self.epochs.to_string(),
        ];
        if let Some(dim) = self.embedding_dim {
            args.extend(["--embedding_dim".into(), dim.to_string()]);
        }
        if let Some(p) = self.train_proportion {
            args.extend(["--train_proportion".into(), p.to_string()]);
        }
        if let Some(state_change) = self.state_change {
            // The flag is parsed with Python's `bool()`, where any non-empty
            // string (including "False") is true and only "" is false.
            let value = if state_change { "True" } else { "" };
            args.extend(["--state_change".into(), value.into()]);
        }
        args
    }
}

/// Invalid training parameters.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParamsError {
    #[error("job name must not be empty")]
    EmptyName,
    #[error("network name must not be empty")]
    EmptyNetwork,
    #[error("model name must not be empty")]
    EmptyModel,
    #[error("epochs must be at least 1")]
    ZeroEpochs,
    #[error("embedding_dim must be at least 1")]
    ZeroEmbeddingDim,
    #[error("train_proportion must be in (0, 0.8], got {0}")]
    TrainProportion(f64),
}
