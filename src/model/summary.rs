//! Plain-text model summary
//!
//! Rendered once per run and logged as the `model_summary.txt` artifact.

use std::fmt;
use std::path::Path;

use burn::module::Module;
use burn::tensor::backend::Backend;

use crate::utils::error::Result;
use crate::utils::format_number;

/// Snapshot of a model's structure and size
#[derive(Debug, Clone)]
pub struct ModelSummary {
    pub architecture: String,
    pub num_classes: usize,
    pub num_params: usize,
    /// `(name, shape)` per parameter tensor, empty when not collected
    pub layers: Vec<(String, Vec<usize>)>,
    /// Burn's module tree rendering
    pub tree: String,
}

impl ModelSummary {
    pub fn of<B, M>(model: &M, architecture: &str, num_classes: usize) -> Self
    where
        B: Backend,
        M: Module<B> + fmt::Display,
    {
        Self {
            architecture: architecture.to_string(),
            num_classes,
            num_params: model.num_params(),
            layers: Vec::new(),
            tree: model.to_string(),
        }
    }

    pub fn with_shapes(mut self, layers: Vec<(String, Vec<usize>)>) -> Self {
        self.layers = layers;
        self
    }

    /// Write the summary to `path`, creating parent directories
    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_string())?;
        Ok(())
    }
}

impl fmt::Display for ModelSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Architecture: {}", self.architecture)?;
        writeln!(f, "Output classes: {}", self.num_classes)?;
        writeln!(f, "Parameters: {} (all trainable)", format_number(self.num_params))?;
        writeln!(f)?;

        if !self.layers.is_empty() {
            let width = self.layers.iter().map(|(name, _)| name.len()).max().unwrap_or(0);
            writeln!(f, "Parameter shapes:")?;
            for (name, shape) in &self.layers {
                let count: usize = shape.iter().product();
                writeln!(
                    f,
                    "  {:<width$}  {:<18} {:>12}",
                    name,
                    format!("{:?}", shape),
                    format_number(count),
                    width = width
                )?;
            }
            writeln!(f)?;
        }

        writeln!(f, "{}", self.tree)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::resnet::ResNetConfig;
    use burn_ndarray::NdArray;
    use tempfile::tempdir;

    #[test]
    fn test_summary_mentions_layers() {
        let device = Default::default();
        let model = ResNetConfig::new().with_num_classes(4).init::<NdArray>(&device);
        let summary = ModelSummary::of::<NdArray, _>(&model, "resnet18", 4);

        let text = summary.to_string();
        assert!(text.starts_with("Architecture: resnet18"));
        assert!(text.contains("Output classes: 4"));
        assert!(text.contains("layer4"));
        assert!(text.contains("fc"));
        assert!(!text.contains("Parameter shapes:"));
    }

    #[test]
    fn test_summary_lists_parameter_shapes() {
        let device = Default::default();
        let model = ResNetConfig::new().with_num_classes(4).init::<NdArray>(&device);
        let summary =
            ModelSummary::of::<NdArray, _>(&model, "resnet18", 4).with_shapes(model.parameter_shapes());

        let text = summary.to_string();
        let line = |name: &str| {
            text.lines()
                .find(|l| l.split_whitespace().next() == Some(name))
                .map(str::to_string)
        };

        assert!(text.contains("Parameter shapes:"));
        let stem = line("conv1.weight").unwrap();
        assert!(stem.contains("[64, 3, 7, 7]"));
        assert!(stem.trim_end().ends_with("9,408"));
        assert!(line("fc.weight").unwrap().contains("[512, 4]"));
        assert!(line("layer3.0.downsample.bn.bias").unwrap().contains("[256]"));
    }

    #[test]
    fn test_write_creates_file() {
        let dir = tempdir().unwrap();
        let device = Default::default();
        let model = ResNetConfig::new().init::<NdArray>(&device);
        let path = dir.path().join("nested/model_summary.txt");

        ModelSummary::of::<NdArray, _>(&model, "resnet18", 1000)
            .write(&path)
            .unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("Parameters:"));
    }
}
