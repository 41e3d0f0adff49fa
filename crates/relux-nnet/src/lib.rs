//! Loading of feed-forward ReLU networks from `.nnet` text files.
//!
//! The format (one value list per line, after any number of `//` comment
//! lines): a counts line `numLayers,inputSize,outputSize,maxLayerSize`, a
//! layer-sizes line, an ignored legacy flag line, four normalization lines
//! (input minimums, input maximums, means, ranges), then for each layer its
//! weight matrix row by row followed by one bias value per row.
//!
//! Normalization here is the identity: the min/max/mean/range lines are
//! parsed and retained, but never applied to values.

use ndarray::{Array1, Array2};
use relux_core::{Error, Result};
use std::path::Path;
use tracing::{debug, info};

/// A loaded feed-forward ReLU network.
///
/// Layer 0 is the input layer; every intermediate layer applies ReLU; the
/// final layer is affine.
#[derive(Debug, Clone)]
pub struct Network {
    layer_sizes: Vec<usize>,
    /// One weight matrix per non-input layer, shape (layer size, previous
    /// layer size).
    weights: Vec<Array2<f64>>,
    /// One bias vector per non-input layer.
    biases: Vec<Array1<f64>>,
    /// Per-input minimums from the file (unused: identity normalization).
    pub input_minimums: Vec<f64>,
    /// Per-input maximums from the file (unused: identity normalization).
    pub input_maximums: Vec<f64>,
}

impl Network {
    /// Load a network from a `.nnet` file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::ModelLoad(format!("{}: {e}", path.display())))?;
        let network = Self::parse(&text)?;
        info!(
            path = %path.display(),
            layers = network.num_layers(),
            inputs = network.input_size(),
            outputs = network.output_size(),
            "loaded network"
        );
        Ok(network)
    }

    /// Parse a network from `.nnet` text.
    pub fn parse(text: &str) -> Result<Self> {
        let mut lines = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with("//"));

        let counts = parse_row::<usize>(lines.next(), "header counts")?;
        if counts.len() != 4 {
            return Err(Error::ModelLoad(format!(
                "header counts line must have 4 values, got {}",
                counts.len()
            )));
        }
        let num_weight_layers = counts[0];

        let layer_sizes = parse_row::<usize>(lines.next(), "layer sizes")?;
        if layer_sizes.len() != num_weight_layers + 1 {
            return Err(Error::ModelLoad(format!(
                "expected {} layer sizes, got {}",
                num_weight_layers + 1,
                layer_sizes.len()
            )));
        }
        if layer_sizes.len() < 2 {
            return Err(Error::ModelLoad(
                "network must have at least an input and an output layer".to_string(),
            ));
        }
        if let Some(idx) = layer_sizes.iter().position(|&s| s == 0) {
            return Err(Error::ModelLoad(format!("layer {idx} has size 0")));
        }

        let input_size = layer_sizes[0];
        if counts[1] != input_size || counts[2] != layer_sizes[num_weight_layers] {
            return Err(Error::ModelLoad(
                "header counts disagree with the layer-sizes line".to_string(),
            ));
        }

        // Legacy flag line, ignored.
        lines
            .next()
            .ok_or_else(|| Error::ModelLoad("missing flag line".to_string()))?;

        let input_minimums = parse_sized_row(lines.next(), "input minimums", input_size)?;
        let input_maximums = parse_sized_row(lines.next(), "input maximums", input_size)?;
        // Means and ranges carry one extra value for the outputs; identity
        // normalization makes them irrelevant beyond format validation.
        parse_sized_row(lines.next(), "means", input_size + 1)?;
        parse_sized_row(lines.next(), "ranges", input_size + 1)?;

        let mut weights = Vec::with_capacity(num_weight_layers);
        let mut biases = Vec::with_capacity(num_weight_layers);
        for layer in 0..num_weight_layers {
            let rows = layer_sizes[layer + 1];
            let cols = layer_sizes[layer];

            let mut flat = Vec::with_capacity(rows * cols);
            for row in 0..rows {
                let values = parse_sized_row(
                    lines.next(),
                    &format!("layer {layer} weight row {row}"),
                    cols,
                )?;
                flat.extend(values);
            }
            let matrix = Array2::from_shape_vec((rows, cols), flat)
                .map_err(|e| Error::ModelLoad(format!("layer {layer} weights: {e}")))?;

            let mut bias = Vec::with_capacity(rows);
            for row in 0..rows {
                let values =
                    parse_sized_row(lines.next(), &format!("layer {layer} bias {row}"), 1)?;
                bias.push(values[0]);
            }

            debug!(layer, rows, cols, "parsed weight block");
            weights.push(matrix);
            biases.push(Array1::from_vec(bias));
        }

        Ok(Self {
            layer_sizes,
            weights,
            biases,
            input_minimums,
            input_maximums,
        })
    }

    /// Total number of layers, counting the input layer.
    pub fn num_layers(&self) -> usize {
        self.layer_sizes.len()
    }

    /// Size of layer `i` (0 = input).
    pub fn layer_size(&self, i: usize) -> usize {
        self.layer_sizes[i]
    }

    pub fn layer_sizes(&self) -> &[usize] {
        &self.layer_sizes
    }

    pub fn input_size(&self) -> usize {
        self.layer_sizes[0]
    }

    pub fn output_size(&self) -> usize {
        *self.layer_sizes.last().expect("validated in parse")
    }

    /// Weight on the edge from `source` in layer `layer` to `target` in
    /// layer `layer + 1`.
    pub fn weight(&self, layer: usize, source: usize, target: usize) -> f64 {
        self.weights[layer][(target, source)]
    }

    /// Bias of neuron `target` in layer `layer` (1-based: the first
    /// non-input layer is layer 1).
    pub fn bias(&self, layer: usize, target: usize) -> f64 {
        self.biases[layer - 1][target]
    }

    /// Exact forward evaluation: ReLU on every hidden layer, affine output.
    pub fn evaluate(&self, inputs: &[f64]) -> Result<Vec<f64>> {
        if inputs.len() != self.input_size() {
            return Err(Error::Configuration(format!(
                "expected {} inputs, got {}",
                self.input_size(),
                inputs.len()
            )));
        }

        let mut current = Array1::from_vec(inputs.to_vec());
        let last = self.weights.len() - 1;
        for (layer, (w, b)) in self.weights.iter().zip(self.biases.iter()).enumerate() {
            current = w.dot(&current) + b;
            if layer < last {
                current.mapv_inplace(|v| v.max(0.0));
            }
        }
        Ok(current.to_vec())
    }
}

fn parse_row<T: std::str::FromStr>(line: Option<&str>, what: &str) -> Result<Vec<T>> {
    let line = line.ok_or_else(|| Error::ModelLoad(format!("missing {what} line")))?;
    line.split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|v| {
            v.parse::<T>()
                .map_err(|_| Error::ModelLoad(format!("{what}: invalid value {v:?}")))
        })
        .collect()
}

fn parse_sized_row(line: Option<&str>, what: &str, expected: usize) -> Result<Vec<f64>> {
    let values = parse_row::<f64>(line, what)?;
    if values.len() != expected {
        return Err(Error::ModelLoad(format!(
            "{what}: expected {expected} values, got {}",
            values.len()
        )));
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 2 -> 2 -> 1 network: h = ReLU([[1,-1],[0.5,0.5]]x + [0, 0.25]),
    /// y = [1, 1]h - 1.
    const SMALL_NNET: &str = "\
// exported for unit tests
2,2,1,2
2,2,1
0
0.0,0.0
0.0,0.0
0.0,0.0,0.0
1.0,1.0,1.0
1.0,-1.0
0.5,0.5
0.0
0.25
1.0,1.0
-1.0
";

    #[test]
    fn test_parse_small_network() {
        let net = Network::parse(SMALL_NNET).unwrap();
        assert_eq!(net.num_layers(), 3);
        assert_eq!(net.layer_sizes(), &[2, 2, 1]);
        assert_eq!(net.input_size(), 2);
        assert_eq!(net.output_size(), 1);

        assert_eq!(net.weight(0, 0, 0), 1.0);
        assert_eq!(net.weight(0, 1, 0), -1.0);
        assert_eq!(net.weight(0, 0, 1), 0.5);
        assert_eq!(net.weight(1, 1, 0), 1.0);
        assert_eq!(net.bias(1, 1), 0.25);
        assert_eq!(net.bias(2, 0), -1.0);
    }

    #[test]
    fn test_evaluate_matches_hand_computation() {
        let net = Network::parse(SMALL_NNET).unwrap();

        // x = (1, 2): pre = (1 - 2, 0.5 + 1 + 0.25) = (-1, 1.75);
        // ReLU -> (0, 1.75); y = 0 + 1.75 - 1 = 0.75.
        let out = net.evaluate(&[1.0, 2.0]).unwrap();
        assert_eq!(out.len(), 1);
        assert!((out[0] - 0.75).abs() < 1e-12);

        // x = (2, 0): pre = (2, 1.25); y = 2 + 1.25 - 1 = 2.25.
        let out = net.evaluate(&[2.0, 0.0]).unwrap();
        assert!((out[0] - 2.25).abs() < 1e-12);
    }

    #[test]
    fn test_evaluate_wrong_arity() {
        let net = Network::parse(SMALL_NNET).unwrap();
        assert!(net.evaluate(&[1.0]).is_err());
    }

    #[test]
    fn test_comments_and_blank_lines_skipped() {
        let text = format!("// line one\n// line two\n\n{}", SMALL_NNET);
        let net = Network::parse(&text).unwrap();
        assert_eq!(net.num_layers(), 3);
    }

    #[test]
    fn test_malformed_counts_line() {
        let err = Network::parse("2,2,1\n").unwrap_err();
        assert!(matches!(err, Error::ModelLoad(_)), "{err}");
    }

    #[test]
    fn test_layer_size_mismatch() {
        let text = SMALL_NNET.replace("2,2,1\n0\n", "2,2\n0\n");
        let err = Network::parse(&text).unwrap_err();
        assert!(err.to_string().contains("layer sizes"));
    }

    #[test]
    fn test_zero_layer_size_rejected() {
        let text = SMALL_NNET.replacen("2,2,1\n", "2,0,1\n", 1);
        // Header counts updated to match so the size-zero check is what fires.
        let text = text.replacen("2,2,1,2\n", "2,0,1,2\n", 1);
        let err = Network::parse(&text).unwrap_err();
        assert!(err.to_string().contains("size 0"));
    }

    #[test]
    fn test_truncated_weights() {
        let truncated: String = SMALL_NNET.lines().take(10).collect::<Vec<_>>().join("\n");
        let err = Network::parse(&truncated).unwrap_err();
        assert!(matches!(err, Error::ModelLoad(_)));
    }

    #[test]
    fn test_bad_weight_value() {
        let text = SMALL_NNET.replace("1.0,-1.0", "1.0,abc");
        let err = Network::parse(&text).unwrap_err();
        assert!(err.to_string().contains("invalid value"));
    }

    #[test]
    fn test_from_file_missing() {
        let err = Network::from_file("/nonexistent/net.nnet").unwrap_err();
        assert!(matches!(err, Error::ModelLoad(_)));
    }
}
