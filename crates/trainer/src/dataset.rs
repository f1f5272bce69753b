use std::fs;
use std::path::{Path, PathBuf};

use dense_core::{ClassifierError, Minibatch, Result};

/// Upper bound on the width of a one-hot label row.
pub const MAX_CLASSES: usize = 1 << 16;

/// Samples stored row-major: `features` is `len * feature_dim` values and
/// `labels` is `len * label_dim` values.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    features: Vec<f32>,
    labels: Vec<f32>,
    feature_dim: usize,
    label_dim: usize,
    origin: PathBuf,
}

impl Dataset {
    pub fn len(&self) -> usize {
        self.features.len() / self.feature_dim
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn feature_dim(&self) -> usize {
        self.feature_dim
    }

    pub fn label_dim(&self) -> usize {
        self.label_dim
    }

    pub fn features(&self) -> &[f32] {
        &self.features
    }

    pub fn labels(&self) -> &[f32] {
        &self.labels
    }

    pub fn sample(&self, index: usize) -> (&[f32], &[f32]) {
        let f = self.feature_dim;
        let l = self.label_dim;
        (
            &self.features[index * f..(index + 1) * f],
            &self.labels[index * l..(index + 1) * l],
        )
    }

    /// Sample indices of minibatch `step`, wrapping around the end of the
    /// dataset so every batch has exactly `size` entries.
    pub fn minibatch_indices(&self, step: usize, size: usize) -> impl Iterator<Item = usize> {
        let len = self.len();
        let start = (step % len) * (size % len) % len;
        (0..size).map(move |k| (start + k) % len)
    }

    pub fn minibatch(&self, step: usize, size: usize) -> Minibatch {
        let mut features = Vec::with_capacity(size * self.feature_dim);
        let mut labels = Vec::with_capacity(size * self.label_dim);
        for i in self.minibatch_indices(step, size) {
            let (f, l) = self.sample(i);
            features.extend_from_slice(f);
            labels.extend_from_slice(l);
        }
        Minibatch {
            features,
            labels,
            rows: size,
        }
    }

    /// `max(label) + 1` for single-column class labels. Every label must be
    /// a class index below [`MAX_CLASSES`].
    pub fn inferred_classes(&self) -> Result<usize> {
        let mut top = 0;
        for (row, &value) in self.labels.iter().enumerate() {
            top = top.max(self.class_index(row, value, MAX_CLASSES)?);
        }
        Ok(top + 1)
    }

    fn class_index(&self, row: usize, value: f32, num_classes: usize) -> Result<usize> {
        if value < 0.0 || value.fract() != 0.0 || value >= num_classes as f32 {
            return Err(ClassifierError::DataFormat {
                path: self.origin.clone(),
                line: row + 1,
                message: format!("label {} is not a class index below {}", value, num_classes),
            });
        }
        Ok(value as usize)
    }

    /// Replaces single-column class indices with one-hot rows of width
    /// `num_classes`.
    pub fn one_hot(&self, num_classes: usize) -> Result<Dataset> {
        if self.label_dim != 1 {
            return Err(ClassifierError::InvalidShape(format!(
                "one-hot encoding needs a single label column, dataset has {}",
                self.label_dim
            )));
        }
        if num_classes == 0 || num_classes > MAX_CLASSES {
            return Err(ClassifierError::InvalidShape(format!(
                "one-hot encoding needs between 1 and {} classes, got {}",
                MAX_CLASSES, num_classes
            )));
        }
        let size = self.len().checked_mul(num_classes).ok_or_else(|| {
            ClassifierError::InvalidShape(format!(
                "{} samples with {} classes overflow the label buffer",
                self.len(),
                num_classes
            ))
        })?;

        let mut labels = vec![0.0; size];
        for (row, &value) in self.labels.iter().enumerate() {
            let class = self.class_index(row, value, num_classes)?;
            labels[row * num_classes + class] = 1.0;
        }

        Ok(Dataset {
            features: self.features.clone(),
            labels,
            feature_dim: self.feature_dim,
            label_dim: num_classes,
            origin: self.origin.clone(),
        })
    }
}

pub struct DatasetLoader;

impl DatasetLoader {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Dataset> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| ClassifierError::io(path, e))?;
        let dataset = Self::parse(&text, path)?;
        log::info!(
            "Loaded {} samples with {} features from {:?}",
            dataset.len(),
            dataset.feature_dim(),
            path
        );
        Ok(dataset)
    }

    /// Column 0 is the label, the remaining columns are features. Every line
    /// is a sample; there is no header.
    pub fn parse(text: &str, origin: &Path) -> Result<Dataset> {
        let fail = |line: usize, message: String| ClassifierError::DataFormat {
            path: origin.to_path_buf(),
            line,
            message,
        };

        let mut features = Vec::new();
        let mut labels = Vec::new();
        let mut feature_dim = None;

        for (index, line) in text.lines().enumerate() {
            let line_no = index + 1;
            let columns: Vec<&str> = line.split(',').collect();
            if columns.len() < 2 {
                return Err(fail(
                    line_no,
                    format!("expected a label and at least one feature, got {:?}", line),
                ));
            }

            let mut values = Vec::with_capacity(columns.len());
            for (col, raw) in columns.iter().enumerate() {
                let value = raw
                    .trim()
                    .parse::<f32>()
                    .ok()
                    .filter(|v| v.is_finite())
                    .ok_or_else(|| {
                        fail(line_no, format!("column {} is not a finite number: {:?}", col, raw))
                    })?;
                values.push(value);
            }

            let width = values.len() - 1;
            match feature_dim {
                None => feature_dim = Some(width),
                Some(expected) if expected != width => {
                    return Err(fail(
                        line_no,
                        format!("expected {} features, found {}", expected, width),
                    ));
                }
                Some(_) => {}
            }

            labels.push(values[0]);
            features.extend_from_slice(&values[1..]);
        }

        let feature_dim = feature_dim.ok_or_else(|| fail(0, "file has no samples".to_string()))?;
        Ok(Dataset {
            features,
            labels,
            feature_dim,
            label_dim: 1,
            origin: origin.to_path_buf(),
        })
    }
}
