use std::{
    collections::BTreeSet,
    error::Error,
    fmt::{self, Display},
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use image::imageops::FilterType;
use ndarray::{Array3, Array4, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::InputDim;

const SUPPORTED_FILES: [&str; 4] = ["bmp", "jpg", "jpeg", "png"];

/// Errors produced while building or reading a dataset split.
#[derive(Debug)]
pub enum DataError {
    /// The split directory or its `image` folder does not exist.
    MissingSplit { path: PathBuf },

    /// The split's `image` folder contains no supported image files.
    EmptySplit { path: PathBuf },

    /// The directory could not be read.
    Io { path: PathBuf, reason: String },

    /// A filename does not carry enough `_`-delimited tokens to derive a
    /// category.
    BadFileName { path: PathBuf },

    /// A filename encodes a category absent from the shared vocabulary.
    UnknownClass { class: String, path: PathBuf },

    /// An image file could not be decoded.
    Decode { path: PathBuf, reason: String },

    /// Only 1-channel (luma) and 3-channel (RGB) inputs are supported.
    UnsupportedChannels { channels: usize },

    /// The requested sample index is out of bounds.
    OutOfBounds { index: usize, len: usize },
}

impl Display for DataError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataError::MissingSplit { path } => {
                write!(f, "split directory {} does not exist", path.display())
            }
            DataError::EmptySplit { path } => {
                write!(f, "split directory {} contains no images", path.display())
            }
            DataError::Io { path, reason } => {
                write!(f, "cannot read {}: {reason}", path.display())
            }
            DataError::BadFileName { path } => write!(
                f,
                "filename {} has too few `_` tokens to derive a category",
                path.display()
            ),
            DataError::UnknownClass { class, path } => write!(
                f,
                "category {class:?} of {} is not in the vocabulary",
                path.display()
            ),
            DataError::Decode { path, reason } => {
                write!(f, "cannot decode {}: {reason}", path.display())
            }
            DataError::UnsupportedChannels { channels } => {
                write!(f, "unsupported channel count {channels}, expected 1 or 3")
            }
            DataError::OutOfBounds { index, len } => {
                write!(f, "sample index {index} is out of bounds for length {len}")
            }
        }
    }
}

impl Error for DataError {}

/// One of the three disjoint dataset partitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Split {
    Training,
    Validation,
    Testing,
}

impl Split {
    /// Directory name of the split under the dataset root.
    pub fn dir_name(&self) -> &'static str {
        match self {
            Split::Training => "training",
            Split::Validation => "validation",
            Split::Testing => "testing",
        }
    }
}

/// Category derivation from filenames.
///
/// Filenames encode the category in `_`-delimited tokens: `Coarse` uses
/// token 2 alone, `Fine` joins tokens 2 and 3 back with a `_`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    #[default]
    Coarse,
    Fine,
}

/// The canonical category-name to class-index mapping.
///
/// Indices are assigned in lexicographic order of name, so any two
/// vocabularies built over the same category set are identical. The trainer
/// builds one vocabulary from the training split and shares it with the
/// validation and testing splits; per-split re-derivation would silently
/// disagree whenever a class is missing from one split.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassVocabulary {
    names: Vec<String>,
}

impl ClassVocabulary {
    fn from_names(names: BTreeSet<String>) -> Self {
        Self {
            names: names.into_iter().collect(),
        }
    }

    /// Returns the dense index of a category name.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.binary_search_by(|n| n.as_str().cmp(name)).ok()
    }

    /// Returns the category name at a dense index.
    pub fn name(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// A fixed batch of decoded samples.
pub struct Batch {
    /// Images, `(batch, channels, height, width)`, values in `[0, 1]`.
    pub images: Array4<f32>,
    /// Class indices, parallel to the batch axis.
    pub labels: Vec<usize>,
}

/// A read-only view over one split of the image-folder tree.
///
/// Scans `<root>/<split>/image` once at construction and derives a label per
/// file; files are ordered lexicographically by path so the view is
/// deterministic. Pixels are not held in memory: every access decodes the
/// file again.
pub struct ImageFolder {
    split: Split,
    granularity: Granularity,
    input: InputDim,
    sample_paths: Vec<PathBuf>,
    labels: Vec<usize>,
    vocabulary: Arc<ClassVocabulary>,
}

impl ImageFolder {
    /// Opens the training split and derives the canonical vocabulary from
    /// the categories present in it.
    pub fn training(
        root: &Path,
        granularity: Granularity,
        input: InputDim,
    ) -> Result<Self, DataError> {
        let paths = scan_split(root, Split::Training)?;

        let mut names = BTreeSet::new();
        for path in &paths {
            names.insert(label_name(path, granularity)?);
        }
        let vocabulary = Arc::new(ClassVocabulary::from_names(names));

        Self::resolve(Split::Training, granularity, input, paths, vocabulary)
    }

    /// Opens a split against an existing vocabulary.
    ///
    /// # Errors
    /// Fails with [`DataError::UnknownClass`] if a file encodes a category
    /// the vocabulary does not contain.
    pub fn with_vocabulary(
        root: &Path,
        split: Split,
        granularity: Granularity,
        input: InputDim,
        vocabulary: Arc<ClassVocabulary>,
    ) -> Result<Self, DataError> {
        let paths = scan_split(root, split)?;
        Self::resolve(split, granularity, input, paths, vocabulary)
    }

    fn resolve(
        split: Split,
        granularity: Granularity,
        input: InputDim,
        sample_paths: Vec<PathBuf>,
        vocabulary: Arc<ClassVocabulary>,
    ) -> Result<Self, DataError> {
        let channels = input.channels.get();
        if channels != 1 && channels != 3 {
            return Err(DataError::UnsupportedChannels { channels });
        }

        let mut labels = Vec::with_capacity(sample_paths.len());
        for path in &sample_paths {
            let name = label_name(path, granularity)?;
            let label = vocabulary
                .index_of(&name)
                .ok_or_else(|| DataError::UnknownClass {
                    class: name,
                    path: path.clone(),
                })?;
            labels.push(label);
        }

        Ok(Self {
            split,
            granularity,
            input,
            sample_paths,
            labels,
            vocabulary,
        })
    }

    pub fn split(&self) -> Split {
        self.split
    }

    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    pub fn vocabulary(&self) -> &Arc<ClassVocabulary> {
        &self.vocabulary
    }

    /// Number of samples in the split. Constant after construction.
    pub fn len(&self) -> usize {
        self.sample_paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sample_paths.is_empty()
    }

    /// Fetches a sample by index, decoding the file on the spot.
    ///
    /// Every call re-reads and re-decodes the file; nothing is cached. The
    /// image is resized to the configured input dimensions when needed and
    /// returned channel-first with values scaled to `[0, 1]`.
    ///
    /// # Errors
    /// Returns [`DataError::OutOfBounds`] if `index >= len()`, or
    /// [`DataError::Decode`] if the file is unreadable or corrupt.
    pub fn get(&self, index: usize) -> Result<(Array3<f32>, usize), DataError> {
        let path = self
            .sample_paths
            .get(index)
            .ok_or(DataError::OutOfBounds {
                index,
                len: self.sample_paths.len(),
            })?;

        let pixels = self.decode(path)?;
        Ok((pixels, self.labels[index]))
    }

    /// Decodes a batch of samples into one `(N, C, H, W)` tensor.
    ///
    /// Decoding is file-per-sample and embarrassingly parallel, so it fans
    /// out over rayon; the loop's contract is unchanged.
    pub fn load_batch(&self, indices: &[usize]) -> Result<Batch, DataError> {
        let samples: Vec<(Array3<f32>, usize)> = indices
            .par_iter()
            .map(|&i| self.get(i))
            .collect::<Result<_, _>>()?;

        let (h, w) = (self.input.height.get(), self.input.width.get());
        let c = self.input.channels.get();
        let mut images = Array4::zeros((samples.len(), c, h, w));
        let mut labels = Vec::with_capacity(samples.len());

        for (i, (pixels, label)) in samples.iter().enumerate() {
            images.index_axis_mut(Axis(0), i).assign(pixels);
            labels.push(*label);
        }

        Ok(Batch { images, labels })
    }

    fn decode(&self, path: &Path) -> Result<Array3<f32>, DataError> {
        let img = image::open(path).map_err(|e| DataError::Decode {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let (h, w) = (self.input.height.get(), self.input.width.get());
        let img = if img.width() as usize != w || img.height() as usize != h {
            img.resize_exact(w as u32, h as u32, FilterType::Triangle)
        } else {
            img
        };

        let c = self.input.channels.get();
        let raw = match c {
            1 => img.to_luma8().into_raw(),
            _ => img.to_rgb8().into_raw(),
        };

        Ok(Array3::from_shape_fn((c, h, w), |(ci, y, x)| {
            raw[(y * w + x) * c + ci] as f32 / 255.0
        }))
    }
}

/// Derives the category name encoded in a filename stem.
fn label_name(path: &Path, granularity: Granularity) -> Result<String, DataError> {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| DataError::BadFileName {
            path: path.to_path_buf(),
        })?;

    let tokens: Vec<&str> = stem.split('_').collect();
    let name = match granularity {
        Granularity::Coarse => tokens.get(2).map(|t| t.to_string()),
        Granularity::Fine => match (tokens.get(2), tokens.get(3)) {
            (Some(a), Some(b)) => Some(format!("{a}_{b}")),
            _ => None,
        },
    };

    name.ok_or_else(|| DataError::BadFileName {
        path: path.to_path_buf(),
    })
}

/// Lists the supported image files of a split, lexicographically ordered.
fn scan_split(root: &Path, split: Split) -> Result<Vec<PathBuf>, DataError> {
    let dir = root.join(split.dir_name()).join("image");
    if !dir.is_dir() {
        return Err(DataError::MissingSplit { path: dir });
    }

    let entries = fs::read_dir(&dir).map_err(|e| DataError::Io {
        path: dir.clone(),
        reason: e.to_string(),
    })?;

    let mut paths = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| DataError::Io {
            path: dir.clone(),
            reason: e.to_string(),
        })?;
        let path = entry.path();

        let supported = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| SUPPORTED_FILES.contains(&e.to_ascii_lowercase().as_str()))
            .unwrap_or(false);

        if supported {
            paths.push(path);
        }
    }

    if paths.is_empty() {
        return Err(DataError::EmptySplit { path: dir });
    }

    paths.sort();
    Ok(paths)
}
