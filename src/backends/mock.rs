//! Mock segmentation model for tests and benchmarks
//!
//! Produces class scores without loading any weights, so the whole pipeline can
//! be exercised deterministically on the CPU.

use crate::config::Device;
use crate::error::{BgRemovalError, Result};
use crate::inference::SegmentationModel;
use ndarray::{Array3, Array4, Axis};
use std::sync::atomic::{AtomicUsize, Ordering};

type ClassFn = dyn Fn(usize, usize, usize, usize) -> usize + Send + Sync;

enum MockBehavior {
    /// Winning class computed per pixel from `(x, y, width, height)` of the input
    Pattern { classes: usize, class_at: Box<ClassFn> },
    /// Fixed `(K, H, W)` scores returned regardless of input size
    Fixed(Array3<f32>),
    Failing(String),
}

/// Stub model returning predetermined class scores
pub struct MockSegmentationModel {
    behavior: MockBehavior,
    calls: AtomicUsize,
}

impl std::fmt::Debug for MockSegmentationModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let behavior = match &self.behavior {
            MockBehavior::Pattern { classes, .. } => format!("pattern({classes} classes)"),
            MockBehavior::Fixed(scores) => format!("fixed{:?}", scores.dim()),
            MockBehavior::Failing(msg) => format!("failing({msg})"),
        };
        f.debug_struct("MockSegmentationModel")
            .field("behavior", &behavior)
            .field("calls", &self.call_count())
            .finish()
    }
}

impl MockSegmentationModel {
    /// Every pixel scores highest for `winner`
    #[must_use]
    pub fn uniform(classes: usize, winner: usize) -> Self {
        Self::from_fn(classes, move |_, _, _, _| winner)
    }

    /// Winning class per pixel decided by `class_at(x, y, width, height)`
    #[must_use]
    pub fn from_fn<F>(classes: usize, class_at: F) -> Self
    where
        F: Fn(usize, usize, usize, usize) -> usize + Send + Sync + 'static,
    {
        Self {
            behavior: MockBehavior::Pattern {
                classes,
                class_at: Box::new(class_at),
            },
            calls: AtomicUsize::new(0),
        }
    }

    /// Left half of the frame is foreground (class 1), right half background
    #[must_use]
    pub fn left_half_foreground() -> Self {
        Self::from_fn(2, |x, _, width, _| usize::from(x < width / 2))
    }

    /// Always return the given `(K, H, W)` scores
    #[must_use]
    pub fn from_scores(scores: Array3<f32>) -> Self {
        Self {
            behavior: MockBehavior::Fixed(scores),
            calls: AtomicUsize::new(0),
        }
    }

    /// Fail every forward pass with an inference error
    #[must_use]
    pub fn failing<S: Into<String>>(message: S) -> Self {
        Self {
            behavior: MockBehavior::Failing(message.into()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of forward passes run so far
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl SegmentationModel for MockSegmentationModel {
    fn forward(&self, input: &Array4<f32>) -> Result<Array4<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let (_, _, height, width) = input.dim();

        let scores = match &self.behavior {
            MockBehavior::Failing(message) => {
                return Err(BgRemovalError::inference(message.clone()));
            },
            MockBehavior::Fixed(scores) => scores.clone(),
            MockBehavior::Pattern { classes, class_at } => {
                Array3::from_shape_fn((*classes, height, width), |(class, y, x)| {
                    if class_at(x, y, width, height) == class {
                        1.0
                    } else {
                        0.0
                    }
                })
            },
        };

        Ok(scores.insert_axis(Axis(0)))
    }

    fn device(&self) -> Device {
        Device::Cpu
    }

    fn name(&self) -> &str {
        "mock"
    }
}
