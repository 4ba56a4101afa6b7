use nalgebra::{Matrix2, Vector2};
use opencv::core::{Mat, MatTraitConst};
use serde::{Deserialize, Serialize};

use crate::utils::coordinate::{BoundingBox, Coordinate2D, LandmarkSet};

/// A split feature: the intensity difference between two probe pixels, each
/// anchored to a landmark of the current shape estimate. Offsets are in
/// normalized face-box coordinates.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SplitFeature {
    pub anchor1: u16,
    pub offset1: Coordinate2D,
    pub anchor2: u16,
    pub offset2: Coordinate2D,
}

/// A node in a regression tree. Children are indices into the owning tree's
/// node vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TreeNode {
    Split {
        feature: SplitFeature,
        threshold: f32,
        left: u32,
        right: u32,
    },
    Leaf {
        delta: LandmarkSet,
    },
}

/// A single regression tree voting on a shape adjustment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegressionTree {
    pub nodes: Vec<TreeNode>,
}

impl RegressionTree {
    /// Node 0 is the root.
    pub fn new(nodes: Vec<TreeNode>) -> Self {
        RegressionTree { nodes }
    }

    /// Walk the tree, with `get_feature` supplying the intensity difference
    /// for each split, and return the delta stored at the reached leaf.
    pub fn predict<F>(&self, get_feature: F) -> &LandmarkSet
    where
        F: Fn(&SplitFeature) -> f32,
    {
        let mut idx = 0usize;
        loop {
            match &self.nodes[idx] {
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    // dlib convention: go left when the difference exceeds the threshold
                    idx = if get_feature(feature) > *threshold {
                        *left as usize
                    } else {
                        *right as usize
                    };
                }
                TreeNode::Leaf { delta } => return delta,
            }
        }
    }
}

/// An ensemble of regression trees whose shape deltas are summed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeEnsemble {
    pub trees: Vec<RegressionTree>,
    pub num_landmarks: usize,
}

impl TreeEnsemble {
    pub fn new(trees: Vec<RegressionTree>, num_landmarks: usize) -> Self {
        TreeEnsemble {
            trees,
            num_landmarks,
        }
    }

    pub fn predict<F>(&self, get_feature: F) -> LandmarkSet
    where
        F: Fn(&SplitFeature) -> f32,
    {
        let mut delta = LandmarkSet::zeros(self.num_landmarks);
        for tree in &self.trees {
            delta.add_delta(tree.predict(&get_feature));
        }
        delta
    }
}

/// Least-squares rotation-and-scale component of the transform mapping one
/// point set onto another. Both sets are centered first, so translation
/// drops out; the matrix is applied to feature probe offsets.
#[derive(Debug, Clone, Copy)]
pub struct SimilarityTransform {
    m: Matrix2<f32>,
}

impl SimilarityTransform {
    pub fn identity() -> Self {
        SimilarityTransform {
            m: Matrix2::identity(),
        }
    }

    pub fn apply(&self, p: Coordinate2D) -> Coordinate2D {
        let v = self.m * Vector2::new(p.x, p.y);
        Coordinate2D::new(v.x, v.y)
    }
}

pub fn find_similarity_transform(from: &LandmarkSet, to: &LandmarkSet) -> SimilarityTransform {
    let n = from.len().min(to.len());
    if n == 0 {
        return SimilarityTransform::identity();
    }

    let mean_of = |set: &LandmarkSet| {
        let mut mean = Coordinate2D::zero();
        for p in set.points.iter().take(n) {
            mean += *p;
        }
        mean * (1.0 / n as f32)
    };
    let mean_from = mean_of(from);
    let mean_to = mean_of(to);

    let mut dot = 0.0f32;
    let mut cross = 0.0f32;
    let mut norm = 0.0f32;
    for i in 0..n {
        let f = from[i] - mean_from;
        let t = to[i] - mean_to;
        dot += f.x * t.x + f.y * t.y;
        cross += f.x * t.y - f.y * t.x;
        norm += f.x * f.x + f.y * f.y;
    }
    if norm <= f32::EPSILON {
        return SimilarityTransform::identity();
    }

    let a = dot / norm;
    let b = cross / norm;
    SimilarityTransform {
        m: Matrix2::new(a, -b, b, a),
    }
}

/// The ERT landmark model: a mean shape refined by a cascade of tree
/// ensembles ("One Millisecond Face Alignment with an Ensemble of
/// Regression Trees", Kazemi & Sullivan 2014).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShapePredictor {
    initial_shape: LandmarkSet,
    cascade: Vec<TreeEnsemble>,
    num_landmarks: usize,
}

impl ShapePredictor {
    /// new builds a predictor from a mean shape in normalized [0,1]
    /// coordinates and a cascade of ensembles.
    pub fn new(initial_shape: LandmarkSet, cascade: Vec<TreeEnsemble>) -> Self {
        let num_landmarks = initial_shape.len();
        ShapePredictor {
            initial_shape,
            cascade,
            num_landmarks,
        }
    }

    pub fn num_landmarks(&self) -> usize {
        self.num_landmarks
    }

    pub fn num_cascade_stages(&self) -> usize {
        self.cascade.len()
    }

    /// predict runs the regression cascade over the face region and returns
    /// landmark positions in image pixel coordinates.
    ///
    /// # Arguments
    /// * `gray` - single-channel grayscale matrix
    /// * `face` - detected face region
    ///
    /// # Returns
    /// * `LandmarkSet`
    pub fn predict(&self, gray: &Mat, face: &BoundingBox) -> LandmarkSet {
        let initial = self.project_initial(face);
        let mut current = initial.clone();

        for ensemble in &self.cascade {
            // probe offsets follow the face orientation of the current estimate
            let tform = find_similarity_transform(&initial, &current);
            let delta =
                ensemble.predict(|feature| feature_value(feature, &current, face, &tform, gray));
            for (point, d) in current.points.iter_mut().zip(delta.points.iter()) {
                point.x += d.x * face.width;
                point.y += d.y * face.height;
            }
        }

        current
    }

    /// Scale the mean shape into the face bounding box.
    fn project_initial(&self, face: &BoundingBox) -> LandmarkSet {
        LandmarkSet::new(
            self.initial_shape
                .points
                .iter()
                .map(|p| face.denormalize_point(*p))
                .collect(),
        )
    }
}

fn feature_value(
    feature: &SplitFeature,
    shape: &LandmarkSet,
    face: &BoundingBox,
    tform: &SimilarityTransform,
    gray: &Mat,
) -> f32 {
    let o1 = tform.apply(feature.offset1);
    let o2 = tform.apply(feature.offset2);
    let p1 = shape[feature.anchor1 as usize] + Coordinate2D::new(o1.x * face.width, o1.y * face.height);
    let p2 = shape[feature.anchor2 as usize] + Coordinate2D::new(o2.x * face.width, o2.y * face.height);

    sample_bilinear(gray, p1.x, p1.y) - sample_bilinear(gray, p2.x, p2.y)
}

/// Intensity at integer coordinates; out-of-bounds reads as 0.
fn pixel_at(gray: &Mat, x: i32, y: i32) -> f32 {
    if x < 0 || y < 0 || x >= gray.cols() || y >= gray.rows() {
        return 0.0;
    }
    match gray.at_2d::<u8>(y, x) {
        Ok(value) => *value as f32,
        Err(_) => 0.0,
    }
}

/// Sub-pixel intensity via bilinear interpolation.
fn sample_bilinear(gray: &Mat, x: f32, y: f32) -> f32 {
    let x0 = x.floor() as i32;
    let y0 = y.floor() as i32;
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let p00 = pixel_at(gray, x0, y0);
    let p10 = pixel_at(gray, x0 + 1, y0);
    let p01 = pixel_at(gray, x0, y0 + 1);
    let p11 = pixel_at(gray, x0 + 1, y0 + 1);

    let top = p00 * (1.0 - fx) + p10 * fx;
    let bottom = p01 * (1.0 - fx) + p11 * fx;
    top * (1.0 - fy) + bottom * fy
}
