use ndarray::ArrayView2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::config::config::ClassifierConfig;
use crate::utils::error::{PipelineError, Result};

/// A node in a classification tree. Children are indices into the owning
/// tree's node vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ClassNode {
    Split {
        feature: usize,
        threshold: f32,
        left: u32,
        right: u32,
    },
    Leaf {
        class: usize,
    },
}

/// A single CART tree fitted on a bootstrap sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationTree {
    pub nodes: Vec<ClassNode>,
}

impl ClassificationTree {
    /// Walk the tree and return the class stored at the reached leaf.
    pub fn predict(&self, features: &[f32]) -> usize {
        let mut idx = 0usize;
        loop {
            match &self.nodes[idx] {
                ClassNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if features[*feature] <= *threshold {
                        *left as usize
                    } else {
                        *right as usize
                    };
                }
                ClassNode::Leaf { class } => return *class,
            }
        }
    }
}

/// A bootstrap-aggregated ensemble of classification trees with hard
/// majority voting. Fitting is deterministic for a fixed seed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForest {
    trees: Vec<ClassificationTree>,
    num_classes: usize,
}

impl RandomForest {
    /// fit grows the configured number of bootstrap-sampled trees.
    ///
    /// # Arguments
    /// * `x` - sample matrix, one row per sample
    /// * `y` - class index per sample
    /// * `num_classes` - size of the label space
    /// * `config` - tree count and growth limits
    ///
    /// # Returns
    /// * `Result<RandomForest, PipelineError>`
    pub fn fit(
        x: ArrayView2<'_, f32>,
        y: &[usize],
        num_classes: usize,
        config: &ClassifierConfig,
    ) -> Result<Self> {
        let num_samples = x.nrows();
        if num_samples == 0 || num_samples != y.len() {
            return Err(PipelineError::Dataset(format!(
                "sample/label count mismatch: {} rows, {} labels",
                num_samples,
                y.len()
            )));
        }
        if num_classes == 0 || y.iter().any(|&class| class >= num_classes) {
            return Err(PipelineError::Dataset(
                "label index outside the class space".to_string(),
            ));
        }
        if config.num_trees == 0 {
            return Err(PipelineError::Config(
                "classifier needs at least one tree".to_string(),
            ));
        }

        let mut rng = StdRng::seed_from_u64(config.seed);
        let mut trees = Vec::with_capacity(config.num_trees);
        for _ in 0..config.num_trees {
            let sample: Vec<usize> = (0..num_samples)
                .map(|_| rng.gen_range(0..num_samples))
                .collect();
            trees.push(grow_tree(&x, y, sample, num_classes, config, &mut rng));
        }

        Ok(RandomForest { trees, num_classes })
    }

    /// predict returns the majority-vote class for one feature vector.
    /// Ties resolve to the lowest class index.
    pub fn predict(&self, features: &[f32]) -> usize {
        let mut votes = vec![0usize; self.num_classes];
        for tree in &self.trees {
            votes[tree.predict(features)] += 1;
        }

        let mut best = 0usize;
        for (class, &count) in votes.iter().enumerate() {
            if count > votes[best] {
                best = class;
            }
        }
        best
    }

    pub fn num_trees(&self) -> usize {
        self.trees.len()
    }
}

fn grow_tree(
    x: &ArrayView2<'_, f32>,
    y: &[usize],
    sample: Vec<usize>,
    num_classes: usize,
    config: &ClassifierConfig,
    rng: &mut StdRng,
) -> ClassificationTree {
    let mut nodes = Vec::new();
    build_node(x, y, sample, 0, num_classes, config, rng, &mut nodes);
    ClassificationTree { nodes }
}

#[allow(clippy::too_many_arguments)]
fn build_node(
    x: &ArrayView2<'_, f32>,
    y: &[usize],
    indices: Vec<usize>,
    depth: usize,
    num_classes: usize,
    config: &ClassifierConfig,
    rng: &mut StdRng,
    nodes: &mut Vec<ClassNode>,
) -> u32 {
    let counts = class_counts(y, &indices, num_classes);
    let majority = argmax(&counts);
    let node_idx = nodes.len() as u32;

    let pure = counts.iter().filter(|&&c| c > 0).count() <= 1;
    if pure || depth >= config.max_depth || indices.len() < config.min_samples_split {
        nodes.push(ClassNode::Leaf { class: majority });
        return node_idx;
    }

    let Some(split) = best_split(x, y, &indices, num_classes, rng) else {
        nodes.push(ClassNode::Leaf { class: majority });
        return node_idx;
    };

    // reserve the slot; children are appended behind it
    nodes.push(ClassNode::Leaf { class: majority });

    let (left_set, right_set): (Vec<usize>, Vec<usize>) = indices
        .into_iter()
        .partition(|&i| x[[i, split.feature]] <= split.threshold);

    // midpoint thresholds can collapse onto a sample value under rounding
    if left_set.is_empty() || right_set.is_empty() {
        return node_idx;
    }

    let left = build_node(x, y, left_set, depth + 1, num_classes, config, rng, nodes);
    let right = build_node(x, y, right_set, depth + 1, num_classes, config, rng, nodes);

    nodes[node_idx as usize] = ClassNode::Split {
        feature: split.feature,
        threshold: split.threshold,
        left,
        right,
    };
    node_idx
}

struct CandidateSplit {
    feature: usize,
    threshold: f32,
    impurity: f32,
}

/// Evaluate √d randomly chosen features and return the split with the
/// lowest weighted child Gini impurity, if it improves on the parent.
fn best_split(
    x: &ArrayView2<'_, f32>,
    y: &[usize],
    indices: &[usize],
    num_classes: usize,
    rng: &mut StdRng,
) -> Option<CandidateSplit> {
    let num_features = x.ncols();
    if num_features == 0 {
        return None;
    }
    let mtry = ((num_features as f32).sqrt().round() as usize)
        .max(1)
        .min(num_features);
    let candidates = rand::seq::index::sample(rng, num_features, mtry);

    let n = indices.len();
    let parent_counts = class_counts(y, indices, num_classes);
    let parent_impurity = gini(&parent_counts, n);

    let mut best: Option<CandidateSplit> = None;

    for feature in candidates.iter() {
        let mut column: Vec<(f32, usize)> = indices
            .iter()
            .map(|&i| (x[[i, feature]], y[i]))
            .collect();
        column.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

        let mut left_counts = vec![0usize; num_classes];
        for pos in 1..n {
            left_counts[column[pos - 1].1] += 1;
            if column[pos].0 == column[pos - 1].0 {
                continue;
            }

            let right_counts: Vec<usize> = parent_counts
                .iter()
                .zip(left_counts.iter())
                .map(|(&total, &left)| total - left)
                .collect();
            let weighted = (pos as f32 * gini(&left_counts, pos)
                + (n - pos) as f32 * gini(&right_counts, n - pos))
                / n as f32;

            if best.as_ref().map_or(true, |b| weighted < b.impurity) {
                best = Some(CandidateSplit {
                    feature,
                    threshold: (column[pos - 1].0 + column[pos].0) / 2.0,
                    impurity: weighted,
                });
            }
        }
    }

    best.filter(|b| b.impurity + 1e-7 < parent_impurity)
}

fn class_counts(y: &[usize], indices: &[usize], num_classes: usize) -> Vec<usize> {
    let mut counts = vec![0usize; num_classes];
    for &i in indices {
        counts[y[i]] += 1;
    }
    counts
}

fn gini(counts: &[usize], n: usize) -> f32 {
    if n == 0 {
        return 0.0;
    }
    let sum_sq: f32 = counts
        .iter()
        .map(|&c| {
            let p = c as f32 / n as f32;
            p * p
        })
        .sum();
    1.0 - sum_sq
}

fn argmax(counts: &[usize]) -> usize {
    let mut best = 0usize;
    for (i, &count) in counts.iter().enumerate() {
        if count > counts[best] {
            best = i;
        }
    }
    best
}
