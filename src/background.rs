use crate::color::Color;
use crate::error::{PlaceError, Result};
use image::RgbaImage;
use log::debug;
use nalgebra::Vector3;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Dominant background color of a raster plus the adaptive tolerance below
/// which a pixel counts as background-like.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BackgroundColor {
  pub rgb: Color,
  /// Distance threshold in raw RGB space. Never below the configured minimum.
  pub tolerance: f64,
}

/// Configuration for background color estimation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackgroundParams {
  /// Number of color clusters
  pub clusters: usize,
  /// Iteration cap for cluster refinement
  pub max_iterations: usize,
  /// Floor for the adaptive tolerance, in raw RGB distance units
  pub min_tolerance: f64,
}

impl Default for BackgroundParams {
  fn default() -> Self {
    Self {
      clusters: 5,
      max_iterations: 16,
      min_tolerance: 25.0,
    }
  }
}

/// Center movement below which refinement stops early
const CONVERGENCE_EPS: f64 = 0.5;

/// Fixed chunk size for parallel accumulation. Chunks are combined in order,
/// so floating point sums do not depend on thread scheduling.
const ACCUM_CHUNK: usize = 64 * 1024;

/// Estimate the background color of an image by color clustering
///
/// Runs k-means over all pixel colors (alpha ignored; flatten transparency
/// beforehand if it should count as background) and treats the most populous
/// cluster as the background. The tolerance is the mean distance of that
/// cluster's members to its center, floored by `params.min_tolerance`, so a
/// single solid color degenerates to the configured minimum instead of zero.
///
/// Initialization is farthest-point seeding from the mean color, which makes
/// the whole estimate deterministic for identical inputs.
///
/// # Arguments
/// * `img` - The image to analyze, ideally pre-blurred to suppress anti-aliasing
/// * `params` - Clustering configuration
///
/// # Returns
/// The estimated background color and tolerance
pub fn estimate_background(img: &RgbaImage, params: &BackgroundParams) -> Result<BackgroundColor> {
  if img.width() == 0 || img.height() == 0 {
    return Err(PlaceError::InvalidImage(
      "cannot estimate background of a zero-size image".into(),
    ));
  }

  let samples: Vec<Vector3<f64>> = img
    .pixels()
    .map(|p| Vector3::new(p[0] as f64, p[1] as f64, p[2] as f64))
    .collect();

  let mut centers = seed_centers(&samples, params.clusters.max(1));

  for _ in 0..params.max_iterations {
    let acc = accumulate_members(&samples, &centers);
    let mut moved = 0.0f64;
    for (ci, (sum, count)) in acc.into_iter().enumerate() {
      if count == 0 {
        // empty cluster keeps its previous center
        continue;
      }
      let next = sum / count as f64;
      moved = moved.max((next - centers[ci]).norm());
      centers[ci] = next;
    }
    if moved < CONVERGENCE_EPS {
      break;
    }
  }

  let stats = member_stats(&samples, &centers);
  let (winner, (count, dist_sum)) = stats
    .iter()
    .enumerate()
    .max_by(|a, b| a.1 .0.cmp(&b.1 .0).then(b.0.cmp(&a.0)))
    .expect("at least one cluster");

  let hint = if *count > 0 {
    dist_sum / *count as f64
  } else {
    0.0
  };
  let tolerance = params.min_tolerance.max(hint);

  let c = centers[winner];
  let rgb = [
    c.x.round().clamp(0.0, 255.0) as u8,
    c.y.round().clamp(0.0, 255.0) as u8,
    c.z.round().clamp(0.0, 255.0) as u8,
  ];
  debug!(
    "background estimate: rgb={:?} tolerance={:.2} (hint {:.2}, {} of {} pixels)",
    rgb,
    tolerance,
    hint,
    count,
    samples.len()
  );

  Ok(BackgroundColor { rgb, tolerance })
}

/// Deterministic farthest-point seeding: the mean color first, then repeatedly
/// the sample farthest from every chosen center. Stops early when all samples
/// coincide with a center (solid color images yield a single cluster).
fn seed_centers(samples: &[Vector3<f64>], k: usize) -> Vec<Vector3<f64>> {
  let mean = chunked_mean(samples);
  let mut centers = vec![mean];

  while centers.len() < k {
    let (dist, idx) = samples
      .par_iter()
      .enumerate()
      .map(|(i, s)| (nearest_distance(s, &centers), i))
      .reduce(
        || (f64::NEG_INFINITY, usize::MAX),
        |a, b| {
          if b.0 > a.0 || (b.0 == a.0 && b.1 < a.1) {
            b
          } else {
            a
          }
        },
      );
    if !dist.is_finite() || dist <= f64::EPSILON {
      break;
    }
    centers.push(samples[idx]);
  }

  centers
}

fn nearest_distance(sample: &Vector3<f64>, centers: &[Vector3<f64>]) -> f64 {
  centers
    .iter()
    .map(|c| (sample - c).norm())
    .fold(f64::INFINITY, f64::min)
}

/// Index of the closest center, lowest index on ties.
fn nearest_center(sample: &Vector3<f64>, centers: &[Vector3<f64>]) -> usize {
  let mut best = 0;
  let mut best_d = f64::INFINITY;
  for (i, c) in centers.iter().enumerate() {
    let d = (sample - c).norm_squared();
    if d < best_d {
      best_d = d;
      best = i;
    }
  }
  best
}

/// Per-center (sum, count) over all samples, accumulated chunk-wise in a fixed
/// order for reproducibility.
fn accumulate_members(
  samples: &[Vector3<f64>],
  centers: &[Vector3<f64>],
) -> Vec<(Vector3<f64>, usize)> {
  let partials: Vec<_> = samples
    .par_chunks(ACCUM_CHUNK)
    .map(|chunk| {
      let mut local = vec![(Vector3::zeros(), 0usize); centers.len()];
      for s in chunk {
        let ci = nearest_center(s, centers);
        local[ci].0 += *s;
        local[ci].1 += 1;
      }
      local
    })
    .collect();

  let mut total = vec![(Vector3::zeros(), 0usize); centers.len()];
  for local in partials {
    for (ci, (sum, count)) in local.into_iter().enumerate() {
      total[ci].0 += sum;
      total[ci].1 += count;
    }
  }
  total
}

/// Per-center (member count, summed member distance to center).
fn member_stats(samples: &[Vector3<f64>], centers: &[Vector3<f64>]) -> Vec<(usize, f64)> {
  let partials: Vec<_> = samples
    .par_chunks(ACCUM_CHUNK)
    .map(|chunk| {
      let mut local = vec![(0usize, 0.0f64); centers.len()];
      for s in chunk {
        let ci = nearest_center(s, centers);
        local[ci].0 += 1;
        local[ci].1 += (s - centers[ci]).norm();
      }
      local
    })
    .collect();

  let mut total = vec![(0usize, 0.0f64); centers.len()];
  for local in partials {
    for (ci, (count, dist)) in local.into_iter().enumerate() {
      total[ci].0 += count;
      total[ci].1 += dist;
    }
  }
  total
}

fn chunked_mean(samples: &[Vector3<f64>]) -> Vector3<f64> {
  let partials: Vec<_> = samples
    .par_chunks(ACCUM_CHUNK)
    .map(|chunk| chunk.iter().fold(Vector3::zeros(), |acc, v| acc + v))
    .collect();
  let sum = partials.into_iter().fold(Vector3::zeros(), |acc, v| acc + v);
  sum / samples.len() as f64
}
