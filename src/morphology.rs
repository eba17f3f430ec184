use crate::mask::OccupancyMask;
use image::GrayImage;
use imageproc::distance_transform::euclidean_squared_distance_transform;

/// Expand a mask outward by a Euclidean pixel distance
///
/// Every free cell closer than `dist` to an occupied cell becomes occupied,
/// creating a buffer margin around content so placements are not flush
/// against it. Uses an exact squared distance transform, so expansion is
/// monotone in `dist` and `expand_mask(mask, 0)` returns the mask unchanged.
///
/// # Arguments
/// * `mask` - The mask to grow
/// * `dist` - Buffer distance in pixels
///
/// # Returns
/// A new mask containing the original occupied cells plus the margin
pub fn expand_mask(mask: &OccupancyMask, dist: u32) -> OccupancyMask {
  if dist == 0 {
    return mask.clone();
  }

  let (width, height) = (mask.width(), mask.height());
  let gray = GrayImage::from_raw(width, height, mask.cells().to_vec())
    .expect("mask cells match mask dimensions");
  let distances = euclidean_squared_distance_transform(&gray);

  let limit = (dist as f64) * (dist as f64);
  let cells = mask
    .cells()
    .iter()
    .zip(distances.pixels())
    .map(|(&cell, d)| (cell != 0 || d.0[0] < limit) as u8)
    .collect();

  OccupancyMask::from_cells_unchecked(width, height, cells)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::placement::Rect;

  fn point_mask(w: u32, h: u32, x: u32, y: u32) -> OccupancyMask {
    let mut mask = OccupancyMask::empty(w, h).unwrap();
    mask.fill_rect(&Rect { x, y, width: 1, height: 1 });
    mask
  }

  #[test]
  fn zero_distance_is_identity() {
    let mask = point_mask(30, 30, 12, 7);
    assert_eq!(expand_mask(&mask, 0), mask);
  }

  #[test]
  fn expansion_is_a_euclidean_disc() {
    let mask = point_mask(41, 41, 20, 20);
    let grown = expand_mask(&mask, 10);
    assert!(grown.is_occupied(20, 20));
    assert!(grown.is_occupied(29, 20)); // distance 9
    assert!(grown.is_occupied(26, 26)); // distance ~8.49
    assert!(!grown.is_occupied(30, 20)); // distance 10, not strictly inside
    assert!(!grown.is_occupied(28, 28)); // distance ~11.3
  }

  #[test]
  fn expansion_is_monotone_in_distance() {
    let mut mask = OccupancyMask::empty(50, 50).unwrap();
    mask.fill_rect(&Rect { x: 10, y: 30, width: 4, height: 3 });
    mask.fill_rect(&Rect { x: 35, y: 8, width: 2, height: 6 });

    let small = expand_mask(&mask, 4);
    let large = expand_mask(&mask, 9);
    for y in 0..50 {
      for x in 0..50 {
        if mask.is_occupied(x, y) {
          assert!(small.is_occupied(x, y));
        }
        if small.is_occupied(x, y) {
          assert!(large.is_occupied(x, y), "lost cell at ({}, {})", x, y);
        }
      }
    }
    assert!(large.occupied_count() > small.occupied_count());
  }
}
