use crate::background::BackgroundColor;
use crate::error::Result;
use crate::mask::{MaskParams, OccupancyMask};
use crate::morphology::expand_mask;
use image::RgbaImage;
use log::debug;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use xxhash_rust::xxh3::Xxh3;

/// Background estimate and expanded occupancy mask for one canvas.
///
/// The expensive part of a placement call is analyzing the canvas, and the
/// same canvas is typically analyzed for several placements (a title, a
/// pictogram, previews). Profiles are immutable once built and shared.
pub struct CanvasProfile {
  pub background: BackgroundColor,
  pub mask: OccupancyMask,
}

impl CanvasProfile {
  /// Analyze a canvas: build its occupancy mask and grow it by
  /// `content_margin` pixels so later placements keep their distance.
  pub fn analyze(img: &RgbaImage, params: &MaskParams, content_margin: u32) -> Result<Self> {
    let (mask, background) = OccupancyMask::analyze(img, params)?;
    let mask = expand_mask(&mask, content_margin);
    Ok(Self { background, mask })
  }
}

/// Content-addressed cache of canvas profiles.
///
/// Keys cover the pixel data and every parameter that shapes the profile, so
/// a hit is always safe to reuse. Entries are never mutated after insertion.
#[derive(Default)]
pub struct MaskCache {
  entries: Mutex<HashMap<u64, Arc<CanvasProfile>>>,
}

impl MaskCache {
  pub fn new() -> Self {
    Self::default()
  }

  /// Profile for a canvas, computed at most once per distinct input.
  pub fn profile(
    &self,
    img: &RgbaImage,
    params: &MaskParams,
    content_margin: u32,
  ) -> Result<Arc<CanvasProfile>> {
    let key = fingerprint(img, params, content_margin);
    if let Some(hit) = self.entries.lock().expect("cache mutex").get(&key) {
      debug!("canvas profile cache hit ({:#018x})", key);
      return Ok(hit.clone());
    }

    // Computed outside the lock; concurrent misses may analyze twice but the
    // result is identical either way and the first insert wins.
    let profile = Arc::new(CanvasProfile::analyze(img, params, content_margin)?);
    let mut entries = self.entries.lock().expect("cache mutex");
    Ok(entries.entry(key).or_insert(profile).clone())
  }

  pub fn len(&self) -> usize {
    self.entries.lock().expect("cache mutex").len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

fn fingerprint(img: &RgbaImage, params: &MaskParams, content_margin: u32) -> u64 {
  let mut h = Xxh3::new();
  h.update(&img.width().to_le_bytes());
  h.update(&img.height().to_le_bytes());
  h.update(img.as_raw());
  h.update(&params.grid_size.to_le_bytes());
  h.update(&params.background_ratio.to_le_bytes());
  h.update(&params.blur_sigma.to_le_bytes());
  h.update(&params.transparent_fill);
  h.update(&(params.background.clusters as u64).to_le_bytes());
  h.update(&(params.background.max_iterations as u64).to_le_bytes());
  h.update(&params.background.min_tolerance.to_le_bytes());
  h.update(&content_margin.to_le_bytes());
  h.digest()
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgba;

  fn sample_canvas() -> RgbaImage {
    let mut img = RgbaImage::from_pixel(60, 60, Rgba([250, 250, 250, 255]));
    for y in 20..40 {
      for x in 20..40 {
        img.put_pixel(x, y, Rgba([15, 15, 15, 255]));
      }
    }
    img
  }

  #[test]
  fn identical_inputs_share_one_profile() {
    let cache = MaskCache::new();
    let img = sample_canvas();
    let params = MaskParams { grid_size: 5, ..MaskParams::default() };
    let a = cache.profile(&img, &params, 5).unwrap();
    let b = cache.profile(&img, &params, 5).unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(cache.len(), 1);
  }

  #[test]
  fn parameters_are_part_of_the_key() {
    let cache = MaskCache::new();
    let img = sample_canvas();
    let params = MaskParams { grid_size: 5, ..MaskParams::default() };
    let a = cache.profile(&img, &params, 5).unwrap();
    let b = cache.profile(&img, &params, 10).unwrap();
    assert!(!Arc::ptr_eq(&a, &b));

    let mut edited = img.clone();
    edited.put_pixel(0, 0, Rgba([0, 255, 0, 255]));
    let c = cache.profile(&edited, &params, 5).unwrap();
    assert!(!Arc::ptr_eq(&a, &c));
    assert_eq!(cache.len(), 3);
  }
}
