use crate::background::{estimate_background, BackgroundColor, BackgroundParams};
use crate::color::{color_distance, Color};
use crate::composite::flatten_transparency;
use crate::error::{PlaceError, Result};
use crate::placement::Rect;
use image::{imageops, RgbaImage};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Block occupancy ratio for fine-grained masks (e.g. text-only masks). The
/// default 0.8 tolerates small amounts of content per block; 0.95 flags a
/// block as occupied as soon as 5% of its pixels leave the background.
pub const FINE_BACKGROUND_RATIO: f64 = 0.95;

/// Images whose width + height exceed this use the coarse block grid.
const COARSE_GRID_PIXEL_LIMIT: u32 = 4000;
const COARSE_GRID_SIZE: u32 = 40;

/// Configuration for occupancy mask construction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaskParams {
  /// Block edge length in pixels; blocks are marked occupied as a whole
  pub grid_size: u32,
  /// A block is free when its background-like pixel fraction exceeds this
  pub background_ratio: f64,
  /// Gaussian blur applied before background estimation
  pub blur_sigma: f32,
  /// Fill color for fully transparent pixels (transparent means "not content")
  pub transparent_fill: Color,
  pub background: BackgroundParams,
}

impl Default for MaskParams {
  fn default() -> Self {
    Self {
      grid_size: 15,
      background_ratio: 0.8,
      blur_sigma: 2.0,
      transparent_fill: [255, 255, 255],
      background: BackgroundParams::default(),
    }
  }
}

impl MaskParams {
  /// Block size actually used for an image of the given dimensions. Large
  /// canvases fall back to a coarse grid to bound mask construction cost.
  pub fn effective_grid(&self, width: u32, height: u32) -> u32 {
    if width + height > COARSE_GRID_PIXEL_LIMIT {
      COARSE_GRID_SIZE
    } else {
      self.grid_size.max(1)
    }
  }
}

/// Binary occupancy grid at full pixel resolution, quantized in blocks.
///
/// A cell holds 1 where the source image carries content (pixels that differ
/// from the background beyond tolerance) and 0 where it is background. The
/// grid is immutable once built and shared read-only by the search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OccupancyMask {
  width: u32,
  height: u32,
  cells: Vec<u8>,
}

impl OccupancyMask {
  /// Build a mask from raw cells (row-major, 0 or 1), e.g. an avoid mask
  /// supplied by an orchestration layer.
  pub fn from_raw(width: u32, height: u32, cells: Vec<u8>) -> Result<Self> {
    if width == 0 || height == 0 {
      return Err(PlaceError::InvalidImage("zero-size mask".into()));
    }
    if cells.len() != (width as usize) * (height as usize) {
      return Err(PlaceError::InvalidImage(format!(
        "mask cell count {} does not match {}x{}",
        cells.len(),
        width,
        height
      )));
    }
    let cells = cells.into_iter().map(|c| (c != 0) as u8).collect();
    Ok(Self { width, height, cells })
  }

  /// An all-free mask of the given dimensions.
  pub fn empty(width: u32, height: u32) -> Result<Self> {
    Self::from_raw(width, height, vec![0; (width as usize) * (height as usize)])
  }

  /// Build an occupancy mask against a known background color
  ///
  /// The image is partitioned into `grid x grid` blocks; a block is occupied
  /// when the fraction of its pixels within `background.tolerance` of the
  /// background color is at or below `params.background_ratio`, i.e. when the
  /// block is not mostly background.
  ///
  /// # Arguments
  /// * `img` - Source raster; flatten transparency first if it contains alpha
  /// * `background` - Background color and tolerance to compare against
  /// * `params` - Grid resolution and thresholds
  ///
  /// # Returns
  /// A mask with the same pixel dimensions as `img`
  pub fn from_image(
    img: &RgbaImage,
    background: &BackgroundColor,
    params: &MaskParams,
  ) -> Result<Self> {
    let (width, height) = img.dimensions();
    if width == 0 || height == 0 {
      return Err(PlaceError::InvalidImage(
        "cannot build a mask for a zero-size image".into(),
      ));
    }
    let g = params.effective_grid(width, height) as usize;
    let (w, h) = (width as usize, height as usize);
    let blocks_x = w.div_ceil(g);
    let blocks_y = h.div_ceil(g);

    let block_rows: Vec<Vec<bool>> = (0..blocks_y)
      .into_par_iter()
      .map(|by| {
        let y0 = by * g;
        let y1 = (y0 + g).min(h);
        (0..blocks_x)
          .map(|bx| {
            let x0 = bx * g;
            let x1 = (x0 + g).min(w);
            let mut background_like = 0usize;
            for y in y0..y1 {
              for x in x0..x1 {
                let p = img.get_pixel(x as u32, y as u32);
                if color_distance([p[0], p[1], p[2]], background.rgb) < background.tolerance {
                  background_like += 1;
                }
              }
            }
            let total = (y1 - y0) * (x1 - x0);
            background_like as f64 / total as f64 <= params.background_ratio
          })
          .collect()
      })
      .collect();

    let mut cells = vec![0u8; w * h];
    for (by, row) in block_rows.iter().enumerate() {
      let y0 = by * g;
      let y1 = (y0 + g).min(h);
      for (bx, &occupied) in row.iter().enumerate() {
        if !occupied {
          continue;
        }
        let x0 = bx * g;
        let x1 = (x0 + g).min(w);
        for line in cells[y0 * w..y1 * w].chunks_exact_mut(w) {
          line[x0..x1].fill(1);
        }
      }
    }

    Ok(Self { width, height, cells })
  }

  /// Full mask pipeline: flatten transparency, blur, estimate the background,
  /// then build the mask against it. The blur only feeds the estimate; block
  /// distances are computed on the unblurred pixels.
  pub fn analyze(img: &RgbaImage, params: &MaskParams) -> Result<(Self, BackgroundColor)> {
    let flat = flatten_transparency(img, params.transparent_fill);
    let blurred = imageops::blur(&flat, params.blur_sigma);
    let background = estimate_background(&blurred, &params.background)?;
    let mask = Self::from_image(&flat, &background, params)?;
    Ok((mask, background))
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  pub fn is_occupied(&self, x: u32, y: u32) -> bool {
    self.cells[(y as usize) * (self.width as usize) + (x as usize)] != 0
  }

  pub fn occupied_count(&self) -> usize {
    self.cells.iter().filter(|&&c| c != 0).count()
  }

  pub(crate) fn cells(&self) -> &[u8] {
    &self.cells
  }

  pub(crate) fn from_cells_unchecked(width: u32, height: u32, cells: Vec<u8>) -> Self {
    Self { width, height, cells }
  }

  /// Mark every cell of a rectangle as occupied, clamped to the mask bounds.
  pub fn fill_rect(&mut self, rect: &Rect) {
    let x0 = rect.x.min(self.width) as usize;
    let y0 = rect.y.min(self.height) as usize;
    let x1 = rect.x.saturating_add(rect.width).min(self.width) as usize;
    let y1 = rect.y.saturating_add(rect.height).min(self.height) as usize;
    let w = self.width as usize;
    for line in self.cells[y0 * w..y1 * w].chunks_exact_mut(w) {
      line[x0..x1].fill(1);
    }
  }

  /// Bounding box of all occupied cells, or None for an all-free mask.
  pub fn bounding_box(&self) -> Option<Rect> {
    let w = self.width as usize;
    let mut min_x = usize::MAX;
    let mut min_y = usize::MAX;
    let mut max_x = 0usize;
    let mut max_y = 0usize;
    let mut any = false;
    for (i, &c) in self.cells.iter().enumerate() {
      if c == 0 {
        continue;
      }
      any = true;
      let (x, y) = (i % w, i / w);
      min_x = min_x.min(x);
      min_y = min_y.min(y);
      max_x = max_x.max(x);
      max_y = max_y.max(y);
    }
    any.then(|| Rect {
      x: min_x as u32,
      y: min_y as u32,
      width: (max_x - min_x + 1) as u32,
      height: (max_y - min_y + 1) as u32,
    })
  }

  /// Occupy the whole content bounding box, turning scattered content into a
  /// solid blocked region (used when the entire chart area must be avoided).
  pub fn fill_bounding_box(&mut self) {
    if let Some(rect) = self.bounding_box() {
      self.fill_rect(&rect);
    }
  }

  /// Mean position of occupied cells, or None for an all-free mask.
  pub fn centroid(&self) -> Option<(f64, f64)> {
    let w = self.width as usize;
    let mut sum_x = 0.0;
    let mut sum_y = 0.0;
    let mut n = 0usize;
    for (i, &c) in self.cells.iter().enumerate() {
      if c != 0 {
        sum_x += (i % w) as f64;
        sum_y += (i / w) as f64;
        n += 1;
      }
    }
    (n > 0).then(|| (sum_x / n as f64, sum_y / n as f64))
  }

  /// Debug visualization: the base image with occupied cells tinted red.
  pub fn render_overlay(&self, base: &RgbaImage) -> Result<RgbaImage> {
    if base.dimensions() != (self.width, self.height) {
      return Err(PlaceError::InvalidConstraint(format!(
        "overlay base {}x{} does not match mask {}x{}",
        base.width(),
        base.height(),
        self.width,
        self.height
      )));
    }
    let mut out = base.clone();
    let tint = [255.0, 0.0, 0.0];
    let alpha = 96.0 / 255.0;
    for (x, y, p) in out.enumerate_pixels_mut() {
      if self.is_occupied(x, y) {
        for i in 0..3 {
          p[i] = (tint[i] * alpha + p[i] as f64 * (1.0 - alpha)).round() as u8;
        }
      }
    }
    Ok(out)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgba;

  fn white_with_black_rect(w: u32, h: u32, rect: Rect) -> RgbaImage {
    let mut img = RgbaImage::from_pixel(w, h, Rgba([255, 255, 255, 255]));
    for y in rect.y..rect.y + rect.height {
      for x in rect.x..rect.x + rect.width {
        img.put_pixel(x, y, Rgba([0, 0, 0, 255]));
      }
    }
    img
  }

  #[test]
  fn blocks_over_content_are_occupied() {
    let rect = Rect { x: 10, y: 10, width: 20, height: 15 };
    let img = white_with_black_rect(60, 45, rect);
    let background = BackgroundColor { rgb: [255, 255, 255], tolerance: 25.0 };
    let params = MaskParams { grid_size: 5, ..MaskParams::default() };
    let mask = OccupancyMask::from_image(&img, &background, &params).unwrap();

    assert!(mask.is_occupied(12, 12));
    assert!(mask.is_occupied(29, 24));
    assert!(!mask.is_occupied(2, 2));
    assert!(!mask.is_occupied(50, 40));
    // content is grid-aligned, so the occupied area matches it exactly
    assert_eq!(mask.occupied_count(), 20 * 15);
  }

  #[test]
  fn transparent_pixels_count_as_background() {
    let mut img = RgbaImage::from_pixel(80, 80, Rgba([0, 0, 0, 0]));
    for y in 20..50 {
      for x in 20..50 {
        img.put_pixel(x, y, Rgba([20, 20, 20, 255]));
      }
    }
    let params = MaskParams { grid_size: 5, ..MaskParams::default() };
    let (mask, background) = OccupancyMask::analyze(&img, &params).unwrap();
    // transparent margin flattens to white, which wins the clustering
    assert!(background.rgb.iter().all(|&c| c > 200));
    assert!(mask.is_occupied(30, 30));
    assert!(!mask.is_occupied(5, 5));
  }

  #[test]
  fn large_images_use_the_coarse_grid() {
    let params = MaskParams::default();
    assert_eq!(params.effective_grid(800, 600), params.grid_size);
    assert_eq!(params.effective_grid(3000, 1800), COARSE_GRID_SIZE);
  }

  #[test]
  fn from_raw_checks_dimensions() {
    assert!(OccupancyMask::from_raw(10, 10, vec![0; 99]).is_err());
    assert!(OccupancyMask::from_raw(0, 10, vec![]).is_err());
    let mask = OccupancyMask::from_raw(4, 2, vec![0, 3, 0, 0, 0, 0, 1, 0]).unwrap();
    // non-zero raw cells normalize to 1
    assert!(mask.is_occupied(1, 0));
    assert!(mask.is_occupied(2, 1));
    assert_eq!(mask.occupied_count(), 2);
  }

  #[test]
  fn bounding_box_and_fill() {
    let mut mask = OccupancyMask::empty(50, 40).unwrap();
    mask.fill_rect(&Rect { x: 10, y: 5, width: 3, height: 2 });
    mask.fill_rect(&Rect { x: 30, y: 20, width: 2, height: 4 });
    let bbox = mask.bounding_box().unwrap();
    assert_eq!(bbox, Rect { x: 10, y: 5, width: 22, height: 19 });

    mask.fill_bounding_box();
    assert_eq!(mask.occupied_count(), 22 * 19);
    assert!(mask.is_occupied(20, 15));
  }

  #[test]
  fn centroid_averages_occupied_cells() {
    let mut mask = OccupancyMask::empty(20, 20).unwrap();
    assert!(mask.centroid().is_none());
    mask.fill_rect(&Rect { x: 4, y: 6, width: 2, height: 2 });
    let (cx, cy) = mask.centroid().unwrap();
    assert!((cx - 4.5).abs() < 1e-9);
    assert!((cy - 6.5).abs() < 1e-9);
  }
}
