use crate::error::{PlaceError, Result};
use crate::mask::{MaskParams, OccupancyMask};
use crate::morphology::expand_mask;
use image::{imageops, imageops::FilterType, RgbaImage};
use log::{debug, trace};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Axis-aligned rectangle in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
  pub x: u32,
  pub y: u32,
  pub width: u32,
  pub height: u32,
}

/// Placement policy for the candidate image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
  /// Keep clear of canvas content, anywhere inside the padded interior.
  Side,
  /// Keep clear of content while staying inside a containing rectangle.
  Background,
  /// Cover content as completely as possible while never touching the
  /// avoid mask.
  Overlay,
}

impl Mode {
  /// Overlap-ratio threshold that separates feasible from infeasible
  /// placements for this policy.
  pub fn overlap_threshold(self) -> f64 {
    match self {
      Mode::Side => 0.01,
      Mode::Background => 0.05,
      Mode::Overlay => 0.97,
    }
  }

  fn accepts(self, best_ratio: f64) -> bool {
    match self {
      Mode::Side | Mode::Background => best_ratio < self.overlap_threshold(),
      Mode::Overlay => best_ratio >= self.overlap_threshold(),
    }
  }

  fn seeks_content(self) -> bool {
    matches!(self, Mode::Overlay)
  }
}

/// One placement query. Immutable; construct a fresh request per call.
pub struct PlacementRequest<'a> {
  /// Occupancy of the canvas the candidate is placed onto
  pub main_mask: &'a OccupancyMask,
  /// The image to place, ideally trimmed of transparent margins
  pub candidate: &'a RgbaImage,
  /// Minimum distance to the edges of the scan area, in pixels
  pub padding: u32,
  pub mode: Mode,
  /// Sub-region the placement must stay within; required for `Background`
  pub containing_rect: Option<Rect>,
  /// Protected region no placement may intersect; required for `Overlay`
  pub avoid_mask: Option<&'a OccupancyMask>,
  /// Cooperative cancellation, checked between search iterations
  pub cancel: Option<Arc<AtomicBool>>,
}

/// Square placement in the main mask's pixel coordinates. `size == 0` is the
/// sentinel for "no feasible placement"; the caller owns the fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementResult {
  pub size: u32,
  pub x: u32,
  pub y: u32,
}

impl PlacementResult {
  pub const NONE: Self = Self { size: 0, x: 0, y: 0 };

  pub fn is_placed(&self) -> bool {
    self.size > 0
  }
}

/// Tuning knobs for the placement search
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchParams {
  /// Block size of the downsampled scan space, in pixels
  pub scan_grid: u32,
  /// Smallest candidate square worth considering, in pixels
  pub min_size_px: u32,
  /// Buffer distance grown around the candidate's content mask
  pub safety_margin_px: u32,
  /// Mask construction parameters for resized candidates; `grid_size` is
  /// overridden by `scan_grid`
  pub candidate_mask: MaskParams,
}

impl Default for SearchParams {
  fn default() -> Self {
    Self {
      scan_grid: 5,
      min_size_px: 64,
      safety_margin_px: 15,
      candidate_mask: MaskParams::default(),
    }
  }
}

/// Find the largest feasible square placement for a candidate image
///
/// Runs a binary search over candidate sizes; for each size the candidate is
/// resized in memory, mask-built, grown by the safety margin and scanned over
/// every valid top-left position in a block-downsampled grid. A size is kept
/// when the best position satisfies the mode's overlap predicate, and the
/// search then tries larger sizes. The binary search treats feasibility as
/// monotone in size, which is a deliberate heuristic: it keeps the search
/// near-logarithmic at the cost of possibly missing a slightly larger
/// feasible size for pathological mask shapes.
///
/// # Arguments
/// * `req` - The placement query
/// * `params` - Search tuning knobs
///
/// # Returns
/// The best `(size, x, y)` found, or the `(0, 0, 0)` sentinel when no size in
/// range is feasible
pub fn find_placement(req: &PlacementRequest<'_>, params: &SearchParams) -> Result<PlacementResult> {
  validate(req)?;

  let g = params.scan_grid.max(1);
  let gs = g as usize;
  let main = Grid::downsample(req.main_mask, g);
  if main.width == 0 || main.height == 0 {
    debug!("main mask smaller than one scan block, nothing to place");
    return Ok(PlacementResult::NONE);
  }
  let avoid = req.avoid_mask.map(|m| Grid::downsample(m, g));
  let centroid = main.centroid();
  let pad = ((req.padding / g) as usize).max(1);
  let threshold = req.mode.overlap_threshold();
  let cand_params = MaskParams {
    grid_size: g,
    ..params.candidate_mask.clone()
  };

  let mut lo = ((params.min_size_px / g) as i64).max(1);
  let mut hi = main.width.min(main.height) as i64;
  let mut best: Option<(usize, usize, usize)> = None;

  while hi - lo >= 2 {
    if let Some(flag) = &req.cancel {
      if flag.load(Ordering::Relaxed) {
        return Err(PlaceError::Cancelled);
      }
    }

    let mid = ((lo + hi) / 2) as usize;
    let px = (mid * gs) as u32;

    let rect = match req.mode {
      Mode::Background => req.containing_rect.as_ref(),
      _ => None,
    };
    let Some(window) = scan_window(rect, gs, &main, mid, pad) else {
      trace!("size {}px does not fit the scan window", px);
      hi = mid as i64 - 1;
      continue;
    };

    let resized = imageops::resize(req.candidate, px, px, FilterType::Lanczos3);
    let (cand_mask, _) = OccupancyMask::analyze(&resized, &cand_params)?;
    let cand_mask = expand_mask(&cand_mask, params.safety_margin_px);
    let cand = Grid::downsample(&cand_mask, g);

    let scored = scan_positions(&main, avoid.as_ref(), &cand, window, req.mode, threshold, centroid);
    match scored {
      Some(s) if req.mode.accepts(s.ratio) => {
        debug!("size {}px feasible at ({}, {}) with overlap {:.3}", px, s.x * gs, s.y * gs, s.ratio);
        best = Some((mid, s.x, s.y));
        lo = mid as i64 + 1;
      }
      s => {
        trace!("size {}px infeasible (best overlap {:?})", px, s.map(|v| v.ratio));
        hi = mid as i64 - 1;
      }
    }
  }

  Ok(match best {
    Some((size, x, y)) => PlacementResult {
      size: (size * gs) as u32,
      x: (x * gs) as u32,
      y: (y * gs) as u32,
    },
    None => PlacementResult::NONE,
  })
}

fn validate(req: &PlacementRequest<'_>) -> Result<()> {
  if req.candidate.width() == 0 || req.candidate.height() == 0 {
    return Err(PlaceError::InvalidImage("zero-size candidate image".into()));
  }
  if req.mode == Mode::Background && req.containing_rect.is_none() {
    return Err(PlaceError::InvalidConstraint(
      "background mode requires a containing rectangle".into(),
    ));
  }
  if req.mode == Mode::Overlay && req.avoid_mask.is_none() {
    return Err(PlaceError::InvalidConstraint(
      "overlay mode requires an avoid mask".into(),
    ));
  }
  if let Some(avoid) = req.avoid_mask {
    if (avoid.width(), avoid.height()) != (req.main_mask.width(), req.main_mask.height()) {
      return Err(PlaceError::InvalidConstraint(format!(
        "avoid mask {}x{} does not match main mask {}x{}",
        avoid.width(),
        avoid.height(),
        req.main_mask.width(),
        req.main_mask.height()
      )));
    }
  }
  Ok(())
}

/// Block-reduced copy of a mask used only inside the search. A cell is
/// occupied when any mask cell in its surrounding one-block ring is, so
/// content is conservatively inflated by the downsampling itself.
struct Grid {
  width: usize,
  height: usize,
  cells: Vec<u8>,
}

impl Grid {
  fn downsample(mask: &OccupancyMask, grid: u32) -> Self {
    let g = grid as usize;
    let (w, h) = (mask.width() as usize, mask.height() as usize);
    let (width, height) = (w / g, h / g);
    let src = mask.cells();

    let cells: Vec<u8> = (0..height)
      .into_par_iter()
      .flat_map_iter(|i| {
        let y0 = i.saturating_sub(1) * g;
        let y1 = ((i + 2) * g).min(h);
        (0..width).map(move |j| {
          let x0 = j.saturating_sub(1) * g;
          let x1 = ((j + 2) * g).min(w);
          let mut occupied = 0u8;
          'block: for y in y0..y1 {
            for x in x0..x1 {
              if src[y * w + x] != 0 {
                occupied = 1;
                break 'block;
              }
            }
          }
          occupied
        })
      })
      .collect();

    Self { width, height, cells }
  }

  fn count(&self) -> usize {
    self.cells.iter().filter(|&&c| c != 0).count()
  }

  /// Occupied-cell intersection between `cand` and this grid with `cand`'s
  /// top-left corner at `(x0, y0)`. The caller guarantees the footprint fits.
  fn overlap_at(&self, cand: &Grid, x0: usize, y0: usize) -> usize {
    debug_assert!(x0 + cand.width <= self.width && y0 + cand.height <= self.height);
    let mut n = 0;
    for j in 0..cand.height {
      let row = &self.cells[(y0 + j) * self.width + x0..];
      let crow = &cand.cells[j * cand.width..(j + 1) * cand.width];
      for (a, b) in crow.iter().zip(row) {
        if *a != 0 && *b != 0 {
          n += 1;
        }
      }
    }
    n
  }

  /// Mean occupied position, falling back to the grid center for an empty
  /// grid.
  fn centroid(&self) -> (f64, f64) {
    let mut sum_x = 0.0;
    let mut sum_y = 0.0;
    let mut n = 0usize;
    for (i, &c) in self.cells.iter().enumerate() {
      if c != 0 {
        sum_x += (i % self.width) as f64;
        sum_y += (i / self.width) as f64;
        n += 1;
      }
    }
    if n > 0 {
      (sum_x / n as f64, sum_y / n as f64)
    } else {
      (self.width as f64 / 2.0, self.height as f64 / 2.0)
    }
  }
}

/// Inclusive range of valid top-left positions for the current size.
#[derive(Clone, Copy)]
struct Window {
  x0: usize,
  x1: usize,
  y0: usize,
  y1: usize,
}

impl Window {
  fn border_distance(&self, x: usize, y: usize) -> usize {
    (x - self.x0)
      .min(self.x1 - x)
      .min(y - self.y0)
      .min(self.y1 - y)
  }
}

/// Valid scan window for a candidate of `mid` blocks, or None when the size
/// cannot fit. With a containing rectangle the window is restricted to it
/// (clamped to the grid); otherwise it is the padded grid interior.
fn scan_window(
  rect: Option<&Rect>,
  g: usize,
  main: &Grid,
  mid: usize,
  pad: usize,
) -> Option<Window> {
  let (rx, ry, rw, rh) = match rect {
    Some(r) => {
      let rx = r.x as usize / g;
      let ry = r.y as usize / g;
      if rx >= main.width || ry >= main.height {
        return None;
      }
      let rw = (r.width as usize / g).min(main.width - rx);
      let rh = (r.height as usize / g).min(main.height - ry);
      (rx, ry, rw, rh)
    }
    None => (0, 0, main.width, main.height),
  };

  let x1 = (rx + rw).checked_sub(mid + pad)?;
  let y1 = (ry + rh).checked_sub(mid + pad)?;
  let window = Window { x0: rx + pad, x1, y0: ry + pad, y1 };
  (window.x0 <= window.x1 && window.y0 <= window.y1).then_some(window)
}

#[derive(Clone, Copy, Debug)]
struct Scored {
  x: usize,
  y: usize,
  ratio: f64,
  /// Border distance for content-avoiding modes, centroid distance for
  /// content-seeking ones.
  tiebreak: f64,
}

fn scan_before(a: &Scored, b: &Scored) -> bool {
  (a.y, a.x) < (b.y, b.x)
}

/// Strict total order over scanned positions. Content-avoiding modes rank
/// below-threshold positions first and prefer breathing room from the window
/// edges among them; the overlay mode ranks above-threshold positions first
/// and prefers centers close to the content centroid. The final scan-order
/// tiebreak makes the parallel reduction deterministic.
fn better(mode: Mode, threshold: f64, a: &Scored, b: &Scored) -> bool {
  if mode.seeks_content() {
    match (a.ratio >= threshold, b.ratio >= threshold) {
      (true, false) => true,
      (false, true) => false,
      (true, true) => {
        a.tiebreak < b.tiebreak
          || (a.tiebreak == b.tiebreak
            && (a.ratio > b.ratio || (a.ratio == b.ratio && scan_before(a, b))))
      }
      (false, false) => a.ratio > b.ratio || (a.ratio == b.ratio && scan_before(a, b)),
    }
  } else {
    match (a.ratio < threshold, b.ratio < threshold) {
      (true, false) => true,
      (false, true) => false,
      (true, true) => {
        a.tiebreak > b.tiebreak
          || (a.tiebreak == b.tiebreak
            && (a.ratio < b.ratio || (a.ratio == b.ratio && scan_before(a, b))))
      }
      (false, false) => a.ratio < b.ratio || (a.ratio == b.ratio && scan_before(a, b)),
    }
  }
}

/// Score every position in the window and return the best one under the
/// mode's ordering. Positions touching the avoid grid are rejected outright.
fn scan_positions(
  main: &Grid,
  avoid: Option<&Grid>,
  cand: &Grid,
  window: Window,
  mode: Mode,
  threshold: f64,
  centroid: (f64, f64),
) -> Option<Scored> {
  let total = cand.count();

  (window.y0..=window.y1)
    .into_par_iter()
    .filter_map(|y| {
      let mut row_best: Option<Scored> = None;
      for x in window.x0..=window.x1 {
        if let Some(av) = avoid {
          if av.overlap_at(cand, x, y) > 0 {
            continue;
          }
        }
        let overlap = main.overlap_at(cand, x, y);
        let ratio = if total > 0 {
          overlap as f64 / total as f64
        } else {
          1.0
        };
        let tiebreak = if mode.seeks_content() {
          let cx = x as f64 + cand.width as f64 / 2.0;
          let cy = y as f64 + cand.height as f64 / 2.0;
          ((cx - centroid.0).powi(2) + (cy - centroid.1).powi(2)).sqrt()
        } else {
          window.border_distance(x, y) as f64
        };
        let scored = Scored { x, y, ratio, tiebreak };
        if row_best.is_none_or(|b| better(mode, threshold, &scored, &b)) {
          row_best = Some(scored);
        }
      }
      row_best
    })
    .reduce_with(|a, b| if better(mode, threshold, &b, &a) { b } else { a })
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgba;

  fn mask_with_content(w: u32, h: u32, content: Rect) -> OccupancyMask {
    let mut mask = OccupancyMask::empty(w, h).unwrap();
    mask.fill_rect(&content);
    mask
  }

  /// White square with a dark centered core, so the candidate's own mask has
  /// both background and content.
  fn candidate_image(side: u32) -> RgbaImage {
    let mut img = RgbaImage::from_pixel(side, side, Rgba([255, 255, 255, 255]));
    let quarter = side / 4;
    for y in quarter..side - quarter {
      for x in quarter..side - quarter {
        img.put_pixel(x, y, Rgba([20, 24, 30, 255]));
      }
    }
    img
  }

  #[test]
  fn downsampling_inflates_by_one_block_ring() {
    let mask = mask_with_content(50, 50, Rect { x: 20, y: 20, width: 5, height: 5 });
    let grid = Grid::downsample(&mask, 5);
    let at = |x: usize, y: usize| grid.cells[y * grid.width + x] != 0;
    assert_eq!((grid.width, grid.height), (10, 10));
    // the content block plus its ring
    assert!(at(4, 4));
    assert!(at(3, 3));
    assert!(at(5, 5));
    assert!(!at(2, 2));
    assert!(!at(6, 6));
    assert_eq!(grid.count(), 9);
  }

  #[test]
  fn window_rejects_sizes_that_cannot_fit() {
    let mask = mask_with_content(300, 300, Rect { x: 0, y: 0, width: 1, height: 1 });
    let main = Grid::downsample(&mask, 5);
    let rect = Rect { x: 0, y: 0, width: 60, height: 60 };
    // 12 blocks of rectangle cannot hold 12 blocks of size plus padding
    assert!(scan_window(Some(&rect), 5, &main, 12, 4).is_none());
    assert!(scan_window(None, 5, &main, 60, 4).is_none());
    let win = scan_window(None, 5, &main, 20, 4).unwrap();
    assert_eq!((win.x0, win.x1, win.y0, win.y1), (4, 36, 4, 36));
  }

  #[test]
  fn side_ordering_prefers_breathing_room_below_threshold() {
    let clear_far = Scored { x: 10, y: 10, ratio: 0.005, tiebreak: 8.0 };
    let clear_near = Scored { x: 4, y: 4, ratio: 0.0, tiebreak: 0.0 };
    let crowded = Scored { x: 6, y: 6, ratio: 0.4, tiebreak: 20.0 };
    assert!(better(Mode::Side, 0.01, &clear_far, &clear_near));
    assert!(better(Mode::Side, 0.01, &clear_near, &crowded));
    assert!(!better(Mode::Side, 0.01, &crowded, &clear_far));
  }

  #[test]
  fn overlay_ordering_prefers_centered_full_coverage() {
    let full_center = Scored { x: 10, y: 10, ratio: 1.0, tiebreak: 2.0 };
    let full_off = Scored { x: 2, y: 2, ratio: 1.0, tiebreak: 9.0 };
    let partial = Scored { x: 5, y: 5, ratio: 0.5, tiebreak: 0.0 };
    assert!(better(Mode::Overlay, 0.97, &full_center, &full_off));
    assert!(better(Mode::Overlay, 0.97, &full_off, &partial));
  }

  #[test]
  fn background_mode_requires_a_rectangle() {
    let mask = mask_with_content(300, 300, Rect { x: 100, y: 100, width: 100, height: 100 });
    let candidate = candidate_image(50);
    let req = PlacementRequest {
      main_mask: &mask,
      candidate: &candidate,
      padding: 20,
      mode: Mode::Background,
      containing_rect: None,
      avoid_mask: None,
      cancel: None,
    };
    assert!(matches!(
      find_placement(&req, &SearchParams::default()),
      Err(PlaceError::InvalidConstraint(_))
    ));
  }

  #[test]
  fn overlay_mode_requires_a_matching_avoid_mask() {
    let mask = mask_with_content(300, 300, Rect { x: 100, y: 100, width: 100, height: 100 });
    let candidate = candidate_image(50);
    let req = PlacementRequest {
      main_mask: &mask,
      candidate: &candidate,
      padding: 20,
      mode: Mode::Overlay,
      containing_rect: None,
      avoid_mask: None,
      cancel: None,
    };
    assert!(matches!(
      find_placement(&req, &SearchParams::default()),
      Err(PlaceError::InvalidConstraint(_))
    ));

    let mismatched = OccupancyMask::empty(100, 100).unwrap();
    let req = PlacementRequest {
      main_mask: &mask,
      candidate: &candidate,
      padding: 20,
      mode: Mode::Overlay,
      containing_rect: None,
      avoid_mask: Some(&mismatched),
      cancel: None,
    };
    assert!(matches!(
      find_placement(&req, &SearchParams::default()),
      Err(PlaceError::InvalidConstraint(_))
    ));
  }

  #[test]
  fn raised_cancel_flag_stops_the_search() {
    let mask = mask_with_content(300, 300, Rect { x: 100, y: 100, width: 100, height: 100 });
    let candidate = candidate_image(50);
    let flag = Arc::new(AtomicBool::new(true));
    let req = PlacementRequest {
      main_mask: &mask,
      candidate: &candidate,
      padding: 20,
      mode: Mode::Side,
      containing_rect: None,
      avoid_mask: None,
      cancel: Some(flag),
    };
    assert!(matches!(
      find_placement(&req, &SearchParams::default()),
      Err(PlaceError::Cancelled)
    ));
  }

  #[test]
  fn overlay_placement_covers_content_at_its_threshold() {
    let mask = mask_with_content(300, 300, Rect { x: 100, y: 100, width: 100, height: 100 });
    let mut avoid = OccupancyMask::empty(300, 300).unwrap();
    avoid.fill_rect(&Rect { x: 100, y: 100, width: 20, height: 20 });
    let candidate = candidate_image(60);
    let params = SearchParams::default();
    let req = PlacementRequest {
      main_mask: &mask,
      candidate: &candidate,
      padding: 20,
      mode: Mode::Overlay,
      containing_rect: None,
      avoid_mask: Some(&avoid),
      cancel: None,
    };
    let placement = find_placement(&req, &params).unwrap();
    assert!(placement.is_placed());

    // re-derive the scan-space overlap for the chosen size and position
    let g = params.scan_grid;
    let resized = imageops::resize(&candidate, placement.size, placement.size, FilterType::Lanczos3);
    let cand_params = MaskParams { grid_size: g, ..params.candidate_mask.clone() };
    let (cand_mask, _) = OccupancyMask::analyze(&resized, &cand_params).unwrap();
    let cand_mask = expand_mask(&cand_mask, params.safety_margin_px);
    let cand = Grid::downsample(&cand_mask, g);
    let main = Grid::downsample(&mask, g);
    let avoid_grid = Grid::downsample(&avoid, g);

    let (bx, by) = ((placement.x / g) as usize, (placement.y / g) as usize);
    let overlap = main.overlap_at(&cand, bx, by);
    let ratio = overlap as f64 / cand.count() as f64;
    assert!(ratio >= Mode::Overlay.overlap_threshold(), "overlap {:.3}", ratio);
    assert_eq!(avoid_grid.overlap_at(&cand, bx, by), 0);
  }
}
