use crate::color::Color;
use crate::placement::PlacementResult;
use image::{imageops, imageops::FilterType, Rgba, RgbaImage};

/// Composite every pixel over a solid fill color, producing an opaque image
///
/// Fully transparent pixels become the fill color exactly, translucent pixels
/// are alpha-blended over it: result = pixel * alpha + fill * (1 - alpha).
/// The mask pipeline uses this so that transparency reads as background.
pub fn flatten_transparency(img: &RgbaImage, fill: Color) -> RgbaImage {
  let mut out = img.clone();
  for p in out.pixels_mut() {
    let alpha = p[3] as f64 / 255.0;
    if alpha >= 1.0 {
      continue;
    }
    for i in 0..3 {
      p[i] = (p[i] as f64 * alpha + fill[i] as f64 * (1.0 - alpha)).round() as u8;
    }
    p[3] = 255;
  }
  out
}

/// Resize a candidate to its placed size and alpha-composite it onto the
/// canvas at the placed position. The `(0, 0, 0)` sentinel is a no-op, so
/// callers can pass a search result straight through.
pub fn paste_candidate(canvas: &mut RgbaImage, candidate: &RgbaImage, placement: &PlacementResult) {
  if !placement.is_placed() {
    return;
  }
  if candidate.dimensions() == (placement.size, placement.size) {
    imageops::overlay(canvas, candidate, placement.x as i64, placement.y as i64);
  } else {
    let resized = imageops::resize(candidate, placement.size, placement.size, FilterType::Lanczos3);
    imageops::overlay(canvas, &resized, placement.x as i64, placement.y as i64);
  }
}

/// Crop an image to the bounding box of its non-transparent pixels.
///
/// Candidate artwork ideally arrives already trimmed of transparent margins;
/// this makes that true locally. An all-transparent image collapses to a
/// single transparent pixel.
pub fn trim_to_content(img: &RgbaImage) -> RgbaImage {
  let mut bbox: Option<(u32, u32, u32, u32)> = None;
  for (x, y, p) in img.enumerate_pixels() {
    if p[3] == 0 {
      continue;
    }
    bbox = Some(match bbox {
      None => (x, y, x, y),
      Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
    });
  }
  match bbox {
    None => RgbaImage::from_pixel(1, 1, Rgba([0, 0, 0, 0])),
    Some((x0, y0, x1, y1)) => {
      imageops::crop_imm(img, x0, y0, x1 - x0 + 1, y1 - y0 + 1).to_image()
    }
  }
}

/// Create a fresh canvas with a solid margin around the content, pasting the
/// content centered. Placement coordinates relative to the content shift by
/// `margin` on the framed canvas.
pub fn frame_on_canvas(content: &RgbaImage, margin: u32, fill: Color) -> RgbaImage {
  let mut canvas = RgbaImage::from_pixel(
    content.width() + 2 * margin,
    content.height() + 2 * margin,
    Rgba([fill[0], fill[1], fill[2], 255]),
  );
  imageops::overlay(&mut canvas, content, margin as i64, margin as i64);
  canvas
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn flatten_blends_over_the_fill() {
    let mut img = RgbaImage::from_pixel(2, 1, Rgba([0, 0, 0, 0]));
    img.put_pixel(1, 0, Rgba([100, 100, 100, 128]));
    let flat = flatten_transparency(&img, [255, 255, 255]);
    assert_eq!(*flat.get_pixel(0, 0), Rgba([255, 255, 255, 255]));
    let blended = flat.get_pixel(1, 0);
    assert!(blended[0] > 100 && blended[0] < 255);
    assert_eq!(blended[3], 255);
  }

  #[test]
  fn sentinel_placement_is_a_no_op() {
    let mut canvas = RgbaImage::from_pixel(10, 10, Rgba([255, 255, 255, 255]));
    let before = canvas.clone();
    let candidate = RgbaImage::from_pixel(4, 4, Rgba([0, 0, 0, 255]));
    paste_candidate(&mut canvas, &candidate, &PlacementResult::NONE);
    assert_eq!(canvas, before);
  }

  #[test]
  fn paste_resizes_and_draws_at_the_offset() {
    let mut canvas = RgbaImage::from_pixel(20, 20, Rgba([255, 255, 255, 255]));
    let candidate = RgbaImage::from_pixel(4, 4, Rgba([10, 20, 30, 255]));
    let placement = PlacementResult { size: 8, x: 5, y: 6 };
    paste_candidate(&mut canvas, &candidate, &placement);
    assert_eq!(*canvas.get_pixel(5, 6), Rgba([10, 20, 30, 255]));
    assert_eq!(*canvas.get_pixel(12, 13), Rgba([10, 20, 30, 255]));
    assert_eq!(*canvas.get_pixel(4, 6), Rgba([255, 255, 255, 255]));
    assert_eq!(*canvas.get_pixel(13, 13), Rgba([255, 255, 255, 255]));
  }

  #[test]
  fn trim_crops_to_opaque_content() {
    let mut img = RgbaImage::from_pixel(12, 9, Rgba([0, 0, 0, 0]));
    for y in 2..5 {
      for x in 3..10 {
        img.put_pixel(x, y, Rgba([50, 50, 50, 255]));
      }
    }
    let trimmed = trim_to_content(&img);
    assert_eq!(trimmed.dimensions(), (7, 3));

    let empty = trim_to_content(&RgbaImage::from_pixel(6, 6, Rgba([0, 0, 0, 0])));
    assert_eq!(empty.dimensions(), (1, 1));
  }

  #[test]
  fn framing_adds_the_margin_on_every_side() {
    let content = RgbaImage::from_pixel(10, 8, Rgba([1, 2, 3, 255]));
    let framed = frame_on_canvas(&content, 6, [200, 200, 200]);
    assert_eq!(framed.dimensions(), (22, 20));
    assert_eq!(*framed.get_pixel(0, 0), Rgba([200, 200, 200, 255]));
    assert_eq!(*framed.get_pixel(6, 6), Rgba([1, 2, 3, 255]));
  }
}
