use crate::error::{PlaceError, Result};

/// Multiplier to expand hex color shorthand (e.g., F -> FF)
const HEX_SHORTHAND_MULTIPLIER: u8 = 17;

/// RGB color represented as [R, G, B] with values 0-255
pub type Color = [u8; 3];

/// Euclidean distance between two colors in raw RGB space (0-255 per channel).
///
/// All tolerances in this crate are expressed in this space, so a tolerance of
/// 25 means "within 25 units of the background along the RGB diagonal".
pub fn color_distance(a: Color, b: Color) -> f64 {
  (0..3)
    .map(|i| (a[i] as f64 - b[i] as f64).powi(2))
    .sum::<f64>()
    .sqrt()
}

/// Parse a hex color string into RGB
/// Supports: "#ff0000", "ff0000", "#f00", "f00"
pub fn parse_hex_color(hex: &str) -> Result<Color> {
  let hex = hex.trim_start_matches('#');

  let component = |range: std::ops::Range<usize>, name: &str| -> Result<u8> {
    u8::from_str_radix(&hex[range], 16)
      .map_err(|_| PlaceError::InvalidColor(format!("invalid {} component in '{}'", name, hex)))
  };

  let (r, g, b) = match hex.len() {
    3 => {
      // Expand shorthand: "f00" -> "ff0000"
      let r = component(0..1, "red")?;
      let g = component(1..2, "green")?;
      let b = component(2..3, "blue")?;
      (
        r * HEX_SHORTHAND_MULTIPLIER,
        g * HEX_SHORTHAND_MULTIPLIER,
        b * HEX_SHORTHAND_MULTIPLIER,
      )
    }
    6 => {
      let r = component(0..2, "red")?;
      let g = component(2..4, "green")?;
      let b = component(4..6, "blue")?;
      (r, g, b)
    }
    _ => {
      return Err(PlaceError::InvalidColor(format!(
        "hex color must be 3 or 6 characters long (got: {})",
        hex
      )))
    }
  };

  Ok([r, g, b])
}
