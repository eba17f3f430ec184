use thiserror::Error;

pub type Result<T> = std::result::Result<T, PlaceError>;

/// Errors surfaced by the placement core.
///
/// A search that simply finds no feasible placement is not an error: it returns
/// the `(0, 0, 0)` sentinel and the caller owns the fallback policy. Likewise a
/// degenerate background (single solid color) falls back to the configured
/// minimum tolerance instead of failing.
#[derive(Debug, Error)]
pub enum PlaceError {
  /// Zero-size or otherwise unusable raster input.
  #[error("invalid image: {0}")]
  InvalidImage(String),

  #[error(transparent)]
  Image(#[from] image::ImageError),

  /// Caller contract violation, e.g. background mode without a containing
  /// rectangle or an avoid mask whose dimensions do not match the main mask.
  #[error("invalid constraint: {0}")]
  InvalidConstraint(String),

  /// A color string that could not be parsed.
  #[error("invalid color: {0}")]
  InvalidColor(String),

  /// The cancellation flag was raised between search iterations.
  #[error("placement search cancelled")]
  Cancelled,
}
