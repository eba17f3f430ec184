#![deny(clippy::all)]

//! Automatic compositing of decorative artwork onto rendered canvases.
//!
//! Given only raster pixels, this crate infers which regions of a canvas are
//! occupied by meaningful content and searches for the largest square
//! placement of a secondary image that satisfies a placement policy: keep
//! clear of content ([`Mode::Side`]), keep clear while staying inside a
//! sub-region ([`Mode::Background`]), or deliberately cover content while
//! never touching a protected zone ([`Mode::Overlay`]).
//!
//! The pipeline runs entirely on in-memory pixel buffers:
//!
//! 1. [`estimate_background`] clusters pixel colors and derives the dominant
//!    background color with an adaptive tolerance.
//! 2. [`OccupancyMask`] quantizes the canvas into blocks that are either
//!    content or background.
//! 3. [`expand_mask`] grows content outward by a buffer distance.
//! 4. [`find_placement`] binary-searches candidate sizes and scans positions
//!    on a downsampled grid, returning `(size, x, y)` or the `(0, 0, 0)`
//!    sentinel when nothing fits.
//! 5. [`paste_candidate`] resizes and alpha-composites the winner.
//!
//! Every search is a pure function of its inputs, so independent placements
//! can run concurrently; [`MaskCache`] shares the per-canvas analysis between
//! them.

pub mod background;
pub mod cache;
pub mod color;
pub mod composite;
pub mod error;
pub mod mask;
pub mod morphology;
pub mod placement;

pub use background::{estimate_background, BackgroundColor, BackgroundParams};
pub use cache::{CanvasProfile, MaskCache};
pub use color::{color_distance, parse_hex_color, Color};
pub use composite::{flatten_transparency, frame_on_canvas, paste_candidate, trim_to_content};
pub use error::{PlaceError, Result};
pub use mask::{MaskParams, OccupancyMask, FINE_BACKGROUND_RATIO};
pub use morphology::expand_mask;
pub use placement::{find_placement, Mode, PlacementRequest, PlacementResult, Rect, SearchParams};
