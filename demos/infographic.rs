//! End-to-end demo: frame a rendered chart, find the best spot for a
//! pictogram and composite the result.
//!
//! ```sh
//! cargo run --example infographic -- chart.png pictogram.png -o out.png
//! RUST_LOG=debug cargo run --example infographic -- chart.png logo.png --mode overlay --avoid 40,40,200,80
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use log::{info, warn};
use pictoplace::{
  find_placement, frame_on_canvas, parse_hex_color, paste_candidate, trim_to_content, MaskCache,
  MaskParams, Mode, OccupancyMask, PlacementRequest, Rect, SearchParams,
};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
  Side,
  Background,
  Overlay,
}

impl From<ModeArg> for Mode {
  fn from(value: ModeArg) -> Self {
    match value {
      ModeArg::Side => Mode::Side,
      ModeArg::Background => Mode::Background,
      ModeArg::Overlay => Mode::Overlay,
    }
  }
}

#[derive(Parser)]
#[command(name = "infographic", about = "Place a pictogram onto a chart and composite the result")]
struct Args {
  /// Rendered chart image
  chart: PathBuf,
  /// Pictogram or title artwork to place
  pictogram: PathBuf,
  /// Output path for the composited infographic
  #[arg(short, long, default_value = "infographic.png")]
  output: PathBuf,
  #[arg(long, value_enum, default_value = "side")]
  mode: ModeArg,
  /// Minimum distance from the placement to the scan area edges, in pixels
  #[arg(long, default_value_t = 50)]
  padding: u32,
  /// Margin added around the chart before placement
  #[arg(long, default_value_t = 50)]
  margin: u32,
  /// Buffer grown around detected chart content, in pixels
  #[arg(long, default_value_t = 5)]
  content_margin: u32,
  /// Canvas fill color as hex, e.g. "#ffffff"
  #[arg(long, default_value = "#ffffff")]
  fill: String,
  /// Protected rectangle "x,y,w,h" in canvas coordinates (required for overlay mode)
  #[arg(long)]
  avoid: Option<String>,
  /// Also write the canvas occupancy overlay next to the output
  #[arg(long)]
  debug_mask: bool,
}

fn parse_rect(spec: &str) -> Result<Rect> {
  let parts: Vec<u32> = spec
    .split(',')
    .map(|p| p.trim().parse::<u32>())
    .collect::<std::result::Result<_, _>>()
    .with_context(|| format!("invalid rectangle '{}'", spec))?;
  if parts.len() != 4 {
    bail!("rectangle must be 'x,y,w,h', got '{}'", spec);
  }
  Ok(Rect { x: parts[0], y: parts[1], width: parts[2], height: parts[3] })
}

fn main() -> Result<()> {
  env_logger::init();
  let args = Args::parse();
  let mode = Mode::from(args.mode);
  let fill = parse_hex_color(&args.fill)?;

  let chart = image::open(&args.chart)
    .with_context(|| format!("failed to load chart {}", args.chart.display()))?
    .to_rgba8();
  let pictogram = image::open(&args.pictogram)
    .with_context(|| format!("failed to load pictogram {}", args.pictogram.display()))?
    .to_rgba8();
  let pictogram = trim_to_content(&pictogram);

  let canvas = frame_on_canvas(&chart, args.margin, fill);

  let params = MaskParams { grid_size: 5, ..MaskParams::default() };
  let cache = MaskCache::new();
  let profile = cache.profile(&canvas, &params, args.content_margin)?;
  info!(
    "canvas {}x{}, background {:?} (tolerance {:.1})",
    canvas.width(),
    canvas.height(),
    profile.background.rgb,
    profile.background.tolerance
  );

  if args.debug_mask {
    let overlay = profile.mask.render_overlay(&canvas)?;
    let path = args.output.with_extension("mask.png");
    overlay.save(&path).with_context(|| format!("failed to save {}", path.display()))?;
    info!("occupancy overlay saved to {}", path.display());
  }

  let containing_rect = match mode {
    Mode::Background => Some(
      profile
        .mask
        .bounding_box()
        .context("chart has no detectable content to place within")?,
    ),
    _ => None,
  };

  let avoid_mask = match (&args.avoid, mode) {
    (Some(spec), _) => {
      let mut mask = OccupancyMask::empty(canvas.width(), canvas.height())?;
      mask.fill_rect(&parse_rect(spec)?);
      Some(mask)
    }
    (None, Mode::Overlay) => bail!("overlay mode requires --avoid x,y,w,h"),
    (None, _) => None,
  };

  let request = PlacementRequest {
    main_mask: &profile.mask,
    candidate: &pictogram,
    padding: args.padding,
    mode,
    containing_rect,
    avoid_mask: avoid_mask.as_ref(),
    cancel: None,
  };
  let placement = find_placement(&request, &SearchParams::default())?;

  let mut out = canvas;
  if placement.is_placed() {
    info!(
      "placing pictogram at ({}, {}) with size {}",
      placement.x, placement.y, placement.size
    );
    paste_candidate(&mut out, &pictogram, &placement);
  } else {
    warn!("no feasible placement found, saving the framed chart unchanged");
  }

  out
    .save(&args.output)
    .with_context(|| format!("failed to save {}", args.output.display()))?;
  info!("infographic saved to {}", args.output.display());
  Ok(())
}
