//! Projection of raw EPICAL-2 pixel hits onto a quantized xy plane.
//!
//! Each chip covers half of the 1024×1024 plane. Hits on left chips land in
//! the upper half as read; hits on right chips are rotated by 180° into the
//! lower half.

use crate::data::{read_list_branch, write_image_tree};
use crate::error::{Error, Result};
use crate::evaluation::escape;
use std::path::{Path, PathBuf};

/// Pixel columns per chip.
pub const CHIP_COLUMNS: i64 = 1024;
/// Pixel rows per chip.
pub const CHIP_ROWS: i64 = 512;
/// Side of the projected plane, in pixels.
pub const PLANE_SIDE: i64 = 1024;

const FIRST_LANE: i64 = 32;

/// Chip id of lanes 32 to 79.
const LANE_TO_CHIP: [i64; 48] = [
    20, 23, 22, 21, 18, 19, 16, 1, 0, 3, 2, 5, 4, 7, 6, 9, //
    8, 11, 10, 13, 12, 15, 14, 17, 44, 47, 46, 45, 42, 43, 40, 25, //
    24, 27, 26, 29, 28, 31, 30, 33, 32, 35, 34, 37, 36, 39, 38, 41,
];

/// Layer of chips 0 to 47. Two chips share each of the 24 layers.
const CHIP_TO_LAYER: [i64; 48] = [
    22, 22, 20, 20, 18, 18, 16, 16, 14, 14, 12, 12, 10, 10, 8, 8, //
    6, 6, 4, 4, 0, 0, 2, 2, 23, 23, 21, 21, 19, 19, 17, 17, //
    15, 15, 13, 13, 11, 11, 9, 9, 7, 7, 5, 5, 1, 1, 3, 3,
];

pub fn lane_to_chip(lane: i64) -> Result<i64> {
    usize::try_from(lane - FIRST_LANE)
        .ok()
        .and_then(|i| LANE_TO_CHIP.get(i).copied())
        .ok_or(Error::UnknownLane(lane))
}

pub fn chip_to_layer(chip: i64) -> Option<i64> {
    usize::try_from(chip)
        .ok()
        .and_then(|i| CHIP_TO_LAYER.get(i).copied())
}

/// Odd layers are mounted upside down.
pub fn is_inverted_layer(layer: i64) -> bool {
    layer % 2 == 1
}

/// Whether the chip read out on `lane` sits on the left of its layer.
pub fn is_left_chip(lane: i64) -> Result<bool> {
    let chip = lane_to_chip(lane)?;
    let layer = chip_to_layer(chip).ok_or(Error::UnknownLane(lane))?;
    let odd_chip = chip % 2 == 1;
    Ok(odd_chip != is_inverted_layer(layer))
}

/// Raw hits of one event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HitFrame {
    pub columns: Vec<i64>,
    pub rows: Vec<i64>,
    pub lanes: Vec<i64>,
}

impl HitFrame {
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

fn check_hit_lists(frame: &HitFrame) -> Result<()> {
    if frame.rows.len() != frame.len() || frame.lanes.len() != frame.len() {
        return Err(Error::HitListLength {
            columns: frame.columns.len(),
            rows: frame.rows.len(),
            lanes: frame.lanes.len(),
        });
    }
    Ok(())
}

/// Position of a hit on the 1024×1024 plane, as (column, row).
pub fn plane_position(column: i64, row: i64, lane: i64) -> Result<(i64, i64)> {
    if !(0..CHIP_COLUMNS).contains(&column) || !(0..CHIP_ROWS).contains(&row) {
        return Err(Error::HitOutOfRange { column, row });
    }
    if is_left_chip(lane)? {
        Ok((column, row + CHIP_ROWS))
    } else {
        // shifted by one so the two halves do not overlap
        Ok((PLANE_SIDE - 1 - column, CHIP_ROWS - 1 - row))
    }
}

/// Counts the hits of one event per pixel of a `quantization`×`quantization`
/// image, flattened row-major.
pub fn project_event(frame: &HitFrame, quantization: usize) -> Result<Vec<f32>> {
    if quantization == 0 || quantization > PLANE_SIDE as usize {
        return Err(Error::Quantization(quantization));
    }
    check_hit_lists(frame)?;

    let q = quantization as i64;
    let mut image = vec![0f32; quantization * quantization];
    for ((&column, &row), &lane) in frame.columns.iter().zip(&frame.rows).zip(&frame.lanes) {
        let (c, r) = plane_position(column, row, lane)?;
        let m = (r * q / PLANE_SIDE) * q + c * q / PLANE_SIDE;
        image[m as usize] += 1.0;
    }
    Ok(image)
}

/// Reads the `column`, `row` and `lane` branches of a raw hit tree.
pub fn read_hit_tree(path: &Path) -> Result<Vec<HitFrame>> {
    let columns = read_list_branch::<i64>(path, "column")?;
    let rows = read_list_branch::<i64>(path, "row")?;
    let lanes = read_list_branch::<i64>(path, "lane")?;
    Ok(columns
        .into_iter()
        .zip(rows)
        .zip(lanes)
        .map(|((columns, rows), lanes)| HitFrame {
            columns,
            rows,
            lanes,
        })
        .collect())
}

/// Projects every event of the raw tree at `raw_path` and writes the images
/// to `out_path` as the `vars` branch. Returns the number of events.
pub fn project_tree(raw_path: &Path, out_path: &Path, quantization: usize) -> Result<usize> {
    log::info!("Projecting hits from {raw_path:?} onto {quantization}x{quantization} images");
    let frames = read_hit_tree(raw_path)?;
    let mut images = Vec::with_capacity(frames.len());
    for (i, frame) in frames.iter().enumerate() {
        log::trace!("Event {i}: {} hits", frame.len());
        images.push(project_event(frame, quantization)?);
    }
    write_image_tree(out_path, "vars", &images)?;
    log::info!("Wrote {} projected events to {out_path:?}", images.len());
    Ok(images.len())
}

/// A hit placed in the detector stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerHit {
    /// Plane position, see [`plane_position`].
    pub column: i64,
    pub row: i64,
    pub layer: i64,
}

/// Hits of one event with their layer, deepest layer first.
pub fn layer_hits(frame: &HitFrame) -> Result<Vec<LayerHit>> {
    check_hit_lists(frame)?;
    let mut hits = Vec::with_capacity(frame.len());
    for ((&column, &row), &lane) in frame.columns.iter().zip(&frame.rows).zip(&frame.lanes) {
        let layer = chip_to_layer(lane_to_chip(lane)?).ok_or(Error::UnknownLane(lane))?;
        let (column, row) = plane_position(column, row, lane)?;
        hits.push(LayerHit { column, row, layer });
    }
    // stable, so hits keep their readout order within a layer
    hits.sort_by_key(|h| std::cmp::Reverse(h.layer));
    Ok(hits)
}

const N_LAYERS: i64 = CHIP_TO_LAYER.len() as i64 / 2;

/// Draws the hits of one event as an SVG scatter plot in an oblique view of
/// the stack, colored by layer.
pub fn render_event_svg(frame: &HitFrame, title: &str) -> Result<String> {
    const SIZE: f64 = 800.0;
    const MARGIN: f64 = 60.0;
    // screen offset of the deepest layer, along both axes
    const DEPTH: f64 = 180.0;
    let hits = layer_hits(frame)?;

    let span = SIZE - 2.0 * MARGIN - DEPTH;
    let side = PLANE_SIDE as f64;
    let point = |column: f64, row: f64, layer: f64| {
        let d = DEPTH * layer / (N_LAYERS - 1) as f64;
        (
            MARGIN + column / side * span + d,
            SIZE - MARGIN - row / side * span - d,
        )
    };
    let outline = |layer: f64| {
        [(0.0, 0.0), (side, 0.0), (side, side), (0.0, side)]
            .iter()
            .map(|&(c, r)| {
                let (x, y) = point(c, r, layer);
                format!("{x:.1},{y:.1}")
            })
            .collect::<Vec<_>>()
            .join(" ")
    };

    let mut svg = format!(
        "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{SIZE}\" height=\"{SIZE}\" \
         font-family=\"sans-serif\" font-size=\"14\">\n\
         <rect width=\"100%\" height=\"100%\" fill=\"white\"/>\n\
         <text x=\"{}\" y=\"30\" text-anchor=\"middle\" font-size=\"18\">{}</text>\n",
        SIZE / 2.0,
        escape(title),
    );
    for layer in [N_LAYERS - 1, 0] {
        svg.push_str(&format!(
            "<polygon fill=\"none\" stroke=\"gray\" points=\"{}\"/>\n",
            outline(layer as f64)
        ));
    }
    let (x0, y0) = point(side / 2.0, 0.0, 0.0);
    let (x1, y1) = point(0.0, side / 2.0, 0.0);
    let (x2, y2) = point(side, 0.0, (N_LAYERS - 1) as f64 / 2.0);
    svg.push_str(&format!(
        "<text x=\"{x0:.1}\" y=\"{:.1}\" text-anchor=\"middle\">column</text>\n\
         <text x=\"{:.1}\" y=\"{y1:.1}\" text-anchor=\"end\">row</text>\n\
         <text x=\"{:.1}\" y=\"{:.1}\">layer</text>\n\
         <text x=\"{:.1}\" y=\"{:.1}\" text-anchor=\"end\">{} hits</text>\n",
        y0 + 25.0,
        x1 - 10.0,
        x2 + 10.0,
        y2 + 10.0,
        SIZE - MARGIN,
        SIZE - 20.0,
        hits.len(),
    ));

    for hit in &hits {
        let (x, y) = point(hit.column as f64, hit.row as f64, hit.layer as f64);
        let hue = 270.0 * hit.layer as f64 / (N_LAYERS - 1) as f64;
        svg.push_str(&format!(
            "<circle cx=\"{x:.1}\" cy=\"{y:.1}\" r=\"2.5\" fill=\"hsl({hue:.0},80%,45%)\"/>\n"
        ));
    }
    svg.push_str("</svg>\n");
    Ok(svg)
}

/// Path of the display of `event`, next to `output_path`.
pub fn event_display_path(output_path: &Path, event: usize) -> PathBuf {
    let stem = output_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "hits".to_string());
    output_path.with_file_name(format!("{stem}_event{event}.svg"))
}

/// Writes the display of one event of the raw tree at `raw_path` to `svg_path`.
pub fn display_event(raw_path: &Path, event: usize, svg_path: &Path) -> Result<()> {
    let frames = read_hit_tree(raw_path)?;
    let frame = frames.get(event).ok_or(Error::EventIndex {
        event,
        n_events: frames.len(),
    })?;
    let svg = render_event_svg(frame, &format!("Event: {event}"))?;
    std::fs::write(svg_path, svg)?;
    log::info!("Event {event} ({} hits) drawn to {svg_path:?}", frame.len());
    Ok(())
}
