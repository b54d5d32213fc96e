//! Learning-curve rendering.

use crate::monitor::{Series, SeriesStore};
use candle::Result;
use plotters::coord::Shift;
use plotters::prelude::*;
use std::ops::Range;
use std::path::{Path, PathBuf};

const SIZE: (u32, u32) = (640, 480);

/// Image format for learning curves.
///
/// PNG is the default. It rasterizes text through the `png` feature (system
/// fonts); builds without that feature default to SVG.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PlotFormat {
    #[cfg_attr(not(feature = "png"), default)]
    Svg,
    #[cfg_attr(feature = "png", default)]
    Png,
}

impl PlotFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            PlotFormat::Svg => "svg",
            PlotFormat::Png => "png",
        }
    }
}

/// Render `<metric>-train` and `<metric>-valid` (whichever exist) into
/// `<dir>/<metric>.<ext>`. Returns `None` when neither series exists.
pub fn plot_metric(
    store: &SeriesStore,
    metric: &str,
    dir: &Path,
    format: PlotFormat,
) -> Result<Option<PathBuf>> {
    let mut lines: Vec<(String, &Series, &'static RGBColor)> = Vec::new();
    for (phase, color) in [("train", &BLUE), ("valid", &RED)] {
        let label = format!("{metric}-{phase}");
        if let Some(series) = store.get(&label) {
            lines.push((label, series, color));
        }
    }
    if lines.is_empty() {
        return Ok(None);
    }

    let path = dir.join(format!("{metric}.{}", format.extension()));
    match format {
        PlotFormat::Svg => {
            let root = SVGBackend::new(&path, SIZE).into_drawing_area();
            draw(&root, metric, &lines).map_err(|e| plot_error(metric, e))?;
        }
        #[cfg(feature = "png")]
        PlotFormat::Png => {
            let root = BitMapBackend::new(&path, SIZE).into_drawing_area();
            draw(&root, metric, &lines).map_err(|e| plot_error(metric, e))?;
        }
        #[cfg(not(feature = "png"))]
        PlotFormat::Png => {
            candle::bail!("plotting `{metric}` as png requires the `png` feature")
        }
    }
    tracing::debug!(metric, path = %path.display(), "saved plot");
    Ok(Some(path))
}

fn plot_error(metric: &str, e: impl std::fmt::Display) -> candle::Error {
    candle::Error::Msg(format!("plotting `{metric}`: {e}"))
}

fn draw<DB: DrawingBackend>(
    root: &DrawingArea<DB, Shift>,
    metric: &str,
    lines: &[(String, &Series, &'static RGBColor)],
) -> std::result::Result<(), DrawingAreaErrorKind<DB::ErrorType>> {
    root.fill(&WHITE)?;

    let points = lines.iter().flat_map(|(_, s, _)| s.points().iter().copied());
    let (x_range, y_range) = ranges(points);

    let mut chart = ChartBuilder::on(root)
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(x_range, y_range)?;

    chart
        .configure_mesh()
        .x_desc("epochs")
        .y_desc(metric)
        .draw()?;

    for (label, series, color) in lines {
        let color: &'static RGBColor = *color;
        chart
            .draw_series(LineSeries::new(
                series.points().iter().map(|&(x, y)| (x as f64, y)),
                color,
            ))?
            .label(label.as_str())
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color));
    }

    chart
        .configure_series_labels()
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK)
        .draw()?;

    root.present()
}

fn ranges(points: impl Iterator<Item = (usize, f64)>) -> (Range<f64>, Range<f64>) {
    let (mut x0, mut x1) = (f64::INFINITY, f64::NEG_INFINITY);
    let (mut y0, mut y1) = (f64::INFINITY, f64::NEG_INFINITY);
    for (x, y) in points {
        let x = x as f64;
        x0 = x0.min(x);
        x1 = x1.max(x);
        if y.is_finite() {
            y0 = y0.min(y);
            y1 = y1.max(y);
        }
    }
    if !x0.is_finite() {
        (x0, x1) = (0.0, 1.0);
    }
    if x1 - x0 < 1.0 {
        x0 -= 0.5;
        x1 += 0.5;
    }
    if !y0.is_finite() {
        (y0, y1) = (0.0, 1.0);
    }
    let pad = if y1 > y0 { (y1 - y0) * 0.05 } else { y0.abs().max(1.0) * 0.05 };
    (x0..x1, (y0 - pad)..(y1 + pad))
}
