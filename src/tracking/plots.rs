/// Loss curve figures written at the end of a run
use std::path::Path;

use super::metrics::MetricSeries;
use crate::{MonolabError, Result};

/// Renders metric histories to image files
pub trait PlotRenderer {
    /// 2x2 grid with one panel per metric, train and validation curves over
    /// epochs `0..=max_epochs`
    fn render_grid(&mut self, path: &Path, series: &[MetricSeries], max_epochs: usize) -> Result<()>;

    /// One chart with a curve per named series
    fn render_curves(
        &mut self,
        path: &Path,
        title: &str,
        x_label: &str,
        curves: &[(&str, &[(usize, f64)])],
    ) -> Result<()>;
}

/// PNG figures drawn with plotters
///
/// Needs the `plots` feature (on by default); without it every call fails
/// with `MonolabError::Plot` and the reporter skips the figure. Axis text is
/// only drawn with the `plot-text` feature.
#[derive(Debug, Clone)]
pub struct PngPlotter {
    pub grid_size: (u32, u32),
    pub chart_size: (u32, u32),
}

impl Default for PngPlotter {
    fn default() -> Self {
        Self {
            grid_size: (1280, 960),
            chart_size: (640, 480),
        }
    }
}

impl PlotRenderer for PngPlotter {
    fn render_grid(&mut self, path: &Path, series: &[MetricSeries], max_epochs: usize) -> Result<()> {
        draw_grid(path, self.grid_size, series, max_epochs)
            .map_err(|e| MonolabError::Plot(format!("{}: {}", path.display(), e)))
    }

    fn render_curves(
        &mut self,
        path: &Path,
        title: &str,
        x_label: &str,
        curves: &[(&str, &[(usize, f64)])],
    ) -> Result<()> {
        draw_curves(path, self.chart_size, title, x_label, curves)
            .map_err(|e| MonolabError::Plot(format!("{}: {}", path.display(), e)))
    }
}

/// Padded (min, max) of the values, never an empty interval
#[cfg_attr(not(feature = "plots"), allow(dead_code))]
fn value_range<'a, I: Iterator<Item = &'a (usize, f64)>>(points: I) -> (f64, f64) {
    let (lo, hi) = points
        .map(|(_, v)| *v)
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));

    if !lo.is_finite() {
        return (0.0, 1.0);
    }
    if hi - lo < 1e-12 {
        return (lo - 1.0, hi + 1.0);
    }
    let pad = (hi - lo) * 0.05;
    (lo - pad, hi + pad)
}

/// Captions, tick labels and legends need a font backend
#[cfg(feature = "plots")]
const DRAW_TEXT: bool = cfg!(feature = "plot-text");

#[cfg(feature = "plots")]
fn draw_grid(
    path: &Path,
    size: (u32, u32),
    series: &[MetricSeries],
    max_epochs: usize,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    use plotters::prelude::*;

    let root = BitMapBackend::new(path, size).into_drawing_area();
    root.fill(&WHITE)?;
    let panels = root.split_evenly((2, 2));

    for (metric, area) in series.iter().zip(panels.iter()) {
        let (y_min, y_max) = value_range(metric.train.iter().chain(metric.val.iter()));
        let mut chart = ChartBuilder::on(area)
            .margin(15)
            .x_label_area_size(35)
            .y_label_area_size(60)
            .build_cartesian_2d(0f64..max_epochs.max(1) as f64, y_min..y_max)?;

        let mut mesh = chart.configure_mesh();
        if DRAW_TEXT {
            mesh.x_desc("epoch").y_desc(metric.name.as_str());
        } else {
            mesh.x_labels(0).y_labels(0);
        }
        mesh.draw()?;

        let train = metric.train.iter().map(|&(e, v)| (e as f64, v));
        chart
            .draw_series(LineSeries::new(train, &BLUE))?
            .label("train")
            .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], BLUE.filled()));
        let val = metric.val.iter().map(|&(e, v)| (e as f64, v));
        chart
            .draw_series(LineSeries::new(val, &GREEN))?
            .label("val")
            .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], GREEN.filled()));

        if DRAW_TEXT {
            chart
                .configure_series_labels()
                .position(SeriesLabelPosition::UpperRight)
                .background_style(&WHITE.mix(0.8))
                .border_style(&BLACK)
                .draw()?;
        }
    }

    root.present()?;
    Ok(())
}

#[cfg(feature = "plots")]
fn draw_curves(
    path: &Path,
    size: (u32, u32),
    title: &str,
    x_label: &str,
    curves: &[(&str, &[(usize, f64)])],
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    use plotters::prelude::*;

    let root = BitMapBackend::new(path, size).into_drawing_area();
    root.fill(&WHITE)?;

    let x_max = curves
        .iter()
        .flat_map(|(_, points)| points.iter().map(|(e, _)| *e))
        .max()
        .unwrap_or(1)
        .max(1);
    let (y_min, y_max) = value_range(curves.iter().flat_map(|(_, points)| points.iter()));

    let mut builder = ChartBuilder::on(&root);
    builder.margin(20).x_label_area_size(45).y_label_area_size(60);
    if DRAW_TEXT {
        builder.caption(title, ("sans-serif", 22));
    }
    let mut chart = builder.build_cartesian_2d(0f64..x_max as f64, y_min..y_max)?;

    let mut mesh = chart.configure_mesh();
    if DRAW_TEXT {
        mesh.x_desc(x_label).y_desc("metric");
    } else {
        mesh.x_labels(0).y_labels(0);
    }
    mesh.draw()?;

    for (i, (name, points)) in curves.iter().enumerate() {
        let color = Palette99::pick(i).mix(1.0);
        chart
            .draw_series(LineSeries::new(
                points.iter().map(|&(e, v)| (e as f64, v)),
                &color,
            ))?
            .label(*name)
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color.filled()));
    }

    if DRAW_TEXT {
        chart
            .configure_series_labels()
            .position(SeriesLabelPosition::UpperRight)
            .background_style(&WHITE.mix(0.8))
            .border_style(&BLACK)
            .draw()?;
    }
    root.present()?;
    Ok(())
}

#[cfg(not(feature = "plots"))]
fn draw_grid(
    _path: &Path,
    _size: (u32, u32),
    _series: &[MetricSeries],
    _max_epochs: usize,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    Err("plots feature is not enabled".into())
}

#[cfg(not(feature = "plots"))]
fn draw_curves(
    _path: &Path,
    _size: (u32, u32),
    _title: &str,
    _x_label: &str,
    _curves: &[(&str, &[(usize, f64)])],
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    Err("plots feature is not enabled".into())
}
