use crate::aggregate::percentile;
use crate::config::{OutputFormat, RenderOptions};
use crate::data::Value;
use crate::error::RenderError;
use crate::runtime::ExecOutput;
use crate::spec::{ChartSpec, ChartType};
use image::ImageEncoder;
use plotters::coord::{CoordTranslate, Shift};
use plotters::prelude::*;
use std::f64::consts::PI;
use std::ops::Range;

const HISTOGRAM_BINS: usize = 10;
const MAX_CANVAS_PIXELS: usize = 100_000_000;

static CATEGORY10: [RGBColor; 10] = [
    RGBColor(31, 119, 180),
    RGBColor(255, 127, 14),
    RGBColor(44, 160, 44),
    RGBColor(214, 39, 40),
    RGBColor(148, 103, 189),
    RGBColor(140, 86, 75),
    RGBColor(227, 119, 194),
    RGBColor(127, 127, 127),
    RGBColor(188, 189, 34),
    RGBColor(23, 190, 207),
];

static BLUES: [RGBColor; 5] = [
    RGBColor(8, 48, 107),
    RGBColor(33, 113, 181),
    RGBColor(66, 146, 198),
    RGBColor(107, 174, 214),
    RGBColor(158, 202, 225),
];

static GREENS: [RGBColor; 5] = [
    RGBColor(0, 68, 27),
    RGBColor(35, 139, 69),
    RGBColor(65, 171, 93),
    RGBColor(116, 196, 118),
    RGBColor(161, 217, 155),
];

static REDS: [RGBColor; 5] = [
    RGBColor(103, 0, 13),
    RGBColor(203, 24, 29),
    RGBColor(239, 59, 44),
    RGBColor(251, 106, 74),
    RGBColor(252, 146, 114),
];

/// One drawable series; x is either a numeric value or a category slot
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub name: String,
    pub points: Vec<(f64, f64)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarLayout {
    Single,
    Dodge,
    Stack,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XyMark {
    Line,
    Area,
    Point,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Bin {
    pub start: f64,
    pub end: f64,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoxStats {
    pub lower: f64,
    pub q1: f64,
    pub median: f64,
    pub q3: f64,
    pub upper: f64,
}

/// Chart geometry derived from an execution result, before any drawing
#[derive(Debug, Clone, PartialEq)]
pub enum Plot {
    Bars { categories: Vec<String>, series: Vec<Series>, layout: BarLayout },
    Xy { categories: Option<Vec<String>>, series: Vec<Series>, mark: XyMark },
    Histogram { bins: Vec<Bin> },
    Pie { slices: Vec<(String, f64)> },
    Box { categories: Vec<String>, boxes: Vec<BoxStats> },
}

/// Axis and title text
#[derive(Debug, Clone, PartialEq)]
pub struct Labels {
    pub title: String,
    pub x: String,
    pub y: String,
}

impl Labels {
    pub fn for_chart(spec: &ChartSpec, value_column: &str) -> Self {
        let style = spec.style.as_ref();
        let (default_x, default_y) = match spec.chart_type {
            ChartType::Histogram => (value_column.to_string(), "count".to_string()),
            _ => (spec.x.clone(), value_column.to_string()),
        };
        Self {
            title: style.and_then(|s| s.title.clone()).unwrap_or_default(),
            x: style.and_then(|s| s.x_label.clone()).unwrap_or(default_x),
            y: style.and_then(|s| s.y_label.clone()).unwrap_or(default_y),
        }
    }
}

/// Render an execution result to PNG or SVG bytes
pub fn render_chart(
    output: &ExecOutput,
    spec: &ChartSpec,
    options: &RenderOptions,
) -> Result<Vec<u8>, RenderError> {
    let plot = prepare_plot(output, spec)?;
    let labels = Labels::for_chart(spec, &output.value_column);
    let palette = palette(spec.style.as_ref().and_then(|s| s.color_palette.as_deref()));

    let (width, height) = (options.width, options.height);
    if width == 0 || height == 0 {
        return Err(RenderError::Backend(format!("invalid canvas size {}x{}", width, height)));
    }
    let pixels = (width as usize)
        .checked_mul(height as usize)
        .filter(|&n| n <= MAX_CANVAS_PIXELS)
        .ok_or_else(|| RenderError::Backend(format!("canvas {}x{} is too large", width, height)))?;

    match options.format {
        OutputFormat::Png => {
            let size = pixels
                .checked_mul(3)
                .ok_or_else(|| RenderError::Backend(format!("canvas {}x{} is too large", width, height)))?;
            let mut buffer = vec![0u8; size];
            {
                let root = BitMapBackend::with_buffer(&mut buffer, (width, height)).into_drawing_area();
                draw_plot(&root, &plot, &labels, palette)?;
                root.present().map_err(backend_err)?;
            }
            encode_png(&buffer, width, height)
        }
        OutputFormat::Svg => {
            let mut svg = String::new();
            {
                let root = SVGBackend::with_string(&mut svg, (width, height)).into_drawing_area();
                draw_plot(&root, &plot, &labels, palette)?;
                root.present().map_err(backend_err)?;
            }
            Ok(svg.into_bytes())
        }
    }
}

fn encode_png(buffer: &[u8], width: u32, height: u32) -> Result<Vec<u8>, RenderError> {
    let mut png_bytes = Vec::new();
    image::codecs::png::PngEncoder::new(&mut png_bytes)
        .write_image(buffer, width, height, image::ColorType::Rgb8)
        .map_err(backend_err)?;
    Ok(png_bytes)
}

fn backend_err<E: std::fmt::Display>(e: E) -> RenderError {
    RenderError::Backend(e.to_string())
}

fn palette(name: Option<&str>) -> &'static [RGBColor] {
    let name = name.unwrap_or("").to_ascii_lowercase();
    if name.contains("blue") {
        &BLUES[..]
    } else if name.contains("green") {
        &GREENS[..]
    } else if name.contains("red") {
        &REDS[..]
    } else {
        &CATEGORY10[..]
    }
}

// =============================================================================
// Preparation
// =============================================================================

/// Map the result table onto chart geometry for the spec's chart type
pub fn prepare_plot(output: &ExecOutput, spec: &ChartSpec) -> Result<Plot, RenderError> {
    let table = &output.table;
    let value_idx = table
        .column_index(&output.value_column)
        .ok_or(RenderError::EmptyData)?;
    let values: Vec<Option<f64>> = table.rows.iter().map(|r| r[value_idx].as_f64()).collect();

    let x_idx = table.column_index(&spec.x).ok_or(RenderError::EmptyData)?;
    let group_idx = spec
        .group_by
        .as_ref()
        .filter(|g| *g != &spec.x)
        .and_then(|g| table.column_index(g));

    let xs: Vec<&Value> = table.rows.iter().map(|r| &r[x_idx]).collect();
    let series_keys: Vec<String> = table
        .rows
        .iter()
        .map(|r| match group_idx {
            Some(idx) => r[idx].to_string(),
            None => output.value_column.clone(),
        })
        .collect();

    let plot = match &spec.chart_type {
        // Histograms only need the measure
        ChartType::Histogram => {
            let data: Vec<f64> = values.iter().flatten().copied().collect();
            if data.is_empty() {
                return Err(RenderError::EmptyData);
            }
            Plot::Histogram { bins: histogram_bins(&data, HISTOGRAM_BINS) }
        }
        ChartType::Bar | ChartType::GroupedBar | ChartType::StackedBar => {
            let layout = match (&spec.chart_type, group_idx) {
                (ChartType::StackedBar, Some(_)) => BarLayout::Stack,
                (_, Some(_)) => BarLayout::Dodge,
                _ => BarLayout::Single,
            };
            let (categories, series) = categorical_series(&xs, &series_keys, &values);
            Plot::Bars { categories, series, layout }
        }
        ChartType::Line | ChartType::Area | ChartType::Scatter => {
            let mark = match spec.chart_type {
                ChartType::Line => XyMark::Line,
                ChartType::Area => XyMark::Area,
                _ => XyMark::Point,
            };
            let numeric_x: Option<Vec<f64>> = xs.iter().map(|v| v.as_f64()).collect();
            match numeric_x {
                Some(positions) => {
                    let mut series = group_points(&positions, &series_keys, &values);
                    if mark != XyMark::Point {
                        for s in &mut series {
                            s.points.sort_by(|a, b| a.0.total_cmp(&b.0));
                        }
                    }
                    Plot::Xy { categories: None, series, mark }
                }
                None => {
                    let (categories, series) = categorical_series(&xs, &series_keys, &values);
                    Plot::Xy { categories: Some(categories), series, mark }
                }
            }
        }
        ChartType::Pie => {
            let (categories, totals) = categorical_series(&xs, &vec![String::new(); xs.len()], &values);
            let slices: Vec<(String, f64)> = totals
                .first()
                .map(|s| {
                    s.points
                        .iter()
                        .filter(|(_, v)| *v > 0.0)
                        .map(|(pos, v)| (categories[slot(*pos)].clone(), *v))
                        .collect()
                })
                .unwrap_or_default();
            Plot::Pie { slices }
        }
        ChartType::Box => {
            let categories = distinct_labels(&xs);
            let mut boxes = Vec::with_capacity(categories.len());
            let mut kept = Vec::with_capacity(categories.len());
            for cat in categories {
                let mut ys: Vec<f64> = xs
                    .iter()
                    .zip(&values)
                    .filter(|(x, _)| x.to_string() == cat)
                    .filter_map(|(_, y)| *y)
                    .collect();
                if ys.is_empty() {
                    continue;
                }
                ys.sort_by(f64::total_cmp);
                boxes.push(box_stats(&ys));
                kept.push(cat);
            }
            Plot::Box { categories: kept, boxes }
        }
        ChartType::Other(name) => return Err(RenderError::UnsupportedChartType(name.clone())),
    };

    if plot_is_empty(&plot) {
        return Err(RenderError::EmptyData);
    }
    Ok(plot)
}

fn plot_is_empty(plot: &Plot) -> bool {
    match plot {
        Plot::Bars { series, .. } | Plot::Xy { series, .. } => series.iter().all(|s| s.points.is_empty()),
        Plot::Histogram { bins } => bins.is_empty(),
        Plot::Pie { slices } => slices.is_empty(),
        Plot::Box { boxes, .. } => boxes.is_empty(),
    }
}

fn slot(position: f64) -> usize {
    position.floor() as usize
}

fn distinct_labels(xs: &[&Value]) -> Vec<String> {
    let mut labels: Vec<String> = Vec::new();
    for x in xs {
        let label = x.to_string();
        if !labels.contains(&label) {
            labels.push(label);
        }
    }
    labels
}

/// Category slots in first-appearance order; duplicate (category, series)
/// pairs are summed. Points sit at slot centers (`index + 0.5`).
fn categorical_series(
    xs: &[&Value],
    series_keys: &[String],
    values: &[Option<f64>],
) -> (Vec<String>, Vec<Series>) {
    let categories = distinct_labels(xs);
    let mut series: Vec<Series> = Vec::new();

    for ((x, key), y) in xs.iter().zip(series_keys).zip(values) {
        let Some(y) = y else { continue };
        let Some(cat_idx) = categories.iter().position(|c| *c == x.to_string()) else { continue };
        let pos = cat_idx as f64 + 0.5;

        let idx = match series.iter().position(|s| &s.name == key) {
            Some(i) => i,
            None => {
                series.push(Series { name: key.clone(), points: Vec::new() });
                series.len() - 1
            }
        };
        let points = &mut series[idx].points;
        match points.iter_mut().find(|(p, _)| *p == pos) {
            Some(point) => point.1 += y,
            None => points.push((pos, *y)),
        }
    }

    for s in &mut series {
        s.points.sort_by(|a, b| a.0.total_cmp(&b.0));
    }
    (categories, series)
}

fn group_points(positions: &[f64], series_keys: &[String], values: &[Option<f64>]) -> Vec<Series> {
    let mut series: Vec<Series> = Vec::new();
    for ((x, key), y) in positions.iter().zip(series_keys).zip(values) {
        let Some(y) = y else { continue };
        match series.iter_mut().find(|s| &s.name == key) {
            Some(s) => s.points.push((*x, *y)),
            None => series.push(Series { name: key.clone(), points: vec![(*x, *y)] }),
        }
    }
    series
}

fn histogram_bins(data: &[f64], bin_count: usize) -> Vec<Bin> {
    let min = data.iter().copied().fold(f64::INFINITY, f64::min);
    let max = data.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;
    let width = if range == 0.0 { 1.0 } else { range / bin_count as f64 };
    let count = if range == 0.0 { 1 } else { bin_count };

    let mut bins: Vec<Bin> = (0..count)
        .map(|i| Bin {
            start: min + i as f64 * width,
            end: min + (i + 1) as f64 * width,
            count: 0,
        })
        .collect();

    for &v in data {
        // The maximum falls into the last bin
        let idx = (((v - min) / width).floor() as usize).min(count - 1);
        bins[idx].count += 1;
    }
    bins
}

/// Quartiles with whiskers at the most extreme points within 1.5 IQR
fn box_stats(sorted: &[f64]) -> BoxStats {
    let q1 = percentile(sorted, 0.25);
    let median = percentile(sorted, 0.5);
    let q3 = percentile(sorted, 0.75);
    let iqr = q3 - q1;
    let lower_fence = q1 - 1.5 * iqr;
    let upper_fence = q3 + 1.5 * iqr;

    let lower = sorted.iter().copied().find(|&v| v >= lower_fence).unwrap_or(q1);
    let upper = sorted.iter().rev().copied().find(|&v| v <= upper_fence).unwrap_or(q3);

    BoxStats { lower, q1, median, q3, upper }
}

// =============================================================================
// Drawing
// =============================================================================

fn padded_range(min: f64, max: f64) -> Range<f64> {
    if !min.is_finite() || !max.is_finite() {
        return 0.0..1.0;
    }
    if min == max {
        (min - 1.0)..(max + 1.0)
    } else {
        let padding = (max - min) * 0.05;
        (min - padding)..(max + padding)
    }
}

/// Value axis that always includes zero, for bars and areas
fn zero_based_range(values: impl Iterator<Item = f64>) -> Range<f64> {
    let (min, max) = values.fold((0.0f64, 0.0f64), |(lo, hi), v| (lo.min(v), hi.max(v)));
    padded_range(min, max)
}

fn draw_plot<DB: DrawingBackend>(
    root: &DrawingArea<DB, Shift>,
    plot: &Plot,
    labels: &Labels,
    palette: &[RGBColor],
) -> Result<(), RenderError> {
    root.fill(&WHITE).map_err(backend_err)?;

    match plot {
        Plot::Bars { categories, series, layout } => draw_bars(root, categories, series, *layout, labels, palette),
        Plot::Xy { categories, series, mark } => draw_xy(root, categories.as_deref(), series, *mark, labels, palette),
        Plot::Histogram { bins } => draw_histogram(root, bins, labels, palette),
        Plot::Pie { slices } => draw_pie(root, slices, labels, palette),
        Plot::Box { categories, boxes } => draw_boxes(root, categories, boxes, labels, palette),
    }
}

fn category_label(categories: &[String], x: f64) -> String {
    if x < 0.0 {
        return String::new();
    }
    categories.get(x as usize).cloned().unwrap_or_default()
}

fn draw_bars<DB: DrawingBackend>(
    root: &DrawingArea<DB, Shift>,
    categories: &[String],
    series: &[Series],
    layout: BarLayout,
    labels: &Labels,
    palette: &[RGBColor],
) -> Result<(), RenderError> {
    let y_range = match layout {
        BarLayout::Stack => {
            // Positive and negative parts stack separately
            let mut tops = vec![0.0f64; categories.len()];
            let mut bottoms = vec![0.0f64; categories.len()];
            for s in series {
                for &(pos, y) in &s.points {
                    if y >= 0.0 { tops[slot(pos)] += y } else { bottoms[slot(pos)] += y }
                }
            }
            zero_based_range(tops.into_iter().chain(bottoms))
        }
        _ => zero_based_range(series.iter().flat_map(|s| s.points.iter().map(|p| p.1))),
    };

    let x_range = 0.0..(categories.len() as f64);
    let mut chart = ChartBuilder::on(root)
        .margin(10)
        .caption(&labels.title, ("sans-serif", 20))
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(x_range, y_range)
        .map_err(backend_err)?;

    chart
        .configure_mesh()
        .x_labels(categories.len())
        .x_label_formatter(&|x| category_label(categories, *x))
        .x_desc(labels.x.as_str())
        .y_desc(labels.y.as_str())
        .draw()
        .map_err(backend_err)?;

    let n_series = series.len().max(1) as f64;
    let mut pos_stack = vec![0.0f64; categories.len()];
    let mut neg_stack = vec![0.0f64; categories.len()];

    for (idx, s) in series.iter().enumerate() {
        let color = palette[idx % palette.len()];
        let rects: Vec<Rectangle<(f64, f64)>> = s
            .points
            .iter()
            .map(|&(pos, y)| {
                let (left, right, base) = match layout {
                    BarLayout::Single => (pos - 0.4, pos + 0.4, 0.0),
                    BarLayout::Dodge => {
                        let width = 0.8 / n_series;
                        let left = pos - 0.4 + idx as f64 * width;
                        (left, left + width, 0.0)
                    }
                    BarLayout::Stack => {
                        let stack = if y >= 0.0 { &mut pos_stack } else { &mut neg_stack };
                        let base = stack[slot(pos)];
                        stack[slot(pos)] += y;
                        (pos - 0.4, pos + 0.4, base)
                    }
                };
                Rectangle::new([(left, base), (right, base + y)], color.filled())
            })
            .collect();

        let anno = chart.draw_series(rects).map_err(backend_err)?;
        if series.len() > 1 {
            anno.label(s.name.as_str())
                .legend(move |(x, y)| Rectangle::new([(x, y - 5), (x + 10, y + 5)], color.filled()));
        }
    }

    if series.len() > 1 {
        draw_legend(&mut chart)?;
    }
    Ok(())
}

fn draw_legend<'a, DB: DrawingBackend + 'a, CT: CoordTranslate>(
    chart: &mut ChartContext<'a, DB, CT>,
) -> Result<(), RenderError> {
    chart
        .configure_series_labels()
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK)
        .draw()
        .map_err(backend_err)
}

fn draw_xy<DB: DrawingBackend>(
    root: &DrawingArea<DB, Shift>,
    categories: Option<&[String]>,
    series: &[Series],
    mark: XyMark,
    labels: &Labels,
    palette: &[RGBColor],
) -> Result<(), RenderError> {
    let points = || series.iter().flat_map(|s| s.points.iter());

    let x_range = match categories {
        Some(cats) => 0.0..(cats.len() as f64),
        None => {
            let min = points().map(|p| p.0).fold(f64::INFINITY, f64::min);
            let max = points().map(|p| p.0).fold(f64::NEG_INFINITY, f64::max);
            padded_range(min, max)
        }
    };
    let y_range = if mark == XyMark::Area {
        zero_based_range(points().map(|p| p.1))
    } else {
        let min = points().map(|p| p.1).fold(f64::INFINITY, f64::min);
        let max = points().map(|p| p.1).fold(f64::NEG_INFINITY, f64::max);
        padded_range(min, max)
    };

    let mut chart = ChartBuilder::on(root)
        .margin(10)
        .caption(&labels.title, ("sans-serif", 20))
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(x_range, y_range)
        .map_err(backend_err)?;

    {
        let formatter = |x: &f64| category_label(categories.unwrap_or(&[]), *x);
        let mut mesh = chart.configure_mesh();
        mesh.x_desc(labels.x.as_str()).y_desc(labels.y.as_str());
        if let Some(cats) = categories {
            mesh.x_labels(cats.len()).x_label_formatter(&formatter);
        }
        mesh.draw().map_err(backend_err)?;
    }

    for (idx, s) in series.iter().enumerate() {
        let color = palette[idx % palette.len()];
        let data = s.points.clone();
        let anno = match mark {
            XyMark::Line => chart
                .draw_series(LineSeries::new(data, color.stroke_width(2)))
                .map_err(backend_err)?,
            XyMark::Area => chart
                .draw_series(
                    AreaSeries::new(data, 0.0, color.mix(0.3).filled()).border_style(color.stroke_width(2)),
                )
                .map_err(backend_err)?,
            XyMark::Point => chart
                .draw_series(data.into_iter().map(|p| Circle::new(p, 3, color.filled())))
                .map_err(backend_err)?,
        };
        if series.len() > 1 {
            anno.label(s.name.as_str())
                .legend(move |(x, y)| Rectangle::new([(x, y - 5), (x + 10, y + 5)], color.filled()));
        }
    }

    if series.len() > 1 {
        draw_legend(&mut chart)?;
    }
    Ok(())
}

fn draw_histogram<DB: DrawingBackend>(
    root: &DrawingArea<DB, Shift>,
    bins: &[Bin],
    labels: &Labels,
    palette: &[RGBColor],
) -> Result<(), RenderError> {
    let start = bins.first().map(|b| b.start).unwrap_or(0.0);
    let end = bins.last().map(|b| b.end).unwrap_or(1.0);
    let max_count = bins.iter().map(|b| b.count).max().unwrap_or(0) as f64;

    let mut chart = ChartBuilder::on(root)
        .margin(10)
        .caption(&labels.title, ("sans-serif", 20))
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(start..end, 0.0..(max_count * 1.05).max(1.0))
        .map_err(backend_err)?;

    chart
        .configure_mesh()
        .x_desc(labels.x.as_str())
        .y_desc(labels.y.as_str())
        .draw()
        .map_err(backend_err)?;

    let color = palette[0];
    chart
        .draw_series(bins.iter().map(|b| {
            Rectangle::new([(b.start, 0.0), (b.end, b.count as f64)], color.mix(0.8).filled())
        }))
        .map_err(backend_err)?;
    Ok(())
}

fn draw_boxes<DB: DrawingBackend>(
    root: &DrawingArea<DB, Shift>,
    categories: &[String],
    boxes: &[BoxStats],
    labels: &Labels,
    palette: &[RGBColor],
) -> Result<(), RenderError> {
    let min = boxes.iter().map(|b| b.lower).fold(f64::INFINITY, f64::min);
    let max = boxes.iter().map(|b| b.upper).fold(f64::NEG_INFINITY, f64::max);

    let mut chart = ChartBuilder::on(root)
        .margin(10)
        .caption(&labels.title, ("sans-serif", 20))
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(0.0..(categories.len() as f64), padded_range(min, max))
        .map_err(backend_err)?;

    chart
        .configure_mesh()
        .x_labels(categories.len())
        .x_label_formatter(&|x| category_label(categories, *x))
        .x_desc(labels.x.as_str())
        .y_desc(labels.y.as_str())
        .draw()
        .map_err(backend_err)?;

    for (idx, b) in boxes.iter().enumerate() {
        let color = palette[idx % palette.len()];
        let center = idx as f64 + 0.5;
        let (left, right) = (center - 0.3, center + 0.3);

        chart
            .draw_series(std::iter::once(Rectangle::new(
                [(left, b.q1), (right, b.q3)],
                color.mix(0.4).filled(),
            )))
            .map_err(backend_err)?;
        chart
            .draw_series(vec![
                PathElement::new(vec![(left, b.median), (right, b.median)], BLACK.stroke_width(2)),
                PathElement::new(vec![(center, b.lower), (center, b.q1)], color.stroke_width(1)),
                PathElement::new(vec![(center, b.q3), (center, b.upper)], color.stroke_width(1)),
                PathElement::new(vec![(center - 0.1, b.lower), (center + 0.1, b.lower)], color.stroke_width(1)),
                PathElement::new(vec![(center - 0.1, b.upper), (center + 0.1, b.upper)], color.stroke_width(1)),
            ])
            .map_err(backend_err)?;
    }
    Ok(())
}

fn draw_pie<DB: DrawingBackend>(
    root: &DrawingArea<DB, Shift>,
    slices: &[(String, f64)],
    labels: &Labels,
    palette: &[RGBColor],
) -> Result<(), RenderError> {
    let (width, height) = root.dim_in_pixel();
    let (w, h) = (width as i32, height as i32);

    if !labels.title.is_empty() {
        root.draw(&Text::new(labels.title.as_str(), (10, 10), ("sans-serif", 20).into_font()))
            .map_err(backend_err)?;
    }

    let center = (w / 3, h / 2);
    let radius = (w.min(h) as f64) * 0.35;
    let total: f64 = slices.iter().map(|s| s.1).sum();

    let mut angle = -PI / 2.0;
    for (idx, (label, value)) in slices.iter().enumerate() {
        let color = palette[idx % palette.len()];
        let sweep = value / total * 2.0 * PI;
        let steps = ((sweep / (2.0 * PI)) * 120.0).ceil().max(2.0) as usize;

        let mut wedge = vec![center];
        for step in 0..=steps {
            let a = angle + sweep * step as f64 / steps as f64;
            wedge.push((
                center.0 + (radius * a.cos()).round() as i32,
                center.1 + (radius * a.sin()).round() as i32,
            ));
        }
        root.draw(&Polygon::new(wedge, color.filled())).map_err(backend_err)?;
        angle += sweep;

        // Legend entry
        let y = 40 + idx as i32 * 20;
        let x = (w * 2) / 3;
        root.draw(&Rectangle::new([(x, y), (x + 12, y + 12)], color.filled()))
            .map_err(backend_err)?;
        let text = format!("{} ({:.1}%)", label, value / total * 100.0);
        root.draw(&Text::new(text, (x + 18, y), ("sans-serif", 14).into_font()))
            .map_err(backend_err)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Table;
    use crate::spec::Aggregation;

    fn s(v: &str) -> Value {
        Value::Str(v.to_string())
    }

    fn grouped_output() -> (ExecOutput, ChartSpec) {
        let table = Table::new(
            vec!["category".to_string(), "region".to_string(), "sum_price".to_string()],
            vec![
                vec![s("A"), s("east"), Value::Float(20.0)],
                vec![s("A"), s("west"), Value::Float(10.0)],
                vec![s("B"), s("east"), Value::Float(5.0)],
            ],
        );
        let mut spec = ChartSpec::new(ChartType::StackedBar, "category", "price", Aggregation::Sum);
        spec.group_by = Some("region".to_string());
        (ExecOutput { table, value_column: "sum_price".to_string() }, spec)
    }

    #[test]
    fn test_prepare_stacked_bars() {
        let (output, spec) = grouped_output();
        let plot = prepare_plot(&output, &spec).unwrap();
        match plot {
            Plot::Bars { categories, series, layout } => {
                assert_eq!(categories, vec!["A", "B"]);
                assert_eq!(layout, BarLayout::Stack);
                assert_eq!(series.len(), 2);
                assert_eq!(series[0].name, "east");
                assert_eq!(series[0].points, vec![(0.5, 20.0), (1.5, 5.0)]);
                assert_eq!(series[1].points, vec![(0.5, 10.0)]);
            }
            other => panic!("Expected bars, got {:?}", other),
        }
    }

    #[test]
    fn test_prepare_bar_with_group_dodges() {
        let (output, mut spec) = grouped_output();
        spec.chart_type = ChartType::Bar;
        match prepare_plot(&output, &spec).unwrap() {
            Plot::Bars { layout, .. } => assert_eq!(layout, BarLayout::Dodge),
            other => panic!("Expected bars, got {:?}", other),
        }
    }

    #[test]
    fn test_prepare_numeric_line_sorted() {
        let table = Table::new(
            vec!["year".to_string(), "price".to_string()],
            vec![
                vec![Value::Int(2021), Value::Float(3.0)],
                vec![Value::Int(2020), Value::Float(1.0)],
                vec![Value::Int(2022), Value::Null],
            ],
        );
        let spec = ChartSpec::new(ChartType::Line, "year", "price", Aggregation::None);
        let output = ExecOutput { table, value_column: "price".to_string() };
        match prepare_plot(&output, &spec).unwrap() {
            Plot::Xy { categories, series, mark } => {
                assert!(categories.is_none());
                assert_eq!(mark, XyMark::Line);
                assert_eq!(series[0].points, vec![(2020.0, 1.0), (2021.0, 3.0)]);
            }
            other => panic!("Expected xy, got {:?}", other),
        }
    }

    #[test]
    fn test_prepare_histogram_bins() {
        let bins = histogram_bins(&[0.0, 1.0, 2.0, 10.0], 10);
        assert_eq!(bins.len(), 10);
        assert_eq!(bins.iter().map(|b| b.count).sum::<usize>(), 4);
        assert_eq!(bins[9].count, 1);
        assert_eq!(bins[0].count, 1);

        let flat = histogram_bins(&[3.0, 3.0], 10);
        assert_eq!(flat.len(), 1);
        assert_eq!(flat[0].count, 2);
    }

    #[test]
    fn test_prepare_pie_skips_non_positive() {
        let table = Table::new(
            vec!["k".to_string(), "count_v".to_string()],
            vec![
                vec![s("a"), Value::Int(3)],
                vec![s("b"), Value::Int(0)],
                vec![s("c"), Value::Int(1)],
            ],
        );
        let spec = ChartSpec::new(ChartType::Pie, "k", "v", Aggregation::Count);
        let output = ExecOutput { table, value_column: "count_v".to_string() };
        assert_eq!(
            prepare_plot(&output, &spec).unwrap(),
            Plot::Pie { slices: vec![("a".to_string(), 3.0), ("c".to_string(), 1.0)] }
        );
    }

    #[test]
    fn test_box_stats() {
        let stats = box_stats(&[1.0, 2.0, 3.0, 4.0, 100.0]);
        assert_eq!(stats.median, 3.0);
        assert_eq!(stats.q1, 2.0);
        assert_eq!(stats.q3, 4.0);
        assert_eq!(stats.lower, 1.0);
        assert_eq!(stats.upper, 4.0);
    }

    #[test]
    fn test_unsupported_chart_type() {
        let (output, mut spec) = grouped_output();
        spec.chart_type = ChartType::Other("radar".to_string());
        assert_eq!(
            render_chart(&output, &spec, &RenderOptions::default()),
            Err(RenderError::UnsupportedChartType("radar".to_string()))
        );
    }

    #[test]
    fn test_no_plottable_values() {
        let table = Table::new(
            vec!["k".to_string(), "v".to_string()],
            vec![vec![s("a"), Value::Null]],
        );
        let spec = ChartSpec::new(ChartType::Bar, "k", "v", Aggregation::None);
        let output = ExecOutput { table, value_column: "v".to_string() };
        assert_eq!(prepare_plot(&output, &spec), Err(RenderError::EmptyData));
    }

    #[test]
    fn test_labels_prefer_style() {
        let (_, mut spec) = grouped_output();
        assert_eq!(Labels::for_chart(&spec, "sum_price").y, "sum_price");
        spec.style = Some(crate::spec::ChartStyle {
            title: Some("Revenue".to_string()),
            y_label: Some("Total".to_string()),
            ..Default::default()
        });
        let labels = Labels::for_chart(&spec, "sum_price");
        assert_eq!(labels.title, "Revenue");
        assert_eq!(labels.x, "category");
        assert_eq!(labels.y, "Total");
    }

    #[test]
    fn test_oversized_canvas_is_an_error() {
        let (output, spec) = grouped_output();
        for format in [OutputFormat::Png, OutputFormat::Svg] {
            let options = RenderOptions { width: 70_000, height: 70_000, format };
            assert!(matches!(
                render_chart(&output, &spec, &options),
                Err(RenderError::Backend(msg)) if msg.contains("too large")
            ));
        }
        let options = RenderOptions { width: u32::MAX, height: u32::MAX, format: OutputFormat::Png };
        assert!(matches!(render_chart(&output, &spec, &options), Err(RenderError::Backend(_))));
    }

    #[test]
    fn test_prepare_histogram_plot() {
        let (output, mut spec) = grouped_output();
        spec.chart_type = ChartType::Histogram;
        match prepare_plot(&output, &spec).unwrap() {
            Plot::Histogram { bins } => {
                assert_eq!(bins.len(), HISTOGRAM_BINS);
                assert_eq!(bins.iter().map(|b| b.count).sum::<usize>(), 3);
            }
            other => panic!("Expected histogram, got {:?}", other),
        }
        assert_eq!(Labels::for_chart(&spec, "sum_price").x, "sum_price");
    }

    #[test]
    fn test_render_png_signature() {
        let (output, spec) = grouped_output();
        let options = RenderOptions { width: 320, height: 240, ..Default::default() };
        match render_chart(&output, &spec, &options) {
            Ok(bytes) => assert_eq!(&bytes[0..8], &[137, 80, 78, 71, 13, 10, 26, 10]),
            // Hosts without system fonts cannot lay out text
            Err(RenderError::Backend(_)) => {}
            Err(e) => panic!("Unexpected render error: {}", e),
        }
    }
}
