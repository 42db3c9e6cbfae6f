//! Drain current vs gate voltage chart, drawn as SVG and rasterized to PNG
//! with usvg/resvg/tiny-skia.

use std::fmt::Write;

use thiserror::Error;

use crate::analysis::JfetParameters;
use crate::result_set::ResultSet;

const MARGIN_LEFT: f64 = 40.0;
const MARGIN_RIGHT: f64 = 90.0;
const MARGIN_TOP: f64 = 50.0;
const MARGIN_BOTTOM: f64 = 70.0;

#[derive(Debug, Error)]
pub enum ChartError {
    #[error("nothing to plot")]
    Empty,
    #[error("SVG formatting failed")]
    Format(#[from] std::fmt::Error),
    #[error("SVG parse error: {0}")]
    Svg(#[from] usvg::Error),
    #[error("cannot allocate {0}x{1} canvas")]
    Canvas(u32, u32),
    #[error("PNG encoding failed: {0}")]
    Png(String),
}

/// Visible range of both axes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisLimits {
    pub x_min: f64,
    pub x_max: f64,
    pub y_max: f64,
}

/// Snap the gate axis to -0.5/-1/-2/-5 V and the current axis to
/// 2/5/10/20/50/100 mA so charts of similar parts compare at a glance.
pub fn axis_limits(results: &ResultSet) -> AxisLimits {
    let lowest = results
        .samples()
        .iter()
        .map(|s| s.stimulus as f64)
        .fold(0.0, f64::min);
    let highest = results
        .samples()
        .iter()
        .map(|s| s.stimulus as f64)
        .fold(0.0, f64::max);
    let peak = results
        .samples()
        .iter()
        .map(|s| s.response as f64)
        .fold(0.0, f64::max);

    let x_min = if lowest > -0.5 {
        -0.5
    } else if lowest > -1.0 {
        -1.0
    } else if lowest > -2.0 {
        -2.0
    } else if lowest > -5.0 {
        -5.0
    } else {
        lowest.floor()
    };
    let x_max = if highest > 0.0 { highest.ceil() } else { 0.0 };
    let y_max = [2.0, 5.0, 10.0, 20.0, 50.0, 100.0]
        .into_iter()
        .find(|&limit| peak <= limit)
        .unwrap_or_else(|| (peak / 100.0).ceil() * 100.0);
    AxisLimits { x_min, x_max, y_max }
}

/// Roughly `target` ticks over `span`, on a 1/2/5 grid.
fn tick_step(span: f64, target: f64) -> f64 {
    let raw = span / target;
    let magnitude = 10f64.powi(raw.log10().floor() as i32);
    let normalized = raw / magnitude;
    let nice = if normalized <= 1.0 {
        1.0
    } else if normalized <= 2.0 {
        2.0
    } else if normalized <= 5.0 {
        5.0
    } else {
        10.0
    };
    nice * magnitude
}

fn ticks(min: f64, max: f64, step: f64) -> Vec<f64> {
    let first = (min / step).ceil() as i64;
    let last = (max / step + 1e-9).floor() as i64;
    (first..=last).map(|i| i as f64 * step).collect()
}

struct Frame {
    limits: AxisLimits,
    left: f64,
    right: f64,
    top: f64,
    bottom: f64,
}

impl Frame {
    fn x(&self, volts: f64) -> f64 {
        let span = self.limits.x_max - self.limits.x_min;
        self.left + (volts - self.limits.x_min) / span * (self.right - self.left)
    }

    fn y(&self, milliamps: f64) -> f64 {
        self.bottom - milliamps / self.limits.y_max * (self.bottom - self.top)
    }
}

/// Render the sweep as an SVG document.
pub fn render_svg(
    results: &ResultSet,
    params: Option<&JfetParameters>,
    width: u32,
    height: u32,
) -> Result<String, ChartError> {
    if results.is_empty() {
        return Err(ChartError::Empty);
    }
    let limits = axis_limits(results);
    let frame = Frame {
        limits,
        left: MARGIN_LEFT,
        right: width as f64 - MARGIN_RIGHT,
        top: MARGIN_TOP,
        bottom: height as f64 - MARGIN_BOTTOM,
    };

    let mut svg = String::with_capacity(16 * 1024);
    writeln!(
        svg,
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{width}" height="{height}" viewBox="0 0 {width} {height}" font-family="sans-serif">"#
    )?;
    writeln!(svg, r#"<rect width="100%" height="100%" fill="white"/>"#)?;
    writeln!(
        svg,
        r#"<clipPath id="plot"><rect x="{:.2}" y="{:.2}" width="{:.2}" height="{:.2}"/></clipPath>"#,
        frame.left,
        frame.top,
        frame.right - frame.left,
        frame.bottom - frame.top
    )?;

    // grid and tick labels; current axis on the right
    let x_step = tick_step(limits.x_max - limits.x_min, 10.0);
    for v in ticks(limits.x_min, limits.x_max, x_step) {
        let x = frame.x(v);
        writeln!(
            svg,
            r##"<line x1="{x:.2}" y1="{:.2}" x2="{x:.2}" y2="{:.2}" stroke="#d0d0d0" stroke-width="1"/>"##,
            frame.top, frame.bottom
        )?;
        writeln!(
            svg,
            r#"<text x="{x:.2}" y="{:.2}" font-size="12" text-anchor="middle">{}</text>"#,
            frame.bottom + 18.0,
            format_tick(v, x_step)
        )?;
    }
    let y_step = tick_step(limits.y_max, 10.0);
    for i in ticks(0.0, limits.y_max, y_step) {
        let y = frame.y(i);
        writeln!(
            svg,
            r##"<line x1="{:.2}" y1="{y:.2}" x2="{:.2}" y2="{y:.2}" stroke="#d0d0d0" stroke-width="1"/>"##,
            frame.left, frame.right
        )?;
        writeln!(
            svg,
            r#"<text x="{:.2}" y="{:.2}" font-size="12">{}</text>"#,
            frame.right + 6.0,
            y + 4.0,
            format_tick(i, y_step)
        )?;
    }
    writeln!(
        svg,
        r#"<rect x="{:.2}" y="{:.2}" width="{:.2}" height="{:.2}" fill="none" stroke="black" stroke-width="1"/>"#,
        frame.left,
        frame.top,
        frame.right - frame.left,
        frame.bottom - frame.top
    )?;

    // measured curve
    svg.push_str(r#"<g clip-path="url(#plot)">"#);
    svg.push('\n');
    let points: Vec<String> = results
        .samples()
        .iter()
        .map(|s| format!("{:.2},{:.2}", frame.x(s.stimulus as f64), frame.y(s.response as f64)))
        .collect();
    writeln!(
        svg,
        r#"<polyline points="{}" fill="none" stroke="red" stroke-width="1.5"/>"#,
        points.join(" ")
    )?;
    for s in results.samples() {
        writeln!(
            svg,
            r#"<circle cx="{:.2}" cy="{:.2}" r="3.5" fill="blue"/>"#,
            frame.x(s.stimulus as f64),
            frame.y(s.response as f64)
        )?;
    }
    if let Some(p) = params {
        write_markers(&mut svg, &frame, p)?;
    }
    svg.push_str("</g>\n");

    if let Some(p) = params {
        let x = frame.x(limits.x_min * 0.95);
        let legend = [
            format!("Idss = {:.2} mA", p.idss),
            format!("Vds(off) = {:.2} V", p.voff),
            format!("Yfs = {:.2} mA/V", p.yfs),
            format!("Vsat = {:.2} V", p.vsat),
        ];
        for (row, text) in legend.iter().enumerate() {
            let y = frame.y(limits.y_max * (0.9 - 0.1 * row as f64));
            writeln!(svg, r#"<text x="{x:.2}" y="{y:.2}" font-size="14">{text}</text>"#)?;
        }
    }

    writeln!(
        svg,
        r#"<text x="{:.2}" y="{:.2}" font-size="16" text-anchor="middle">N JFET</text>"#,
        (frame.left + frame.right) / 2.0,
        MARGIN_TOP - 16.0
    )?;
    writeln!(
        svg,
        r#"<text x="{:.2}" y="{:.2}" font-size="16" text-anchor="middle">Gate Voltage, V</text>"#,
        (frame.left + frame.right) / 2.0,
        height as f64 - 20.0
    )?;
    let label_x = width as f64 - 20.0;
    let label_y = (frame.top + frame.bottom) / 2.0;
    writeln!(
        svg,
        r#"<text x="{label_x:.2}" y="{label_y:.2}" font-size="16" text-anchor="middle" transform="rotate(-90 {label_x:.2} {label_y:.2})">Drain Current, mA</text>"#
    )?;
    svg.push_str("</svg>\n");
    Ok(svg)
}

/// Dashed guides at Idss, Voff and Voff + Vsat.
fn write_markers(svg: &mut String, frame: &Frame, p: &JfetParameters) -> Result<(), ChartError> {
    let limits = frame.limits;
    let dash = r##"stroke="green" stroke-width="2" stroke-dasharray="6,4""##;
    let idss_y = frame.y(p.idss);
    writeln!(
        svg,
        r#"<line x1="{:.2}" y1="{idss_y:.2}" x2="{:.2}" y2="{idss_y:.2}" {dash}/>"#,
        frame.x(0.0),
        frame.x(limits.x_min * 0.1)
    )?;
    writeln!(
        svg,
        r#"<text x="{:.2}" y="{:.2}" font-size="14">Idss</text>"#,
        frame.x(limits.x_min * 0.16),
        idss_y + 5.0
    )?;
    for (volts, label) in [(p.voff, "Voff"), (p.voff + p.vsat, "Vsat")] {
        let x = frame.x(volts);
        writeln!(
            svg,
            r#"<line x1="{x:.2}" y1="{:.2}" x2="{x:.2}" y2="{:.2}" {dash}/>"#,
            frame.y(0.0),
            frame.y(limits.y_max * 0.1)
        )?;
        writeln!(
            svg,
            r#"<text x="{:.2}" y="{:.2}" font-size="14">{label}</text>"#,
            frame.x(volts + limits.x_min * 0.03),
            frame.y(limits.y_max * 0.11)
        )?;
    }
    Ok(())
}

fn format_tick(value: f64, step: f64) -> String {
    let decimals = if step >= 1.0 { 0 } else { (-step.log10()).ceil() as usize };
    // avoid "-0"
    let value = if value.abs() < step * 1e-6 { 0.0 } else { value };
    format!("{value:.decimals$}")
}

/// Rasterize an SVG document to PNG bytes.
pub fn rasterize(svg: &str) -> Result<Vec<u8>, ChartError> {
    let mut opt = usvg::Options::default();
    opt.fontdb_mut().load_system_fonts();
    let tree = usvg::Tree::from_data(svg.as_bytes(), &opt)?;
    let size = tree.size().to_int_size();
    let mut pixmap = tiny_skia::Pixmap::new(size.width(), size.height())
        .ok_or(ChartError::Canvas(size.width(), size.height()))?;
    let mut canvas = pixmap.as_mut();
    resvg::render(&tree, tiny_skia::Transform::default(), &mut canvas);
    pixmap.encode_png().map_err(|e| ChartError::Png(e.to_string()))
}

/// SVG and PNG in one go.
pub fn render_png(
    results: &ResultSet,
    params: Option<&JfetParameters>,
    width: u32,
    height: u32,
) -> Result<Vec<u8>, ChartError> {
    let svg = render_svg(results, params, width, height)?;
    rasterize(&svg)
}
