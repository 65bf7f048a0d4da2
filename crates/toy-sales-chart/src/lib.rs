//! Chart figures for the sales dashboard and their SVG and PNG renderings.
//!
//! A [`Figure`] is the declarative description of one chart. [`Frame`] maps
//! figure coordinates to pixels and is shared by both renderers, so the
//! exported PNG lines up with the SVG shown in the page.

mod raster;
mod svg;

use serde::{Deserialize, Serialize};
use toy_sales_core::{Aggregates, DateQuantity, ProductRevenue};

pub use raster::render_png;
pub use svg::{escape_text, render_svg};

pub const CHART_WIDTH: u32 = 900;
pub const CHART_HEIGHT: u32 = 450;

const MARGIN_LEFT: f64 = 80.0;
const MARGIN_RIGHT: f64 = 30.0;
const MARGIN_TOP: f64 = 60.0;
const MARGIN_BOTTOM: f64 = 70.0;
const MARGIN_BOTTOM_ROTATED: f64 = 150.0;
const LINE_X_PADDING: f64 = 30.0;
const BAR_FILL_RATIO: f64 = 0.7;
const Y_TICK_COUNT: u32 = 5;

const SERIES_COLOR: [u8; 3] = [0x63, 0x6e, 0xfa];
const PLOT_BACKGROUND: [u8; 3] = [0xe5, 0xec, 0xf6];
const GRID_COLOR: [u8; 3] = [0xff, 0xff, 0xff];
const AXIS_COLOR: [u8; 3] = [0x44, 0x44, 0x44];
const TEXT_COLOR: [u8; 3] = [0x2a, 0x3f, 0x5f];

#[derive(Debug, thiserror::Error)]
pub enum ChartError {
    #[error("failed to load chart font: {0}")]
    Font(#[from] ab_glyph::InvalidFont),
    #[error("failed to encode chart image: {0}")]
    Encode(#[from] image::ImageError),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ChartKind {
    Bar,
    Line,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum HoverMode {
    Closest,
    XUnified,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Point {
    pub label: String,
    /// Category index for bar charts, days since the first point for lines.
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Figure {
    pub kind: ChartKind,
    pub title: String,
    pub x_label: String,
    pub y_label: String,
    pub x_tick_angle: i32,
    pub value_labels: bool,
    pub markers: bool,
    pub hover_mode: HoverMode,
    pub points: Vec<Point>,
}

impl Figure {
    /// Bar chart of revenue per product, bars labeled with rounded revenue.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn revenue_by_product(entries: &[ProductRevenue]) -> Self {
        Self {
            kind: ChartKind::Bar,
            title: "Выручка по товарам".to_string(),
            x_label: "product_name".to_string(),
            y_label: "Выручка (руб)".to_string(),
            x_tick_angle: -45,
            value_labels: true,
            markers: false,
            hover_mode: HoverMode::Closest,
            points: entries
                .iter()
                .enumerate()
                .map(|(index, entry)| Point {
                    label: entry.product_name.clone(),
                    x: index as f64,
                    y: entry.revenue,
                })
                .collect(),
        }
    }

    /// Line chart with markers of quantity sold per day.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn sales_trend(entries: &[DateQuantity]) -> Self {
        let first = entries.first().map(|entry| entry.date);
        Self {
            kind: ChartKind::Line,
            title: "Динамика продаж".to_string(),
            x_label: "date".to_string(),
            y_label: "Количество".to_string(),
            x_tick_angle: 0,
            value_labels: false,
            markers: true,
            hover_mode: HoverMode::XUnified,
            points: entries
                .iter()
                .map(|entry| Point {
                    label: entry.date.to_string(),
                    x: first.map_or(0.0, |first| (entry.date - first).whole_days() as f64),
                    y: entry.quantity as f64,
                })
                .collect(),
        }
    }
}

/// The two exportable charts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum ExportTarget {
    RevenueByProduct,
    SalesTrend,
}

impl ExportTarget {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RevenueByProduct => "revenue-by-product",
            Self::SalesTrend => "sales-trend",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "revenue-by-product" => Some(Self::RevenueByProduct),
            "sales-trend" => Some(Self::SalesTrend),
            _ => None,
        }
    }

    #[must_use]
    pub fn file_name(self) -> &'static str {
        match self {
            Self::RevenueByProduct => "revenue_by_product.png",
            Self::SalesTrend => "sales_trend.png",
        }
    }

    #[must_use]
    pub fn figure(self, aggregates: &Aggregates) -> Figure {
        match self {
            Self::RevenueByProduct => Figure::revenue_by_product(&aggregates.product_revenue),
            Self::SalesTrend => Figure::sales_trend(&aggregates.date_quantity),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Pixel layout of a figure on a canvas of a given size.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub width: f64,
    pub height: f64,
    pub plot: Rect,
    pub y_max: f64,
    kind: ChartKind,
    count: usize,
    x_min: f64,
    x_max: f64,
}

impl Frame {
    #[must_use]
    pub fn new(figure: &Figure, width: u32, height: u32) -> Self {
        let width = f64::from(width);
        let height = f64::from(height);
        let bottom = if figure.x_tick_angle == 0 { MARGIN_BOTTOM } else { MARGIN_BOTTOM_ROTATED };

        let data_max = figure.points.iter().map(|point| point.y).fold(0.0_f64, f64::max);
        let headroom = if figure.value_labels { 1.1 } else { 1.0 };
        let x_min = figure.points.iter().map(|point| point.x).fold(f64::INFINITY, f64::min);
        let x_max = figure.points.iter().map(|point| point.x).fold(f64::NEG_INFINITY, f64::max);

        Self {
            width,
            height,
            plot: Rect {
                x: MARGIN_LEFT,
                y: MARGIN_TOP,
                width: (width - MARGIN_LEFT - MARGIN_RIGHT).max(1.0),
                height: (height - MARGIN_TOP - bottom).max(1.0),
            },
            y_max: nice_ceiling(data_max * headroom),
            kind: figure.kind,
            count: figure.points.len(),
            x_min,
            x_max,
        }
    }

    #[must_use]
    pub fn map_y(&self, y: f64) -> f64 {
        self.plot.y + self.plot.height - (y / self.y_max) * self.plot.height
    }

    /// Horizontal pixel center of the point at `index`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn x_center(&self, index: usize, point: &Point) -> f64 {
        match self.kind {
            ChartKind::Bar => {
                let band = self.plot.width / self.count.max(1) as f64;
                self.plot.x + band * (index as f64 + 0.5)
            }
            ChartKind::Line => {
                let span = self.x_max - self.x_min;
                if !span.is_finite() || span <= 0.0 {
                    return self.plot.x + self.plot.width / 2.0;
                }
                let usable = (self.plot.width - 2.0 * LINE_X_PADDING).max(0.0);
                self.plot.x + LINE_X_PADDING + (point.x - self.x_min) / span * usable
            }
        }
    }

    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn bar_rect(&self, index: usize, point: &Point) -> Rect {
        let band = self.plot.width / self.count.max(1) as f64;
        let width = band * BAR_FILL_RATIO;
        let top = self.map_y(point.y.max(0.0));
        Rect {
            x: self.x_center(index, point) - width / 2.0,
            y: top,
            width,
            height: self.plot.y + self.plot.height - top,
        }
    }

    /// Tick values from zero to `y_max`, inclusive.
    #[must_use]
    pub fn y_ticks(&self) -> Vec<f64> {
        (0..=Y_TICK_COUNT)
            .map(|step| self.y_max * f64::from(step) / f64::from(Y_TICK_COUNT))
            .collect()
    }
}

/// Smallest value of the form {1, 2, 2.5, 5} x 10^n that is >= `value`.
fn nice_ceiling(value: f64) -> f64 {
    if !value.is_finite() || value <= 0.0 {
        return 1.0;
    }

    #[allow(clippy::cast_possible_truncation)]
    let magnitude = 10_f64.powi(value.log10().floor() as i32);
    [1.0, 2.0, 2.5, 5.0, 10.0]
        .into_iter()
        .map(|step| step * magnitude)
        .find(|candidate| *candidate >= value)
        .unwrap_or(10.0 * magnitude)
}

fn hex([red, green, blue]: [u8; 3]) -> String {
    format!("#{red:02x}{green:02x}{blue:02x}")
}

fn format_value(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{value:.0}")
    } else {
        format!("{value:.1}")
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::float_cmp)]

    use super::*;
    use time::macros::date;

    fn sample_revenue() -> Vec<ProductRevenue> {
        vec![
            ProductRevenue { product_name: "Конструктор \"Космос\"".to_string(), revenue: 12_600.0 },
            ProductRevenue { product_name: "Конструктор \"Робот\"".to_string(), revenue: 15_000.0 },
        ]
    }

    #[test]
    fn revenue_figure_describes_bar_chart() {
        let figure = Figure::revenue_by_product(&sample_revenue());

        assert_eq!(figure.kind, ChartKind::Bar);
        assert_eq!(figure.title, "Выручка по товарам");
        assert_eq!(figure.x_tick_angle, -45);
        assert!(figure.value_labels);
        assert_eq!(figure.points.len(), 2);
        assert_eq!(figure.points[1].label, "Конструктор \"Робот\"");
        assert_eq!(figure.points[1].x, 1.0);
        assert_eq!(figure.points[1].y, 15_000.0);
    }

    #[test]
    fn trend_figure_places_points_by_day_offset() {
        let figure = Figure::sales_trend(&[
            DateQuantity { date: date!(2025 - 01 - 01), quantity: 35 },
            DateQuantity { date: date!(2025 - 01 - 05), quantity: 27 },
        ]);

        assert_eq!(figure.kind, ChartKind::Line);
        assert_eq!(figure.hover_mode, HoverMode::XUnified);
        assert!(figure.markers);
        assert_eq!(figure.points[0].label, "2025-01-01");
        assert_eq!(figure.points[0].x, 0.0);
        assert_eq!(figure.points[1].x, 4.0);
        assert_eq!(figure.points[1].y, 27.0);
    }

    #[test]
    fn export_targets_have_fixed_file_names() {
        assert_eq!(ExportTarget::parse("revenue-by-product"), Some(ExportTarget::RevenueByProduct));
        assert_eq!(ExportTarget::parse("sales-trend"), Some(ExportTarget::SalesTrend));
        assert_eq!(ExportTarget::parse("pie"), None);
        assert_eq!(ExportTarget::RevenueByProduct.file_name(), "revenue_by_product.png");
        assert_eq!(ExportTarget::SalesTrend.file_name(), "sales_trend.png");
        assert_eq!(ExportTarget::SalesTrend.as_str(), "sales-trend");
    }

    #[test]
    fn nice_ceiling_rounds_up_to_readable_steps() {
        assert_eq!(nice_ceiling(0.0), 1.0);
        assert_eq!(nice_ceiling(16_500.0), 20_000.0);
        assert_eq!(nice_ceiling(35.0), 50.0);
        assert_eq!(nice_ceiling(2_000.0), 2_000.0);
        assert_eq!(nice_ceiling(22.0), 25.0);
    }

    #[test]
    fn frame_keeps_bars_inside_plot_area() {
        let figure = Figure::revenue_by_product(&sample_revenue());
        let frame = Frame::new(&figure, CHART_WIDTH, CHART_HEIGHT);

        assert_eq!(frame.y_max, 20_000.0);
        let baseline = frame.plot.y + frame.plot.height;
        for (index, point) in figure.points.iter().enumerate() {
            let rect = frame.bar_rect(index, point);
            assert!(rect.x >= frame.plot.x);
            assert!(rect.x + rect.width <= frame.plot.x + frame.plot.width);
            assert!(rect.y >= frame.plot.y);
            assert!((rect.y + rect.height - baseline).abs() < 1e-9);
        }
        assert_eq!(frame.y_ticks().len(), 6);
    }

    #[test]
    fn single_point_line_is_centered() {
        let figure =
            Figure::sales_trend(&[DateQuantity { date: date!(2025 - 01 - 03), quantity: 12 }]);
        let frame = Frame::new(&figure, CHART_WIDTH, CHART_HEIGHT);

        let center = frame.x_center(0, &figure.points[0]);
        assert_eq!(center, frame.plot.x + frame.plot.width / 2.0);
    }

    #[test]
    fn figure_serializes_snake_case_kinds() {
        let figure = Figure::sales_trend(&[]);
        let value = match serde_json::to_value(&figure) {
            Ok(value) => value,
            Err(err) => panic!("failed to serialize figure: {err}"),
        };
        assert_eq!(value["kind"], "line");
        assert_eq!(value["hover_mode"], "x_unified");
        assert_eq!(value["points"], serde_json::json!([]));
    }
}
