use ab_glyph::{Font, FontRef, PxScale, ScaleFont};
use image::codecs::png::PngEncoder;
use image::{imageops, ExtendedColorType, ImageEncoder, Rgba, RgbaImage};
use imageproc::drawing::{
    draw_filled_circle_mut, draw_filled_rect_mut, draw_line_segment_mut, draw_text_mut, text_size,
};
use imageproc::geometric_transformations::{rotate_about_center, Interpolation};
use imageproc::rect::Rect as PixelRect;

use crate::{
    format_value, ChartError, ChartKind, Figure, Frame, Rect, AXIS_COLOR, CHART_HEIGHT,
    CHART_WIDTH, GRID_COLOR, PLOT_BACKGROUND, SERIES_COLOR, TEXT_COLOR,
};

/// DejaVu Sans, bundled so Cyrillic labels render the same on every host.
const FONT_BYTES: &[u8] = include_bytes!("../assets/DejaVuSans.ttf");
const MARKER_RADIUS: i32 = 5;
const TRANSPARENT: Rgba<u8> = Rgba([0, 0, 0, 0]);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Anchor {
    Middle,
    End,
}

impl Anchor {
    fn offset(self, width: u32) -> f64 {
        match self {
            Self::Middle => f64::from(width) / 2.0,
            Self::End => f64::from(width),
        }
    }
}

/// A run of text placed the way SVG places it: `x` is the anchor point and
/// `baseline` the baseline, with an optional rotation about that point.
#[derive(Debug, Clone, Copy)]
struct Text<'t> {
    value: &'t str,
    x: f64,
    baseline: f64,
    size: f32,
    anchor: Anchor,
    rotation: i32,
}

impl<'t> Text<'t> {
    fn new(value: &'t str, x: f64, baseline: f64, size: f32, anchor: Anchor) -> Self {
        Self { value, x, baseline, size, anchor, rotation: 0 }
    }

    fn rotated(self, rotation: i32) -> Self {
        Self { rotation, ..self }
    }
}

/// Rasterizes `figure` at the page's chart size and encodes it as PNG.
///
/// The layout, labels and colors follow [`crate::render_svg`], so the
/// download matches the chart shown in the page.
///
/// # Errors
/// Returns [`ChartError::Font`] if the bundled font cannot be parsed and
/// [`ChartError::Encode`] when PNG encoding fails.
pub fn render_png(figure: &Figure) -> Result<Vec<u8>, ChartError> {
    let font = FontRef::try_from_slice(FONT_BYTES)?;
    let canvas = rasterize(figure, &font, CHART_WIDTH, CHART_HEIGHT);

    let mut buf = Vec::new();
    PngEncoder::new(&mut buf).write_image(
        canvas.as_raw(),
        canvas.width(),
        canvas.height(),
        ExtendedColorType::Rgba8,
    )?;
    Ok(buf)
}

fn rasterize(figure: &Figure, font: &FontRef<'_>, width: u32, height: u32) -> RgbaImage {
    let frame = Frame::new(figure, width, height);
    let text_color = rgba(TEXT_COLOR);
    let mut canvas = RgbaImage::from_pixel(width, height, rgba([0xff, 0xff, 0xff]));

    draw_text(
        &mut canvas,
        font,
        Text::new(&figure.title, frame.width / 2.0, 32.0, 18.0, Anchor::Middle),
        text_color,
    );
    fill_rect(&mut canvas, frame.plot, rgba(PLOT_BACKGROUND));

    for tick in frame.y_ticks() {
        let y = frame.map_y(tick);
        hline(&mut canvas, &frame, y, rgba(GRID_COLOR));
        let label = format_value(tick);
        draw_text(
            &mut canvas,
            font,
            Text::new(&label, frame.plot.x - 8.0, y + 4.0, 11.0, Anchor::End),
            text_color,
        );
    }

    let baseline = frame.plot.y + frame.plot.height;
    match figure.kind {
        ChartKind::Bar => draw_bars(&mut canvas, font, figure, &frame),
        ChartKind::Line => draw_line(&mut canvas, font, figure, &frame),
    }
    hline(&mut canvas, &frame, baseline, rgba(AXIS_COLOR));

    draw_text(
        &mut canvas,
        font,
        Text::new(
            &figure.x_label,
            frame.plot.x + frame.plot.width / 2.0,
            frame.height - 10.0,
            13.0,
            Anchor::Middle,
        ),
        text_color,
    );
    draw_text(
        &mut canvas,
        font,
        Text::new(
            &figure.y_label,
            20.0,
            frame.plot.y + frame.plot.height / 2.0,
            13.0,
            Anchor::Middle,
        )
        .rotated(-90),
        text_color,
    );
    canvas
}

fn draw_bars(canvas: &mut RgbaImage, font: &FontRef<'_>, figure: &Figure, frame: &Frame) {
    let text_color = rgba(TEXT_COLOR);
    for (index, point) in figure.points.iter().enumerate() {
        let rect = frame.bar_rect(index, point);
        let center = frame.x_center(index, point);
        fill_rect(canvas, rect, rgba(SERIES_COLOR));

        if figure.value_labels {
            let value = format!("{:.0}", point.y);
            let text = Text::new(&value, center, rect.y - 6.0, 12.0, Anchor::Middle);
            draw_text(canvas, font, text, text_color);
        }
        draw_x_tick(canvas, font, figure.x_tick_angle, center, frame, &point.label);
    }
}

fn draw_line(canvas: &mut RgbaImage, font: &FontRef<'_>, figure: &Figure, frame: &Frame) {
    let color = rgba(SERIES_COLOR);
    let vertices: Vec<(f64, f64)> = figure
        .points
        .iter()
        .enumerate()
        .map(|(index, point)| (frame.x_center(index, point), frame.map_y(point.y)))
        .collect();

    for pair in vertices.windows(2) {
        // Two offset passes approximate the 2px stroke of the SVG polyline.
        for offset in [-0.5, 0.5] {
            draw_line_segment_mut(
                canvas,
                (to_f32(pair[0].0), to_f32(pair[0].1 + offset)),
                (to_f32(pair[1].0), to_f32(pair[1].1 + offset)),
                color,
            );
        }
    }
    if figure.markers {
        for &(x, y) in &vertices {
            draw_filled_circle_mut(canvas, (px(x), px(y)), MARKER_RADIUS, color);
        }
    }
    for (index, point) in figure.points.iter().enumerate() {
        let center = frame.x_center(index, point);
        draw_x_tick(canvas, font, figure.x_tick_angle, center, frame, &point.label);
    }
}

fn draw_x_tick(
    canvas: &mut RgbaImage,
    font: &FontRef<'_>,
    angle: i32,
    x: f64,
    frame: &Frame,
    label: &str,
) {
    let y = frame.plot.y + frame.plot.height + 16.0;
    let text = if angle == 0 {
        Text::new(label, x, y, 11.0, Anchor::Middle)
    } else {
        Text::new(label, x, y, 11.0, Anchor::End).rotated(angle)
    };
    draw_text(canvas, font, text, rgba(TEXT_COLOR));
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn draw_text(canvas: &mut RgbaImage, font: &FontRef<'_>, text: Text<'_>, color: Rgba<u8>) {
    if text.value.is_empty() {
        return;
    }
    let scale = PxScale::from(text.size);
    let (width, _) = text_size(scale, font, text.value);
    let ascent = f64::from(font.as_scaled(scale).ascent());
    let left = text.anchor.offset(width);

    if text.rotation == 0 {
        let (x, y) = (px(text.x - left), px(text.baseline - ascent));
        draw_text_mut(canvas, color, x, y, scale, font, text.value);
        return;
    }

    // Lay the text out on a transparent square whose center is the anchor,
    // rotate about that center, then composite it over the canvas.
    let half = width + 2 * text.size.ceil() as u32;
    let center = f64::from(half);
    let mut layer = RgbaImage::from_pixel(2 * half, 2 * half, TRANSPARENT);
    let (x, y) = (px(center - left), px(center - ascent));
    draw_text_mut(&mut layer, color, x, y, scale, font, text.value);

    let theta = f64::from(text.rotation).to_radians() as f32;
    let rotated = rotate_about_center(&layer, theta, Interpolation::Bilinear, TRANSPARENT);
    imageops::overlay(
        canvas,
        &rotated,
        i64::from(px(text.x - center)),
        i64::from(px(text.baseline - center)),
    );
}

fn rgba([red, green, blue]: [u8; 3]) -> Rgba<u8> {
    Rgba([red, green, blue, 0xff])
}

fn hline(canvas: &mut RgbaImage, frame: &Frame, y: f64, color: Rgba<u8>) {
    let rect = Rect { x: frame.plot.x, y: y.floor(), width: frame.plot.width, height: 1.0 };
    fill_rect(canvas, rect, color);
}

fn fill_rect(canvas: &mut RgbaImage, rect: Rect, color: Rgba<u8>) {
    let (x0, x1) = pixel_span(rect.x, rect.x + rect.width, canvas.width());
    let (y0, y1) = pixel_span(rect.y, rect.y + rect.height, canvas.height());
    if x1 <= x0 || y1 <= y0 {
        return;
    }
    let area = PixelRect::at(px(f64::from(x0)), px(f64::from(y0))).of_size(x1 - x0, y1 - y0);
    draw_filled_rect_mut(canvas, area, color);
}

/// Half-open pixel range covering `[start, end)`, clamped to `[0, limit]`.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn pixel_span(start: f64, end: f64, limit: u32) -> (u32, u32) {
    let clamp = |value: f64| value.round().clamp(0.0, f64::from(limit)) as u32;
    (clamp(start.min(end)), clamp(start.max(end)))
}

#[allow(clippy::cast_possible_truncation)]
fn px(value: f64) -> i32 {
    value.round().clamp(f64::from(i32::MIN), f64::from(i32::MAX)) as i32
}

#[allow(clippy::cast_possible_truncation)]
fn to_f32(value: f64) -> f32 {
    value as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::ImageFormat;
    use time::macros::date;
    use toy_sales_core::{DateQuantity, ProductRevenue};

    const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];
    const WHITE: Rgba<u8> = Rgba([0xff, 0xff, 0xff, 0xff]);

    fn must_font() -> FontRef<'static> {
        match FontRef::try_from_slice(FONT_BYTES) {
            Ok(font) => font,
            Err(err) => panic!("bundled font failed to parse: {err}"),
        }
    }

    fn must_png(figure: &Figure) -> Vec<u8> {
        match render_png(figure) {
            Ok(bytes) => bytes,
            Err(err) => panic!("render failed: {err}"),
        }
    }

    fn decode(bytes: &[u8]) -> RgbaImage {
        match image::load_from_memory_with_format(bytes, ImageFormat::Png) {
            Ok(image) => image.to_rgba8(),
            Err(err) => panic!("failed to decode rendered PNG: {err}"),
        }
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn pixel_at(image: &RgbaImage, x: f64, y: f64) -> Rgba<u8> {
        *image.get_pixel(x.floor() as u32, y.floor() as u32)
    }

    /// Counts pixels inside `[x0, x1) x [y0, y1)` that differ from `background`.
    fn inked(
        image: &RgbaImage,
        (x0, x1): (u32, u32),
        (y0, y1): (u32, u32),
        background: Rgba<u8>,
    ) -> usize {
        (y0..y1.min(image.height()))
            .flat_map(|y| (x0..x1.min(image.width())).map(move |x| (x, y)))
            .filter(|&(x, y)| *image.get_pixel(x, y) != background)
            .count()
    }

    fn revenue_figure() -> Figure {
        Figure::revenue_by_product(&[
            ProductRevenue { product_name: "Конструктор \"Космос\"".to_string(), revenue: 12_600.0 },
            ProductRevenue { product_name: "Конструктор \"Робот\"".to_string(), revenue: 15_000.0 },
        ])
    }

    #[test]
    fn bar_png_draws_bars_in_series_color() {
        let figure = revenue_figure();
        let bytes = must_png(&figure);
        assert!(bytes.starts_with(&PNG_SIGNATURE));

        let image = decode(&bytes);
        assert_eq!(image.dimensions(), (CHART_WIDTH, CHART_HEIGHT));

        let frame = Frame::new(&figure, CHART_WIDTH, CHART_HEIGHT);
        for (index, point) in figure.points.iter().enumerate() {
            let rect = frame.bar_rect(index, point);
            let center = pixel_at(&image, rect.x + rect.width / 2.0, rect.y + rect.height / 2.0);
            assert_eq!(center, rgba(SERIES_COLOR));
        }

        let corner = pixel_at(&image, frame.plot.x + 2.0, frame.plot.y + 2.0);
        assert_eq!(corner, rgba(PLOT_BACKGROUND));
        assert_eq!(pixel_at(&image, 1.0, 1.0), WHITE);
    }

    #[test]
    fn line_png_draws_markers_at_points() {
        let figure = Figure::sales_trend(&[
            DateQuantity { date: date!(2025 - 01 - 01), quantity: 35 },
            DateQuantity { date: date!(2025 - 01 - 02), quantity: 15 },
            DateQuantity { date: date!(2025 - 01 - 07), quantity: 28 },
        ]);
        let image = rasterize(&figure, &must_font(), CHART_WIDTH, CHART_HEIGHT);
        let frame = Frame::new(&figure, CHART_WIDTH, CHART_HEIGHT);

        for (index, point) in figure.points.iter().enumerate() {
            let marker = pixel_at(&image, frame.x_center(index, point), frame.map_y(point.y));
            assert_eq!(marker, rgba(SERIES_COLOR));
        }
    }

    #[test]
    fn png_text_follows_figure_labels() {
        let original = revenue_figure();
        let mut relabeled = original.clone();
        relabeled.title = "Другой заголовок".to_string();
        relabeled.y_label = "Сумма".to_string();
        relabeled.points[0].label = "Мягкий кот".to_string();

        assert_ne!(must_png(&original), must_png(&relabeled));
    }

    #[test]
    fn png_draws_title_and_labels_outside_plot() {
        let figure = revenue_figure();
        let image = decode(&must_png(&figure));
        let frame = Frame::new(&figure, CHART_WIDTH, CHART_HEIGHT);
        let mid = CHART_WIDTH / 2;

        // Title band above the plot area.
        assert!(inked(&image, (mid - 150, mid + 150), (10, 40), WHITE) > 50);

        // Y tick labels left of the plot area; the rotated y title further left.
        assert!(inked(&image, (30, 75), (60, 300), WHITE) > 20);
        assert!(inked(&image, (5, 28), (60, 300), WHITE) > 20);

        // Rotated product labels below the axis.
        let plot_left = pixel_span(frame.plot.x, frame.plot.x, CHART_WIDTH).0;
        let axis = pixel_span(frame.plot.y + frame.plot.height, 0.0, CHART_HEIGHT).1;
        assert!(inked(&image, (plot_left, CHART_WIDTH), (axis + 4, CHART_HEIGHT - 25), WHITE) > 50);
    }

    #[test]
    fn bar_value_labels_sit_above_bars() {
        let figure = revenue_figure();
        let mut unlabeled = figure.clone();
        unlabeled.value_labels = false;

        let font = must_font();
        let with_labels = rasterize(&figure, &font, CHART_WIDTH, CHART_HEIGHT);
        let without_labels = rasterize(&unlabeled, &font, CHART_WIDTH, CHART_HEIGHT);
        let frame = Frame::new(&figure, CHART_WIDTH, CHART_HEIGHT);

        let rect = frame.bar_rect(1, &figure.points[1]);
        let band = |image: &RgbaImage| {
            let (x0, x1) = pixel_span(rect.x, rect.x + rect.width, CHART_WIDTH);
            let (y0, y1) = pixel_span(rect.y - 20.0, rect.y - 2.0, CHART_HEIGHT);
            inked(image, (x0, x1), (y0, y1), rgba(PLOT_BACKGROUND))
        };
        assert!(band(&with_labels) > band(&without_labels));
    }

    #[test]
    fn end_anchored_text_ends_at_anchor() {
        let font = must_font();
        let mut canvas = RgbaImage::from_pixel(200, 40, WHITE);
        let text = Text::new("12600", 150.0, 30.0, 12.0, Anchor::End);
        draw_text(&mut canvas, &font, text, rgba(TEXT_COLOR));

        assert!(inked(&canvas, (0, 150), (0, 40), WHITE) > 10);
        assert_eq!(inked(&canvas, (152, 200), (0, 40), WHITE), 0);
    }

    #[test]
    fn empty_figure_still_encodes_with_title() {
        let bytes = must_png(&Figure::sales_trend(&[]));
        assert!(bytes.starts_with(&PNG_SIGNATURE));

        let image = decode(&bytes);
        assert_eq!(image.dimensions(), (CHART_WIDTH, CHART_HEIGHT));
        let mid = CHART_WIDTH / 2;
        assert!(inked(&image, (mid - 150, mid + 150), (10, 40), WHITE) > 50);
    }

    #[test]
    fn pixel_span_clamps_to_canvas() {
        assert_eq!(pixel_span(-10.0, 5.2, 100), (0, 5));
        assert_eq!(pixel_span(90.0, 140.0, 100), (90, 100));
        assert_eq!(pixel_span(20.0, 10.0, 100), (10, 20));
    }
}
