use crate::{
    format_value, hex, ChartKind, Figure, Frame, HoverMode, AXIS_COLOR, CHART_HEIGHT,
    CHART_WIDTH, GRID_COLOR, PLOT_BACKGROUND, SERIES_COLOR, TEXT_COLOR,
};

const FONT_FAMILY: &str = "DejaVu Sans, Arial, sans-serif";
const MARKER_RADIUS: f64 = 5.0;

/// Renders `figure` as a standalone SVG document.
#[must_use]
pub fn render_svg(figure: &Figure) -> String {
    let frame = Frame::new(figure, CHART_WIDTH, CHART_HEIGHT);
    let mut out = String::new();

    let kind = match figure.kind {
        ChartKind::Bar => "bar",
        ChartKind::Line => "line",
    };
    let hover = match figure.hover_mode {
        HoverMode::Closest => "closest",
        HoverMode::XUnified => "x unified",
    };

    out.push_str(&format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" class="chart chart-{kind}" width="{w}" height="{h}" viewBox="0 0 {w} {h}" font-family="{FONT_FAMILY}" fill="{text}" data-hover-mode="{hover}">"#,
        w = CHART_WIDTH,
        h = CHART_HEIGHT,
        text = hex(TEXT_COLOR),
    ));
    out.push_str(&format!(
        r##"<rect width="{w}" height="{h}" fill="#ffffff"/>"##,
        w = CHART_WIDTH,
        h = CHART_HEIGHT,
    ));
    out.push_str(&format!(
        r#"<text class="chart-title" x="{x:.1}" y="32" text-anchor="middle" font-size="18">{}</text>"#,
        escape_text(&figure.title),
        x = frame.width / 2.0,
    ));
    out.push_str(&format!(
        r#"<rect class="plot-area" x="{:.1}" y="{:.1}" width="{:.1}" height="{:.1}" fill="{}"/>"#,
        frame.plot.x,
        frame.plot.y,
        frame.plot.width,
        frame.plot.height,
        hex(PLOT_BACKGROUND),
    ));

    for tick in frame.y_ticks() {
        let y = frame.map_y(tick);
        out.push_str(&format!(
            r#"<line class="grid" x1="{:.1}" y1="{y:.1}" x2="{:.1}" y2="{y:.1}" stroke="{}"/>"#,
            frame.plot.x,
            frame.plot.x + frame.plot.width,
            hex(GRID_COLOR),
        ));
        out.push_str(&format!(
            r#"<text class="y-tick" x="{:.1}" y="{:.1}" text-anchor="end" font-size="11">{}</text>"#,
            frame.plot.x - 8.0,
            y + 4.0,
            format_value(tick),
        ));
    }

    let baseline = frame.plot.y + frame.plot.height;
    out.push_str(&format!(
        r#"<line class="axis" x1="{:.1}" y1="{baseline:.1}" x2="{:.1}" y2="{baseline:.1}" stroke="{}"/>"#,
        frame.plot.x,
        frame.plot.x + frame.plot.width,
        hex(AXIS_COLOR),
    ));

    match figure.kind {
        ChartKind::Bar => push_bars(&mut out, figure, &frame),
        ChartKind::Line => push_line(&mut out, figure, &frame),
    }

    out.push_str(&format!(
        r#"<text class="x-title" x="{:.1}" y="{:.1}" text-anchor="middle" font-size="13">{}</text>"#,
        frame.plot.x + frame.plot.width / 2.0,
        frame.height - 10.0,
        escape_text(&figure.x_label),
    ));
    out.push_str(&format!(
        r#"<text class="y-title" x="20" y="{y:.1}" text-anchor="middle" font-size="13" transform="rotate(-90 20 {y:.1})">{}</text>"#,
        escape_text(&figure.y_label),
        y = frame.plot.y + frame.plot.height / 2.0,
    ));
    out.push_str("</svg>");
    out
}

fn push_bars(out: &mut String, figure: &Figure, frame: &Frame) {
    let baseline = frame.plot.y + frame.plot.height;
    let color = hex(SERIES_COLOR);

    for (index, point) in figure.points.iter().enumerate() {
        let rect = frame.bar_rect(index, point);
        let center = frame.x_center(index, point);
        let label = escape_text(&point.label);

        out.push_str(&format!(
            r#"<rect class="bar" x="{:.1}" y="{:.1}" width="{:.1}" height="{:.1}" fill="{color}"><title>{label}: {}</title></rect>"#,
            rect.x,
            rect.y,
            rect.width,
            rect.height,
            format_value(point.y),
        ));

        if figure.value_labels {
            out.push_str(&format!(
                r#"<text class="value-label" x="{center:.1}" y="{:.1}" text-anchor="middle" font-size="12">{:.0}</text>"#,
                rect.y - 6.0,
                point.y,
            ));
        }

        push_x_tick(out, figure.x_tick_angle, center, baseline, &label);
    }
}

fn push_line(out: &mut String, figure: &Figure, frame: &Frame) {
    let baseline = frame.plot.y + frame.plot.height;
    let color = hex(SERIES_COLOR);

    let path = figure
        .points
        .iter()
        .enumerate()
        .map(|(index, point)| {
            format!("{:.1},{:.1}", frame.x_center(index, point), frame.map_y(point.y))
        })
        .collect::<Vec<_>>()
        .join(" ");
    out.push_str(&format!(
        r#"<polyline class="series" points="{path}" fill="none" stroke="{color}" stroke-width="2"/>"#
    ));

    let y_label = escape_text(&figure.y_label);
    for (index, point) in figure.points.iter().enumerate() {
        let center = frame.x_center(index, point);
        let label = escape_text(&point.label);

        if figure.markers {
            out.push_str(&format!(
                r#"<circle class="marker" cx="{center:.1}" cy="{:.1}" r="{MARKER_RADIUS}" fill="{color}"><title>{label}&#10;{y_label}: {}</title></circle>"#,
                frame.map_y(point.y),
                format_value(point.y),
            ));
        }

        push_x_tick(out, figure.x_tick_angle, center, baseline, &label);
    }
}

fn push_x_tick(out: &mut String, angle: i32, x: f64, baseline: f64, escaped_label: &str) {
    let y = baseline + 16.0;
    if angle == 0 {
        out.push_str(&format!(
            r#"<text class="x-tick" x="{x:.1}" y="{y:.1}" text-anchor="middle" font-size="11">{escaped_label}</text>"#
        ));
    } else {
        out.push_str(&format!(
            r#"<text class="x-tick" x="{x:.1}" y="{y:.1}" text-anchor="end" font-size="11" transform="rotate({angle} {x:.1} {y:.1})">{escaped_label}</text>"#
        ));
    }
}

/// Escapes text for use in XML/HTML content and attribute values.
#[must_use]
pub fn escape_text(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}
