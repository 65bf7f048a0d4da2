use toy_sales_chart::{escape_text, ExportTarget};
use toy_sales_core::{Dataset, Selection};

use crate::ChartsResponse;

const PAGE_TITLE: &str = "Аналитика продаж игрушек";
const EXPORT_LABEL: &str = "📥 Скачать график (PNG)";

const PAGE_STYLE: &str = include_str!("../assets/dashboard.css");

/// Re-draws both charts whenever either filter changes, and downloads a PNG
/// for each export click. Click counts are per button and per page load.
const PAGE_SCRIPT: &str = include_str!("../assets/dashboard.js");

pub(crate) fn render_dashboard(dataset: &Dataset, charts: &ChartsResponse) -> String {
    let category_filter = render_filter(
        "category-filter",
        "Категория:",
        dataset.categories(),
        &charts.filter.categories,
    );
    let region_filter =
        render_filter("region-filter", "Регион:", dataset.regions(), &charts.filter.regions);
    let revenue_block = render_chart_block(
        ExportTarget::RevenueByProduct,
        "btn-png-1",
        &charts.revenue_by_product.svg,
    );
    let trend_block =
        render_chart_block(ExportTarget::SalesTrend, "btn-png-2", &charts.sales_trend.svg);

    format!(
        r#"<!DOCTYPE html>
<html lang="ru">
<head>
<meta charset="utf-8">
<title>{PAGE_TITLE}</title>
<style>{PAGE_STYLE}</style>
</head>
<body>
<h1>🎯 {PAGE_TITLE}</h1>
<div class="filters">
{category_filter}
{region_filter}
</div>
{revenue_block}
{trend_block}
<script>{PAGE_SCRIPT}</script>
</body>
</html>
"#
    )
}

fn render_filter(id: &str, label: &str, values: &[String], selected: &Selection) -> String {
    let options: String = values
        .iter()
        .map(|value| {
            let escaped = escape_text(value);
            if selected.contains(value) {
                format!(r#"<option value="{escaped}" selected>{escaped}</option>"#)
            } else {
                format!(r#"<option value="{escaped}">{escaped}</option>"#)
            }
        })
        .collect();

    format!(
        r#"<div class="filter">
<label for="{id}">{label}</label>
<select id="{id}" multiple size="{size}">{options}</select>
</div>"#,
        size = values.len().max(1),
    )
}

fn render_chart_block(target: ExportTarget, button_id: &str, svg: &str) -> String {
    format!(
        r#"<div class="chart-block">
<div id="{chart}" class="graph">{svg}</div>
<button id="{button_id}" data-chart="{chart}" data-filename="{file_name}">{EXPORT_LABEL}</button>
</div>"#,
        chart = target.as_str(),
        file_name = target.file_name(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_marks_only_selected_options() {
        let values = vec!["Москва".to_string(), "Казань".to_string()];
        let html = render_filter("region-filter", "Регион:", &values, &Selection::single("Казань"));

        assert!(html.contains(r#"<select id="region-filter" multiple size="2">"#));
        assert!(html.contains(r#"<option value="Москва">Москва</option>"#));
        assert!(html.contains(r#"<option value="Казань" selected>Казань</option>"#));
    }

    #[test]
    fn filter_escapes_option_values() {
        let values = vec!["Пазл \"Галактика\" & Co".to_string()];
        let html = render_filter("category-filter", "Категория:", &values, &Selection::default());

        assert!(html.contains("Пазл &quot;Галактика&quot; &amp; Co"));
        assert!(!html.contains(" selected>"));
    }

    #[test]
    fn chart_block_wires_export_button_to_chart() {
        let html = render_chart_block(ExportTarget::SalesTrend, "btn-png-2", "<svg></svg>");

        assert!(html.contains(r#"<div id="sales-trend" class="graph"><svg></svg></div>"#));
        assert!(html.contains(r#"data-chart="sales-trend""#));
        assert!(html.contains(r#"data-filename="sales_trend.png""#));
        assert!(html.contains(EXPORT_LABEL));
    }
}
