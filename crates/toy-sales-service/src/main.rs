use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use serde::{Deserialize, Serialize};
use serde_json::json;
use toy_sales_chart::{render_png, render_svg, ExportTarget, Figure};
use toy_sales_core::{Dataset, FilterState, Selection};
use toy_sales_store_sqlite::{ensure_store, load_data, StoreInit};
use tracing_subscriber::EnvFilter;

mod page;

const SERVICE_CONTRACT_VERSION: &str = "dashboard.v1";

#[derive(Debug, Clone)]
struct ServiceState {
    dataset: Arc<Dataset>,
    store: StoreInit,
    telemetry: Arc<ServiceTelemetry>,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceEnvelope<T>
where
    T: Serialize,
{
    service_contract_version: &'static str,
    data: T,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceError {
    service_contract_version: &'static str,
    error: ServiceErrorPayload,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceErrorPayload {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

#[derive(Debug, Clone)]
struct ServiceFailure {
    status: StatusCode,
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

/// One chart as shown in the page: its figure and the SVG drawn from it.
#[derive(Debug, Clone, Serialize)]
struct ChartView {
    figure: Figure,
    svg: String,
}

#[derive(Debug, Clone, Serialize)]
struct ChartsResponse {
    filter: FilterState,
    matched_records: usize,
    revenue_by_product: ChartView,
    sales_trend: ChartView,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct ExportRequest {
    n_clicks: u64,
    categories: Selection,
    regions: Selection,
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
    records: usize,
    store: StoreInit,
    telemetry: ServiceTelemetrySnapshot,
}

#[derive(Debug, Default)]
#[allow(clippy::struct_field_names)]
struct ServiceTelemetry {
    requests_total: AtomicU64,
    chart_updates_total: AtomicU64,
    exports_total: AtomicU64,
    exports_suppressed_total: AtomicU64,
    failures_total: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
#[allow(clippy::struct_field_names)]
struct ServiceTelemetrySnapshot {
    requests_total: u64,
    chart_updates_total: u64,
    exports_total: u64,
    exports_suppressed_total: u64,
    failures_total: u64,
}

#[derive(Debug, Parser)]
#[command(name = "toy-sales-dashboard")]
#[command(about = "Local sales analytics dashboard")]
struct Args {
    #[arg(long, default_value = "./toy_store.db")]
    db: PathBuf,
    #[arg(long, default_value = "127.0.0.1:8050")]
    bind: SocketAddr,
}

impl IntoResponse for ServiceFailure {
    fn into_response(self) -> Response {
        let payload = ServiceError {
            service_contract_version: SERVICE_CONTRACT_VERSION,
            error: ServiceErrorPayload {
                code: self.code,
                message: self.message.clone(),
                details: self.details,
            },
        };
        (self.status, Json(payload)).into_response()
    }
}

impl ChartView {
    fn new(figure: Figure) -> Self {
        let svg = render_svg(&figure);
        Self { figure, svg }
    }
}

impl ServiceState {
    fn new(dataset: Dataset, store: StoreInit) -> Self {
        Self {
            dataset: Arc::new(dataset),
            store,
            telemetry: Arc::new(ServiceTelemetry::default()),
        }
    }

    fn failure(
        status: StatusCode,
        code: &'static str,
        message: impl Into<String>,
        details: Option<serde_json::Value>,
    ) -> ServiceFailure {
        ServiceFailure { status, code, message: message.into(), details }
    }

    fn invalid_json_with_telemetry(&self, rejection: &JsonRejection) -> ServiceFailure {
        self.telemetry.record_failure();
        Self::failure(
            rejection.status(),
            "invalid_json",
            rejection.body_text(),
            Some(json!({"rejection": rejection.to_string()})),
        )
    }

    /// Runs CPU-bound rendering off the async workers.
    async fn run_blocking<T, E, F>(
        &self,
        operation_label: &'static str,
        op: F,
    ) -> Result<T, ServiceFailure>
    where
        T: Send + 'static,
        E: std::fmt::Display + Send + 'static,
        F: FnOnce() -> Result<T, E> + Send + 'static,
    {
        let op_result = tokio::task::spawn_blocking(op).await.map_err(|err| {
            self.telemetry.record_failure();
            Self::failure(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                format!("{operation_label} join failure: {err}"),
                None,
            )
        })?;

        op_result.map_err(|err| {
            self.telemetry.record_failure();
            Self::failure(
                StatusCode::INTERNAL_SERVER_ERROR,
                "render_failed",
                format!("{operation_label} failed: {err}"),
                None,
            )
        })
    }
}

impl ServiceTelemetry {
    fn record_request(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }

    fn record_failure(&self) {
        self.failures_total.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> ServiceTelemetrySnapshot {
        ServiceTelemetrySnapshot {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            chart_updates_total: self.chart_updates_total.load(Ordering::Relaxed),
            exports_total: self.exports_total.load(Ordering::Relaxed),
            exports_suppressed_total: self.exports_suppressed_total.load(Ordering::Relaxed),
            failures_total: self.failures_total.load(Ordering::Relaxed),
        }
    }
}

fn envelope<T>(data: T) -> ServiceEnvelope<T>
where
    T: Serialize,
{
    ServiceEnvelope { service_contract_version: SERVICE_CONTRACT_VERSION, data }
}

/// Filters, aggregates and draws both charts for one filter state.
fn build_charts(dataset: &Dataset, filter: FilterState) -> ChartsResponse {
    let aggregates = dataset.aggregates(&filter);
    ChartsResponse {
        matched_records: aggregates.matched_records,
        revenue_by_product: ChartView::new(ExportTarget::RevenueByProduct.figure(&aggregates)),
        sales_trend: ChartView::new(ExportTarget::SalesTrend.figure(&aggregates)),
        filter,
    }
}

fn app(state: ServiceState) -> Router {
    Router::new()
        .route("/", get(dashboard))
        .route("/v1/health", get(health))
        .route("/v1/charts", post(update_charts))
        .route("/v1/export/:chart", post(export_chart))
        .with_state(state)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let store = ensure_store(&args.db)?;
    let state = ServiceState::new(Dataset::new(load_data(&args.db)?), store);

    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    tracing::info!(
        bind = %args.bind,
        records = state.dataset.len(),
        "dashboard listening on http://{}",
        args.bind
    );
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn dashboard(State(state): State<ServiceState>) -> Html<String> {
    state.telemetry.record_request();
    let charts = build_charts(&state.dataset, state.dataset.default_filter());
    Html(page::render_dashboard(&state.dataset, &charts))
}

async fn health(State(state): State<ServiceState>) -> Json<ServiceEnvelope<HealthResponse>> {
    Json(envelope(HealthResponse {
        status: "ok",
        records: state.dataset.len(),
        store: state.store,
        telemetry: state.telemetry.snapshot(),
    }))
}

async fn update_charts(
    State(state): State<ServiceState>,
    payload: Result<Json<FilterState>, JsonRejection>,
) -> Result<Json<ServiceEnvelope<ChartsResponse>>, ServiceFailure> {
    state.telemetry.record_request();
    let Json(filter) =
        payload.map_err(|rejection| state.invalid_json_with_telemetry(&rejection))?;

    let charts = build_charts(&state.dataset, filter);
    state.telemetry.chart_updates_total.fetch_add(1, Ordering::Relaxed);
    tracing::debug!(matched_records = charts.matched_records, "charts updated");

    Ok(Json(envelope(charts)))
}

async fn export_chart(
    State(state): State<ServiceState>,
    Path(chart): Path<String>,
    payload: Result<Json<ExportRequest>, JsonRejection>,
) -> Result<Response, ServiceFailure> {
    state.telemetry.record_request();
    let Some(target) = ExportTarget::parse(&chart) else {
        state.telemetry.record_failure();
        return Err(ServiceState::failure(
            StatusCode::NOT_FOUND,
            "unknown_chart",
            format!("unknown chart: {chart}"),
            Some(json!({ "chart": chart })),
        ));
    };
    let Json(request) =
        payload.map_err(|rejection| state.invalid_json_with_telemetry(&rejection))?;

    if request.n_clicks == 0 {
        state.telemetry.exports_suppressed_total.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(chart = target.as_str(), "export without a click suppressed");
        return Ok(StatusCode::NO_CONTENT.into_response());
    }

    let filter = FilterState::new(request.categories, request.regions);
    let figure = target.figure(&state.dataset.aggregates(&filter));
    let png = state.run_blocking("render_png", move || render_png(&figure)).await?;

    state.telemetry.exports_total.fetch_add(1, Ordering::Relaxed);
    tracing::info!(
        chart = target.as_str(),
        n_clicks = request.n_clicks,
        bytes = png.len(),
        "chart exported"
    );

    Ok((
        [
            (header::CONTENT_TYPE, "image/png".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", target.file_name()),
            ),
        ],
        png,
    )
        .into_response())
}
