use axum::{
    body::{Body, Bytes},
    extract::{Query, State},
    http::{header, HeaderMap, HeaderValue},
    response::{IntoResponse, Response},
};
use futures_util::stream;
use qualstat_core::{
    CancellationToken, ChannelSink, ExportEnvelope, ExportFormat, ExportQuery, StreamingExporter,
};
use serde::Deserialize;

use crate::{config::ServiceConfig, error::ApiError, state::ApiState};

/// Chunks buffered between the exporter task and the response body.
const STREAM_CHANNEL_CAPACITY: usize = 4;

#[derive(Debug, Default, Deserialize)]
pub struct ExportParams {
    pub project_id: Option<String>,
    pub offset: Option<String>,
    pub limit: Option<String>,
    pub load_all: Option<String>,
    pub search: Option<String>,
    pub source: Option<String>,
    pub min_quality: Option<String>,
    pub max_quality: Option<String>,
    pub format: Option<String>,
}

/// A validated export request.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportPlan {
    pub query: ExportQuery,
    pub envelope: ExportEnvelope,
    pub format: ExportFormat,
    pub heavy: bool,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn parse_quality(name: &str, value: &Option<String>) -> Result<Option<f64>, ApiError> {
    let Some(raw) = non_empty(value) else {
        return Ok(None);
    };
    match raw.parse::<f64>() {
        Ok(q) if (0.0..=1.0).contains(&q) => Ok(Some(q)),
        _ => Err(ApiError::bad_request(format!(
            "Invalid {}: must be a number between 0 and 1",
            name
        ))),
    }
}

fn negotiate_format(requested: Option<&str>, accept: Option<&str>) -> Result<ExportFormat, ApiError> {
    if let Some(requested) = requested {
        return ExportFormat::parse(requested)
            .ok_or_else(|| ApiError::bad_request("Invalid format parameter. Must be 'csv' or 'json'"));
    }
    match accept {
        Some(accept) if accept.contains("text/csv") => Ok(ExportFormat::Csv),
        _ => Ok(ExportFormat::Json),
    }
}

/// Turn raw query parameters into an export plan.
///
/// Offset and limit are lenient: unparsable or negative values fall back to
/// their defaults and an oversized limit is clamped. Quality bounds and the
/// format are strict.
pub fn plan_export(
    params: &ExportParams,
    accept: Option<&str>,
    config: &ServiceConfig,
) -> Result<ExportPlan, ApiError> {
    let project_id = match non_empty(&params.project_id) {
        Some(raw) => match raw.parse::<i64>() {
            Ok(id) if id > 0 => Some(id),
            _ => return Err(ApiError::bad_request(format!("Invalid project_id: {}", raw))),
        },
        None => None,
    };

    let offset = non_empty(&params.offset)
        .and_then(|raw| raw.parse::<i64>().ok())
        .filter(|offset| *offset > 0)
        .unwrap_or(0) as usize;

    let mut limit = non_empty(&params.limit)
        .and_then(|raw| raw.parse::<i64>().ok())
        .filter(|limit| *limit > 0)
        .map(|limit| limit as usize)
        .unwrap_or(config.default_export_limit);

    let mut limit_clamped = false;
    if limit > config.max_export_limit {
        limit = config.max_export_limit;
        limit_clamped = true;
    }

    let load_all = non_empty(&params.load_all)
        .map(|raw| raw.eq_ignore_ascii_case("true") || raw == "1")
        .unwrap_or(false);
    if load_all {
        limit = config.max_export_limit;
        limit_clamped = true;
    }

    let min_quality = parse_quality("min_quality", &params.min_quality)?;
    let max_quality = parse_quality("max_quality", &params.max_quality)?;
    if let (Some(min), Some(max)) = (min_quality, max_quality) {
        if min > max {
            return Err(ApiError::bad_request(
                "min_quality must not be greater than max_quality",
            ));
        }
    }

    let format = negotiate_format(non_empty(&params.format), accept)?;

    Ok(ExportPlan {
        query: ExportQuery {
            project_id,
            offset,
            limit,
            search: non_empty(&params.search).map(str::to_string),
            source: non_empty(&params.source).map(str::to_string),
            min_quality,
            max_quality,
        },
        envelope: ExportEnvelope {
            offset,
            limit,
            limit_clamped,
        },
        format,
        heavy: load_all || limit >= config.heavy_export_threshold,
    })
}

fn export_headers(response: &mut Response, exporter: &StreamingExporter) {
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(exporter.format().content_type()),
    );
    if let Ok(id) = HeaderValue::from_str(&exporter.export_id().to_string()) {
        headers.insert("x-export-id", id);
    }
    if exporter.format() == ExportFormat::Csv {
        let filename = format!(
            "attachment; filename=records_{}.csv",
            chrono::Utc::now().format("%Y%m%d_%H%M%S")
        );
        if let Ok(value) = HeaderValue::from_str(&filename) {
            headers.insert(header::CONTENT_DISPOSITION, value);
        }
    }
}

/// Export records as JSON or CSV.
///
/// Heavy requests need a slot from the export gate and are streamed batch by
/// batch; once streaming has begun, a failure is reported inside the body.
/// Light requests are rendered in memory and fail with a normal status.
pub async fn export_records(
    State(state): State<ApiState>,
    Query(params): Query<ExportParams>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let accept = headers
        .get(header::ACCEPT)
        .and_then(|value| value.to_str().ok());
    let plan = plan_export(&params, accept, &state.config)?;

    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    let exporter = StreamingExporter::new(plan.format, plan.envelope.clone());

    if !plan.heavy {
        let source = state.export_store.open(&plan.query).await?;
        let body = exporter.render(source).await?;
        let mut response = Body::from(body).into_response();
        export_headers(&mut response, &exporter);
        return Ok(response);
    }

    let permit = state.export_gate.acquire(&cancel)?;
    // The permit drops with this frame if opening the source fails.
    let source = state.export_store.open(&plan.query).await?;

    tracing::info!(
        "Export {} started: format={:?} offset={} limit={} project={:?}",
        exporter.export_id(),
        plan.format,
        plan.query.offset,
        plan.query.limit,
        plan.query.project_id
    );

    let (mut sink, rx) = ChannelSink::channel(STREAM_CHANNEL_CAPACITY);
    let mut response = Response::new(Body::from_stream(stream::unfold(rx, |mut rx| async move {
        rx.recv()
            .await
            .map(|chunk| (Ok::<Bytes, std::io::Error>(Bytes::from(chunk)), rx))
    })));
    export_headers(&mut response, &exporter);

    tokio::spawn(async move {
        exporter.run(permit, source, &mut sink).await;
    });

    Ok(response)
}
