//! Prometheus metrics HTTP endpoint
//!
//! Exposes processor metrics in Prometheus text format at /metrics.
//! Uses hyper for the HTTP server. Scrapes read the summary of the last
//! periodic report, so scraping never resets the reporting window.

use crate::infra::metrics::{Metrics, MetricsSummary, METRICS_BUCKET_BOUNDS, METRICS_NUM_BUCKETS};
use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

/// Prometheus metric type
enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

/// Write a simple metric (counter or gauge) with site label
fn write_metric(output: &mut String, name: &str, help: &str, typ: MetricType, site: &str, val: i64) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name}{{site=\"{site}\"}} {val}");
}

fn write_counter(output: &mut String, name: &str, help: &str, site: &str, val: u64) {
    write_metric(output, name, help, MetricType::Counter, site, val as i64);
}

fn write_gauge(output: &mut String, name: &str, help: &str, site: &str, val: u64) {
    write_metric(output, name, help, MetricType::Gauge, site, val as i64);
}

/// Write a histogram metric with buckets, sum, and count
fn write_histogram(
    output: &mut String,
    name: &str,
    help: &str,
    site: &str,
    buckets: &[u64; METRICS_NUM_BUCKETS],
    bounds: &[u64; 10],
    avg: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} histogram");

    let mut cumulative = 0u64;
    for (i, &bound) in bounds.iter().enumerate() {
        cumulative += buckets[i];
        let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"{bound}\"}} {cumulative}");
    }
    cumulative += buckets[METRICS_NUM_BUCKETS - 1];
    let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"+Inf\"}} {cumulative}");

    let count: u64 = buckets.iter().sum();
    let sum = avg * count;
    let _ = writeln!(output, "{name}_sum{{site=\"{site}\"}} {sum}");
    let _ = writeln!(output, "{name}_count{{site=\"{site}\"}} {count}");
}

/// Format a metrics summary in Prometheus text exposition format
fn format_prometheus_metrics(summary: &MetricsSummary, site_id: &str) -> String {
    let mut output = String::with_capacity(4096);

    write_ingress_metrics(&mut output, site_id, summary);
    write_latency_metrics(&mut output, site_id, summary);
    write_billing_metrics(&mut output, site_id, summary);
    write_state_metrics(&mut output, site_id, summary);

    output
}

fn write_ingress_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_counter(
        output,
        "parking_raw_events_received_total",
        "Raw events accepted at ingress",
        site,
        summary.raw_events_received,
    );
    write_counter(
        output,
        "parking_raw_events_rejected_total",
        "Raw events rejected as malformed or with an unknown status",
        site,
        summary.raw_events_rejected,
    );
    write_counter(
        output,
        "parking_late_events_dropped_total",
        "Raw events dropped behind the lateness watermark",
        site,
        summary.late_events_dropped,
    );
    let _ = writeln!(output, "# HELP parking_events_per_sec Raw events processed per second");
    let _ = writeln!(output, "# TYPE parking_events_per_sec gauge");
    let _ = writeln!(output, "parking_events_per_sec{{site=\"{site}\"}} {:.2}", summary.events_per_sec);
}

fn write_latency_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_counter(output, "parking_batches_total", "Key batches processed", site, summary.batches_total);
    write_histogram(
        output,
        "parking_batch_latency_us",
        "Key batch processing latency in microseconds",
        site,
        &summary.lat_buckets,
        &METRICS_BUCKET_BOUNDS,
        summary.avg_batch_latency_us,
    );
    write_gauge(
        output,
        "parking_batch_latency_p99_us",
        "99th percentile batch latency",
        site,
        summary.lat_p99_us,
    );
}

fn write_billing_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    let _ = writeln!(output, "# HELP parking_billing_events_total Billing events emitted");
    let _ = writeln!(output, "# TYPE parking_billing_events_total counter");
    let _ = writeln!(
        output,
        "parking_billing_events_total{{site=\"{site}\",source=\"vehicle\"}} {}",
        summary.billing_vehicle_events
    );
    let _ = writeln!(
        output,
        "parking_billing_events_total{{site=\"{site}\",source=\"timer\"}} {}",
        summary.billing_timer_events
    );

    write_counter(output, "parking_timers_fired_total", "Timer callbacks invoked", site, summary.timers_fired);
    write_counter(
        output,
        "parking_sessions_opened_total",
        "Parking sessions started",
        site,
        summary.sessions_opened,
    );
    write_counter(
        output,
        "parking_sessions_closed_total",
        "Parking sessions closed by an exit",
        site,
        summary.sessions_closed,
    );
    write_metric(
        output,
        "parking_revenue_collected_total",
        "Sum of final costs of closed sessions",
        MetricType::Counter,
        site,
        summary.revenue_collected,
    );
    write_counter(
        output,
        "parking_egress_dropped_total",
        "Egress messages dropped on a full channel",
        site,
        summary.egress_dropped,
    );
}

fn write_state_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_gauge(
        output,
        "parking_active_sessions",
        "Sessions held in keyed state",
        site,
        summary.active_sessions as u64,
    );
    write_gauge(
        output,
        "parking_pending_timers",
        "Registered billing timers",
        site,
        summary.pending_timers as u64,
    );
    write_counter(
        output,
        "parking_checkpoints_written_total",
        "State checkpoints written",
        site,
        summary.checkpoints_written,
    );
    write_counter(
        output,
        "parking_checkpoint_failures_total",
        "State checkpoints that failed",
        site,
        summary.checkpoint_failures,
    );
}

fn text_response(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
}

/// Handle HTTP requests
async fn handle_request(
    req: Request<hyper::body::Incoming>,
    metrics: Arc<Metrics>,
    site_id: Arc<String>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => {
            let summary = metrics.latest_summary().unwrap_or_default();
            let mut response =
                text_response(StatusCode::OK, format_prometheus_metrics(&summary, &site_id));
            response.headers_mut().insert(
                hyper::header::CONTENT_TYPE,
                hyper::header::HeaderValue::from_static("text/plain; version=0.0.4; charset=utf-8"),
            );
            Ok(response)
        }
        (&Method::GET, "/health") => Ok(text_response(StatusCode::OK, "ok")),
        _ => Ok(text_response(StatusCode::NOT_FOUND, "Not Found")),
    }
}

/// Start the Prometheus metrics HTTP server
pub async fn start_metrics_server(
    port: u16,
    metrics: Arc<Metrics>,
    site_id: String,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    let site_id = Arc::new(site_id);

    info!(port = %port, site = %site_id, "prometheus_metrics_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let metrics = metrics.clone();
                        let site_id = site_id.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let metrics = metrics.clone();
                                let site_id = site_id.clone();
                                async move { handle_request(req, metrics, site_id).await }
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                error!(error = %e, "prometheus_http_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "prometheus_accept_error");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("prometheus_metrics_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_prometheus_metrics() {
        let metrics = Metrics::new();

        metrics.record_raw_event_received();
        metrics.record_batch_processed(1, 150);
        metrics.record_batch_processed(1, 250);
        metrics.record_billing_event(false);
        metrics.record_billing_event(true);
        metrics.record_session_closed(30_000);

        let summary = metrics.report(5, 2);
        let output = format_prometheus_metrics(&summary, "garage");

        assert!(output.contains("parking_raw_events_received_total{site=\"garage\"} 1"));
        assert!(output.contains("parking_batch_latency_us_bucket{site=\"garage\",le=\"+Inf\"} 2"));
        assert!(output.contains("parking_billing_events_total{site=\"garage\",source=\"timer\"} 1"));
        assert!(output.contains("parking_revenue_collected_total{site=\"garage\"} 30000"));
        assert!(output.contains("parking_active_sessions{site=\"garage\"} 5"));
        assert!(output.contains("parking_pending_timers{site=\"garage\"} 2"));
    }

    #[test]
    fn test_format_before_first_report() {
        let output = format_prometheus_metrics(&MetricsSummary::default(), "garage");
        assert!(output.contains("parking_batches_total{site=\"garage\"} 0"));
        assert!(output.contains("parking_batch_latency_us_count{site=\"garage\"} 0"));
    }
}
