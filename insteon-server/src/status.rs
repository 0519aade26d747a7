//! Read-only HTTP status endpoint.
//!
//! Routes:
//! - `/health`
//! - `/metrics` (Prometheus text format)
//! - `/gateways`
//! - `/gateways/{name}`
//! - `/gateways/{name}/devices/{address}`

use crate::metrics::Metrics;
use crate::runner::GatewayRegistry;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use insteon_core::{DeviceStatus, GatewayStatus, Node};
use insteon_protocol::Address;
use serde::Serialize;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

/// Summary line of one gateway in `/gateways`.
#[derive(Debug, Serialize)]
struct GatewaySummary {
    name: String,
    address: Option<Address>,
    devices: usize,
    aldb_records: usize,
    queued: usize,
}

impl From<&GatewayStatus> for GatewaySummary {
    fn from(status: &GatewayStatus) -> Self {
        Self {
            name: status.name.clone(),
            address: status.address,
            devices: status.devices.len(),
            aldb_records: status.aldb_records,
            queued: status.queued,
        }
    }
}

/// A device with its cached link table.
#[derive(Debug, Serialize)]
struct DeviceReport {
    #[serde(flatten)]
    status: DeviceStatus,
    aldb: BTreeMap<String, String>,
}

pub async fn run_status_server(
    addr: SocketAddr,
    gateways: GatewayRegistry,
    metrics: Arc<Metrics>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Status server listening on http://{}/gateways", listener.local_addr()?);

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _)) => {
                        let gateways = gateways.clone();
                        let metrics = metrics.clone();
                        tokio::spawn(async move {
                            let io = TokioIo::new(stream);
                            let service = service_fn(move |req| {
                                let gateways = gateways.clone();
                                let metrics = metrics.clone();
                                async move { handle_request(req, gateways, metrics).await }
                            });
                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                tracing::debug!("Status connection error: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!("Status server accept error: {}", e);
                    }
                }
            }
            _ = shutdown.recv() => {
                tracing::info!("Status server shutting down");
                break;
            }
        }
    }

    Ok(())
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    gateways: GatewayRegistry,
    metrics: Arc<Metrics>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    if req.method() != Method::GET {
        return Ok(text(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed"));
    }
    Ok(route(req.uri().path(), &gateways, &metrics))
}

/// Builds the response for a GET of `path`.
pub fn route(path: &str, gateways: &GatewayRegistry, metrics: &Metrics) -> Response<Full<Bytes>> {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    match segments.as_slice() {
        ["health"] | ["healthz"] => text(StatusCode::OK, "OK"),
        ["metrics"] => response(
            StatusCode::OK,
            "text/plain; version=0.0.4; charset=utf-8",
            metrics.encode(),
        ),
        ["gateways"] => {
            let summaries: Vec<GatewaySummary> = gateways
                .iter()
                .map(|(_, plm)| GatewaySummary::from(&plm.lock().status()))
                .collect();
            json(&summaries)
        }
        ["gateways", name] => match gateways.get(name) {
            Some(plm) => {
                let status = plm.lock().status();
                json(&status)
            }
            None => text(StatusCode::NOT_FOUND, "Unknown gateway"),
        },
        ["gateways", name, "devices", id] => {
            let Some(plm) = gateways.get(name) else {
                return text(StatusCode::NOT_FOUND, "Unknown gateway");
            };
            let Ok(address) = id.parse::<Address>() else {
                return text(StatusCode::BAD_REQUEST, "Invalid device address");
            };
            let report = plm.lock().device(address).map(|device| DeviceReport {
                status: DeviceStatus::from_device(device),
                aldb: device.snapshot().aldb,
            });
            match report {
                Some(report) => json(&report),
                None => text(StatusCode::NOT_FOUND, "Unknown device"),
            }
        }
        _ => text(StatusCode::NOT_FOUND, "Not Found"),
    }
}

fn json<T: Serialize>(value: &T) -> Response<Full<Bytes>> {
    match serde_json::to_vec_pretty(value) {
        Ok(body) => response(StatusCode::OK, "application/json", body),
        Err(e) => {
            tracing::error!("Failed to serialize status: {}", e);
            text(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
        }
    }
}

fn text(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    response(status, "text/plain; charset=utf-8", body.as_bytes().to_vec())
}

fn response(
    status: StatusCode,
    content_type: &'static str,
    body: Vec<u8>,
) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(hyper::header::CONTENT_TYPE, hyper::header::HeaderValue::from_static(content_type));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::SharedPlm;
    use http_body_util::BodyExt;
    use insteon_core::{EngineConfig, Plm};
    use parking_lot::Mutex;

    fn registry() -> GatewayRegistry {
        let mut plm = Plm::new("home", EngineConfig::default());
        plm.add_device(Address::new(0x11, 0x22, 0x33)).unwrap();
        let mut gateways: BTreeMap<String, SharedPlm> = BTreeMap::new();
        gateways.insert("home".to_string(), Arc::new(Mutex::new(plm)));
        GatewayRegistry::new(gateways)
    }

    async fn body(response: Response<Full<Bytes>>) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    async fn get_json(path: &str) -> serde_json::Value {
        let metrics = Metrics::new().unwrap();
        let response = route(path, &registry(), &metrics);
        assert_eq!(response.status(), StatusCode::OK, "{path}");
        assert_eq!(response.headers()[hyper::header::CONTENT_TYPE], "application/json");
        serde_json::from_str(&body(response).await).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let metrics = Metrics::new().unwrap();
        let response = route("/health", &registry(), &metrics);
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body(response).await, "OK");
    }

    #[tokio::test]
    async fn test_gateway_list() {
        let list = get_json("/gateways").await;
        assert_eq!(list[0]["name"], "home");
        assert_eq!(list[0]["devices"], 1);
    }

    #[tokio::test]
    async fn test_gateway_status() {
        let status = get_json("/gateways/home/").await;
        assert_eq!(status["name"], "home");
        assert_eq!(status["devices"][0]["address"], "112233");
    }

    #[tokio::test]
    async fn test_device_report() {
        let report = get_json("/gateways/home/devices/11.22.33").await;
        assert_eq!(report["address"], "112233");
        assert!(report["aldb"].as_object().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_not_found() {
        let metrics = Metrics::new().unwrap();
        let gateways = registry();
        for path in ["/", "/gateways/barn", "/gateways/home/devices/445566", "/gateways/home/x"] {
            assert_eq!(route(path, &gateways, &metrics).status(), StatusCode::NOT_FOUND, "{path}");
        }
        assert_eq!(
            route("/gateways/home/devices/zz", &gateways, &metrics).status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[tokio::test]
    async fn test_metrics_route() {
        let metrics = Metrics::new().unwrap();
        metrics.record_event("home", &insteon_core::NetworkEvent::GatewayBusy);
        let response = route("/metrics", &registry(), &metrics);
        assert!(body(response).await.contains("insteon_events_total"));
    }
}
