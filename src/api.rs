use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::Result;
use chrono::{Local, NaiveDate};
use serde::Serialize;
use serde_json::{Value, json};
use tiny_http::{Header, Method, Response, Server, StatusCode};
use tracing::{debug, info, warn};

pub const DEFAULT_HOLIDAY_WINDOW_DAYS: u32 = 30;

#[derive(Debug, Clone, Serialize)]
pub struct NextAlarmView {
    pub id: String,
    pub time: String,
    pub trigger_iso_local: String,
    pub minutes_until: i64,
    pub display: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AlarmView {
    pub id: String,
    pub time: String,
    pub enabled: bool,
    pub sound: Option<String>,
    pub repeat: String,
    pub repeat_mask: u8,
    pub next_trigger_iso_local: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HolidayView {
    pub date: NaiveDate,
    pub name: Option<String>,
}

/// What the run loop last published for API readers.
#[derive(Debug, Clone, Serialize, Default)]
pub struct RuntimeSnapshot {
    pub iso_local: String,
    pub today: Option<NaiveDate>,
    pub skip_holidays: bool,
    pub next: Option<NextAlarmView>,
    pub display: String,
    pub alarms: Vec<AlarmView>,
    pub holidays: Vec<HolidayView>,
    pub holidays_last_update: Option<String>,
    pub fired_count: u64,
    pub updated_unix_ms: i64,
}

#[derive(Debug)]
pub struct ApiSharedState {
    pub runtime: RuntimeSnapshot,
    total_requests: u64,
    server_started_unix_ms: i64,
}

impl Default for ApiSharedState {
    fn default() -> Self {
        Self {
            runtime: RuntimeSnapshot::default(),
            total_requests: 0,
            server_started_unix_ms: Local::now().timestamp_millis(),
        }
    }
}

impl ApiSharedState {
    pub fn total_requests(&self) -> u64 {
        self.total_requests
    }

    pub fn server_started_unix_ms(&self) -> i64 {
        self.server_started_unix_ms
    }

    /// Published holidays falling within `days` of the snapshot's date.
    pub fn holidays_within(&self, days: u32) -> Vec<HolidayView> {
        let Some(today) = self.runtime.today else {
            return Vec::new();
        };
        let end = today
            .checked_add_days(chrono::Days::new(u64::from(days)))
            .unwrap_or(NaiveDate::MAX);
        self.runtime
            .holidays
            .iter()
            .filter(|holiday| holiday.date >= today && holiday.date <= end)
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    pub bind_addr: String,
    pub port: u16,
}

pub struct ApiServer {
    pub state: Arc<Mutex<ApiSharedState>>,
    stop: Arc<AtomicBool>,
    http_join: Option<JoinHandle<()>>,
}

impl ApiServer {
    pub fn start(config: ApiServerConfig) -> Result<Self> {
        let bind = format!("{}:{}", config.bind_addr, config.port);
        let server = Server::http(&bind)
            .map_err(|err| anyhow::anyhow!("failed to start API server on {bind}: {err}"))?;
        let state = Arc::new(Mutex::new(ApiSharedState::default()));
        let stop = Arc::new(AtomicBool::new(false));
        let state_for_thread = Arc::clone(&state);
        let stop_for_thread = Arc::clone(&stop);
        let http_join =
            thread::spawn(move || run_server_loop(server, state_for_thread, stop_for_thread));
        info!(%bind, "local API listening");

        Ok(Self {
            state,
            stop,
            http_join: Some(http_join),
        })
    }
}

impl Drop for ApiServer {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(join) = self.http_join.take() {
            let _ = join.join();
        }
    }
}

fn run_server_loop(server: Server, state: Arc<Mutex<ApiSharedState>>, stop: Arc<AtomicBool>) {
    while !stop.load(Ordering::Relaxed) {
        match server.recv_timeout(Duration::from_millis(200)) {
            Ok(Some(request)) => handle_request(request, &state),
            Ok(None) => continue,
            Err(err) => {
                warn!(error = %err, "API receive failed");
                continue;
            }
        }
    }
}

#[derive(Debug)]
enum Routed {
    Json(Value),
    Text(&'static str),
    NotFound,
}

fn handle_request(request: tiny_http::Request, state: &Arc<Mutex<ApiSharedState>>) {
    let remote_ip = request.remote_addr().map(|addr| addr.ip());
    if let Err((status, reason)) = admit(request.method(), remote_ip) {
        debug!(status, reason, "API request rejected");
        reply(request, status, Routed::Text(reason));
        return;
    }

    let url = request.url().to_string();
    let (path, query) = url.split_once('?').unwrap_or((url.as_str(), ""));
    let routed = match state.lock() {
        Ok(mut guard) => {
            guard.total_requests = guard.total_requests.saturating_add(1);
            route(path, query, &guard)
        }
        Err(_) => {
            reply(request, 500, Routed::Text("internal state lock error"));
            return;
        }
    };
    debug!(path, "API request");
    let status = if matches!(routed, Routed::NotFound) { 404 } else { 200 };
    reply(request, status, routed);
}

/// Read-only and local-network only.
fn admit(method: &Method, remote_ip: Option<IpAddr>) -> Result<(), (u16, &'static str)> {
    if *method != Method::Get {
        return Err((405, "method not allowed"));
    }
    match remote_ip {
        None => Err((400, "missing remote address")),
        Some(ip) if !is_local_network_ip(ip) => Err((403, "forbidden: local network only")),
        Some(_) => Ok(()),
    }
}

fn route(path: &str, query: &str, state: &ApiSharedState) -> Routed {
    match path {
        "/healthz" => Routed::Text("ok"),
        "/v1" => Routed::Json(json!({
            "state_url": "/v1/state",
            "next_url": "/v1/next",
            "alarms_url": "/v1/alarms",
            "holidays_url": "/v1/holidays",
            "health_url": "/healthz",
        })),
        "/" | "/v1/state" => Routed::Json(json!({
            "runtime": state.runtime,
            "total_requests": state.total_requests(),
            "server_started_unix_ms": state.server_started_unix_ms(),
        })),
        "/v1/next" => Routed::Json(json!({
            "next": state.runtime.next,
            "display": state.runtime.display,
            "skip_holidays": state.runtime.skip_holidays,
        })),
        "/v1/alarms" => Routed::Json(json!({
            "count": state.runtime.alarms.len(),
            "alarms": state.runtime.alarms,
        })),
        "/v1/holidays" => {
            let days = holiday_window_days(query);
            let holidays = state.holidays_within(days);
            Routed::Json(json!({
                "days": days,
                "last_update": state.runtime.holidays_last_update,
                "count": holidays.len(),
                "holidays": holidays,
            }))
        }
        _ => Routed::NotFound,
    }
}

fn reply(request: tiny_http::Request, status: u16, routed: Routed) {
    let (content_type, body) = match routed {
        Routed::Json(payload) => match serde_json::to_vec(&payload) {
            Ok(bytes) => ("application/json; charset=utf-8", bytes),
            Err(err) => {
                warn!(error = %err, "failed to encode API payload");
                return;
            }
        },
        Routed::Text(text) => ("text/plain; charset=utf-8", text.as_bytes().to_vec()),
        Routed::NotFound => ("text/plain; charset=utf-8", b"not found".to_vec()),
    };
    let Ok(header) = Header::from_bytes("Content-Type", content_type) else {
        warn!(content_type, "invalid content-type header");
        return;
    };
    let response = Response::from_data(body)
        .with_status_code(StatusCode(status))
        .with_header(header);
    if let Err(err) = request.respond(response) {
        debug!(error = %err, "API client went away before the reply");
    }
}

/// `days` query parameter of `/v1/holidays`; absent or unparsable values
/// fall back to the default window.
fn holiday_window_days(query: &str) -> u32 {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == "days")
        .and_then(|(_, value)| value.parse::<u32>().ok())
        .unwrap_or(DEFAULT_HOLIDAY_WINDOW_DAYS)
}

fn is_local_v4(ip: Ipv4Addr) -> bool {
    ip.is_loopback() || ip.is_private() || ip.is_link_local()
}

fn is_local_network_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_local_v4(v4),
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unique_local()
                || v6.is_unicast_link_local()
                || v6.to_ipv4_mapped().is_some_and(is_local_v4)
        }
    }
}
