//! The chaos-injection request pipeline: rule lookup, decision, drop/error
//! synthesis, upstream forwarding, and response mutation.

use std::io;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::Request;
use axum::http::header::{CONNECTION, CONTENT_LENGTH, CONTENT_TYPE, TRANSFER_ENCODING};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::{Bytes, BytesMut};
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::config::Settings;
use crate::engine::{format_latency, ChaosEngine, Decision, HEADER_CHAOS_PROXY, HEADER_LATENCY_MS};
use crate::error::ProxyError;
use crate::models::{ChaosType, RequestLog};
use crate::observer::{ObservedStream, RequestTrace};
use crate::shaper::ThrottledStream;
use crate::store::ConfigStore;

/// Request header carrying the config id in header-addressed mode.
pub const HEADER_CONFIG_ID_REQUEST: &str = "X-Chaos-Config-ID";
/// Response header naming the config that handled the request.
pub const HEADER_CONFIG_ID: &str = "X-Chaos-Proxy-Config-ID";
/// Present when fuzzing actually mutated the response body.
pub const HEADER_FUZZED: &str = "X-Chaos-Proxy-Fuzzed";

/// Headers that are connection-scoped and must not be forwarded.
const HOP_BY_HOP: [&str; 9] = [
    "connection",
    "proxy-connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// How the config id was supplied; path mode additionally rewrites the
/// forwarded path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressingMode {
    Path,
    Header,
}

/// Capability seam for terminating a client connection without a response.
/// A runtime that can seize the raw socket closes it and returns true.
pub trait ConnectionHijacker: Send + Sync {
    fn hijack(&self) -> bool;
}

/// Hyper never surrenders the accepted socket, so the default hijacker
/// declines and the pipeline falls back to an empty 503 with
/// `Connection: close`.
pub struct NoHijack;

impl ConnectionHijacker for NoHijack {
    fn hijack(&self) -> bool {
        false
    }
}

#[derive(Clone)]
pub struct ProxyState {
    pub store: Arc<dyn ConfigStore>,
    pub engine: Arc<ChaosEngine>,
    pub client: reqwest::Client,
    pub log_tx: mpsc::Sender<RequestLog>,
    pub hijacker: Arc<dyn ConnectionHijacker>,
    pub settings: Arc<Settings>,
}

/// Runs one request through the pipeline. Every exit path funnels through a
/// [`RequestTrace`] so the observer sees exactly one record.
pub async fn handle_proxy(
    state: ProxyState,
    config_id: String,
    mode: AddressingMode,
    req: Request,
) -> Response {
    let method = req.method().clone();
    let original_path = req.uri().path().to_string();
    let query = req.uri().query().map(str::to_string);

    let mut trace = RequestTrace::new(
        state.log_tx.clone(),
        config_id.clone(),
        method.to_string(),
        original_path.clone(),
    );

    let config = match timeout(state.settings.store_timeout, state.store.get(&config_id)).await {
        Ok(Ok(config)) => config,
        Ok(Err(e)) => {
            warn!("config {} lookup failed: {}", config_id, e);
            return fail(trace, ProxyError::ConfigNotFound);
        }
        Err(_) => {
            warn!("config {} lookup timed out", config_id);
            return fail(trace, ProxyError::ConfigNotFound);
        }
    };

    if !config.enabled {
        return fail(trace, ProxyError::ConfigDisabled);
    }

    let decision = state.engine.decide(&config.rules);
    info!(
        "proxying {} {} via config {} (drop: {}, error: {}, latency: {})",
        method,
        original_path,
        config_id,
        decision.should_drop_connection,
        decision.should_inject_error,
        decision.should_inject_latency,
    );

    if decision.should_drop_connection {
        info!("dropping connection for config {}", config_id);
        trace.set_chaos_type(ChaosType::DropConnection);
        if state.hijacker.hijack() {
            // The socket is gone; status 0 marks the hijack in the log.
            trace.set_status(0);
            return empty_response(StatusCode::SERVICE_UNAVAILABLE);
        }
        trace.set_status(503);
        let mut response = empty_response(StatusCode::SERVICE_UNAVAILABLE);
        response
            .headers_mut()
            .insert(CONNECTION, HeaderValue::from_static("close"));
        return response;
    }

    if decision.should_inject_error {
        info!(
            "injecting error {} for config {}",
            decision.error_code, config_id
        );
        trace.set_chaos_type(ChaosType::Error);
        trace.set_status(decision.error_code);
        return error_response(&decision);
    }

    let mut url = match reqwest::Url::parse(&config.target) {
        Ok(url) => url,
        Err(e) => {
            error!(
                "invalid target {:?} for config {}: {}",
                config.target, config_id, e
            );
            return fail(trace, ProxyError::InvalidTarget);
        }
    };
    let forward_path = rewrite_path(mode, &original_path, &config_id);
    url.set_path(&forward_path);
    url.set_query(query.as_deref());
    debug!(
        "forwarding {} -> {} (host {:?})",
        original_path,
        forward_path,
        url.host_str()
    );

    let upstream_headers = build_upstream_headers(req.headers(), &decision);
    let has_body = request_has_body(req.headers());

    if decision.should_inject_latency {
        info!(
            "injecting {} latency for config {}",
            format_latency(decision.latency_duration),
            config_id
        );
        trace.set_chaos_type(ChaosType::Latency);
        tokio::time::sleep(decision.latency_duration).await;
    }

    let mut builder = state
        .client
        .request(method, url)
        .headers(upstream_headers);
    if has_body {
        builder = builder.body(reqwest::Body::wrap_stream(
            req.into_body().into_data_stream(),
        ));
    }

    let upstream = match builder.send().await {
        Ok(upstream) => upstream,
        Err(e) => {
            error!("upstream request failed for config {}: {}", config_id, e);
            return fail(trace, ProxyError::Upstream(e));
        }
    };

    let status = upstream.status();
    trace.set_status(status.as_u16());

    let mut response_headers = HeaderMap::new();
    for (name, value) in upstream.headers() {
        if !HOP_BY_HOP.contains(&name.as_str()) {
            response_headers.append(name.clone(), value.clone());
        }
    }
    set_header(&mut response_headers, HEADER_CHAOS_PROXY, "true");
    set_header(&mut response_headers, HEADER_CONFIG_ID, &config_id);
    if decision.should_inject_latency {
        set_header(
            &mut response_headers,
            HEADER_LATENCY_MS,
            &format_latency(decision.latency_duration),
        );
    }

    let content_length = upstream.content_length();
    let mut body_stream: BoxStream<'static, Result<Bytes, io::Error>> = upstream
        .bytes_stream()
        .map(|chunk| chunk.map_err(io_error))
        .boxed();

    let fuzz_cap = state.settings.max_fuzz_body_bytes;
    let wants_fuzz = state.engine.should_fuzz(&config.rules)
        && content_length.map(|n| n as usize <= fuzz_cap).unwrap_or(true);
    if wants_fuzz {
        let buffered = buffer_up_to(body_stream, fuzz_cap).await;
        if let Some(e) = buffered.error {
            // Emit what we read, then surface the error like a passthrough
            // stream would have.
            warn!("failed to read response body for fuzzing: {}", e);
            body_stream = futures::stream::iter(vec![Ok(buffered.data.freeze()), Err(e)]).boxed();
        } else if !buffered.complete {
            debug!(
                "response body exceeds fuzz buffer cap ({} bytes), passing through",
                fuzz_cap
            );
            body_stream = futures::stream::iter(vec![Ok(buffered.data.freeze())])
                .chain(buffered.rest)
                .boxed();
        } else {
            let data = buffered.data.freeze();
            let (new_body, mutated) = state.engine.fuzz_body(&data, &config.rules);
            if mutated {
                info!("fuzzed response body for config {}", config_id);
                trace.set_chaos_type(ChaosType::ResponseFuzzing);
                set_header(&mut response_headers, HEADER_FUZZED, "true");
                set_header(
                    &mut response_headers,
                    CONTENT_LENGTH.as_str(),
                    &new_body.len().to_string(),
                );
                body_stream = futures::stream::iter(vec![Ok(Bytes::from(new_body))]).boxed();
            } else {
                body_stream = futures::stream::iter(vec![Ok(data)]).boxed();
            }
        }
    }

    let limit_kbps = config.rules.bandwidth_limit_kbps;
    if limit_kbps > 0 {
        if trace.chaos_type() == ChaosType::None {
            trace.set_chaos_type(ChaosType::BandwidthLimit);
        }
        body_stream = ThrottledStream::new(body_stream, limit_kbps).boxed();
    }

    let mut response = Response::new(Body::from_stream(ObservedStream::new(body_stream, trace)));
    *response.status_mut() = status;
    *response.headers_mut() = response_headers;
    response
}

/// Records the failure status on the trace, then renders the error.
fn fail(mut trace: RequestTrace, err: ProxyError) -> Response {
    trace.set_status(err.status().as_u16());
    err.into_response()
}

fn empty_response(status: StatusCode) -> Response {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = status;
    response
}

/// Synthesized error: decision headers, then the JSON body. The general
/// `X-Chaos-Proxy` stamp is deliberately absent here; injected responses
/// carry only the injected/type markers.
fn error_response(decision: &Decision) -> Response {
    let mut response = Response::new(Body::from(decision.error_body.clone()));
    *response.status_mut() = StatusCode::from_u16(decision.error_code)
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let headers = response.headers_mut();
    for (name, value) in &decision.modify_headers {
        if let Some((name, value)) = header_pair(name, value) {
            headers.insert(name, value);
        }
    }
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

/// Path-mode requests lose the `/proxy/<id>` prefix; header-mode requests
/// forward their path verbatim.
fn rewrite_path(mode: AddressingMode, original_path: &str, config_id: &str) -> String {
    match mode {
        AddressingMode::Path => {
            let prefix = format!("/proxy/{}", config_id);
            let stripped = original_path.strip_prefix(&prefix).unwrap_or(original_path);
            if stripped.is_empty() {
                "/".to_string()
            } else {
                stripped.to_string()
            }
        }
        AddressingMode::Header => original_path.to_string(),
    }
}

/// Copies client headers minus hop-by-hop and host, then applies the
/// decision's header plan. The upstream Host derives from the target URL.
fn build_upstream_headers(original: &HeaderMap, decision: &Decision) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in original {
        let lower = name.as_str();
        if HOP_BY_HOP.contains(&lower) || lower == "host" || lower == "content-length" {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }
    for (name, value) in &decision.modify_headers {
        match header_pair(name, value) {
            Some((name, value)) => {
                headers.insert(name, value);
            }
            None => warn!("skipping invalid header {:?}", name),
        }
    }
    for name in &decision.remove_headers {
        if let Ok(name) = HeaderName::from_bytes(name.as_bytes()) {
            headers.remove(name);
        }
    }
    headers
}

fn request_has_body(headers: &HeaderMap) -> bool {
    let declared = headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .map(|n| n > 0)
        .unwrap_or(false);
    declared || headers.contains_key(TRANSFER_ENCODING)
}

fn header_pair(name: &str, value: &str) -> Option<(HeaderName, HeaderValue)> {
    let name = HeaderName::from_bytes(name.as_bytes()).ok()?;
    let value = HeaderValue::from_str(value).ok()?;
    Some((name, value))
}

fn set_header(headers: &mut HeaderMap, name: &str, value: &str) {
    if let Some((name, value)) = header_pair(name, value) {
        headers.insert(name, value);
    }
}

fn io_error(e: reqwest::Error) -> io::Error {
    io::Error::new(io::ErrorKind::Other, e)
}

struct BufferOutcome<S> {
    data: BytesMut,
    complete: bool,
    error: Option<io::Error>,
    rest: S,
}

/// Accumulates the stream until it ends, errors, or exceeds `cap` bytes.
/// The caller re-chains `data` ahead of `rest` when buffering gave up.
async fn buffer_up_to<S>(mut stream: S, cap: usize) -> BufferOutcome<S>
where
    S: Stream<Item = Result<Bytes, io::Error>> + Unpin,
{
    let mut data = BytesMut::new();
    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(chunk) => {
                data.extend_from_slice(&chunk);
                if data.len() > cap {
                    return BufferOutcome {
                        data,
                        complete: false,
                        error: None,
                        rest: stream,
                    };
                }
            }
            Err(e) => {
                return BufferOutcome {
                    data,
                    complete: false,
                    error: Some(e),
                    rest: stream,
                }
            }
        }
    }
    BufferOutcome {
        data,
        complete: true,
        error: None,
        rest: stream,
    }
}
