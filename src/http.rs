//! HTTP plumbing shared by the worker and balancer surfaces.
//!
//! Server side: an HTTP/1 accept loop and small response builders.
//! Client side: a bounded-timeout request helper over hyper's pooled client.

use std::convert::Infallible;
use std::future::Future;
use std::time::Duration;

use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioIo};
use serde::Serialize;
use tokio::net::TcpListener;

use crate::error::TransportError;

/// Pooled HTTP/1 client used for capacity queries and work submission.
pub type HttpClient = Client<HttpConnector, Full<Bytes>>;

/// Creates a new pooled HTTP client.
pub fn new_client() -> HttpClient {
    Client::builder(TokioExecutor::new()).build_http()
}

/// Performs a bodiless request and collects the full response.
///
/// The whole exchange (connect, headers, body) is bounded by `timeout`.
pub async fn fetch(
    client: &HttpClient,
    method: Method,
    url: &str,
    timeout: Duration,
) -> Result<(StatusCode, Bytes), TransportError> {
    let request = Request::builder()
        .method(method)
        .uri(url)
        .body(Full::new(Bytes::new()))
        .map_err(|e| TransportError::Request(e.to_string()))?;

    let exchange = async {
        let response = client
            .request(request)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        let status = response.status();
        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| TransportError::Body(e.to_string()))?
            .to_bytes();
        Ok::<_, TransportError>((status, body))
    };

    tokio::time::timeout(timeout, exchange)
        .await
        .map_err(|_| TransportError::Timeout(timeout))?
}

/// Builds a JSON response. Encoding failures degrade to a 500.
pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Full<Bytes>> {
    match serde_json::to_vec(body) {
        Ok(bytes) => build_response(status, Bytes::from(bytes), "application/json"),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode response body");
            text_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        }
    }
}

/// Builds a plain-text response.
pub fn text_response(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    build_response(status, Bytes::from_static(body.as_bytes()), "text/plain")
}

fn build_response(
    status: StatusCode,
    body: Bytes,
    content_type: &'static str,
) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

/// Accepts connections forever, serving each with `handler` on its own task.
///
/// Only returns if accepting a connection fails.
pub async fn serve<F, Fut>(listener: TcpListener, handler: F) -> std::io::Result<()>
where
    F: Fn(Request<Incoming>) -> Fut + Clone + Send + 'static,
    Fut: Future<Output = Result<Response<Full<Bytes>>, Infallible>> + Send + 'static,
{
    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let handler = handler.clone();

        tokio::spawn(async move {
            if let Err(e) = http1::Builder::new()
                .serve_connection(io, service_fn(handler))
                .await
            {
                tracing::debug!(error = %e, "connection error");
            }
        });
    }
}
