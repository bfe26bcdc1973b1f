//! Metrics and health endpoint

use http_body_util::Full;
use hyper::{
    body::Bytes,
    header::{HeaderValue, CONTENT_TYPE},
    server::conn::http1,
    service::service_fn,
    Method, Request, Response, StatusCode,
};
use hyper_util::rt::TokioIo;
use routegroup_core::ControllerMetrics;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{debug, info};

pub async fn serve(addr: SocketAddr, metrics: ControllerMetrics) -> anyhow::Result<()> {
    let listener = TcpListener::bind(&addr).await?;
    info!("Metrics server listening on {}", addr);

    loop {
        let (stream, peer_addr) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let metrics = metrics.clone();

        tokio::task::spawn(async move {
            let service = service_fn(move |req| {
                let metrics = metrics.clone();
                async move { Ok::<_, hyper::Error>(handle_request(req, &metrics)) }
            });

            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                debug!("Error serving HTTP connection from {}: {}", peer_addr, e);
            }
        });
    }
}

fn text_response(status: StatusCode, body: String) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; version=0.0.4"));
    response
}

fn handle_request<B>(req: Request<B>, metrics: &ControllerMetrics) -> Response<Full<Bytes>> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => match metrics.gather() {
            Ok(text) => text_response(StatusCode::OK, text),
            Err(e) => text_response(StatusCode::INTERNAL_SERVER_ERROR, format!("Failed to gather metrics: {}\n", e)),
        },
        (_, "/healthz") => text_response(StatusCode::OK, "OK\n".to_string()),
        _ => text_response(StatusCode::NOT_FOUND, "Not Found\n".to_string()),
    }
}
