use std::net::SocketAddr;

use http_body_util::Full;
use hyper::{
    Request, Response, body::Bytes, body::Incoming, header::CONTENT_TYPE, server::conn::http1,
    service::service_fn,
};
use hyper_util::rt::TokioIo;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use prometheus::{Encoder, Registry, TextEncoder};
use tokio::net::TcpListener;

/// Export all OpenTelemetry metrics into `registry` and make the provider
/// the global one.
pub fn install_meter_provider(registry: &Registry) -> anyhow::Result<SdkMeterProvider> {
    let exporter = opentelemetry_prometheus::exporter()
        .with_registry(registry.clone())
        .build()?;
    let provider = SdkMeterProvider::builder().with_reader(exporter).build();
    opentelemetry::global::set_meter_provider(provider.clone());
    Ok(provider)
}

async fn serve_req(
    _req: Request<Incoming>,
    registry: Registry,
) -> Result<Response<Full<Bytes>>, hyper::http::Error> {
    let encoder = TextEncoder::new();
    let metric_families = registry.gather();
    let mut result = Vec::new();
    match encoder.encode(&metric_families, &mut result) {
        Ok(_) => Response::builder()
            .status(200)
            .header(CONTENT_TYPE, encoder.format_type())
            .body(Full::new(Bytes::from(result))),
        Err(e) => {
            error!("{}", e);
            Response::builder().status(500).body(Full::default())
        }
    }
}

pub async fn serve_metrics(listener: TcpListener, registry: Registry) -> std::io::Result<()> {
    loop {
        let (stream, remote) = listener.accept().await?;
        let registry = registry.clone();
        tokio::spawn(async move {
            let service = service_fn(move |req| serve_req(req, registry.clone()));
            if let Err(e) = http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service)
                .await
            {
                debug!("metrics connection from {} failed: {}", remote, e);
            }
        });
    }
}

pub async fn start_prometheus_metrics_server(
    addr: SocketAddr,
    registry: Registry,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("serving metrics on http://{}", listener.local_addr()?);
    serve_metrics(listener, registry).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::FeedMetrics;
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpStream,
    };

    async fn scrape(registry: Registry) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(serve_metrics(listener, registry));
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /metrics HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        server.abort();
        response
    }

    #[tokio::test]
    async fn serves_registry() {
        let registry = Registry::new();
        let counter = prometheus::IntCounter::new("scrapes", "scrapes").unwrap();
        registry.register(Box::new(counter.clone())).unwrap();
        counter.inc();
        let response = scrape(registry).await;
        assert!(response.starts_with("HTTP/1.1 200 OK"), "{}", response);
        assert!(response.contains("scrapes 1"), "{}", response);
    }

    #[tokio::test]
    async fn exports_feed_metrics() {
        let registry = Registry::new();
        let _provider = install_meter_provider(&registry).unwrap();
        let metrics = FeedMetrics::new();
        metrics.event_enqueued("Component");
        metrics.reconnect("Component");
        let response = scrape(registry).await;
        assert!(
            response.contains("change_feed_events_enqueued"),
            "{}",
            response
        );
        assert!(response.contains("kind=\"Component\""), "{}", response);
    }
}
