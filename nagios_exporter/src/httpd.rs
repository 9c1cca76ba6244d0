//! The exporter's HTTP surface
//!
//! A small hyper server: the telemetry path runs one collection per request,
//! `/` serves an index page pointing at it and everything else is a 404.

use std::{future::Future, net::SocketAddr, sync::Arc};

use bytes::Bytes;
use http_body_util::{BodyExt, Full, combinators::BoxBody};
use hyper::{Request, Response, StatusCode, header, service::Service};
use hyper_util::{
    rt::{TokioExecutor, TokioIo},
    server::conn::auto,
};
use tokio::{
    net::TcpListener,
    pin,
    sync::{Semaphore, TryAcquireError},
    task::JoinSet,
};
use tracing::{debug, error, info, warn};

use crate::{exposition, source::Source};

static NOT_FOUND: &[u8] = b"Not found";

#[derive(thiserror::Error, Debug)]
/// Errors produced by [`serve`]
pub enum Error {
    /// Wrapper for [`std::io::Error`].
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Wrap `chunk` as a response body.
pub(crate) fn full<T: Into<Bytes>>(chunk: T) -> BoxBody<Bytes, hyper::Error> {
    Full::new(chunk.into())
        .map_err(|never| match never {})
        .boxed()
}

fn index_page(telemetry_path: &str) -> Bytes {
    Bytes::from(format!(
        "<html>\n\
         <head><title>Nagios Exporter</title></head>\n\
         <body>\n\
         <h1>Nagios Exporter</h1>\n\
         <p><a href='{telemetry_path}'>Metrics</a></p>\n\
         </body>\n\
         </html>\n"
    ))
}

/// Request handler shared by every connection.
#[derive(Debug, Clone)]
pub struct Exporter {
    source: Arc<Source>,
    telemetry_path: Arc<str>,
    index: Bytes,
}

impl Exporter {
    /// Create a new [`Exporter`] serving `source` at `telemetry_path`.
    #[must_use]
    pub fn new(source: Source, telemetry_path: &str) -> Self {
        Self {
            source: Arc::new(source),
            telemetry_path: Arc::from(telemetry_path),
            index: index_page(telemetry_path),
        }
    }

    /// Collect from the upstream and render the exposition text. A failed
    /// collection is logged and rendered as `nagios_up 0`.
    ///
    /// # Errors
    ///
    /// Returns an error only if the recorder cannot be built.
    pub async fn scrape(&self) -> Result<String, exposition::Error> {
        let extended = self.source.supports_extended();
        match self.source.collect().await {
            Ok(snapshot) => exposition::render(Some(&snapshot), extended),
            Err(err) => {
                warn!("Collection failed: {err}");
                exposition::render(None, extended)
            }
        }
    }

    async fn handle_request(
        self,
        req: Request<hyper::body::Incoming>,
    ) -> Result<Response<BoxBody<Bytes, hyper::Error>>, hyper::Error> {
        let path = req.uri().path();
        if path == &*self.telemetry_path {
            let response = match self.scrape().await {
                Ok(text) => Response::builder()
                    .status(StatusCode::OK)
                    .header(header::CONTENT_TYPE, exposition::CONTENT_TYPE)
                    .body(full(text)),
                Err(err) => {
                    error!("Failed to render metrics: {err}");
                    Response::builder()
                        .status(StatusCode::INTERNAL_SERVER_ERROR)
                        .body(full(err.to_string()))
                }
            };
            return Ok(response.expect("Creating HTTP response should not fail"));
        }

        if path == "/" {
            return Ok(Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, "text/html; charset=utf-8")
                .body(full(self.index.clone()))
                .expect("Creating HTTP response should not fail"));
        }

        Ok(Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(full(Bytes::from_static(NOT_FOUND)))
            .expect("Creating HTTP response should not fail"))
    }
}

/// Serve `exporter` on `listener` until `shutdown` resolves, then wait for
/// in-flight connections to finish.
///
/// # Errors
///
/// Returns an error if the listener's address cannot be read.
pub async fn serve<F>(
    listener: TcpListener,
    exporter: Exporter,
    concurrency_limit: usize,
    shutdown: F,
) -> Result<(), Error>
where
    F: Future<Output = ()>,
{
    info!("Listening on {}", listener.local_addr()?);
    run_httpd(listener, concurrency_limit, shutdown, move || {
        let exporter = exporter.clone();
        hyper::service::service_fn(move |req| exporter.clone().handle_request(req))
    })
    .await
}

/// Bind `addr` for [`serve`].
///
/// # Errors
///
/// Returns an error if the address cannot be bound.
pub async fn bind(addr: SocketAddr) -> Result<TcpListener, Error> {
    Ok(TcpListener::bind(addr).await?)
}

async fn run_httpd<SF, S, F>(
    listener: TcpListener,
    concurrency_limit: usize,
    shutdown: F,
    make_service: SF,
) -> Result<(), Error>
where
    // "service factory"
    SF: Send + Sync + 'static + Clone + Fn() -> S,
    S: Service<
            Request<hyper::body::Incoming>,
            Response = Response<BoxBody<Bytes, hyper::Error>>,
            Error = hyper::Error,
        > + Send
        + 'static,
    S::Future: Send + 'static,
    F: Future<Output = ()>,
{
    let sem = Arc::new(Semaphore::new(concurrency_limit));
    let mut join_set = JoinSet::new();

    pin!(shutdown);
    loop {
        tokio::select! {
            () = &mut shutdown => {
                info!("Shutdown signal received, stopping accept loop.");
                break;
            }

            incoming = listener.accept() => {
                let (stream, addr) = match incoming {
                    Ok(sa) => sa,
                    Err(e) => {
                        error!("Error accepting connection: {e}");
                        continue;
                    }
                };
                debug!("Accepted connection from {addr}");

                let sem = Arc::clone(&sem);
                let service_factory = make_service.clone();

                join_set.spawn(async move {
                    let permit = match sem.try_acquire() {
                        Ok(p) => p,
                        Err(TryAcquireError::Closed) => {
                            error!("Semaphore closed");
                            return;
                        }
                        Err(TryAcquireError::NoPermits) => {
                            warn!("httpd over connection capacity, load shedding");
                            drop(stream);
                            return;
                        }
                    };

                    let builder = auto::Builder::new(TokioExecutor::new());
                    let serve_future =
                        builder.serve_connection(TokioIo::new(stream), service_factory());

                    if let Err(e) = serve_future.await {
                        error!("Error serving {addr}: {e}");
                    }
                    drop(permit);
                });
            }
        }
    }

    drop(listener);
    while join_set.join_next().await.is_some() {}
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::{path::PathBuf, time::Duration};

    use tokio::sync::oneshot;

    use super::*;
    use crate::source::{self, api, nagiostats};

    struct Running {
        addr: SocketAddr,
        stop: oneshot::Sender<()>,
        handle: tokio::task::JoinHandle<Result<(), Error>>,
    }

    async fn start(config: source::Config) -> Running {
        let source = Source::new(config).expect("failed to build source");
        let exporter = Exporter::new(source, "/metrics");
        let listener = bind(SocketAddr::from(([127, 0, 0, 1], 0)))
            .await
            .expect("failed to bind");
        let addr = listener.local_addr().expect("no local address");
        let (stop, stopped) = oneshot::channel();
        let handle = tokio::spawn(serve(listener, exporter, 8, async move {
            let _ = stopped.await;
        }));
        Running { addr, stop, handle }
    }

    async fn get(addr: SocketAddr, path: &str) -> reqwest::Response {
        reqwest::Client::new()
            .get(format!("http://{addr}{path}"))
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .expect("request failed")
    }

    #[tokio::test]
    async fn metrics_path_serves_exposition() {
        let upstream = api::tests::mock_xi();
        let server = start(source::Config::Api(api::tests::config(
            upstream,
            "0123456789abcdef",
        )))
        .await;

        let resp = get(server.addr, "/metrics").await;
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
        assert_eq!(
            resp.headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok()),
            Some(exposition::CONTENT_TYPE)
        );
        let text = resp.text().await.expect("no body");
        for name in exposition::declared(true) {
            assert!(text.contains(name), "{name} missing from:\n{text}");
        }
        assert!(text.contains("nagios_up 1"));
        assert!(text.contains(r#"nagios_services_status_total{status="critical"} 1"#));
        assert!(text.contains(r#"nagios_users_status_total{status="disabled"} 1"#));
        assert!(!text.contains("0123456789abcdef"));

        server.stop.send(()).expect("server already gone");
        server
            .handle
            .await
            .expect("server task panicked")
            .expect("server failed");
    }

    #[tokio::test]
    async fn unreachable_upstream_reports_down() {
        // Bind then drop to find a port nobody listens on.
        let upstream = std::net::TcpListener::bind("127.0.0.1:0")
            .and_then(|l| l.local_addr())
            .expect("failed to reserve port");
        let server = start(source::Config::Api(api::tests::config(upstream, "secret"))).await;

        let resp = get(server.addr, "/metrics").await;
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
        let text = resp.text().await.expect("no body");
        assert!(text.contains("nagios_up 0"));
        assert!(text.contains("nagios_build_info"));
        assert!(!text.contains("nagios_hosts_total"));
    }

    #[tokio::test]
    async fn index_links_metrics_and_other_paths_404() {
        let server = start(source::Config::Nagiostats(nagiostats::Config {
            binary: PathBuf::from("/nonexistent/nagiostats"),
            nagios_config: PathBuf::from("/usr/local/nagios/etc/nagios.cfg"),
        }))
        .await;

        let resp = get(server.addr, "/").await;
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
        let body = resp.text().await.expect("no body");
        assert!(body.contains("<title>Nagios Exporter</title>"));
        assert!(body.contains("href='/metrics'"));

        let resp = get(server.addr, "/favicon.ico").await;
        assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn nagiostats_mode_omits_extended_metrics() {
        let script = format!("printf '{}'", nagiostats::tests::MRTG_OUTPUT.trim());
        let server = start(source::Config::Nagiostats(nagiostats::tests::shell(&script))).await;

        let text = get(server.addr, "/metrics")
            .await
            .text()
            .await
            .expect("no body");
        for name in exposition::declared(false) {
            assert!(text.contains(name), "{name} missing from:\n{text}");
        }
        assert!(text.contains(r#"nagios_version_info{version="4.4.6"} 1"#));
        assert!(!text.contains("nagios_users_total"));
        assert!(!text.contains("nagios_hosts_acknowledges_total"));
    }
}
