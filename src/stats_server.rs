//! HTTP stats server for engine monitoring.
//!
//! Provides a simple `/stats` endpoint that returns [`ReorderStats`] as JSON.
//!
//! # Example Response
//!
//! ```json
//! {
//!   "uptime_secs": 42,
//!   "frames": {
//!     "in_order": 10230, "buffered": 812, "passed_through": 4,
//!     "flushed": 0, "duplicates_dropped": 17, "holes_skipped": 9
//!   },
//!   "window": { "scrolls": 3, "aging_expiries": 6 },
//!   "sessions": { "started": 2, "stopped": 0, "active": 2, "teardown_requests": 0 }
//! }
//! ```

use crate::stats::ReorderStats;
use log::{error, info, warn};
use std::io::Cursor;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tiny_http::{Header, Method, Response, Server};

/// Default port for the stats server.
pub const DEFAULT_STATS_PORT: u16 = 8080;

/// How often the server thread checks for shutdown.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// HTTP stats server.
///
/// Runs in a background thread and serves engine statistics as JSON.
pub struct StatsServer {
    handle: Option<thread::JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    port: u16,
}

impl StatsServer {
    /// Start the stats server.
    ///
    /// `bind_addr` of `None` binds 0.0.0.0. Port 0 picks a free port; see
    /// [`StatsServer::port`]. Drop the returned handle to stop the server.
    pub fn start(
        bind_addr: Option<IpAddr>,
        port: u16,
        stats: Arc<ReorderStats>,
    ) -> Result<Self, std::io::Error> {
        let addr = match bind_addr {
            Some(ip) => format!("{}:{}", ip, port),
            None => format!("0.0.0.0:{}", port),
        };

        let server = Server::http(&addr)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::AddrInUse, format!("{}", e)))?;
        let port = server
            .server_addr()
            .to_ip()
            .map(|bound| bound.port())
            .unwrap_or(port);

        info!("Stats server listening on port {} (GET /stats)", port);

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = shutdown.clone();

        let handle = thread::spawn(move || {
            Self::run_server(server, stats, shutdown_clone);
        });

        Ok(Self {
            handle: Some(handle),
            shutdown,
            port,
        })
    }

    /// Port the server is bound to.
    pub fn port(&self) -> u16 {
        self.port
    }

    fn run_server(server: Server, stats: Arc<ReorderStats>, shutdown: Arc<AtomicBool>) {
        while !shutdown.load(Ordering::Acquire) {
            let request = match server.recv_timeout(POLL_INTERVAL) {
                Ok(Some(request)) => request,
                Ok(None) => continue,
                Err(e) => {
                    error!("Stats server error: {}", e);
                    return;
                }
            };

            let response = route(request.method(), request.url(), &stats);
            if let Err(e) = request.respond(response) {
                warn!("Failed to send stats response: {}", e);
            }
        }
        info!("Stats server shutting down");
    }

    /// Stop the server.
    ///
    /// May take up to one poll interval.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for StatsServer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Build the response for one request.
fn route(method: &Method, url: &str, stats: &ReorderStats) -> Response<Cursor<Vec<u8>>> {
    if *method != Method::Get {
        return Response::from_string("Method Not Allowed")
            .with_status_code(405)
            .with_header(header("Allow", "GET"));
    }
    match url.trim_end_matches('/') {
        "/stats" => Response::from_string(stats.to_json())
            .with_header(header("Content-Type", "application/json")),
        _ => Response::from_string("Not Found").with_status_code(404),
    }
}

fn header(name: &'static str, value: &'static str) -> Header {
    // Only called with literal ASCII names and values
    Header::from_bytes(name.as_bytes(), value.as_bytes()).expect("static header")
}

#[cfg(test)]
mod tests {
    use super::*;
    use ba_reorder_macros::ba_test;
    use std::io::{Read, Write};
    use std::net::{Ipv4Addr, TcpStream};

    fn get(port: u16, method: &str, path: &str) -> String {
        let mut stream = TcpStream::connect((Ipv4Addr::LOCALHOST, port)).unwrap();
        write!(
            stream,
            "{} {} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
            method, path
        )
        .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).unwrap();
        response
    }

    #[ba_test]
    fn test_route_status_codes() {
        let stats = ReorderStats::new();
        let status = |method: Method, url: &str| route(&method, url, &stats).status_code().0;

        assert_eq!(status(Method::Get, "/stats"), 200);
        assert_eq!(status(Method::Get, "/stats/"), 200);
        assert_eq!(status(Method::Get, "/"), 404);
        assert_eq!(status(Method::Put, "/stats"), 405);
    }

    #[ba_test]
    fn test_serves_stats_json() {
        let stats = Arc::new(ReorderStats::new());
        stats.frames_in_order.store(12, Ordering::Relaxed);

        let mut server =
            StatsServer::start(Some(IpAddr::V4(Ipv4Addr::LOCALHOST)), 0, stats).unwrap();
        let response = get(server.port(), "GET", "/stats");
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.contains("\"in_order\":12"));

        server.stop();
    }

    #[ba_test]
    fn test_rejects_other_paths_and_methods() {
        let stats = Arc::new(ReorderStats::new());
        let server = StatsServer::start(Some(IpAddr::V4(Ipv4Addr::LOCALHOST)), 0, stats).unwrap();

        assert!(get(server.port(), "GET", "/nope").starts_with("HTTP/1.1 404"));
        assert!(get(server.port(), "POST", "/stats").starts_with("HTTP/1.1 405"));
    }
}
