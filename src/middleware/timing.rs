use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;

/// Adds a `Server-Timing` header to every query response and logs the
/// call at debug level. The long-lived SSE stream is not logged.
pub async fn timing_middleware(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_owned();

    let start = Instant::now();
    let mut response = next.run(req).await;
    let elapsed = start.elapsed();

    let server_timing =
        format!("total;dur={:.3}", elapsed.as_secs_f64() * 1000.0);
    if let Ok(val) = server_timing.parse() {
        response.headers_mut().insert("Server-Timing", val);
    }

    if !path.ends_with("/stream") {
        tracing::debug!(
            %method,
            %path,
            status = response.status().as_u16(),
            elapsed_us = elapsed.as_micros() as u64,
            "query served"
        );
    }

    response
}
