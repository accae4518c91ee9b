//! Transport metrics.
//!
//! # Metrics
//! - `netpipe_frames_sent_total` (counter): frames written to sockets
//! - `netpipe_frames_received_total` (counter): frames recognized on receive
//! - `netpipe_bytes_sent_total` (counter): payload and header bytes written
//! - `netpipe_bytes_received_total` (counter): raw bytes read from sockets
//! - `netpipe_request_timeouts_total` (counter): requests that got no reply in time
//! - `netpipe_dropped_replies_total` (counter): late or duplicate replies discarded
//! - `netpipe_framing_errors_total` (counter): connections torn down for framing violations
//! - `netpipe_active_sessions` (gauge): sessions currently registered on servers
//!
//! Recording goes through the `metrics` facade; installing an exporter is
//! left to the embedding application.

pub fn record_frame_sent(bytes: usize) {
    ::metrics::counter!("netpipe_frames_sent_total").increment(1);
    ::metrics::counter!("netpipe_bytes_sent_total").increment(bytes as u64);
}

pub fn record_frame_received() {
    ::metrics::counter!("netpipe_frames_received_total").increment(1);
}

pub fn record_bytes_received(bytes: usize) {
    ::metrics::counter!("netpipe_bytes_received_total").increment(bytes as u64);
}

pub fn record_request_timeout() {
    ::metrics::counter!("netpipe_request_timeouts_total").increment(1);
}

pub fn record_dropped_reply() {
    ::metrics::counter!("netpipe_dropped_replies_total").increment(1);
}

/// `direction` is `"send"` or `"receive"`.
pub fn record_framing_error(direction: &'static str) {
    ::metrics::counter!("netpipe_framing_errors_total", "direction" => direction).increment(1);
}

pub fn record_active_sessions(count: usize) {
    ::metrics::gauge!("netpipe_active_sessions").set(count as f64);
}
