//! Per-connection traffic record.

use chrono::{DateTime, Local};

/// Summary of one connection, from accept to close.
///
/// The handler that owns the connection is the only writer until the record
/// is sent to the coordinator. The coordinator fills in
/// `connections_at_close` and then keeps the record unchanged in its history.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionRecord {
    /// Remote peer as `address:port`.
    pub host_name: String,
    /// Total bytes echoed back, terminators included.
    pub bytes_transferred: u64,
    /// Number of complete lines read.
    pub request_count: u64,
    /// Live connections when the record was finalized, this one included.
    pub connections_at_close: usize,
    /// When the handler loop exited.
    pub closed_at: DateTime<Local>,
}

impl ConnectionRecord {
    /// Create an empty record for a freshly accepted peer.
    pub fn new(host_name: impl Into<String>) -> Self {
        Self {
            host_name: host_name.into(),
            bytes_transferred: 0,
            request_count: 0,
            connections_at_close: 0,
            closed_at: Local::now(),
        }
    }

    /// Account for one echoed unit.
    pub fn record_unit(&mut self, len: usize) {
        self.bytes_transferred += len as u64;
        self.request_count += 1;
    }

    /// Stamp the close time.
    pub fn close(&mut self) {
        self.closed_at = Local::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_record_is_empty() {
        let record = ConnectionRecord::new("127.0.0.1:5000");
        assert_eq!(record.host_name, "127.0.0.1:5000");
        assert_eq!(record.bytes_transferred, 0);
        assert_eq!(record.request_count, 0);
        assert_eq!(record.connections_at_close, 0);
    }

    #[test]
    fn test_record_unit_accumulates() {
        let mut record = ConnectionRecord::new("peer");
        record.record_unit(5);
        record.record_unit(12);
        assert_eq!(record.bytes_transferred, 17);
        assert_eq!(record.request_count, 2);
    }

    #[test]
    fn test_close_moves_timestamp_forward() {
        let mut record = ConnectionRecord::new("peer");
        let opened = record.closed_at;
        record.close();
        assert!(record.closed_at >= opened);
    }
}
