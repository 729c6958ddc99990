//! Cursor of the page protocol.
//!
//! The caller owns the cursor between round trips; the coordinator only ever
//! computes the next one.

use crate::error::OptimizeError;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchCursor {
    /// 1-based page to process
    pub page_number: u64,
    pub page_size: usize,
    pub total_candidates: usize,
    /// Items completed successfully in previous pages
    pub cumulative_processed: u64,
    #[serde(default)]
    pub cumulative_failed: u64,
    pub cumulative_savings_bytes: i64,
    /// Assigned on the first page and carried by every following one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<u64>,
}

impl BatchCursor {
    /// Cursor for the first page of a new run
    pub fn first(page_size: usize) -> Self {
        Self::at_page(1, page_size)
    }

    pub fn at_page(page_number: u64, page_size: usize) -> Self {
        Self {
            page_number,
            page_size,
            total_candidates: 0,
            cumulative_processed: 0,
            cumulative_failed: 0,
            cumulative_savings_bytes: 0,
            run_id: None,
        }
    }

    pub fn validate(&self) -> Result<(), OptimizeError> {
        if self.page_number == 0 {
            return Err(OptimizeError::Validation("page_number starts at 1".to_string()));
        }
        if self.page_size == 0 {
            return Err(OptimizeError::Validation("page_size must be greater than 0".to_string()));
        }
        Ok(())
    }

    /// Fresh run identifier (nanoseconds since the epoch)
    pub fn new_run_id() -> u64 {
        SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or_default()
    }

    /// Index of the first candidate of this page
    pub fn offset(&self) -> usize {
        (self.page_number.saturating_sub(1) as usize).saturating_mul(self.page_size)
    }

    fn covered(&self) -> u128 {
        self.page_number as u128 * self.page_size as u128
    }

    /// `page_number * page_size >= total_candidates`
    pub fn is_completed(&self) -> bool {
        self.covered() >= self.total_candidates as u128
    }

    /// `min(100, round(page_number * page_size / total * 100))`
    pub fn progress_percent(&self) -> u8 {
        if self.total_candidates == 0 {
            return 100;
        }
        let percent = (self.covered() as f64 / self.total_candidates as f64 * 100.0).round();
        percent.min(100.0) as u8
    }

    /// Cursor for the page after this one
    pub fn advance(&self, processed: u64, failed: u64, savings_bytes: i64) -> Self {
        Self {
            page_number: self.page_number + 1,
            page_size: self.page_size,
            total_candidates: self.total_candidates,
            cumulative_processed: self.cumulative_processed + processed,
            cumulative_failed: self.cumulative_failed + failed,
            cumulative_savings_bytes: self.cumulative_savings_bytes + savings_bytes,
            run_id: self.run_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cursor(page_number: u64, page_size: usize, total: usize) -> BatchCursor {
        BatchCursor {
            total_candidates: total,
            ..BatchCursor::at_page(page_number, page_size)
        }
    }

    #[test]
    fn test_completion_rule() {
        assert!(!cursor(1, 5, 12).is_completed());
        assert!(!cursor(2, 5, 12).is_completed());
        assert!(cursor(3, 5, 12).is_completed());
        assert!(cursor(1, 5, 5).is_completed());
        assert!(cursor(1, 5, 0).is_completed());
    }

    #[test]
    fn test_progress_percent() {
        assert_eq!(cursor(1, 5, 12).progress_percent(), 42);
        assert_eq!(cursor(2, 5, 12).progress_percent(), 83);
        assert_eq!(cursor(3, 5, 12).progress_percent(), 100);
        assert_eq!(cursor(1, 5, 0).progress_percent(), 100);
    }

    #[test]
    fn test_offset_and_advance() {
        let c = BatchCursor {
            run_id: Some(9),
            ..cursor(2, 5, 12)
        };
        assert_eq!(c.offset(), 5);

        let next = c.advance(4, 1, 300).advance(2, 0, -20);
        assert_eq!(next.page_number, 4);
        assert_eq!(next.cumulative_processed, 6);
        assert_eq!(next.cumulative_failed, 1);
        assert_eq!(next.cumulative_savings_bytes, 280);
        assert_eq!(next.run_id, Some(9));
    }

    #[test]
    fn test_validate() {
        assert!(BatchCursor::first(5).validate().is_ok());
        assert!(BatchCursor::at_page(0, 5).validate().is_err());
        assert!(BatchCursor::at_page(1, 0).validate().is_err());
    }

    #[test]
    fn test_cursor_json_without_run_id() {
        let json = r#"{"page_number":2,"page_size":5,"total_candidates":12,"cumulative_processed":5,"cumulative_savings_bytes":1024}"#;
        let c: BatchCursor = serde_json::from_str(json).unwrap();
        assert_eq!(c.run_id, None);
        assert_eq!(c.cumulative_failed, 0);
        assert_eq!(c.offset(), 5);
    }
}
