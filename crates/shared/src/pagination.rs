//! Page/limit pagination utilities.

use serde::{Deserialize, Serialize};

/// Default items per page.
pub const DEFAULT_PER_PAGE: u32 = 20;

/// Hard upper bound on items per page.
pub const MAX_PER_PAGE: u32 = 100;

/// Page selection parsed from query parameters (1-based page).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct PageRequest {
    #[serde(default = "default_page")]
    pub page: u32,

    #[serde(default = "default_per_page")]
    pub per_page: u32,
}

fn default_page() -> u32 {
    1
}

fn default_per_page() -> u32 {
    DEFAULT_PER_PAGE
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: default_page(),
            per_page: default_per_page(),
        }
    }
}

impl PageRequest {
    pub fn new(page: u32, per_page: u32) -> Self {
        Self { page, per_page }
    }

    /// Page number, at least 1.
    pub fn page_clamped(&self) -> u32 {
        self.page.max(1)
    }

    /// Items per page, clamped to 1..=MAX_PER_PAGE.
    pub fn per_page_clamped(&self) -> u32 {
        self.per_page.clamp(1, MAX_PER_PAGE)
    }

    /// SQL `LIMIT`.
    pub fn limit(&self) -> i64 {
        i64::from(self.per_page_clamped())
    }

    /// SQL `OFFSET`.
    pub fn offset(&self) -> i64 {
        i64::from(self.page_clamped() - 1) * self.limit()
    }
}

/// Pagination block returned alongside list results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub page: u32,
    pub per_page: u32,
    pub total: i64,
    pub total_pages: u32,
}

impl Pagination {
    pub fn new(request: &PageRequest, total: i64) -> Self {
        let per_page = request.per_page_clamped();
        let total = total.max(0);
        let total_pages = (total as u64).div_ceil(u64::from(per_page));
        Self {
            page: request.page_clamped(),
            per_page,
            total,
            total_pages: u32::try_from(total_pages).unwrap_or(u32::MAX),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let request: PageRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(request, PageRequest::default());
        assert_eq!(request.limit(), 20);
        assert_eq!(request.offset(), 0);
    }

    #[test]
    fn test_offset_math() {
        let request = PageRequest::new(3, 25);
        assert_eq!(request.limit(), 25);
        assert_eq!(request.offset(), 50);
    }

    #[test]
    fn test_clamping() {
        let request = PageRequest::new(0, 0);
        assert_eq!(request.page_clamped(), 1);
        assert_eq!(request.per_page_clamped(), 1);
        assert_eq!(request.offset(), 0);

        let request = PageRequest::new(2, 1000);
        assert_eq!(request.per_page_clamped(), MAX_PER_PAGE);
        assert_eq!(request.offset(), 100);
    }

    #[test]
    fn test_pagination_total_pages() {
        let request = PageRequest::new(1, 20);
        assert_eq!(Pagination::new(&request, 0).total_pages, 0);
        assert_eq!(Pagination::new(&request, 1).total_pages, 1);
        assert_eq!(Pagination::new(&request, 20).total_pages, 1);
        assert_eq!(Pagination::new(&request, 21).total_pages, 2);
    }

    #[test]
    fn test_pagination_serializes() {
        let pagination = Pagination::new(&PageRequest::new(2, 10), 35);
        let json = serde_json::to_value(&pagination).unwrap();
        assert_eq!(json["page"], 2);
        assert_eq!(json["per_page"], 10);
        assert_eq!(json["total"], 35);
        assert_eq!(json["total_pages"], 4);
    }
}
