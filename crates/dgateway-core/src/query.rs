//! List query parameters and paging
//!
//! Raw query-string values are turned into a validated [`ListQuery`] here so
//! the storage layer only ever sees bounded, well-formed filters.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::defaults::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
use crate::error::{AppError, Result};
use crate::exchange::ExchangeSummary;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Filters and paging for the exchange list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListQuery {
    /// 1-based page number
    pub page: u32,
    pub page_size: u32,
    /// Case-insensitive substring of the URL
    pub url_contains: Option<String>,
    /// Inclusive lower bound in stored timestamp layout
    pub start: Option<String>,
    /// Inclusive upper bound in stored timestamp layout
    pub end: Option<String>,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
            url_contains: None,
            start: None,
            end: None,
        }
    }
}

impl ListQuery {
    /// Build a query from raw request parameters.
    ///
    /// A missing, unparsable or non-positive page becomes 1. A missing or
    /// unparsable page size becomes the default, anything else is clamped to
    /// `1..=MAX_PAGE_SIZE`. Empty strings count as missing. Dates must be
    /// `YYYY-MM-DD`.
    pub fn from_params(
        page: Option<&str>,
        page_size: Option<&str>,
        url: Option<&str>,
        start_date: Option<&str>,
        end_date: Option<&str>,
    ) -> Result<Self> {
        let page = non_empty(page)
            .and_then(|p| p.parse::<i64>().ok())
            .filter(|p| *p > 0)
            .map(|p| p.min(u32::MAX as i64) as u32)
            .unwrap_or(1);

        let page_size = non_empty(page_size)
            .and_then(|s| s.parse::<i64>().ok())
            .map(|s| s.clamp(1, MAX_PAGE_SIZE as i64) as u32)
            .unwrap_or(DEFAULT_PAGE_SIZE);

        let start = non_empty(start_date)
            .map(|d| parse_date(d).map(|d| format!("{} 00:00:00", d.format(DATE_FORMAT))))
            .transpose()?;
        let end = non_empty(end_date)
            .map(|d| parse_date(d).map(|d| format!("{} 23:59:59.999999", d.format(DATE_FORMAT))))
            .transpose()?;

        Ok(Self {
            page,
            page_size,
            url_contains: non_empty(url).map(str::to_string),
            start,
            end,
        })
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.page_size)
    }

    /// `LIKE` pattern for the URL filter, with wildcards in the needle escaped
    pub(crate) fn url_pattern(&self) -> Option<String> {
        self.url_contains.as_ref().map(|needle| {
            let escaped = needle
                .replace('\\', "\\\\")
                .replace('%', "\\%")
                .replace('_', "\\_");
            format!("%{escaped}%")
        })
    }
}

/// One page of list results
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExchangePage {
    pub requests: Vec<ExchangeSummary>,
    pub page: u32,
    pub page_size: u32,
    pub total_count: u64,
    pub total_pages: u64,
}

pub fn total_pages(total_count: u64, page_size: u32) -> u64 {
    let size = u64::from(page_size.max(1));
    (total_count + size - 1) / size
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn parse_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, DATE_FORMAT)
        .map_err(|_| AppError::InvalidQuery(format!("Invalid date: {raw}")))
}
