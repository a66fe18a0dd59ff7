/// Pending records the persistence queue holds before it starts dropping
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Page size used by the list query when none (or garbage) is supplied
pub const DEFAULT_PAGE_SIZE: u32 = 50;

/// Upper bound for the list query page size
pub const MAX_PAGE_SIZE: u32 = 100;

/// Number of leading bytes the classifier samples
pub const CLASSIFY_SAMPLE_BYTES: usize = 512;

/// Printable fraction a sample must exceed to count as text
pub const CLASSIFY_TEXT_RATIO: f64 = 0.70;

/// Media type reported when a stored body has no `Content-Type`
pub const FALLBACK_MEDIA_TYPE: &str = "application/octet-stream";

/// Name of the primary exchange table
pub const EXCHANGE_TABLE: &str = "requests";
