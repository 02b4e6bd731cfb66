//! Size units and the fixed binary records stored on cache spans.

pub mod dir_entry;
pub mod span_header;
pub mod stripe_meta;
pub mod units;
