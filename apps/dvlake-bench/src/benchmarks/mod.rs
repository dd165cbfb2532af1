pub mod compare;
pub mod concurrent_deletes;
pub mod scan_overhead;
