/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Backend seeds are drawn from the full unsigned 32-bit range.
pub type Seed = u32;
