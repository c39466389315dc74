//! Hard limits and fixed constants shared across the engine.

/// In-app notification log capacity. Oldest entries are evicted past this.
pub const MAX_NOTIFICATIONS: usize = 100;

/// Maximum reschedule suggestions returned per query.
pub const MAX_SUGGESTIONS: usize = 5;

/// Default search horizon for reschedule suggestions, in days.
pub const DEFAULT_MAX_DAYS_OUT: u32 = 7;

/// Upper bound a caller may request for the suggestion horizon.
pub const MAX_DAYS_OUT: u32 = 90;

/// Two events at different locations starting closer than this are checked
/// for a location conflict.
pub const LOCATION_WINDOW_MINUTES: i64 = 60;

/// Overlaps shorter than this also offer a "shorten" resolution.
pub const SHORT_OVERLAP_MINUTES: i64 = 30;

/// Priority 10 is reserved for double-bookings.
pub const MAX_PRIORITY: u8 = 10;
pub const MAX_SHARED_PRIORITY: u8 = 9;
pub const FAMILY_CONFLICT_PRIORITY: u8 = 8;

/// Reminder offsets are limited to 30 days before the event.
pub const MAX_REMINDER_OFFSET_MINUTES: u32 = 43_200;
pub const MAX_OFFSETS_PER_CATEGORY: usize = 10;

/// How long resolved conflicts are kept for audit, in hours.
pub const DEFAULT_CONFLICT_RETENTION_HOURS: i64 = 24;

/// Log appends between compactions.
pub const DEFAULT_COMPACT_THRESHOLD: u64 = 500;
