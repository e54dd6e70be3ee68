/// Max length of a customer name.
pub const MAX_NAME_LEN: usize = 128;

/// Max length of a customer phone number.
pub const MAX_PHONE_LEN: usize = 32;

/// Max length of a booking note.
pub const MAX_NOTE_LEN: usize = 1024;

/// Max length of a cancellation reason.
pub const MAX_REASON_LEN: usize = 512;

/// Max length of a staff identifier.
pub const MAX_STAFF_ID_LEN: usize = 64;

/// Largest party a single booking may seat.
pub const MAX_PARTY_SIZE: u32 = 200;

/// Max tables one booking can be merged across.
pub const MAX_TABLES_PER_BOOKING: usize = 16;

/// Max bytes in one request line on the wire.
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// Max bookings returned by a search.
pub const MAX_SEARCH_RESULTS: usize = 100;
