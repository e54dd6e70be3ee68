use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds. The only time type.
pub type Ms = i64;

pub type TableId = String;
pub type AreaId = String;

/// Stable across every table the booking occupies.
pub type BookingId = Ulid;

/// Store key: a table resolved to its owning area.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableKey {
    pub area: AreaId,
    pub table: TableId,
}

impl TableKey {
    pub fn new(area: impl Into<AreaId>, table: impl Into<TableId>) -> Self {
        Self {
            area: area.into(),
            table: table.into(),
        }
    }
}

impl std::fmt::Display for TableKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.area, self.table)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Area {
    pub id: AreaId,
    pub name: String,
    /// Display order on the floor grid.
    pub position: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub id: TableId,
    pub name: String,
    pub area: AreaId,
    /// Seats.
    pub capacity: u32,
}

/// Booking status. An EMPTY table has no cell at all, so it is not a variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    #[serde(rename = "HOLD")]
    Hold,
    #[serde(rename = "SEATED")]
    Seated,
    #[serde(rename = "WALKIN")]
    WalkIn,
    #[serde(rename = "CLOSED")]
    Closed,
    #[serde(rename = "CANCELLED")]
    Cancelled,
}

impl Status {
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Closed | Status::Cancelled)
    }

    /// Guest is physically at the table.
    pub fn is_arrived(self) -> bool {
        matches!(self, Status::Seated | Status::WalkIn)
    }

    /// Forward edges of the booking state machine. Nothing leaves a terminal state.
    pub fn can_transition_to(self, next: Status) -> bool {
        matches!(
            (self, next),
            (Status::Hold, Status::Seated)
                | (Status::Hold, Status::Cancelled)
                | (Status::Seated, Status::Closed)
                | (Status::Seated, Status::Cancelled)
                | (Status::WalkIn, Status::Closed)
                | (Status::WalkIn, Status::Cancelled)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Hold => "HOLD",
            Status::Seated => "SEATED",
            Status::WalkIn => "WALKIN",
            Status::Closed => "CLOSED",
            Status::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Staff,
    Manager,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Staff => "staff",
            Role::Manager => "manager",
            Role::Admin => "admin",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The staff member issuing an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    pub role: Role,
}

impl Actor {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self { id: id.into(), role }
    }

    pub fn staff(id: impl Into<String>) -> Self {
        Self::new(id, Role::Staff)
    }

    pub fn manager(id: impl Into<String>) -> Self {
        Self::new(id, Role::Manager)
    }

    fn is_manager_level(&self) -> bool {
        matches!(self.role, Role::Manager | Role::Admin)
    }

    /// May book a locked table.
    pub fn can_override_locks(&self) -> bool {
        self.is_manager_level()
    }

    /// May lock or unlock tables.
    pub fn can_manage_locks(&self) -> bool {
        self.is_manager_level()
    }

    /// Staff may only cancel a booking whose guest has not arrived yet.
    pub fn can_cancel(&self, status: Status) -> bool {
        status == Status::Hold || self.is_manager_level()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub name: String,
    pub phone: Option<String>,
}

/// The live occupancy record stored at every table a booking occupies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingCell {
    pub booking_id: BookingId,
    pub status: Status,
    pub created_at: Ms,
    /// Expected arrival, minutes after midnight.
    pub reserved_for: Option<u16>,
    /// Set on check-in (or immediately for walk-ins).
    pub arrived_at: Option<Ms>,
    pub party_size: u32,
    /// Staff id that opened the booking.
    pub staff: String,
    pub note: String,
    pub customer: Option<Customer>,
    /// Table-set, in the order tables joined the booking.
    pub tables: Vec<TableId>,
}

impl BookingCell {
    pub fn holds_table(&self, table: &str) -> bool {
        self.tables.iter().any(|t| t == table)
    }
}

/// Immutable record emitted when a booking reaches CLOSED or CANCELLED.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchivedBooking {
    pub booking_id: BookingId,
    pub status: Status,
    pub created_at: Ms,
    pub reserved_for: Option<u16>,
    pub arrived_at: Option<Ms>,
    pub ended_at: Ms,
    pub party_size: u32,
    pub staff: String,
    pub note: String,
    pub customer: Option<Customer>,
    /// Tables occupied at the moment of the terminal transition.
    pub tables: Vec<TableKey>,
    pub cancel_reason: Option<String>,
    pub ended_by: String,
}

impl ArchivedBooking {
    pub fn from_cell(
        cell: &BookingCell,
        status: Status,
        ended_at: Ms,
        tables: Vec<TableKey>,
        cancel_reason: Option<String>,
        ended_by: &str,
    ) -> Self {
        Self {
            booking_id: cell.booking_id,
            status,
            created_at: cell.created_at,
            reserved_for: cell.reserved_for,
            arrived_at: cell.arrived_at,
            ended_at,
            party_size: cell.party_size,
            staff: cell.staff.clone(),
            note: cell.note.clone(),
            customer: cell.customer.clone(),
            tables,
            cancel_reason,
            ended_by: ended_by.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    pub locked_by: String,
    pub locked_at: Ms,
}

/// The event types. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    /// Create or walk-in.
    BookingOpened {
        key: TableKey,
        cell: BookingCell,
    },
    CheckedIn {
        booking_id: BookingId,
        at: Ms,
    },
    /// `tables` is the full table-set after the merge.
    TablesMerged {
        booking_id: BookingId,
        target: TableKey,
        tables: Vec<TableId>,
    },
    /// `tables` is the full table-set after `key` is released.
    TableSplit {
        booking_id: BookingId,
        key: TableKey,
        tables: Vec<TableId>,
    },
    /// Terminal transitions carry the full archive record so replay can
    /// re-emit it if the archive never received it.
    BookingClosed {
        record: ArchivedBooking,
    },
    BookingCancelled {
        record: ArchivedBooking,
    },
    /// The archive rejected the record journaled just before; that terminal
    /// transition did not happen.
    ArchiveFailed {
        booking_id: BookingId,
    },
    TableLocked {
        table: TableId,
        by: String,
        at: Ms,
    },
    TableUnlocked {
        table: TableId,
    },
}

impl Event {
    /// Short label for metrics and logs.
    pub fn label(&self) -> &'static str {
        match self {
            Event::BookingOpened { cell, .. } if cell.status == Status::WalkIn => "walk_in",
            Event::BookingOpened { .. } => "create",
            Event::CheckedIn { .. } => "check_in",
            Event::TablesMerged { .. } => "merge",
            Event::TableSplit { .. } => "split",
            Event::BookingClosed { .. } => "close",
            Event::BookingCancelled { .. } => "cancel",
            Event::ArchiveFailed { .. } => "archive_failed",
            Event::TableLocked { .. } => "lock",
            Event::TableUnlocked { .. } => "unlock",
        }
    }
}

/// Input for a new reservation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewBooking {
    pub customer_name: String,
    pub customer_phone: Option<String>,
    /// `"HH:MM"`; defaults to [`DEFAULT_TIME_OF_DAY`].
    pub time_of_day: Option<String>,
    pub party_size: u32,
    pub note: String,
}

pub const DEFAULT_TIME_OF_DAY: &str = "19:00";

/// Parse `"HH:MM"` into minutes after midnight.
pub fn parse_time_of_day(s: &str) -> Option<u16> {
    let (h, m) = s.trim().split_once(':')?;
    let h: u16 = h.parse().ok()?;
    let m: u16 = m.parse().ok()?;
    if h >= 24 || m >= 60 {
        return None;
    }
    Some(h * 60 + m)
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableView {
    pub table: Table,
    /// `None` means EMPTY.
    pub cell: Option<BookingCell>,
    pub locked: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AreaView {
    pub area: Area,
    pub tables: Vec<TableView>,
}

/// Dashboard counters over the live floor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FloorSummary {
    pub tables: usize,
    pub empty: usize,
    pub hold: usize,
    pub seated: usize,
    pub walk_in: usize,
    pub locked: usize,
}
