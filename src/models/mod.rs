pub mod change;
pub mod performance;
pub mod requests;
pub mod reservation;
pub mod seat;
pub mod session;
pub mod snapshot;

pub use change::{ChangeAction, ChangeType, PendingChange};
pub use performance::PerformanceId;
pub use requests::{AdminEditRequest, CheckInRequest, ReserveRequest, WalkInRequest};
pub use reservation::Reservation;
pub use seat::{LayoutCell, Seat, SeatLayout, SeatStatus};
pub use session::{Mode, Session};
pub use snapshot::{MutationReply, SeatSnapshot, Source};

/// Текущее время в миллисекундах Unix, как в отметках бэкенда.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
