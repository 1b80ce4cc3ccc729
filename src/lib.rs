// src/lib.rs
// Public library surface for integration tests (and potential reuse).

pub mod announce;
pub mod check;
pub mod config;
pub mod notify;
pub mod routine;
pub mod schedule;
pub mod watermark;

// ---- Re-exports for stable public API ----
pub use crate::announce::{Announcer, CalendarEvent, Disposition};
pub use crate::check::{ChangeEvent, ChangedItem, CheckOutcome, SourceChecker};
pub use crate::notify::{MemorySink, MessageHandle, MessageSink};
pub use crate::schedule::{Scheduler, StartPolicy, TaskSpec};
pub use crate::watermark::{Section, WatermarkDoc, WatermarkStore};
