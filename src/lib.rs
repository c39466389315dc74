pub mod clock;
pub mod detect;
pub mod inbox;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod persist;
pub mod reaper;
pub mod reminder;
pub mod service;
pub mod settings;
pub mod sink;
pub mod timer;
pub mod wal;
