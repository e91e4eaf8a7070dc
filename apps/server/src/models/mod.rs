pub mod checkpoint;
pub mod delivery;
pub mod event;
pub mod failure_event;

pub use checkpoint::Checkpoint;
pub use delivery::DeliveryEvent;
pub use event::EventRecord;
pub use failure_event::FailureEventEntry;
