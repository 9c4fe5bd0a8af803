//! Floor-control events
//!
//! Engine transitions are translated into [`FloorEvent`]s and broadcast on
//! the [`EventBus`] so viewers can follow a session live.

pub mod bus;
pub mod types;

pub use bus::{
    EventBus, EventBusExt, EventFilter, FilteredReceiver, SharedEventBus,
    DEFAULT_CHANNEL_CAPACITY,
};
pub use types::FloorEvent;
