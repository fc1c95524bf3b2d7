//! Flow control and wakeup infrastructure.
//!
//! Provides:
//! - Subscription channels with optional backpressure
//! - Interrupt gate for waking a blocked fan-in wait

pub mod channel;
pub mod gate;

pub use channel::{channel, ChannelCloser, ChannelOptions, ChannelReader, ChannelSender, Delivery};
pub use gate::{GateWait, InterruptGate};
