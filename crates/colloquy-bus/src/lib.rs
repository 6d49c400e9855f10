//! In-process fan-out for Colloquy.
//!
//! [`FanoutBus`] routes each published message to every handler registered
//! under the message's topic at the moment of publishing. Delivery to each
//! handler runs in its own task, so a slow or failing handler never holds up
//! the publisher or its siblings. There is no buffering and no replay: a
//! subscriber sees only what is published while it is registered.

pub mod bus;
pub mod error;
pub mod traits;

pub use bus::{FanoutBus, ShutdownReport, Subscription};
pub use error::{BusError, BusResult};
pub use traits::Handler;
