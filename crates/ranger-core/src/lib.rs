#![doc = "Time-of-flight measurement core: edge capture, echo timeout arbitration, and the cycle controller."]

pub mod alarm;
pub mod capture;
pub mod cell;
pub mod clock;
pub mod controller;
pub mod delay;
pub mod distance;
pub mod edge;
pub mod sim;

pub use alarm::*;
pub use capture::*;
pub use cell::*;
pub use clock::*;
pub use controller::*;
pub use delay::*;
pub use distance::*;
pub use edge::*;
pub use sim::*;
