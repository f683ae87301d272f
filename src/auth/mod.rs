//! Session primitives shared by the gateway and the session controller

pub mod bus;
pub mod claims;
pub mod navigator;

pub use bus::{Invalidation, InvalidationBus};
pub use claims::{Claims, decode};
pub use navigator::{Navigator, TerminalNavigator, redirect_to_login};
