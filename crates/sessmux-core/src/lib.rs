//! sessmux-core: pure state machines for the multi-tab admin session
//! controller — activity recording, leader election, the countdown/warning
//! machine, and logout planning.
//!
//! No IO and no clock access: all time values are passed in as parameters.

pub mod activity;
pub mod countdown;
pub mod enforcer;
pub mod logout;
pub mod types;
