//! Room membership
//!
//! Every joined player sits in the permanent global room. With the `lobby`
//! feature, players can also create and join named side rooms.

pub mod manager;
pub mod room;
