pub mod store;

pub use store::{SessionStore, Turn, TurnRole};
