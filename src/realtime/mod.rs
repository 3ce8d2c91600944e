pub mod channel;
pub mod connections;
pub mod pending;
pub mod protocol;
pub mod topics;
