pub mod publish;
pub mod select;
pub mod status;
pub mod timeouts;
pub mod verify;
