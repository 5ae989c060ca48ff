pub mod log;
pub mod sim;
pub mod watch;
