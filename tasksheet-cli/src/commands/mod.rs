pub mod daemon;
pub mod enqueue;
pub mod init;
pub mod queue;
pub mod sync;
