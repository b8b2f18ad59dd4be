// Process lifecycle: the shared shutdown state machine and the OS signals that drive it.
pub mod shutdown;
pub mod signals;
