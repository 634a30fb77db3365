/// Native module runs programs directly on the host, talking to the
/// kernel through signals, `waitid` and procfs instead of a container runtime.
pub mod executor;
pub mod output;
pub mod process_tree;
pub mod procfs;
pub mod sampler;
pub mod watchdog;
