mod syscall;

pub use syscall::*;
