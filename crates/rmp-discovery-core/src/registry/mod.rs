//! Device registry and global id allocation.

pub mod allocator;
pub mod devices;

pub use allocator::{IdAllocator, DEFAULT_FIRST_ID};
pub use devices::{DeviceRegistry, Lookup};
