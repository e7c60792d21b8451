pub mod os;
pub mod platform;

// exports so callers don't have to spell out the submodules
pub use os::current_platform;
pub use platform::{Arch, Os, Platform};
