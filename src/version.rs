/// Version of the software, from the cargo package version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
