//! The trait all subcommands implement.

use anyhow::Result;
use enum_dispatch::enum_dispatch;

/// A runnable subcommand.
#[enum_dispatch]
pub trait Command {
    /// Executes the command.
    fn execute(&self) -> Result<()>;
}
