//! STK500 v1 programmer for Optiboot AVR targets.

pub mod assembler;
pub mod clock;
pub mod constants;
pub mod device;
pub mod error;
pub mod flashing;
pub mod format;
pub mod page;
pub mod protocol;
pub mod source;
pub mod transport;

pub use self::device::Chip;
pub use self::error::{Error, Result};
pub use self::flashing::Flashing;
pub use self::protocol::{Command, Stk500};
pub use self::transport::Transport;
