//! Priority levels for coordinator mailbox messages
//!
//! The mailbox delivers the highest value first and keeps FIFO order among
//! messages of equal priority. These levels apply to control messages, not
//! to job priorities, which are plain `i32` values chosen by the caller.

/// Background priority (10): job submissions
pub const BACKGROUND: u8 = 10;

/// Low priority (30): worker reports
pub const LOW: u8 = 30;

/// Normal priority (50): public queries
pub const NORMAL: u8 = 50;

/// High priority (70): cancel requests
pub const HIGH: u8 = 70;

/// Critical priority (90): start, stop and quit commands
pub const CRITICAL: u8 = 90;

/// All levels from highest to lowest.
pub const LEVELS: [u8; 5] = [CRITICAL, HIGH, NORMAL, LOW, BACKGROUND];
