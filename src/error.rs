use core::{fmt, result};

#[derive(Eq, PartialEq, Clone, Copy)]
pub struct Error {
    pub errno: i32,
}

pub type Result<T, E = Error> = result::Result<T, E>;

impl Error {
    pub fn new(errno: i32) -> Error {
        Error { errno }
    }

    pub fn text(&self) -> &'static str {
        match self.errno {
            EPERM => "Operation not permitted",
            ESRCH => "No such task",
            ENOMEM => "Cannot allocate memory",
            EEXIST => "Mapping exists",
            EINVAL => "Invalid argument",
            EAGAIN => "Try again",
            EREMAPFAILED => "Remap failed",
            _ => "Unknown Error",
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        f.write_str(self.text())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        f.write_str(self.text())
    }
}

pub const EPERM: i32 = 1; /* Operation not permitted */
pub const ESRCH: i32 = 3; /* No such task */
pub const EAGAIN: i32 = 11; /* Try again */
pub const ENOMEM: i32 = 12; /* Out of memory */
pub const EEXIST: i32 = 17; /* Mapping exists */
pub const EINVAL: i32 = 22; /* Invalid argument */
/// The receiver's backend could not take the mapping; surfaced to the IPC
/// reply as the message-dope "remap failed" bit.
pub const EREMAPFAILED: i32 = 0x100;
