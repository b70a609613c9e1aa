//! The facade's lifecycle state machine (§4.12):
//! `Closed -> Opening -> Recovering -> Open -> Closing -> Closed`.
//! External operations fail with `NotReady` while `Recovering` or
//! `Closing`; `Closed` rejects everything except `open()`.

use std::sync::atomic::{AtomicU8, Ordering};

use sharpcore_core::{Error, Result};

/// One state in the database lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DbState {
    Closed = 0,
    Opening = 1,
    Recovering = 2,
    Open = 3,
    Closing = 4,
}

impl DbState {
    fn from_u8(b: u8) -> Self {
        match b {
            0 => DbState::Closed,
            1 => DbState::Opening,
            2 => DbState::Recovering,
            3 => DbState::Open,
            4 => DbState::Closing,
            _ => unreachable!("DbState only ever stores its own discriminants"),
        }
    }
}

/// Atomic holder for the facade's current lifecycle state, with the
/// transition rules baked in so callers can't skip `Recovering`.
pub struct StateMachine {
    state: AtomicU8,
}

impl Default for StateMachine {
    fn default() -> Self {
        StateMachine {
            state: AtomicU8::new(DbState::Closed as u8),
        }
    }
}

impl StateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> DbState {
        DbState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set(&self, state: DbState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    pub fn begin_open(&self) -> Result<()> {
        if self.get() != DbState::Closed {
            return Err(Error::InvalidArgument(
                "database is already open or opening".into(),
            ));
        }
        self.set(DbState::Opening);
        Ok(())
    }

    pub fn begin_recovery(&self) {
        self.set(DbState::Recovering);
    }

    pub fn finish_open(&self) {
        self.set(DbState::Open);
    }

    pub fn begin_close(&self) -> Result<()> {
        if self.get() != DbState::Open {
            return Err(Error::NotReady("database is not open".into()));
        }
        self.set(DbState::Closing);
        Ok(())
    }

    pub fn finish_close(&self) {
        self.set(DbState::Closed);
    }

    /// Every read/write statement calls this first; `NotReady` while
    /// recovering or closing, `InvalidArgument` while fully closed.
    pub fn require_open(&self) -> Result<()> {
        match self.get() {
            DbState::Open => Ok(()),
            DbState::Recovering | DbState::Closing | DbState::Opening => {
                Err(Error::NotReady(format!("database is {:?}", self.get())))
            }
            DbState::Closed => Err(Error::InvalidArgument("database is not open".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_transitions() {
        let sm = StateMachine::new();
        assert_eq!(sm.get(), DbState::Closed);
        sm.begin_open().unwrap();
        assert_eq!(sm.get(), DbState::Opening);
        sm.begin_recovery();
        assert!(sm.require_open().is_err());
        sm.finish_open();
        assert!(sm.require_open().is_ok());
        sm.begin_close().unwrap();
        assert!(sm.require_open().is_err());
        sm.finish_close();
        assert_eq!(sm.get(), DbState::Closed);
    }

    #[test]
    fn cannot_open_twice() {
        let sm = StateMachine::new();
        sm.begin_open().unwrap();
        assert!(sm.begin_open().is_err());
    }

    #[test]
    fn cannot_close_what_isnt_open() {
        let sm = StateMachine::new();
        assert!(sm.begin_close().is_err());
    }
}
