//! Control register persisted at [`CONTROL_REGISTER_ADDR`].
//!
//! The register is one byte with four independent flags. All mutation goes
//! through [`ControlRegister::with_flag`], so the rule "writing any other
//! flag consumes the reset marker" lives in a single place.

use log::debug;

use super::{CONTROL_REGISTER_ADDR, PagedStore, StoreError};

const START_STOP_SHIFT: u8 = 0;
const CONFIG_MODE_SHIFT: u8 = 1;
const SEND_ENABLED_SHIFT: u8 = 2;
const RESET_PERFORMED_SHIFT: u8 = 3;

/// One of the four persisted flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlFlag {
    /// Sensing was running when the flag was last written
    StartStop,
    /// Device is in configuration mode
    ConfigMode,
    /// Raw bursts are forwarded over the link
    SendEnabled,
    /// The store was erased and no flag has been written since
    ResetPerformed,
}

impl ControlFlag {
    const fn shift(self) -> u8 {
        match self {
            Self::StartStop => START_STOP_SHIFT,
            Self::ConfigMode => CONFIG_MODE_SHIFT,
            Self::SendEnabled => SEND_ENABLED_SHIFT,
            Self::ResetPerformed => RESET_PERFORMED_SHIFT,
        }
    }
}

/// In-memory view of the control register byte
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ControlRegister {
    pub start_stop: bool,
    pub config_mode: bool,
    pub send_enabled: bool,
    pub reset_performed: bool,
}

impl ControlRegister {
    /// Decode the persisted byte. Unused upper bits are ignored.
    pub const fn from_byte(byte: u8) -> Self {
        Self {
            start_stop: byte & (1 << START_STOP_SHIFT) != 0,
            config_mode: byte & (1 << CONFIG_MODE_SHIFT) != 0,
            send_enabled: byte & (1 << SEND_ENABLED_SHIFT) != 0,
            reset_performed: byte & (1 << RESET_PERFORMED_SHIFT) != 0,
        }
    }

    pub const fn to_byte(self) -> u8 {
        (self.start_stop as u8) << START_STOP_SHIFT
            | (self.config_mode as u8) << CONFIG_MODE_SHIFT
            | (self.send_enabled as u8) << SEND_ENABLED_SHIFT
            | (self.reset_performed as u8) << RESET_PERFORMED_SHIFT
    }

    pub const fn get(self, flag: ControlFlag) -> bool {
        self.to_byte() & (1 << flag.shift()) != 0
    }

    /// Register with `flag` set to `value`.
    ///
    /// Writing any flag other than [`ControlFlag::ResetPerformed`] also
    /// clears the reset marker.
    pub const fn with_flag(self, flag: ControlFlag, value: bool) -> Self {
        let mut next = self;
        match flag {
            ControlFlag::StartStop => next.start_stop = value,
            ControlFlag::ConfigMode => next.config_mode = value,
            ControlFlag::SendEnabled => next.send_enabled = value,
            ControlFlag::ResetPerformed => next.reset_performed = value,
        }
        if !matches!(flag, ControlFlag::ResetPerformed) {
            next.reset_performed = false;
        }
        next
    }
}

/// Control register access for any [`PagedStore`].
///
/// There is no locking: concurrent read-modify-write sequences are ordered
/// only by call order, and each write re-reads the byte from the store.
pub trait ControlRegisterStore: PagedStore {
    /// Read and decode the register.
    fn control_register(&mut self) -> impl Future<Output = Result<ControlRegister, StoreError>> {
        async move {
            let byte = self.read_byte(CONTROL_REGISTER_ADDR).await?;
            Ok(ControlRegister::from_byte(byte))
        }
    }

    /// Read a single flag. Never waits for a pending write.
    fn flag(&mut self, flag: ControlFlag) -> impl Future<Output = Result<bool, StoreError>> {
        async move { Ok(self.control_register().await?.get(flag)) }
    }

    /// Read-modify-write a single flag and wait until it is committed.
    fn set_flag(
        &mut self,
        flag: ControlFlag,
        value: bool,
    ) -> impl Future<Output = Result<ControlRegister, StoreError>> {
        async move {
            let next = self.control_register().await?.with_flag(flag, value);
            self.write_byte(CONTROL_REGISTER_ADDR, next.to_byte()).await?;
            self.wait_for_completion().await?;
            debug!("Control register {:?} = {} -> {:#04x}", flag, value, next.to_byte());
            Ok(next)
        }
    }
}

impl<P: PagedStore> ControlRegisterStore for P {}
