//! Error codes and the structured error raised by every Pixie operation.
//!
//! Every failure carries an [`ErrorCode`] so callers, and the legacy API shim,
//! can act on the kind of failure without parsing messages.

use std::fmt;
use thiserror::Error;

/// Machine readable error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // Crate
    /// `initialize()` called on an open crate.
    CrateAlreadyOpen,
    /// Operation issued before `initialize()` or after `shutdown()`.
    CrateNotReady,
    /// Bad crate level argument.
    CrateInvalidParam,

    // Module
    /// Module number or slot out of range.
    ModuleNumberInvalid,
    /// Online/offline totals do not add up.
    ModuleTotalInvalid,
    /// Module opened twice.
    ModuleAlreadyOpen,
    /// Module failed to close.
    ModuleCloseFailure,
    /// Module is not online.
    ModuleOffline,
    /// Module information could not be read.
    ModuleInfoFailure,
    /// Operation not allowed in the module's current state.
    ModuleInvalidOperation,
    /// Firmware missing, incomplete or conflicting.
    ModuleInvalidFirmware,
    /// Module initialization failed.
    ModuleInitializeFailure,
    /// Bad module parameter.
    ModuleInvalidParam,
    /// Bad module variable.
    ModuleInvalidVar,
    /// Module variable is disabled.
    ModuleParamDisabled,
    /// Module variable is read only.
    ModuleParamReadonly,
    /// DSP task did not finish in time.
    ModuleTaskTimeout,

    // Channel
    /// Channel number out of range.
    ChannelNumberInvalid,
    /// Bad channel parameter.
    ChannelInvalidParam,
    /// Bad channel variable or address map.
    ChannelInvalidVar,
    /// Channel variable is disabled.
    ChannelParamDisabled,
    /// Channel variable is read only.
    ChannelParamReadonly,

    // Device
    /// Image could not be loaded onto a device.
    DeviceLoadFailure,
    /// Device did not boot.
    DeviceBootFailure,
    /// Device did not initialize.
    DeviceInitializeFailure,
    /// Firmware image is malformed.
    DeviceImageFailure,
    /// Generic hardware failure.
    DeviceHwFailure,
    /// DMA transfer failed.
    DeviceDmaFailure,

    // Files and configuration
    /// File does not exist.
    FileNotFound,
    /// File could not be read.
    FileReadFailure,
    /// File could not be created.
    FileCreateFailure,
    /// Configuration is malformed or out of range.
    ConfigInvalid,
    /// Slot map is malformed.
    SlotMapInvalid,

    // System
    /// Value out of range.
    InvalidValue,
    /// Operation meaningless for this hardware revision.
    NotSupported,
    /// Internal consistency failure.
    InternalFailure,
    /// Name not found in a catalog namespace.
    UnknownParameter,
}

/// Error taxonomy used for policy decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Null, empty or out of range input.
    InvalidArgument,
    /// Crate or module not initialized or open.
    NotReady,
    /// Operation not available on this hardware.
    NotSupported,
    /// Operation attempted in the wrong state, e.g. while running.
    InvalidOperation,
    /// Boot, DMA or image load failure.
    Device,
    /// Firmware catalog or configuration failure.
    Configuration,
    /// Programming or firmware packaging defect. Not recoverable.
    Internal,
}

impl ErrorCode {
    /// Taxonomy of this code.
    pub fn kind(self) -> ErrorKind {
        use ErrorCode::*;
        match self {
            CrateInvalidParam | ModuleNumberInvalid | ModuleInvalidParam | ModuleInvalidVar
            | ModuleParamDisabled | ModuleParamReadonly | ChannelNumberInvalid
            | ChannelInvalidParam | ChannelParamDisabled | ChannelParamReadonly
            | InvalidValue | UnknownParameter => ErrorKind::InvalidArgument,
            CrateNotReady | ModuleOffline => ErrorKind::NotReady,
            NotSupported => ErrorKind::NotSupported,
            CrateAlreadyOpen | ModuleAlreadyOpen | ModuleInvalidOperation => {
                ErrorKind::InvalidOperation
            }
            ModuleCloseFailure | ModuleInfoFailure | ModuleInitializeFailure
            | ModuleTaskTimeout | DeviceLoadFailure | DeviceBootFailure
            | DeviceInitializeFailure | DeviceImageFailure | DeviceHwFailure
            | DeviceDmaFailure => ErrorKind::Device,
            ModuleInvalidFirmware | FileNotFound | FileReadFailure | FileCreateFailure
            | ConfigInvalid | SlotMapInvalid => ErrorKind::Configuration,
            ModuleTotalInvalid | ChannelInvalidVar | InternalFailure => ErrorKind::Internal,
        }
    }

    /// Result number reported through the legacy C API. Success is 0.
    pub fn api_result(self) -> i32 {
        use ErrorCode::*;
        match self {
            CrateAlreadyOpen => -1,
            CrateNotReady => -2,
            CrateInvalidParam => -3,
            ModuleNumberInvalid => -100,
            ModuleTotalInvalid => -101,
            ModuleAlreadyOpen => -102,
            ModuleCloseFailure => -103,
            ModuleOffline => -104,
            ModuleInfoFailure => -105,
            ModuleInvalidOperation => -106,
            ModuleInvalidFirmware => -107,
            ModuleInitializeFailure => -108,
            ModuleInvalidParam => -109,
            ModuleInvalidVar => -110,
            ModuleParamDisabled => -111,
            ModuleParamReadonly => -112,
            ModuleTaskTimeout => -113,
            ChannelNumberInvalid => -200,
            ChannelInvalidParam => -201,
            ChannelInvalidVar => -202,
            ChannelParamDisabled => -203,
            ChannelParamReadonly => -204,
            DeviceLoadFailure => -300,
            DeviceBootFailure => -301,
            DeviceInitializeFailure => -302,
            DeviceImageFailure => -303,
            DeviceHwFailure => -304,
            DeviceDmaFailure => -305,
            FileNotFound => -400,
            FileReadFailure => -401,
            FileCreateFailure => -402,
            ConfigInvalid => -403,
            SlotMapInvalid => -404,
            InvalidValue => -500,
            NotSupported => -501,
            UnknownParameter => -502,
            InternalFailure => -999,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Structured error raised by crate, module and channel operations.
#[derive(Debug, Clone, Error)]
#[error("{}{message} [{code}]", location(.number, .slot))]
pub struct PixieError {
    /// What went wrong.
    pub code: ErrorCode,
    /// Logical module number, when the error is module scoped.
    pub number: Option<usize>,
    /// Physical slot, when the error is module scoped.
    pub slot: Option<usize>,
    /// Human readable detail.
    pub message: String,
}

fn location(number: &Option<usize>, slot: &Option<usize>) -> String {
    match (*number, *slot) {
        (Some(n), Some(s)) => format!("module: num={n} slot={s}: "),
        (Some(n), None) => format!("module: num={n}: "),
        (None, Some(s)) => format!("slot={s}: "),
        (None, None) => String::new(),
    }
}

impl PixieError {
    /// Create an error that is not tied to a module.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            number: None,
            slot: None,
            message: message.into(),
        }
    }

    /// Create a module scoped error.
    pub fn module(number: usize, slot: usize, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            number: Some(number),
            slot: Some(slot),
            message: message.into(),
        }
    }

    /// Attach a module location to an error that has none.
    pub fn at(mut self, number: usize, slot: usize) -> Self {
        self.number.get_or_insert(number);
        self.slot.get_or_insert(slot);
        self
    }

    /// Taxonomy of the error.
    pub fn kind(&self) -> ErrorKind {
        self.code.kind()
    }

    /// True for failures that indicate a defect rather than bad input.
    pub fn is_internal(&self) -> bool {
        self.kind() == ErrorKind::Internal
    }
}

/// Result alias for Pixie operations.
pub type Result<T> = std::result::Result<T, PixieError>;
