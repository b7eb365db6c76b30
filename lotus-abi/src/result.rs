//! Kernel result codes.
//!
//! A `ResultCode` packs a description, the module that raised it, a summary,
//! and a severity level into one word. Zero is success; anything non-zero is
//! an error the guest is expected to inspect.

/// Bit layout: description 0..10, module 10..18, summary 21..27, level 27..32.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ResultCode(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorModule {
    Common = 0,
    Kernel = 1,
    Os = 3,
    Application = 254,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorSummary {
    Success = 0,
    NothingHappened = 1,
    WouldBlock = 3,
    OutOfResource = 4,
    NotFound = 5,
    InvalidState = 6,
    NotSupported = 7,
    InvalidArgument = 8,
    WrongArgument = 9,
    Canceled = 10,
    StatusChanged = 11,
    Internal = 12,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorLevel {
    Success = 0,
    Info = 1,
    Status = 25,
    Temporary = 26,
    Permanent = 27,
    Usage = 28,
    Fatal = 31,
}

/// Description values used by the kernel and OS modules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorDescription {
    Success = 0,
    WrongPermission = 2,
    InvalidDescriptor = 17,
    OutOfHandles = 19,
    WrongProcess = 24,
    WrongThread = 25,
    SessionClosed = 26,
    PortNameTooLong = 30,
    WrongLockingThread = 31,
    NoPendingSessions = 35,
    MaxConnectionsReached = 52,
    Timeout = 1006,
    InvalidHandle = 1007,
    InvalidPointer = 1008,
    InvalidAddress = 1009,
    MisalignedAddress = 1010,
    MisalignedSize = 1011,
    InvalidCombination = 1012,
    OutOfRange = 1013,
    NotAuthorized = 1014,
    NotFound = 1015,
    NotImplemented = 1016,
    InvalidEnumValue = 1017,
    OutOfMemory = 1018,
    InvalidAddressState = 1019,
}

impl ResultCode {
    pub const fn new(
        description: ErrorDescription,
        module: ErrorModule,
        summary: ErrorSummary,
        level: ErrorLevel,
    ) -> Self {
        ResultCode(
            (description as u32 & 0x3FF)
                | ((module as u32 & 0xFF) << 10)
                | ((summary as u32 & 0x3F) << 21)
                | ((level as u32 & 0x1F) << 27),
        )
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub const fn is_success(self) -> bool {
        self.0 == 0
    }

    pub const fn is_error(self) -> bool {
        self.0 != 0
    }
}

impl core::fmt::Debug for ResultCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "ResultCode({:#010X})", self.0)
    }
}

pub const RESULT_SUCCESS: ResultCode = ResultCode(0);

pub const RESULT_TIMEOUT: ResultCode = ResultCode::new(
    ErrorDescription::Timeout,
    ErrorModule::Os,
    ErrorSummary::StatusChanged,
    ErrorLevel::Info,
);

pub const ERR_INVALID_HANDLE: ResultCode = ResultCode::new(
    ErrorDescription::InvalidHandle,
    ErrorModule::Kernel,
    ErrorSummary::InvalidArgument,
    ErrorLevel::Permanent,
);

pub const ERR_INVALID_POINTER: ResultCode = ResultCode::new(
    ErrorDescription::InvalidPointer,
    ErrorModule::Kernel,
    ErrorSummary::InvalidArgument,
    ErrorLevel::Permanent,
);

pub const ERR_INVALID_ADDRESS: ResultCode = ResultCode::new(
    ErrorDescription::InvalidAddress,
    ErrorModule::Os,
    ErrorSummary::InvalidArgument,
    ErrorLevel::Usage,
);

pub const ERR_INVALID_ADDRESS_STATE: ResultCode = ResultCode::new(
    ErrorDescription::InvalidAddressState,
    ErrorModule::Os,
    ErrorSummary::InvalidState,
    ErrorLevel::Usage,
);

pub const ERR_MISALIGNED_ADDRESS: ResultCode = ResultCode::new(
    ErrorDescription::MisalignedAddress,
    ErrorModule::Os,
    ErrorSummary::InvalidArgument,
    ErrorLevel::Usage,
);

pub const ERR_MISALIGNED_SIZE: ResultCode = ResultCode::new(
    ErrorDescription::MisalignedSize,
    ErrorModule::Os,
    ErrorSummary::InvalidArgument,
    ErrorLevel::Usage,
);

pub const ERR_INVALID_COMBINATION: ResultCode = ResultCode::new(
    ErrorDescription::InvalidCombination,
    ErrorModule::Os,
    ErrorSummary::InvalidArgument,
    ErrorLevel::Usage,
);

pub const ERR_INVALID_COMBINATION_KERNEL: ResultCode = ResultCode::new(
    ErrorDescription::InvalidCombination,
    ErrorModule::Kernel,
    ErrorSummary::WrongArgument,
    ErrorLevel::Permanent,
);

pub const ERR_OUT_OF_RANGE: ResultCode = ResultCode::new(
    ErrorDescription::OutOfRange,
    ErrorModule::Os,
    ErrorSummary::InvalidArgument,
    ErrorLevel::Usage,
);

pub const ERR_OUT_OF_RANGE_KERNEL: ResultCode = ResultCode::new(
    ErrorDescription::OutOfRange,
    ErrorModule::Kernel,
    ErrorSummary::InvalidArgument,
    ErrorLevel::Permanent,
);

pub const ERR_NOT_AUTHORIZED: ResultCode = ResultCode::new(
    ErrorDescription::NotAuthorized,
    ErrorModule::Os,
    ErrorSummary::WrongArgument,
    ErrorLevel::Permanent,
);

pub const ERR_NOT_FOUND: ResultCode = ResultCode::new(
    ErrorDescription::NotFound,
    ErrorModule::Kernel,
    ErrorSummary::NotFound,
    ErrorLevel::Permanent,
);

pub const ERR_NOT_IMPLEMENTED: ResultCode = ResultCode::new(
    ErrorDescription::NotImplemented,
    ErrorModule::Kernel,
    ErrorSummary::NotSupported,
    ErrorLevel::Permanent,
);

pub const ERR_INVALID_ENUM_VALUE: ResultCode = ResultCode::new(
    ErrorDescription::InvalidEnumValue,
    ErrorModule::Kernel,
    ErrorSummary::InvalidArgument,
    ErrorLevel::Permanent,
);

pub const ERR_INVALID_ENUM_VALUE_FND: ResultCode = ResultCode::new(
    ErrorDescription::InvalidEnumValue,
    ErrorModule::Common,
    ErrorSummary::WrongArgument,
    ErrorLevel::Permanent,
);

pub const ERR_OUT_OF_HANDLES: ResultCode = ResultCode::new(
    ErrorDescription::OutOfHandles,
    ErrorModule::Kernel,
    ErrorSummary::OutOfResource,
    ErrorLevel::Permanent,
);

pub const ERR_OUT_OF_MEMORY: ResultCode = ResultCode::new(
    ErrorDescription::OutOfMemory,
    ErrorModule::Kernel,
    ErrorSummary::OutOfResource,
    ErrorLevel::Permanent,
);

pub const ERR_SESSION_CLOSED_BY_REMOTE: ResultCode = ResultCode::new(
    ErrorDescription::SessionClosed,
    ErrorModule::Os,
    ErrorSummary::Canceled,
    ErrorLevel::Status,
);

pub const ERR_PORT_NAME_TOO_LONG: ResultCode = ResultCode::new(
    ErrorDescription::PortNameTooLong,
    ErrorModule::Os,
    ErrorSummary::InvalidArgument,
    ErrorLevel::Usage,
);

pub const ERR_MAX_CONNECTIONS_REACHED: ResultCode = ResultCode::new(
    ErrorDescription::MaxConnectionsReached,
    ErrorModule::Os,
    ErrorSummary::WouldBlock,
    ErrorLevel::Temporary,
);

pub const ERR_NO_PENDING_SESSIONS: ResultCode = ResultCode::new(
    ErrorDescription::NoPendingSessions,
    ErrorModule::Os,
    ErrorSummary::WouldBlock,
    ErrorLevel::Temporary,
);

pub const ERR_WRONG_LOCKING_THREAD: ResultCode = ResultCode::new(
    ErrorDescription::WrongLockingThread,
    ErrorModule::Kernel,
    ErrorSummary::InvalidArgument,
    ErrorLevel::Permanent,
);

pub const ERR_WRONG_PERMISSION: ResultCode = ResultCode::new(
    ErrorDescription::WrongPermission,
    ErrorModule::Os,
    ErrorSummary::WrongArgument,
    ErrorLevel::Permanent,
);

pub const ERR_IPC_DESCRIPTOR: ResultCode = ResultCode::new(
    ErrorDescription::InvalidDescriptor,
    ErrorModule::Kernel,
    ErrorSummary::WrongArgument,
    ErrorLevel::Permanent,
);

/// Wrong-argument code for `OpenProcess` on an unknown process id.
pub const ERR_PROCESS_NOT_FOUND: ResultCode = ResultCode::new(
    ErrorDescription::WrongProcess,
    ErrorModule::Os,
    ErrorSummary::WrongArgument,
    ErrorLevel::Permanent,
);

/// Wrong-argument code for `OpenThread` on an unknown thread id.
pub const ERR_THREAD_NOT_FOUND: ResultCode = ResultCode::new(
    ErrorDescription::WrongThread,
    ErrorModule::Os,
    ErrorSummary::WrongArgument,
    ErrorLevel::Permanent,
);

/// Placeholder the kernel returns from `ReplyAndReceive` when it was given
/// no handles and performed no reply.
pub const ERR_IPC_NO_OPERATION: ResultCode = ResultCode(0xE7E3_FFFF);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_is_zero() {
        assert!(RESULT_SUCCESS.is_success());
        assert_eq!(RESULT_SUCCESS.raw(), 0);
    }

    #[test]
    fn errors_are_nonzero_and_distinct() {
        let codes = [
            RESULT_TIMEOUT,
            ERR_INVALID_HANDLE,
            ERR_INVALID_POINTER,
            ERR_INVALID_ADDRESS,
            ERR_MISALIGNED_ADDRESS,
            ERR_MISALIGNED_SIZE,
            ERR_INVALID_COMBINATION,
            ERR_OUT_OF_RANGE,
            ERR_NOT_AUTHORIZED,
            ERR_NOT_FOUND,
            ERR_NOT_IMPLEMENTED,
            ERR_INVALID_ENUM_VALUE,
            ERR_SESSION_CLOSED_BY_REMOTE,
            ERR_PORT_NAME_TOO_LONG,
        ];
        for (i, a) in codes.iter().enumerate() {
            assert!(a.is_error());
            for b in &codes[i + 1..] {
                assert_ne!(a.raw(), b.raw());
            }
        }
    }

    #[test]
    fn sentinel_value_is_fixed() {
        assert_eq!(ERR_IPC_NO_OPERATION.raw(), 0xE7E3_FFFF);
    }
}
