//! Firmware upgrade engine.
//!
//! An upgrade session is an ordered list of [`UpgradeWorker`]s built from a
//! combined image and a device profile:
//!
//! ```text
//! jump to bootloader -> write rtk -> write ins -> jump to application
//!                    -> jump imu to bootloader -> write imu -> jump imu back
//! ```
//!
//! Workers run strictly in order on one link. Each reports its lifecycle as
//! [`UpgradeEvent`]s and runs the profile's hook steps at the matching
//! points. The first failure ends the session.

pub mod firmware;
pub mod hooks;
pub mod jump;
pub mod pipeline;
pub mod policy;
pub mod worker;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::device::DeviceProfile;
use crate::discovery::DeviceIdentity;

pub use firmware::{BlockFormat, BlockSize, FirmwareWriteWorker, LengthField};
pub use hooks::{Hook, HookContext, HookPoint, HookStep, Hooks, PrepareStep, Settle};
pub use jump::{JumpDirection, JumpWorker};
pub use pipeline::{build_pipeline, run_pipeline};
pub use policy::{JumpPolicy, PreparePolicy, SettlePolicy, UpgradePolicy, WritePolicy};
pub use worker::UpgradeWorker;

/// Workers bracketed by one pair of mode jumps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpgradeGroup {
    /// The main processor cores.
    Main,
    /// The IMU bootloader image.
    ImuBoot,
    /// The IMU application image.
    Imu,
}

impl UpgradeGroup {
    /// Lowercase name used in worker keys.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Main => "main",
            Self::ImuBoot => "imu_boot",
            Self::Imu => "imu",
        }
    }
}

impl fmt::Display for UpgradeGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle notifications of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpgradeEvent {
    /// A worker is about to run. `total` is zero for jumps.
    WorkerStarted {
        /// Worker key.
        key: String,
        /// Display name.
        name: String,
        /// Content bytes the worker will write.
        total: usize,
    },
    /// A jump is about to send its command.
    BeforeCommand {
        /// Worker key.
        key: String,
    },
    /// A jump completed.
    AfterCommand {
        /// Worker key.
        key: String,
    },
    /// A write is about to start.
    BeforeWrite {
        /// Worker key.
        key: String,
    },
    /// The first block of a write went out.
    FirstPacket {
        /// Worker key.
        key: String,
    },
    /// A block was written.
    Progress {
        /// Worker key.
        key: String,
        /// Bytes written so far.
        offset: usize,
        /// Bytes to write.
        total: usize,
    },
    /// All blocks were written.
    AfterWrite {
        /// Worker key.
        key: String,
    },
    /// A worker completed.
    Finish {
        /// Worker key.
        key: String,
    },
    /// A worker failed; the session ends.
    Error {
        /// Worker key.
        key: String,
        /// Failure description.
        reason: String,
    },
    /// Every worker completed.
    SessionFinished,
    /// The session ended early.
    SessionFailed {
        /// Failure description.
        reason: String,
    },
}

/// Cooperative stop flag shared between a worker and its host.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    /// A handle that is not stopped.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a stop.
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether a stop was requested, here or through the global checker.
    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst) || crate::is_interrupted_requested()
    }

    /// Clear a previous stop request.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Facts shared by the workers of one session.
#[derive(Debug, Clone)]
pub struct SessionState {
    /// Model being upgraded.
    pub profile: &'static DeviceProfile,
    /// Identity from discovery, refreshed by hooks after mode jumps.
    pub identity: DeviceIdentity,
    /// Budgets.
    pub policy: UpgradePolicy,
    /// Serial rate to restore after the bootloader phase.
    pub application_baud: Option<u32>,
}

impl SessionState {
    /// Session for `profile` with the identity learned during discovery.
    pub fn new(
        profile: &'static DeviceProfile,
        identity: DeviceIdentity,
        policy: UpgradePolicy,
    ) -> Self {
        Self {
            profile,
            identity,
            policy,
            application_baud: None,
        }
    }
}
