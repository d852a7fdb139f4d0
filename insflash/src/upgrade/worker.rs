//! The closed set of pipeline steps.

use crate::error::Result;
use crate::transport::Communicator;
use crate::upgrade::firmware::FirmwareWriteWorker;
use crate::upgrade::jump::JumpWorker;
use crate::upgrade::{SessionState, StopHandle, UpgradeEvent, UpgradeGroup};

/// One step of an upgrade pipeline.
#[derive(Debug)]
pub enum UpgradeWorker {
    /// Write one section.
    FirmwareWrite(FirmwareWriteWorker),
    /// Enter the bootloader.
    JumpToBootloader(JumpWorker),
    /// Return to the application.
    JumpToApplication(JumpWorker),
}

impl UpgradeWorker {
    /// Display name.
    pub fn name(&self) -> &str {
        match self {
            Self::FirmwareWrite(w) => w.name(),
            Self::JumpToBootloader(w) | Self::JumpToApplication(w) => w.name(),
        }
    }

    /// Key used in events.
    pub fn key(&self) -> &str {
        match self {
            Self::FirmwareWrite(w) => w.key(),
            Self::JumpToBootloader(w) | Self::JumpToApplication(w) => w.key(),
        }
    }

    /// Jump group.
    pub fn group(&self) -> UpgradeGroup {
        match self {
            Self::FirmwareWrite(w) => w.group(),
            Self::JumpToBootloader(w) | Self::JumpToApplication(w) => w.group(),
        }
    }

    /// Bytes written by this step; zero for jumps.
    pub fn content_size(&self) -> usize {
        match self {
            Self::FirmwareWrite(w) => w.content_size(),
            Self::JumpToBootloader(_) | Self::JumpToApplication(_) => 0,
        }
    }

    /// Whether this step writes firmware.
    pub fn is_write(&self) -> bool {
        matches!(self, Self::FirmwareWrite(_))
    }

    /// Run the step.
    pub fn run(
        &mut self,
        link: &mut dyn Communicator,
        session: &mut SessionState,
        events: &mut dyn FnMut(&UpgradeEvent),
    ) -> Result<()> {
        match self {
            Self::FirmwareWrite(w) => w.run(link, session, events),
            Self::JumpToBootloader(w) | Self::JumpToApplication(w) => {
                w.run(link, session, events)
            },
        }
    }

    /// Request a cooperative stop.
    pub fn stop(&self) {
        self.stop_handle().stop();
    }

    /// Stop flag of this step.
    pub fn stop_handle(&self) -> StopHandle {
        match self {
            Self::FirmwareWrite(w) => w.stop_handle(),
            Self::JumpToBootloader(w) | Self::JumpToApplication(w) => w.stop_handle(),
        }
    }

    /// Share a session-wide stop flag.
    pub fn set_stop_handle(&mut self, stop: StopHandle) {
        match self {
            Self::FirmwareWrite(w) => w.set_stop_handle(stop),
            Self::JumpToBootloader(w) | Self::JumpToApplication(w) => w.set_stop_handle(stop),
        }
    }
}
