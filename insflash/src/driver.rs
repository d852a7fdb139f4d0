//! Application-facing facade over one link.
//!
//! A [`Driver`] owns a [`Communicator`], finds the unit behind it, relays raw
//! commands and runs upgrade sessions. Progress reaches the host as
//! [`UpgradeEvent`]s.

use std::fs;
use std::path::Path;
use std::time::Duration;

use log::{debug, info, warn};

use crate::device::{DeviceKind, DeviceRegistry};
use crate::discovery::{self, DeviceIdentity, PingInfo, PingTarget};
use crate::error::{Error, Result};
use crate::protocol::request::request_with_timeout;
use crate::protocol::{Command, PacketType};
use crate::transport::{Communicator, TransportKind};
use crate::upgrade::{
    SessionState, StopHandle, UpgradeEvent, UpgradePolicy, build_pipeline, run_pipeline,
};

/// The unit a driver is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct DeviceHandle {
    /// Model.
    pub kind: DeviceKind,
    /// Link the unit answered on.
    pub transport: TransportKind,
    /// Parsed identification reply.
    pub identity: DeviceIdentity,
    /// Raw classified reply.
    #[cfg_attr(feature = "serde", serde(skip))]
    pub ping: Option<PingInfo>,
}

/// Host driver for one link.
pub struct Driver<C: Communicator> {
    link: C,
    registry: DeviceRegistry,
    handle: Option<DeviceHandle>,
    policy: UpgradePolicy,
    stop: StopHandle,
}

impl<C: Communicator> Driver<C> {
    /// Driver over `link` with the default budgets.
    pub fn new(link: C) -> Self {
        Self::with_policy(link, UpgradePolicy::default())
    }

    /// Driver over `link` with explicit budgets.
    pub fn with_policy(link: C, policy: UpgradePolicy) -> Self {
        Self {
            link,
            registry: DeviceRegistry::new(),
            handle: None,
            policy,
            stop: StopHandle::new(),
        }
    }

    /// The link.
    pub fn link(&self) -> &C {
        &self.link
    }

    /// The link, for direct access.
    pub fn link_mut(&mut self) -> &mut C {
        &mut self.link
    }

    /// Units bound so far.
    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    /// Bound unit, if discovery succeeded.
    pub fn handle(&self) -> Option<&DeviceHandle> {
        self.handle.as_ref()
    }

    /// Budgets in use.
    pub fn policy(&self) -> &UpgradePolicy {
        &self.policy
    }

    /// Stop flag shared by every worker of the running session.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Find one of `kinds` behind the link.
    ///
    /// Models reached over another transport are ignored; an empty list
    /// tries every model of this link's transport.
    pub fn discover(&mut self, kinds: &[DeviceKind]) -> Result<DeviceHandle> {
        let transport = self.link.kind();
        let candidates: Vec<DeviceKind> = if kinds.is_empty() {
            DeviceKind::for_transport(transport).collect()
        } else {
            kinds
                .iter()
                .copied()
                .filter(|kind| kind.transport() == transport)
                .collect()
        };
        if candidates.is_empty() {
            return Err(Error::Unsupported(format!(
                "no selected model is reachable over {transport}"
            )));
        }

        let targets: Vec<PingTarget<'static>> = candidates
            .iter()
            .map(|kind| kind.profile().ping_target())
            .collect();
        let (index, info) = discovery::discover(&mut self.link, &targets, &self.policy.discovery)?;
        let kind = candidates[index];
        let identity = DeviceIdentity::parse(&info, kind.profile().layout);
        info!(
            "Bound {kind} on {} (SN {}, bootloader {})",
            self.link.name(),
            identity.serial_number,
            identity.bootloader_version.as_deref().unwrap_or("unknown")
        );

        self.registry
            .insert(kind, transport, self.link.name(), identity.clone());
        let handle = DeviceHandle {
            kind,
            transport,
            identity,
            ping: Some(info),
        };
        self.handle = Some(handle.clone());
        Ok(handle)
    }

    /// Send `packet_type` with `payload` and return the reply payload.
    pub fn send_command(
        &mut self,
        packet_type: PacketType,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<Vec<u8>> {
        let command = Command::new(packet_type).with_payload(payload.to_vec());
        debug!("Sending {packet_type} ({} payload bytes)", payload.len());
        request_with_timeout(&mut self.link, &command, timeout)
    }

    /// Upgrade the bound unit from the combined image at `path`.
    ///
    /// `targets` selects sections by name; empty means every section the
    /// model can write. Every event is forwarded to `observer`, closed by
    /// `SessionFinished` or `SessionFailed`.
    pub fn start_upgrade<P: AsRef<Path>>(
        &mut self,
        path: P,
        targets: &[&str],
        observer: &mut dyn FnMut(&UpgradeEvent),
    ) -> Result<()> {
        let handle = self.handle.clone().ok_or(Error::DeviceNotFound)?;
        let path = path.as_ref();
        debug!("Loading firmware image from: {}", path.display());
        let data = fs::read(path)?;

        let mut session = SessionState::new(
            handle.kind.profile(),
            handle.identity.clone(),
            self.policy.clone(),
        );
        let mut workers = build_pipeline(&data, targets, &session, self.link.dialect())?;
        if workers.is_empty() {
            let reason = format!("{} has nothing to write to {}", path.display(), handle.kind);
            observer(&UpgradeEvent::SessionFailed {
                reason: reason.clone(),
            });
            return Err(Error::InvalidImage(reason));
        }

        self.stop.reset();
        for worker in &mut workers {
            worker.set_stop_handle(self.stop.clone());
        }

        self.link.reset_buffer()?;
        self.link.set_upgrading(true);
        self.registry
            .set_upgrading(handle.kind, handle.transport, true);

        let result = run_pipeline(&mut workers, &mut self.link, &mut session, observer);

        self.link.set_upgrading(false);
        self.registry
            .set_upgrading(handle.kind, handle.transport, false);

        match result {
            Ok(()) => {
                if let Some(bound) = self.handle.as_mut() {
                    bound.identity = session.identity;
                }
                observer(&UpgradeEvent::SessionFinished);
                Ok(())
            },
            Err(e) => {
                warn!("Upgrade session ended: {e}");
                observer(&UpgradeEvent::SessionFailed {
                    reason: e.to_string(),
                });
                Err(e)
            },
        }
    }
}
