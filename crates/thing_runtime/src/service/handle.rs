//! Handles onto running services

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU32, AtomicU64, Ordering};

use tokio::sync::{mpsc, oneshot};

use super::{ServiceError, ServiceResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceState {
    Starting,
    Running,
    /// Waiting out a backoff after a tick fault
    Restarting,
    Stopping,
    Stopped,
    /// Failed to start, or ran out of restarts
    Failed,
}

impl ServiceState {
    const ALL: [ServiceState; 6] = [
        ServiceState::Starting,
        ServiceState::Running,
        ServiceState::Restarting,
        ServiceState::Stopping,
        ServiceState::Stopped,
        ServiceState::Failed,
    ];

    fn decode(raw: u8) -> Self {
        Self::ALL
            .get(raw as usize)
            .copied()
            .unwrap_or(ServiceState::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceState::Starting => "starting",
            ServiceState::Running => "running",
            ServiceState::Restarting => "restarting",
            ServiceState::Stopping => "stopping",
            ServiceState::Stopped => "stopped",
            ServiceState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ServiceState::Stopped | ServiceState::Failed)
    }

    pub fn is_running(&self) -> bool {
        *self == ServiceState::Running
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress counters shared between a service task and its handles
#[derive(Debug, Default)]
pub(crate) struct StatusCell {
    state: AtomicU8,
    ticks: AtomicU64,
    restarts: AtomicU32,
}

impl StatusCell {
    pub(crate) fn state(&self) -> ServiceState {
        ServiceState::decode(self.state.load(Ordering::SeqCst))
    }

    pub(crate) fn set(&self, state: ServiceState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    pub(crate) fn tick_done(&self) {
        self.ticks.fetch_add(1, Ordering::SeqCst);
    }

    /// Count a fault; returns the total including this one
    pub(crate) fn fault(&self) -> u32 {
        self.restarts.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Requests a handle can make of its service task
pub(crate) enum Control {
    Stop,
    Query(oneshot::Sender<ServiceState>),
}

/// Cheap, cloneable view of one running service
#[derive(Clone)]
pub struct ServiceHandle {
    pub service_id: String,
    control: mpsc::Sender<Control>,
    status: Arc<StatusCell>,
}

impl ServiceHandle {
    pub(crate) fn new(
        service_id: String,
        control: mpsc::Sender<Control>,
        status: Arc<StatusCell>,
    ) -> Self {
        Self {
            service_id,
            control,
            status,
        }
    }

    pub fn state(&self) -> ServiceState {
        self.status.state()
    }

    pub fn is_running(&self) -> bool {
        self.state().is_running()
    }

    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    /// Ticks that completed without a fault
    pub fn ticks(&self) -> u64 {
        self.status.ticks.load(Ordering::SeqCst)
    }

    /// Tick faults seen so far, including one that exhausted the policy
    pub fn restarts(&self) -> u32 {
        self.status.restarts.load(Ordering::SeqCst)
    }

    /// Ask the service to stop after its current tick
    pub async fn shutdown(&self) -> ServiceResult<()> {
        self.send(Control::Stop).await
    }

    /// State as reported by the service task itself
    pub async fn request_state(&self) -> ServiceResult<ServiceState> {
        let (tx, rx) = oneshot::channel();
        self.send(Control::Query(tx)).await?;
        rx.await.map_err(|_| ServiceError::ChannelClosed)
    }

    async fn send(&self, control: Control) -> ServiceResult<()> {
        self.control
            .send(control)
            .await
            .map_err(|_| ServiceError::NotRunning(self.service_id.clone()))
    }
}

impl fmt::Debug for ServiceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceHandle")
            .field("service_id", &self.service_id)
            .field("state", &self.state())
            .field("ticks", &self.ticks())
            .field("restarts", &self.restarts())
            .finish()
    }
}
