//! CoordinatorHandle - client interface to the coordinator task
//!
//! Process launches and outbound module requests are awaited here, on the
//! caller's task, never inside the coordinator loop.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

use super::messages::{CoordRequest, CoordinatorMetrics};
use crate::domain::{Bootstrap, CellState, HardwareModule, ModuleId, ModuleState, ModuleSummary, ModuleType};
use crate::error::{CoordError, CoordResult, TransportError};
use crate::events::CellEvent;
use crate::router::ErrorOutcome;
use crate::supervisor::{BootstrapCommand, ProcessSupervisor};
use crate::transport::ModuleTransport;

/// Answer to a successful registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub equiplet_id: u32,
    pub module_id: ModuleId,
}

/// Cloneable handle to a running coordinator
#[derive(Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::Sender<CoordRequest>,
    event_tx: broadcast::Sender<CellEvent>,
    equiplet_id: u32,
    supervisor: Arc<dyn ProcessSupervisor>,
    transport: Arc<dyn ModuleTransport>,
    request_timeout: Duration,
}

impl CoordinatorHandle {
    pub(crate) fn new(
        tx: mpsc::Sender<CoordRequest>,
        event_tx: broadcast::Sender<CellEvent>,
        equiplet_id: u32,
        supervisor: Arc<dyn ProcessSupervisor>,
        transport: Arc<dyn ModuleTransport>,
        request_timeout: Duration,
    ) -> Self {
        debug!(%equiplet_id, ?request_timeout, "CoordinatorHandle::new: called");
        Self {
            tx,
            event_tx,
            equiplet_id,
            supervisor,
            transport,
            request_timeout,
        }
    }

    pub fn equiplet_id(&self) -> u32 {
        self.equiplet_id
    }

    /// Subscribe to cell events
    pub fn subscribe_events(&self) -> broadcast::Receiver<CellEvent> {
        self.event_tx.subscribe()
    }

    /// Register a module under the next sequential id, launching it if a bootstrap is given
    ///
    /// If the launch fails the record is removed again and `BootstrapFailure`
    /// is returned, so the registry only holds modules whose process started.
    pub async fn register_module(
        &self,
        module_type: ModuleType,
        is_actor: bool,
        is_needed: bool,
        bootstrap: Option<Bootstrap>,
    ) -> CoordResult<Registration> {
        debug!(%module_type, is_actor, is_needed, ?bootstrap, "CoordinatorHandle::register_module: called");
        self.register(None, module_type, is_actor, is_needed, bootstrap).await
    }

    /// Register a module under a caller-chosen id
    pub async fn register_with_id(
        &self,
        module_id: ModuleId,
        module_type: ModuleType,
        is_actor: bool,
        is_needed: bool,
        bootstrap: Option<Bootstrap>,
    ) -> CoordResult<Registration> {
        debug!(%module_id, %module_type, "CoordinatorHandle::register_with_id: called");
        self.register(Some(module_id), module_type, is_actor, is_needed, bootstrap)
            .await
    }

    async fn register(
        &self,
        module_id: Option<ModuleId>,
        module_type: ModuleType,
        is_actor: bool,
        is_needed: bool,
        bootstrap: Option<Bootstrap>,
    ) -> CoordResult<Registration> {
        // The record goes in first so a freshly launched module can already report to us
        let module = self
            .request(|reply| CoordRequest::Register {
                module_id,
                module_type,
                is_actor,
                is_needed,
                bootstrap,
                reply,
            })
            .await??;

        if let Some(bootstrap) = &module.bootstrap {
            let command = BootstrapCommand::new(self.supervisor.launcher(), bootstrap, self.equiplet_id, module.id);
            if let Err(e) = self.supervisor.start(&command).await {
                warn!(module_id = module.id, error = %e, "Module bootstrap failed");
                let reason = match &e {
                    CoordError::BootstrapFailure { reason, .. } => reason.clone(),
                    other => other.to_string(),
                };
                let rollback = self
                    .request(|reply| CoordRequest::Rollback {
                        module_id: module.id,
                        registered_at: module.registered_at,
                        reason: reason.clone(),
                        reply,
                    })
                    .await;
                match rollback {
                    Ok(true) => {}
                    Ok(false) => debug!(module_id = module.id, "register: record already gone, nothing to roll back"),
                    Err(e) => warn!(module_id = module.id, error = %e, "Rollback not delivered"),
                }
                return Err(CoordError::BootstrapFailure {
                    module_id: module.id,
                    reason,
                });
            }
        }

        Ok(Registration {
            equiplet_id: self.equiplet_id,
            module_id: module.id,
        })
    }

    /// Remove a module and stop its process
    pub async fn deregister_module(&self, module_id: ModuleId) -> CoordResult<()> {
        debug!(%module_id, "CoordinatorHandle::deregister_module: called");
        let module = self
            .request(|reply| CoordRequest::Deregister { module_id, reply })
            .await??;

        if module.bootstrap.is_some()
            && let Err(e) = self.supervisor.stop(module_id).await
        {
            warn!(%module_id, error = %e, "Failed to stop module process");
        }
        Ok(())
    }

    /// Insertion-ordered snapshot of every module
    pub async fn get_all_modules(&self) -> CoordResult<Vec<ModuleSummary>> {
        debug!("CoordinatorHandle::get_all_modules: called");
        self.request(|reply| CoordRequest::GetAllModules { reply }).await
    }

    pub async fn get_module(&self, module_id: ModuleId) -> CoordResult<Option<HardwareModule>> {
        debug!(%module_id, "CoordinatorHandle::get_module: called");
        self.request(|reply| CoordRequest::GetModule { module_id, reply })
            .await
    }

    /// Current state of a module, `NoState` if unknown
    pub async fn get_state(&self, module_id: ModuleId) -> CoordResult<ModuleState> {
        debug!(%module_id, "CoordinatorHandle::get_state: called");
        self.request(|reply| CoordRequest::GetState { module_id, reply })
            .await
    }

    /// A module reports it reached `state`
    pub async fn state_update(&self, module_id: ModuleId, state: ModuleState) -> CoordResult<CellState> {
        debug!(%module_id, %state, "CoordinatorHandle::state_update: called");
        self.request(|reply| CoordRequest::StateChanged {
            module_id,
            state,
            reply,
        })
        .await?
    }

    /// A module reports a fault; returns the state it should recover to
    pub async fn module_error(&self, module_id: ModuleId, error_code: i32) -> CoordResult<ErrorOutcome> {
        debug!(%module_id, %error_code, "CoordinatorHandle::module_error: called");
        self.request(|reply| CoordRequest::ModuleError {
            module_id,
            error_code,
            reply,
        })
        .await?
    }

    pub async fn set_needed(&self, module_id: ModuleId, needed: bool) -> CoordResult<CellState> {
        debug!(%module_id, needed, "CoordinatorHandle::set_needed: called");
        self.request(|reply| CoordRequest::SetNeeded {
            module_id,
            needed,
            reply,
        })
        .await?
    }

    pub async fn cell_state(&self) -> CoordResult<CellState> {
        debug!("CoordinatorHandle::cell_state: called");
        self.request(|reply| CoordRequest::GetCellState { reply }).await
    }

    /// Ask a module to move to `desired_state`
    ///
    /// Bounded by the request timeout. A failure leaves the module's last known
    /// state untouched and is returned as `TransportFailure`.
    pub async fn request_state_change(&self, module_id: ModuleId, desired_state: ModuleState) -> CoordResult<()> {
        debug!(%module_id, %desired_state, "CoordinatorHandle::request_state_change: called");
        let call = self
            .transport
            .request_state_change(self.equiplet_id, module_id, desired_state);
        let result = match tokio::time::timeout(self.request_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(self.request_timeout)),
        };

        match result {
            Ok(()) => {
                info!(%module_id, %desired_state, "State change requested");
                Ok(())
            }
            Err(e) => {
                let reason = e.to_string();
                warn!(%module_id, %desired_state, %reason, "State change request failed");
                // Best effort; the failure is reported to the caller regardless
                let _ = self
                    .tx
                    .send(CoordRequest::TransportFailed {
                        module_id,
                        reason: reason.clone(),
                    })
                    .await;
                Err(CoordError::TransportFailure { module_id, reason })
            }
        }
    }

    /// Get current metrics
    pub async fn metrics(&self) -> CoordResult<CoordinatorMetrics> {
        debug!("CoordinatorHandle::metrics: called");
        self.request(|reply| CoordRequest::GetMetrics { reply }).await
    }

    /// Request shutdown of the coordinator
    pub async fn shutdown(&self) -> CoordResult<()> {
        debug!("CoordinatorHandle::shutdown: called");
        self.tx
            .send(CoordRequest::Shutdown)
            .await
            .map_err(|_| CoordError::ChannelError)
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> CoordRequest) -> CoordResult<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| CoordError::ChannelError)?;
        reply_rx.await.map_err(|_| CoordError::ChannelError)
    }
}
