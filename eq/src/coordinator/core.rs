//! Main Coordinator task implementation
//!
//! The coordinator task is the single writer of the registry. Every request is
//! applied together with the aggregate recomputation before the next request is
//! taken off the queue, so no caller ever observes a half-applied update.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::config::CoordinatorConfig;
use super::handle::CoordinatorHandle;
use super::messages::{CoordRequest, CoordinatorMetrics};
use crate::domain::CellState;
use crate::events::CellEvent;
use crate::registry::Registry;
use crate::router::Router;
use crate::supervisor::ProcessSupervisor;
use crate::transport::ModuleTransport;

/// The Coordinator owns the module registry of one equiplet
pub struct Coordinator {
    config: CoordinatorConfig,
    registry: Registry,
    router: Router,
    tx: mpsc::Sender<CoordRequest>,
    rx: mpsc::Receiver<CoordRequest>,
    event_tx: broadcast::Sender<CellEvent>,
    metrics: CoordinatorMetrics,
}

impl Coordinator {
    /// Create a new Coordinator with the given configuration
    pub fn new(equiplet_id: u32, config: CoordinatorConfig) -> Self {
        debug!(%equiplet_id, ?config, "Coordinator::new: called");
        let (tx, rx) = mpsc::channel(config.channel_buffer.max(1));
        let (event_tx, _) = broadcast::channel(config.event_buffer.max(1));
        Self {
            router: Router::new(config.error_state_drop),
            registry: Registry::new(equiplet_id),
            config,
            tx,
            rx,
            event_tx,
            metrics: CoordinatorMetrics::default(),
        }
    }

    pub fn equiplet_id(&self) -> u32 {
        self.registry.equiplet_id()
    }

    /// Create a handle that launches modules with `supervisor` and reaches them through `transport`
    pub fn handle(
        &self,
        supervisor: Arc<dyn ProcessSupervisor>,
        transport: Arc<dyn ModuleTransport>,
    ) -> CoordinatorHandle {
        CoordinatorHandle::new(
            self.tx.clone(),
            self.event_tx.clone(),
            self.equiplet_id(),
            supervisor,
            transport,
            self.config.request_timeout(),
        )
    }

    /// Subscribe to cell events
    pub fn subscribe_events(&self) -> broadcast::Receiver<CellEvent> {
        self.event_tx.subscribe()
    }

    /// Spawn the coordinator task and return a handle to it
    pub fn spawn(
        equiplet_id: u32,
        config: CoordinatorConfig,
        supervisor: Arc<dyn ProcessSupervisor>,
        transport: Arc<dyn ModuleTransport>,
    ) -> (CoordinatorHandle, JoinHandle<()>) {
        let coordinator = Self::new(equiplet_id, config);
        let handle = coordinator.handle(supervisor, transport);
        (handle, tokio::spawn(coordinator.run()))
    }

    /// Run the coordinator loop until shutdown
    pub async fn run(mut self) {
        info!(equiplet_id = self.equiplet_id(), "Coordinator started");

        while let Some(request) = self.rx.recv().await {
            self.metrics.requests_handled += 1;
            if !self.process(request) {
                break;
            }
        }

        info!(
            equiplet_id = self.equiplet_id(),
            modules = self.registry.len(),
            "Coordinator stopped"
        );
    }

    /// Apply one request; returns false on shutdown
    fn process(&mut self, request: CoordRequest) -> bool {
        match request {
            CoordRequest::Register {
                module_id,
                module_type,
                is_actor,
                is_needed,
                bootstrap,
                reply,
            } => {
                debug!(?module_id, %module_type, "process: Register request");
                let before = self.registry.cell_state();
                let result = match module_id {
                    Some(id) => self
                        .registry
                        .register_with_id(id, module_type, is_actor, is_needed, bootstrap),
                    None => self.registry.register(module_type, is_actor, is_needed, bootstrap),
                };
                match &result {
                    Ok(module) => {
                        self.metrics.registrations += 1;
                        self.emit(CellEvent::ModuleRegistered {
                            module_id: module.id,
                            module_type: module.module_type,
                            at: Utc::now(),
                        });
                        self.emit_cell_change(before);
                    }
                    Err(e) => self.reject("Register", e),
                }
                let _ = reply.send(result);
            }

            CoordRequest::Deregister { module_id, reply } => {
                debug!(%module_id, "process: Deregister request");
                let before = self.registry.cell_state();
                let result = self.registry.deregister(module_id);
                match &result {
                    Ok(_) => {
                        self.metrics.deregistrations += 1;
                        self.emit(CellEvent::ModuleDeregistered {
                            module_id,
                            at: Utc::now(),
                        });
                        self.emit_cell_change(before);
                    }
                    Err(e) => self.reject("Deregister", e),
                }
                let _ = reply.send(result);
            }

            CoordRequest::Rollback {
                module_id,
                registered_at,
                reason,
                reply,
            } => {
                let same_record = self
                    .registry
                    .get(module_id)
                    .is_some_and(|m| m.registered_at == registered_at);
                if !same_record {
                    debug!(%module_id, %reason, "process: Rollback target already deregistered or replaced");
                    let _ = reply.send(false);
                    return true;
                }
                warn!(%module_id, %reason, "Rolling back registration");
                let before = self.registry.cell_state();
                let removed = self.registry.deregister(module_id).is_ok();
                if removed {
                    self.metrics.rollbacks += 1;
                    self.emit(CellEvent::ModuleDeregistered {
                        module_id,
                        at: Utc::now(),
                    });
                    self.emit_cell_change(before);
                }
                let _ = reply.send(removed);
            }

            CoordRequest::GetAllModules { reply } => {
                debug!("process: GetAllModules request");
                let _ = reply.send(self.registry.summaries());
            }

            CoordRequest::GetModule { module_id, reply } => {
                debug!(%module_id, "process: GetModule request");
                let _ = reply.send(self.registry.get(module_id).cloned());
            }

            CoordRequest::GetState { module_id, reply } => {
                debug!(%module_id, "process: GetState request");
                let _ = reply.send(self.registry.get_state(module_id));
            }

            CoordRequest::StateChanged {
                module_id,
                state,
                reply,
            } => {
                debug!(%module_id, %state, "process: StateChanged request");
                let before = self.registry.cell_state();
                let previous = self.registry.get_state(module_id);
                let result = self
                    .router
                    .handle_state_changed(&mut self.registry, module_id, state);
                match &result {
                    Ok(_) => {
                        self.metrics.state_updates += 1;
                        self.emit(CellEvent::ModuleStateChanged {
                            module_id,
                            previous,
                            current: state,
                            at: Utc::now(),
                        });
                        self.emit_cell_change(before);
                    }
                    Err(e) => self.reject("StateChanged", e),
                }
                let _ = reply.send(result);
            }

            CoordRequest::ModuleError {
                module_id,
                error_code,
                reply,
            } => {
                debug!(%module_id, %error_code, "process: ModuleError request");
                let result = self
                    .router
                    .handle_module_error(&mut self.registry, module_id, error_code);
                match &result {
                    Ok(outcome) => {
                        self.metrics.module_errors += 1;
                        self.emit(CellEvent::ModuleErrored {
                            module_id,
                            error_code,
                            recovery_state: outcome.recovery_state,
                            at: Utc::now(),
                        });
                    }
                    Err(e) => self.reject("ModuleError", e),
                }
                let _ = reply.send(result);
            }

            CoordRequest::SetNeeded {
                module_id,
                needed,
                reply,
            } => {
                debug!(%module_id, needed, "process: SetNeeded request");
                let before = self.registry.cell_state();
                let result = self.registry.set_needed(module_id, needed);
                match &result {
                    Ok(_) => self.emit_cell_change(before),
                    Err(e) => self.reject("SetNeeded", e),
                }
                let _ = reply.send(result);
            }

            CoordRequest::GetCellState { reply } => {
                debug!("process: GetCellState request");
                let _ = reply.send(self.registry.cell_state());
            }

            CoordRequest::TransportFailed { module_id, reason } => {
                debug!(%module_id, %reason, "process: TransportFailed notice");
                self.metrics.transport_failures += 1;
                self.emit(CellEvent::TransportFailed {
                    module_id,
                    reason,
                    at: Utc::now(),
                });
            }

            CoordRequest::GetMetrics { reply } => {
                debug!("process: GetMetrics request");
                let mut metrics = self.metrics.clone();
                metrics.active_modules = self.registry.len();
                let _ = reply.send(metrics);
            }

            CoordRequest::Shutdown => {
                info!("Coordinator shutdown requested");
                return false;
            }
        }
        true
    }

    fn reject(&mut self, request: &str, error: &crate::error::CoordError) {
        self.metrics.rejected_requests += 1;
        debug!(%request, %error, "Coordinator rejected request");
    }

    fn emit(&self, event: CellEvent) {
        // No subscribers is fine
        let _ = self.event_tx.send(event);
    }

    fn emit_cell_change(&self, previous: CellState) {
        let current = self.registry.cell_state();
        if current != previous {
            self.emit(CellEvent::CellStateChanged {
                previous,
                current,
                at: Utc::now(),
            });
        }
    }
}
