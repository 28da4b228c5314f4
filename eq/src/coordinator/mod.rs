//! Coordinator - single serialization point for the module registry
//!
//! Requests from the IPC listener and the instruction feed all land on one
//! queue consumed by the coordinator task:
//! - **Registry mutations:** register, deregister, state updates, errors, needed flags
//! - **Reads:** module listings and cell state, answered from the same task
//! - **Events:** every applied change is broadcast as a [`CellEvent`](crate::events::CellEvent)

mod config;
mod core;
mod handle;
mod messages;

pub use config::CoordinatorConfig;
pub use core::Coordinator;
pub use handle::{CoordinatorHandle, Registration};
pub use messages::{CoordRequest, CoordinatorMetrics};

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use crate::domain::{Bootstrap, ModuleState, ModuleType};
    use crate::error::CoordError;
    use crate::events::CellEvent;
    use crate::supervisor::RecordingSupervisor;
    use crate::transport::mock::RecordingTransport;

    fn spawn_with(
        supervisor: Arc<RecordingSupervisor>,
        transport: Arc<RecordingTransport>,
    ) -> CoordinatorHandle {
        let (handle, _task) = Coordinator::spawn(7, CoordinatorConfig::default(), supervisor, transport);
        handle
    }

    fn spawn() -> CoordinatorHandle {
        spawn_with(Arc::new(RecordingSupervisor::new()), Arc::new(RecordingTransport::new()))
    }

    #[tokio::test]
    async fn test_register_assigns_sequential_ids() {
        let handle = spawn();
        let a = handle
            .register_module(ModuleType::DeltaRobot, true, true, None)
            .await
            .unwrap();
        let b = handle
            .register_module(ModuleType::Gripper, true, false, None)
            .await
            .unwrap();
        assert_eq!(a.equiplet_id, 7);
        assert_eq!(a.module_id, 1);
        assert_eq!(b.module_id, 2);
    }

    #[tokio::test]
    async fn test_register_launches_bootstrap() {
        let supervisor = Arc::new(RecordingSupervisor::new());
        let handle = spawn_with(supervisor.clone(), Arc::new(RecordingTransport::new()));

        handle
            .register_module(
                ModuleType::Camera,
                false,
                false,
                Some(Bootstrap::new("camera_node", "CameraNode")),
            )
            .await
            .unwrap();

        let started = supervisor.started();
        assert_eq!(started.len(), 1);
        assert_eq!(started[0].render(), "camera_node CameraNode 7 1");
    }

    #[tokio::test]
    async fn test_bootstrap_failure_rolls_back() {
        let supervisor = Arc::new(RecordingSupervisor::failing());
        let handle = spawn_with(supervisor.clone(), Arc::new(RecordingTransport::new()));

        let err = handle
            .register_module(ModuleType::Gripper, true, true, Some(Bootstrap::new("pkg", "exe")))
            .await
            .unwrap_err();
        assert!(matches!(err, CoordError::BootstrapFailure { module_id: 1, .. }));
        assert!(handle.get_all_modules().await.unwrap().is_empty());
        assert_eq!(handle.metrics().await.unwrap().rollbacks, 1);

        // Other registrations are unaffected
        supervisor.set_failing(false);
        let ok = handle
            .register_module(ModuleType::Gripper, true, true, Some(Bootstrap::new("pkg", "exe")))
            .await
            .unwrap();
        assert_eq!(ok.module_id, 2);
    }

    #[tokio::test]
    async fn test_bootstrap_failure_spares_a_replacement_record() {
        let supervisor = Arc::new(RecordingSupervisor::failing());
        let gate = supervisor.hold_starts();
        let handle = spawn_with(supervisor.clone(), Arc::new(RecordingTransport::new()));

        let pending = {
            let handle = handle.clone();
            tokio::spawn(async move {
                handle
                    .register_module(ModuleType::Gripper, true, true, Some(Bootstrap::new("pkg", "exe")))
                    .await
            })
        };
        while handle.get_module(1).await.unwrap().is_none() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        // While the launch is still in flight, the record is replaced
        handle.deregister_module(1).await.unwrap();
        handle
            .register_with_id(1, ModuleType::Sensor, false, false, None)
            .await
            .unwrap();
        gate.notify_one();

        let err = pending.await.unwrap().unwrap_err();
        assert!(matches!(err, CoordError::BootstrapFailure { module_id: 1, .. }));
        let survivor = handle.get_module(1).await.unwrap().unwrap();
        assert_eq!(survivor.module_type, ModuleType::Sensor);
        assert_eq!(handle.metrics().await.unwrap().rollbacks, 0);
    }

    #[tokio::test]
    async fn test_bootstrap_failure_after_concurrent_deregister() {
        let supervisor = Arc::new(RecordingSupervisor::failing());
        let gate = supervisor.hold_starts();
        let handle = spawn_with(supervisor.clone(), Arc::new(RecordingTransport::new()));

        let pending = {
            let handle = handle.clone();
            tokio::spawn(async move {
                handle
                    .register_module(ModuleType::Gripper, true, true, Some(Bootstrap::new("pkg", "exe")))
                    .await
            })
        };
        while handle.get_module(1).await.unwrap().is_none() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        handle.deregister_module(1).await.unwrap();
        gate.notify_one();

        let err = pending.await.unwrap().unwrap_err();
        assert!(matches!(err, CoordError::BootstrapFailure { module_id: 1, .. }));
        assert!(handle.get_all_modules().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_forced_id() {
        let handle = spawn();
        handle
            .register_with_id(4, ModuleType::Sensor, false, false, None)
            .await
            .unwrap();
        let before = handle.get_all_modules().await.unwrap();
        assert_eq!(
            handle
                .register_with_id(4, ModuleType::Sensor, true, true, None)
                .await
                .unwrap_err(),
            CoordError::DuplicateModule(4)
        );
        assert_eq!(handle.get_all_modules().await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_deregister_stops_process() {
        let supervisor = Arc::new(RecordingSupervisor::new());
        let handle = spawn_with(supervisor.clone(), Arc::new(RecordingTransport::new()));
        let reg = handle
            .register_module(ModuleType::Conveyor, true, true, Some(Bootstrap::new("pkg", "exe")))
            .await
            .unwrap();

        handle.deregister_module(reg.module_id).await.unwrap();
        assert_eq!(supervisor.stopped(), vec![reg.module_id]);
        assert_eq!(
            handle.deregister_module(reg.module_id).await.unwrap_err(),
            CoordError::ModuleNotFound(reg.module_id)
        );
    }

    #[tokio::test]
    async fn test_state_updates_drive_cell_state() {
        let handle = spawn();
        let a = handle
            .register_module(ModuleType::DeltaRobot, true, true, None)
            .await
            .unwrap()
            .module_id;
        let b = handle
            .register_module(ModuleType::Gripper, true, false, None)
            .await
            .unwrap()
            .module_id;

        handle.state_update(a, ModuleState::Normal).await.unwrap();
        let cell = handle.state_update(b, ModuleState::Error).await.unwrap();
        assert_eq!(cell.safety, ModuleState::Error);
        assert_eq!(cell.operation, ModuleState::Normal);
        assert_eq!(handle.cell_state().await.unwrap(), cell);
        assert_eq!(handle.get_state(b).await.unwrap(), ModuleState::Error);
        assert_eq!(handle.get_state(99).await.unwrap(), ModuleState::NoState);
    }

    #[tokio::test]
    async fn test_module_error_returns_recovery_without_pushing() {
        let transport = Arc::new(RecordingTransport::new());
        let handle = spawn_with(Arc::new(RecordingSupervisor::new()), transport.clone());
        let id = handle
            .register_module(ModuleType::DeltaRobot, true, true, None)
            .await
            .unwrap()
            .module_id;
        handle.state_update(id, ModuleState::Normal).await.unwrap();

        let outcome = handle.module_error(id, 3).await.unwrap();
        assert_eq!(outcome.recovery_state, ModuleState::Standby);
        assert!(transport.requests().is_empty());

        let module = handle.get_module(id).await.unwrap().unwrap();
        assert!(module.error);
        assert_eq!(module.last_error_code, Some(3));

        assert_eq!(
            handle.module_error(42, 1).await.unwrap_err(),
            CoordError::ModuleNotFound(42)
        );
    }

    #[tokio::test]
    async fn test_request_state_change_failure_keeps_state() {
        let transport = Arc::new(RecordingTransport::new());
        let handle = spawn_with(Arc::new(RecordingSupervisor::new()), transport.clone());
        let id = handle
            .register_module(ModuleType::Gripper, true, true, None)
            .await
            .unwrap()
            .module_id;
        handle.state_update(id, ModuleState::Normal).await.unwrap();

        handle.request_state_change(id, ModuleState::Stop).await.unwrap();
        assert_eq!(transport.requests(), vec![(7, id, ModuleState::Stop)]);

        transport.set_unreachable(id);
        let err = handle
            .request_state_change(id, ModuleState::Safe)
            .await
            .unwrap_err();
        assert!(matches!(err, CoordError::TransportFailure { .. }));
        assert_eq!(handle.get_state(id).await.unwrap(), ModuleState::Normal);
        assert_eq!(handle.metrics().await.unwrap().transport_failures, 1);
    }

    #[tokio::test]
    async fn test_request_state_change_times_out() {
        let transport = Arc::new(RecordingTransport::with_delay(Duration::from_secs(5)));
        let config = CoordinatorConfig {
            request_timeout_ms: 50,
            ..Default::default()
        };
        let (handle, _task) = Coordinator::spawn(1, config, Arc::new(RecordingSupervisor::new()), transport);

        let err = handle
            .request_state_change(1, ModuleState::Safe)
            .await
            .unwrap_err();
        assert!(matches!(err, CoordError::TransportFailure { module_id: 1, .. }));

        // The coordinator kept serving while the request hung
        assert!(handle.get_all_modules().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_events_broadcast() {
        let handle = spawn();
        let mut events = handle.subscribe_events();

        let id = handle
            .register_module(ModuleType::DeltaRobot, true, true, None)
            .await
            .unwrap()
            .module_id;
        handle.state_update(id, ModuleState::Normal).await.unwrap();

        assert!(matches!(
            events.recv().await.unwrap(),
            CellEvent::ModuleRegistered { module_id: 1, .. }
        ));
        assert!(matches!(
            events.recv().await.unwrap(),
            CellEvent::ModuleStateChanged {
                previous: ModuleState::Safe,
                current: ModuleState::Normal,
                ..
            }
        ));
        assert!(matches!(
            events.recv().await.unwrap(),
            CellEvent::CellStateChanged { .. }
        ));
    }

    #[tokio::test]
    async fn test_shutdown_closes_handle() {
        let coordinator = Coordinator::new(1, CoordinatorConfig::default());
        let handle = coordinator.handle(
            Arc::new(RecordingSupervisor::new()),
            Arc::new(RecordingTransport::new()),
        );
        let task = tokio::spawn(coordinator.run());

        handle.shutdown().await.unwrap();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(handle.cell_state().await.unwrap_err(), CoordError::ChannelError);
    }
}
