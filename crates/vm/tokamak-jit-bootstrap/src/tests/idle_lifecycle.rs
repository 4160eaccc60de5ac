//! Idle detach / repack tests for hosted-mode compiler threads.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::config::CompilerConfig;
use crate::error::BridgeError;
use crate::flags::RuntimeFlags;
use crate::lifecycle::IdleAction;
use crate::method::{Method, ModuleId};
use crate::queue::{
    CompileBroker, CompileQueue, CompileReason, CompileTaskRequest, CompileTier, EntryPoint,
};
use crate::tests::helpers::{RecordingBridge, hosted_config, make_service};
use crate::worker::{ConnectionState, WorkerThread};

fn watched_queue(bridge: &RecordingBridge) -> Arc<CompileQueue> {
    let queue = Arc::new(CompileQueue::new(Arc::new(RuntimeFlags::new())));
    bridge.watch(&queue);
    queue
}

fn some_task() -> CompileTaskRequest {
    CompileTaskRequest {
        method: Arc::new(Method::new("App", "run", ModuleId::new("app"))),
        entry: EntryPoint::Invocation,
        tier: CompileTier::TOP,
        hot_count: 1,
        reason: CompileReason::Tiered,
    }
}

#[test]
fn test_zero_idle_delay_never_detaches_or_repacks() {
    let bridge = Arc::new(RecordingBridge::new());
    let service = make_service(hosted_config(0), bridge.clone());
    let queue = watched_queue(&bridge);
    let worker = WorkerThread::new(0);

    let start = Instant::now();
    let (guard, action) = service.on_empty_queue(queue.lock(), &worker).unwrap();
    drop(guard);

    assert_eq!(action, IdleAction::None);
    assert!(start.elapsed() < Duration::from_millis(50));
    assert_eq!(bridge.detach_count(), 0);
    assert_eq!(bridge.repack_count(), 0);
}

#[test]
fn test_negative_idle_delay_never_detaches_or_repacks() {
    let bridge = Arc::new(RecordingBridge::new());
    let service = make_service(hosted_config(-1), bridge.clone());
    let queue = watched_queue(&bridge);
    let worker = WorkerThread::new(0);

    let (_guard, action) = service.on_empty_queue(queue.lock(), &worker).unwrap();

    assert_eq!(action, IdleAction::None);
    assert_eq!(bridge.detach_count(), 0);
    assert_eq!(bridge.repack_count(), 0);
}

#[test]
fn test_idle_timeout_detaches_once() {
    let bridge = Arc::new(RecordingBridge::new());
    let service = make_service(hosted_config(50), bridge.clone());
    let queue = watched_queue(&bridge);
    let worker = WorkerThread::new(1);

    let start = Instant::now();
    let (guard, action) = service.on_empty_queue(queue.lock(), &worker).unwrap();

    assert_eq!(action, IdleAction::Detached);
    assert!(start.elapsed() >= Duration::from_millis(50));
    assert!(queue.is_locked_by_current_thread());
    drop(guard);

    assert_eq!(bridge.detach_count(), 1);
    assert_eq!(bridge.repack_count(), 0);
    assert_eq!(bridge.violations(), 0);
    assert_eq!(worker.connection(), ConnectionState::Detached);
    assert_eq!(
        bridge.detach_reasons.lock().unwrap().as_slice(),
        ["releasing idle compiler thread"]
    );
}

#[test]
fn test_new_work_during_idle_wait_repacks_once() {
    let bridge = Arc::new(RecordingBridge::new());
    let service = make_service(hosted_config(50), bridge.clone());
    let queue = watched_queue(&bridge);
    let worker = WorkerThread::new(2);

    let action = thread::scope(|s| {
        s.spawn(|| {
            thread::sleep(Duration::from_millis(10));
            queue.submit(some_task());
        });
        let (guard, action) = service.on_empty_queue(queue.lock(), &worker).unwrap();
        assert_eq!(guard.len(), 1);
        action
    });

    assert_eq!(action, IdleAction::Repacked);
    assert_eq!(bridge.repack_count(), 1);
    assert_eq!(bridge.detach_count(), 0);
    assert_eq!(bridge.violations(), 0);
    assert!(worker.is_attached());
    assert_eq!(worker.repack_count(), 1);
}

#[test]
fn test_not_hosted_never_idles_out() {
    let bridge = Arc::new(RecordingBridge::new());
    let config = CompilerConfig {
        idle_delay_millis: 50,
        startup_grace_millis: 0,
        ..Default::default()
    };
    let service = make_service(config, bridge.clone());
    let queue = watched_queue(&bridge);
    let worker = WorkerThread::new(0);

    let (guard, action) = service.on_empty_queue(queue.lock(), &worker).unwrap();
    let guard = service.stopping_thread(guard, &worker).unwrap();
    drop(guard);

    assert_eq!(action, IdleAction::None);
    assert_eq!(bridge.detach_count(), 0);
    assert_eq!(bridge.repack_count(), 0);
}

#[test]
fn test_startup_grace_period_blocks_idle_out() {
    let bridge = Arc::new(RecordingBridge::new());
    let config = CompilerConfig {
        startup_grace_millis: 60_000,
        ..hosted_config(50)
    };
    let service = make_service(config, bridge.clone());
    let queue = watched_queue(&bridge);
    let worker = WorkerThread::new(0);

    let start = Instant::now();
    let (_guard, action) = service.on_empty_queue(queue.lock(), &worker).unwrap();

    assert_eq!(action, IdleAction::None);
    assert!(start.elapsed() < Duration::from_millis(50));
    assert_eq!(bridge.detach_count(), 0);
}

#[test]
fn test_detached_thread_is_left_alone() {
    let bridge = Arc::new(RecordingBridge::new());
    let service = make_service(hosted_config(50), bridge.clone());
    let queue = watched_queue(&bridge);
    let worker = WorkerThread::new(0);

    let (guard, first) = service.on_empty_queue(queue.lock(), &worker).unwrap();
    let (guard, second) = service.on_empty_queue(guard, &worker).unwrap();
    drop(guard);
    assert_eq!(first, IdleAction::Detached);
    assert_eq!(second, IdleAction::None);
    assert_eq!(bridge.detach_count(), 1);

    // Re-attached by the scheduler, the worker can idle out again.
    worker.mark_attached();
    let (_guard, third) = service.on_empty_queue(queue.lock(), &worker).unwrap();
    assert_eq!(third, IdleAction::Detached);
    assert_eq!(bridge.detach_count(), 2);
}

#[test]
fn test_stopping_thread_detaches_without_queue_lock() {
    let bridge = Arc::new(RecordingBridge::new());
    let service = make_service(hosted_config(0), bridge.clone());
    let queue = watched_queue(&bridge);
    let worker = WorkerThread::new(3);

    let guard = service.stopping_thread(queue.lock(), &worker).unwrap();
    assert!(queue.is_locked_by_current_thread());
    drop(guard);

    assert_eq!(bridge.detach_count(), 1);
    assert_eq!(bridge.violations(), 0);
    assert!(!worker.is_attached());
    assert_eq!(
        bridge.detach_reasons.lock().unwrap().as_slice(),
        ["stopping idle compiler thread"]
    );
}

#[test]
fn test_detach_failure_propagates_with_lock_released() {
    let bridge = Arc::new(RecordingBridge::new());
    bridge
        .fail_detach
        .store(true, std::sync::atomic::Ordering::SeqCst);
    let service = make_service(hosted_config(20), bridge.clone());
    let queue = watched_queue(&bridge);
    let worker = WorkerThread::new(4);

    let err = service.on_empty_queue(queue.lock(), &worker).unwrap_err();
    assert!(matches!(
        err,
        BridgeError::Communication {
            operation: "detach",
            ..
        }
    ));
    assert!(!queue.is_locked_by_current_thread());
    assert!(worker.is_attached());

    let err = service.stopping_thread(queue.lock(), &worker).unwrap_err();
    assert!(matches!(err, BridgeError::Communication { .. }));
    assert!(!queue.is_locked_by_current_thread());
    assert_eq!(bridge.violations(), 0);
}
