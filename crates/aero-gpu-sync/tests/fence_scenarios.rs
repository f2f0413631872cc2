use aero_gpu_sync::testing::FakeSyncHost;
use aero_gpu_sync::{
    signal_pair, Dispatcher, GuestCommand, SyncDevice, SyncDeviceConfig, SyncTimeline,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;

struct Harness {
    host: FakeSyncHost,
    dispatcher: Dispatcher,
    device: SyncDevice,
}

impl Harness {
    fn new(can_read_multiple_commands: bool) -> Self {
        let host = if can_read_multiple_commands {
            FakeSyncHost::new()
        } else {
            FakeSyncHost::single_command()
        };
        let dispatcher = Dispatcher::new();
        let config = SyncDeviceConfig {
            can_read_multiple_commands,
            ..Default::default()
        };
        let device = SyncDevice::new(config, host.transport(), dispatcher.handle())
            .expect("device init");
        Self {
            host,
            dispatcher,
            device,
        }
    }

    /// Deliver `step` through the register window and service one interrupt.
    fn host_increase(&self, timeline: &SyncTimeline, step: i64) {
        self.host.queue_timeline_inc(timeline.handle(), step);
        self.device.service_interrupt();
    }
}

#[test]
fn fence_created_behind_seqno_signals_immediately() {
    let h = Harness::new(true);
    let timeline = h.device.create_timeline().unwrap();
    h.host_increase(&timeline, 5);

    let (signal, observer) = signal_pair();
    timeline.create_fence(signal, Some(3)).unwrap();
    assert!(observer.is_signaled());
}

#[test]
fn fence_signals_when_cumulative_increments_reach_target() {
    let h = Harness::new(true);
    let timeline = h.device.create_timeline().unwrap();

    let (signal, observer) = signal_pair();
    timeline.create_fence(signal, Some(10)).unwrap();

    h.host_increase(&timeline, 4);
    assert!(!observer.is_signaled());
    h.host_increase(&timeline, 6);
    assert!(observer.is_signaled());
    assert_eq!(timeline.seqno(), 10);
}

#[test]
fn each_increment_matures_only_reached_fences() {
    let h = Harness::new(true);
    let timeline = h.device.create_timeline().unwrap();

    let (signal3, observer3) = signal_pair();
    let (signal7, observer7) = signal_pair();
    timeline.create_fence(signal3, Some(3)).unwrap();
    timeline.create_fence(signal7, Some(7)).unwrap();

    h.host_increase(&timeline, 5);
    assert!(observer3.is_signaled());
    assert!(!observer7.is_signaled());

    h.host_increase(&timeline, 2);
    assert!(observer7.is_signaled());
}

#[test]
fn closed_fence_is_never_signaled() {
    let h = Harness::new(true);
    let timeline = h.device.create_timeline().unwrap();

    let (signal, observer) = signal_pair();
    timeline.create_fence(signal, Some(100)).unwrap();
    drop(observer);
    assert_eq!(h.dispatcher.run_until_idle(), 1);

    h.host_increase(&timeline, 100);
    let snap = timeline.snapshot();
    assert_eq!(snap.seqno, 100);
    assert_eq!(snap.fences_signaled, 0);
    assert!(snap.active_targets.is_empty());
    assert_eq!(snap.inactive_fences, 0);
    assert_eq!(h.device.stats().protocol_anomalies, 0);
}

#[test]
fn single_command_device_needs_one_interrupt_per_command() {
    let h = Harness::new(false);
    let timeline = h.device.create_timeline().unwrap();
    for _ in 0..3 {
        h.host.queue_timeline_inc(timeline.handle(), 1);
    }

    for expected in 1..=3u64 {
        h.device.service_interrupt();
        assert_eq!(timeline.seqno(), expected);
        assert_eq!(h.host.pending_host_commands(), (3 - expected) as usize);
    }
    assert_eq!(h.host.acks(), 3);

    // Nothing left: a spurious interrupt is harmless.
    h.device.service_interrupt();
    assert_eq!(timeline.seqno(), 3);
    assert_eq!(h.device.stats().interrupts, 4);
}

#[test]
fn batching_device_drains_everything_in_one_interrupt() {
    let h = Harness::new(true);
    let timeline = h.device.create_timeline().unwrap();
    for _ in 0..3 {
        h.host.queue_timeline_inc(timeline.handle(), 1);
    }

    h.device.service_interrupt();
    assert_eq!(timeline.seqno(), 3);
    assert_eq!(h.host.acks(), 0);
}

#[test]
fn increments_for_different_timelines_are_routed_by_handle() {
    let h = Harness::new(true);
    let a = h.device.create_timeline().unwrap();
    let b = h.device.create_timeline().unwrap();

    h.host.queue_timeline_inc(a.handle(), 2);
    h.host.queue_timeline_inc(b.handle(), 5);
    h.host.queue_timeline_inc(a.handle(), 1);
    h.device.service_interrupt();

    assert_eq!(a.seqno(), 3);
    assert_eq!(b.seqno(), 5);
}

#[test]
fn host_wait_request_reaches_the_register_window() {
    let h = Harness::new(true);
    let timeline = h.device.create_timeline().unwrap();

    let (signal, observer) = signal_pair();
    timeline.create_fence(signal, None).unwrap();
    timeline.trigger_host_wait(1).unwrap();

    assert_eq!(
        h.host.guest_commands(),
        vec![GuestCommand::trigger_host_wait(timeline.handle(), 1)]
    );

    // The host answers with an increment.
    h.host_increase(&timeline, 1);
    assert!(observer.is_signaled());
}

#[test]
fn increment_for_removed_timeline_still_reaches_nobody() {
    let h = Harness::new(true);
    let timeline: Arc<SyncTimeline> = h.device.create_timeline().unwrap();
    let (signal, observer) = signal_pair();
    timeline.create_fence(signal, Some(1)).unwrap();

    assert!(h.device.remove_timeline(timeline.handle()));
    h.host_increase(&timeline, 1);

    // The registry no longer routes to it, so the outstanding fence stays pending.
    assert!(!observer.is_signaled());
    assert_eq!(h.device.stats().dropped_commands, 1);
}
