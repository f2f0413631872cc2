use aero_gpu_sync::testing::FakeSyncHost;
use aero_gpu_sync::{signal_pair, Dispatcher, SyncDevice, SyncDeviceConfig};
use proptest::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn seqno_is_sum_of_delivered_steps_and_reached_fences_signal_once(
        targets in proptest::collection::vec(0u64..64, 0..16),
        steps in proptest::collection::vec(1i64..8, 0..16),
    ) {
        let host = FakeSyncHost::new();
        let dispatcher = Dispatcher::new();
        let device = SyncDevice::new(
            SyncDeviceConfig::default(),
            host.transport(),
            dispatcher.handle(),
        ).unwrap();
        let timeline = device.create_timeline().unwrap();

        let observers: Vec<_> = targets
            .iter()
            .map(|&target| {
                let (signal, observer) = signal_pair();
                timeline.create_fence(signal, Some(target)).unwrap();
                (target, observer)
            })
            .collect();

        for &step in &steps {
            host.queue_timeline_inc(timeline.handle(), step);
        }
        device.service_interrupt();

        let seqno: u64 = steps.iter().map(|&s| s as u64).sum();
        prop_assert_eq!(timeline.seqno(), seqno);

        let reached = targets.iter().filter(|&&t| t <= seqno).count();
        for (target, observer) in &observers {
            prop_assert_eq!(observer.is_signaled(), *target <= seqno);
        }

        let snap = timeline.snapshot();
        prop_assert_eq!(snap.fences_signaled, reached as u64);
        prop_assert_eq!(snap.inactive_fences, reached);
        prop_assert!(snap.active_targets.iter().all(|&t| t > seqno));
        prop_assert!(snap.active_targets.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn interleaved_increments_match_a_single_batch(
        steps in proptest::collection::vec(1i64..1000, 1..24),
        split in 0usize..24,
    ) {
        let host = FakeSyncHost::new();
        let dispatcher = Dispatcher::new();
        let device = SyncDevice::new(
            SyncDeviceConfig::default(),
            host.transport(),
            dispatcher.handle(),
        ).unwrap();
        let timeline = device.create_timeline().unwrap();

        let split = split.min(steps.len());
        let (head, tail) = steps.split_at(split);
        for &step in head {
            host.queue_timeline_inc(timeline.handle(), step);
        }
        device.service_interrupt();
        for &step in tail {
            host.queue_timeline_inc(timeline.handle(), step);
        }
        device.service_interrupt();

        let total: u64 = steps.iter().map(|&s| s as u64).sum();
        prop_assert_eq!(timeline.seqno(), total);
        prop_assert_eq!(device.stats().host_commands, steps.len() as u64);
        prop_assert_eq!(host.pending_host_commands(), 0);
    }
}
