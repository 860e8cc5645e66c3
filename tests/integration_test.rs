// Copyright 2024-2025 Irreducible Inc.

use std::collections::HashSet;
use std::sync::Arc;

use gpu_view::test_utils::RecordingClient;
use gpu_view::{ExternalKind, ViewError, ViewHandler, ViewKind, LARGEST_RECORD_SIZE};

#[test]
fn enable_reports_status() {
    let handler = ViewHandler::new();
    assert_eq!(
        handler.enable(ViewKind::ExternalCorrelation),
        Err(ViewError::NoCallbacksSet)
    );

    let client = RecordingClient::new(16 * LARGEST_RECORD_SIZE);
    client.attach(&handler).unwrap();
    assert!(matches!(
        handler.enable(ViewKind::Invalid),
        Err(ViewError::BadArgument(_))
    ));
    assert_eq!(
        handler.enable(ViewKind::Kernel),
        Err(ViewError::NotImplemented(ViewKind::Kernel))
    );
    handler.enable(ViewKind::ExternalCorrelation).unwrap();
    handler.enable(ViewKind::ExternalCorrelation).unwrap();
    assert!(handler.enabled_kinds().contains(ViewKind::ExternalCorrelation));
}

#[test]
fn external_ids_pop_in_reverse_order() {
    let handler = ViewHandler::new();
    for id in [10, 20, 30] {
        handler
            .push_external_correlation_id(ExternalKind::Custom0, id)
            .unwrap();
    }
    for expected in [30, 20, 10] {
        assert_eq!(
            handler.pop_external_correlation_id(ExternalKind::Custom0),
            Ok(expected)
        );
    }
    assert_eq!(
        handler.pop_external_correlation_id(ExternalKind::Custom0),
        Err(ViewError::ExternalIdQueueEmpty(ExternalKind::Custom0))
    );
}

#[test]
fn concurrent_correlation_ids_are_distinct() {
    use gpu_view::correlation::ApiLayer;
    use rayon::prelude::*;

    const THREADS: usize = 8;
    const CALLS: usize = 500;

    let handler = ViewHandler::new();
    let context = handler.context().clone();
    let ids: Vec<u64> = (0..THREADS)
        .into_par_iter()
        .flat_map_iter(|_| {
            let context = context.clone();
            (0..CALLS).map(move |_| {
                let id = context.enter_api(ApiLayer::Driver);
                assert!(context.exit_api(id));
                id
            })
        })
        .collect();

    let distinct: HashSet<_> = ids.iter().collect();
    assert_eq!(distinct.len(), THREADS * CALLS);
    assert!(!ids.contains(&0));
}

#[cfg(feature = "level_zero")]
mod level_zero {
    use super::*;
    use gpu_view::test_utils::{MockLevelZeroDriver, MOCK_DURATION_NS};
    use gpu_view::{host_timestamp, DeviceTimer, LevelZeroApi, LevelZeroCollector, Record};

    const DEVICE: u64 = 0xd0;
    const CONTEXT: u64 = 0xc0;
    const KERNEL: u64 = 0x70;

    fn setup(
        kinds: &[ViewKind],
    ) -> (
        ViewHandler,
        Arc<LevelZeroCollector<MockLevelZeroDriver>>,
        Arc<RecordingClient>,
    ) {
        setup_with_timer(kinds, DeviceTimer::host_aligned(0))
    }

    fn setup_with_timer(
        kinds: &[ViewKind],
        timer: DeviceTimer,
    ) -> (
        ViewHandler,
        Arc<LevelZeroCollector<MockLevelZeroDriver>>,
        Arc<RecordingClient>,
    ) {
        let handler = ViewHandler::new();
        let client = RecordingClient::new(8 * LARGEST_RECORD_SIZE);
        client.attach(&handler).unwrap();

        let collector = Arc::new(LevelZeroCollector::new(
            handler.context().clone(),
            MockLevelZeroDriver::new(),
        ));
        collector.register_device(DEVICE, [3; 16], timer);
        collector.kernel_created(KERNEL, "saxpy");
        handler.add_collector(collector.clone()).unwrap();
        for kind in kinds {
            handler.enable(*kind).unwrap();
        }
        (handler, collector, client)
    }

    #[test]
    fn kernels_from_two_threads() {
        const OPS: usize = 100;
        let (handler, collector, client) = setup(&[ViewKind::Kernel]);
        assert_eq!(collector.driver().tracing_enabled(), 1);

        std::thread::scope(|s| {
            for list in [0x10, 0x11] {
                let collector = collector.clone();
                s.spawn(move || {
                    collector.command_list_created(list, DEVICE, CONTEXT, true);
                    for _ in 0..OPS {
                        let call = collector.api_call(LevelZeroApi::ZeCommandListAppendLaunchKernel);
                        collector.append_kernel(list, KERNEL, None).unwrap();
                        call.finish(0);
                    }
                });
            }
        });
        handler.flush_all().unwrap();

        let kernels: Vec<_> = client
            .records_of(ViewKind::Kernel)
            .into_iter()
            .map(|record| match record {
                Record::Kernel(kernel) => kernel,
                other => panic!("unexpected record {other:?}"),
            })
            .collect();
        assert_eq!(kernels.len(), 2 * OPS);
        assert!(client.errors().is_empty());

        let ids: HashSet<_> = kernels.iter().map(|k| k.correlation_id).collect();
        assert_eq!(ids.len(), 2 * OPS);
        for kernel in &kernels {
            assert!(kernel.append_timestamp <= kernel.submit_timestamp);
            assert!(kernel.submit_timestamp <= kernel.start_timestamp);
            assert!(kernel.start_timestamp <= kernel.end_timestamp);
        }
        // nothing else was enabled
        assert_eq!(client.records().len(), 2 * OPS);
        assert_eq!(handler.stats().records_written, (2 * OPS) as u64);
        assert_eq!(handler.stats().records_lost, 0);
    }

    #[test]
    fn api_call_carries_external_id() {
        let (handler, collector, client) =
            setup(&[ViewKind::DriverApiCall, ViewKind::ExternalCorrelation]);
        collector.command_list_created(0x10, DEVICE, CONTEXT, true);

        handler
            .push_external_correlation_id(ExternalKind::Custom1, 77)
            .unwrap();
        let call = collector.api_call(LevelZeroApi::ZeCommandListCreate);
        let correlation_id = call.correlation_id();
        call.finish(0);
        assert_eq!(
            handler.pop_external_correlation_id(ExternalKind::Custom1),
            Ok(77)
        );
        handler.flush_all().unwrap();

        let externals = client.records_of(ViewKind::ExternalCorrelation);
        assert_eq!(externals.len(), 1);
        let Record::ExternalCorrelation(external) = externals[0] else {
            panic!("unexpected record {:?}", externals[0]);
        };
        assert_eq!(external.correlation_id, correlation_id);
        assert_eq!(external.external_id, 77);
        assert_eq!(external.external(), ExternalKind::Custom1);

        let calls = client.records_of(ViewKind::DriverApiCall);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].correlation_id(), Some(correlation_id));
        if let Record::DriverApiCall(call) = calls[0] {
            assert_eq!(call.header.kind(), ViewKind::DriverApiCall);
            assert_eq!(call.name(), Some("zeCommandListCreate"));
        }
    }

    #[test]
    fn disabled_kind_is_not_recorded() {
        let (handler, collector, client) = setup(&[ViewKind::Kernel]);
        collector.command_list_created(0x10, DEVICE, CONTEXT, true);
        handler.disable(ViewKind::Kernel).unwrap();
        collector.append_kernel(0x10, KERNEL, None).unwrap();
        handler.flush_all().unwrap();
        assert!(client.records().is_empty());
    }

    fn kernels(client: &RecordingClient) -> Vec<gpu_view::KernelRecord> {
        client
            .records_of(ViewKind::Kernel)
            .into_iter()
            .map(|record| match record {
                Record::Kernel(kernel) => kernel,
                other => panic!("unexpected record {other:?}"),
            })
            .collect()
    }

    #[test]
    fn timestamp_events_are_destroyed_on_every_path() {
        let (handler, collector, client) = setup(&[ViewKind::Kernel]);
        let driver = collector.driver();
        collector.command_list_created(0x10, DEVICE, CONTEXT, true);
        collector.command_list_created(0x11, DEVICE, CONTEXT, true);

        let failed = collector.append_kernel(0x10, KERNEL, None).unwrap().unwrap();
        let completed = collector.append_kernel(0x10, KERNEL, None).unwrap().unwrap();
        let abandoned = collector.append_kernel(0x11, KERNEL, None).unwrap().unwrap();
        driver.hold(abandoned);

        // the first completion query of the flush fails
        driver.fail_next_query(-7);
        assert!(matches!(handler.flush_all(), Err(ViewError::Driver(_))));
        assert_eq!(collector.in_flight(), 1);
        collector.command_list_destroyed(0x11);
        assert_eq!(collector.in_flight(), 0);

        let mut created = driver.created_events();
        let mut destroyed = driver.destroyed_events();
        created.sort_unstable();
        destroyed.sort_unstable();
        let mut expected = vec![failed, completed, abandoned];
        expected.sort_unstable();
        assert_eq!(created, expected);
        assert_eq!(destroyed, expected);

        assert_eq!(kernels(&client).len(), 1);
        let counts = collector.stats();
        assert_eq!((counts.completed, counts.lost), (1, 2));
    }

    #[test]
    fn many_kernels_leave_no_event_behind() {
        const OPS: usize = 64;
        let (handler, collector, client) = setup(&[ViewKind::Kernel]);
        collector.command_list_created(0x10, DEVICE, CONTEXT, true);
        for _ in 0..OPS {
            collector.append_kernel(0x10, KERNEL, None).unwrap();
        }
        handler.flush_all().unwrap();

        assert_eq!(kernels(&client).len(), OPS);
        assert_eq!(collector.driver().created_events().len(), OPS);
        assert_eq!(
            collector.driver().created_events(),
            collector.driver().destroyed_events()
        );
    }

    #[test]
    fn device_timer_synced_after_the_kernel_ran() {
        let sync = host_timestamp() + 1_000_000_000;
        let (handler, collector, client) =
            setup_with_timer(&[ViewKind::Kernel], DeviceTimer::host_aligned(sync));
        collector.command_list_created(0x10, DEVICE, CONTEXT, true);
        collector.append_kernel(0x10, KERNEL, None).unwrap();
        handler.flush_all().unwrap();

        let kernels = kernels(&client);
        assert_eq!(kernels.len(), 1);
        let kernel = kernels[0];
        assert!(kernel.submit_timestamp <= kernel.start_timestamp);
        assert_eq!(kernel.end_timestamp - kernel.start_timestamp, MOCK_DURATION_NS);
        assert!(kernel.end_timestamp < sync);
        assert_eq!(collector.stats().non_monotonic, 0);
    }

    #[cfg(feature = "sycl")]
    #[test]
    fn sycl_launch_reaches_driver_kernel() {
        use gpu_view::{SyclApi, SyclCollector};

        let (handler, collector, client) = setup(&[]);
        let sycl = Arc::new(SyclCollector::new(handler.context().clone()));
        handler.add_collector(sycl.clone()).unwrap();
        for kind in [
            ViewKind::Kernel,
            ViewKind::RuntimeApiCall,
            ViewKind::DriverApiCall,
        ] {
            handler.enable(kind).unwrap();
        }
        collector.command_list_created(0x10, DEVICE, CONTEXT, true);
        sycl.node_created(42, Some("matmul"), Some("main.cpp"), 17);

        let runtime = sycl.function_begin(SyclApi::QueueSubmit);
        sycl.task_begin(42, 5, 9);
        sycl.enqueue_begin();
        let driver = collector.api_call(LevelZeroApi::ZeCommandListAppendLaunchKernel);
        // a kernel handle the driver never named
        collector.append_kernel(0x10, 0x71, None).unwrap();
        assert_eq!(driver.correlation_id(), runtime.correlation_id());
        driver.finish(0);
        sycl.task_end();
        let runtime_id = runtime.correlation_id();
        runtime.finish(0);
        handler.flush_all().unwrap();

        let kernels = client.records_of(ViewKind::Kernel);
        assert_eq!(kernels.len(), 1);
        let Record::Kernel(kernel) = kernels[0] else {
            panic!("unexpected record {:?}", kernels[0]);
        };
        assert_eq!(kernel.correlation_id, runtime_id);
        assert_eq!(
            (kernel.sycl_node_id, kernel.sycl_invocation_id, kernel.sycl_queue_id),
            (42, 5, 9)
        );
        assert_eq!(kernel.source_line, 17);
        assert!(kernel.sycl_task_begin_timestamp <= kernel.sycl_enqueue_begin_timestamp);
        assert_eq!(
            handler.context().symbols().resolve(kernel.name).as_deref(),
            Some("matmul")
        );

        assert_eq!(client.records_of(ViewKind::RuntimeApiCall).len(), 1);
        assert_eq!(client.records_of(ViewKind::DriverApiCall).len(), 1);
    }
}

#[cfg(feature = "opencl")]
mod opencl {
    use super::*;
    use gpu_view::test_utils::{MockOpenClDriver, MOCK_DURATION_NS};
    use gpu_view::{DeviceTimer, OpenClApi, OpenClCollector, Record};

    const QUEUE: u64 = 0x40;

    fn setup() -> (
        ViewHandler,
        Arc<OpenClCollector<MockOpenClDriver>>,
        Arc<RecordingClient>,
    ) {
        let handler = ViewHandler::new();
        let client = RecordingClient::new(4 * LARGEST_RECORD_SIZE);
        client.attach(&handler).unwrap();
        let collector = Arc::new(OpenClCollector::new(
            handler.context().clone(),
            MockOpenClDriver::new(),
        ));
        collector.register_queue(QUEUE, [1; 16], 0xc0, DeviceTimer::host_aligned(0));
        handler.add_collector(collector.clone()).unwrap();
        handler.enable(ViewKind::Kernel).unwrap();
        (handler, collector, client)
    }

    #[test]
    fn completed_kernel_is_delivered() {
        let (handler, collector, client) = setup();

        let call = collector.api_call(OpenClApi::ClEnqueueNDRangeKernel);
        collector
            .enqueue_kernel(OpenClApi::ClEnqueueNDRangeKernel, QUEUE, "reduce", 0xe5)
            .unwrap();
        let correlation_id = call.correlation_id();
        call.finish(0);
        handler.flush_all().unwrap();

        let kernels = client.records_of(ViewKind::Kernel);
        assert_eq!(kernels.len(), 1);
        let Record::Kernel(kernel) = kernels[0] else {
            panic!("unexpected record {:?}", kernels[0]);
        };
        assert_eq!(kernel.correlation_id, correlation_id);
        assert_eq!(kernel.end_timestamp - kernel.start_timestamp, MOCK_DURATION_NS);
        assert_eq!(collector.in_flight(), 0);
    }

    #[test]
    fn event_retains_balance_when_events_are_reused() {
        let (handler, collector, client) = setup();
        collector.driver().hold(0xe5);
        for _ in 0..3 {
            collector
                .enqueue_kernel(OpenClApi::ClEnqueueTask, QUEUE, "reduce", 0xe5)
                .unwrap();
        }
        collector.driver().release_hold(0xe5);
        handler.flush_all().unwrap();

        assert_eq!(collector.driver().retained(), vec![0xe5; 3]);
        assert_eq!(collector.driver().released(), vec![0xe5; 3]);
        assert_eq!(collector.in_flight(), 0);
        assert_eq!(client.records_of(ViewKind::Kernel).len(), 1);
        assert_eq!(collector.stats().lost, 2);
    }

    #[test]
    fn failed_profiling_read_still_releases_the_event() {
        let (handler, collector, client) = setup();
        collector
            .enqueue_kernel(OpenClApi::ClEnqueueNDRangeKernel, QUEUE, "reduce", 0xe6)
            .unwrap();
        collector.driver().fail_next_query(-5);

        assert!(matches!(handler.flush_all(), Err(ViewError::Driver(_))));
        assert_eq!(collector.driver().released(), vec![0xe6]);
        assert_eq!(collector.in_flight(), 0);
        assert!(client.records().is_empty());
    }
}
