//! End-to-end runs of the dispatcher on the software device.

use gpu_doubler::soft::SoftPlatform;
use gpu_doubler::{
    cpu_double, negotiate, run_blocking, DispatchError, Dispatcher, DispatcherOptions, Kernel,
    TextSurface, DEVICE_UNAVAILABLE_MESSAGE, DONE_PLACEHOLDER, DOUBLE_KERNEL,
    UNSUPPORTED_PLATFORM_MESSAGE,
};

fn dispatcher(platform: &SoftPlatform) -> Dispatcher<gpu_doubler::soft::SoftDevice> {
    pollster::block_on(async {
        let device = negotiate(platform).await?;
        Dispatcher::new(device).await
    })
    .ok()
    .expect("soft platform grants a device")
}

#[test]
fn doubles_one_full_workgroup() {
    let platform = SoftPlatform::new();
    let mut surface = TextSurface::new();
    let input: [f32; 8] = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0];

    let output = run_blocking(&platform, &input, &mut surface, &DispatcherOptions::default())
        .expect("dispatch succeeds");

    assert_eq!(output, vec![2.0, 4.0, 6.0, 8.0, 10.0, 12.0, 14.0, 16.0]);
    assert_eq!(surface.text(), "2,4,6,8,10,12,14,16");
    assert_eq!(surface.presentations(), 1);
    let stats = platform.stats();
    assert_eq!(stats.workgroups(), 1);
    assert_eq!(stats.invocations(), 8);
    assert_eq!(stats.memory_accesses(), 8);
    assert_eq!(stats.submissions(), 1);
}

#[test]
fn doubles_a_single_zero() {
    let platform = SoftPlatform::new();
    let mut surface = TextSurface::new();

    let output = run_blocking(&platform, &[0.0], &mut surface, &DispatcherOptions::default())
        .expect("dispatch succeeds");

    assert_eq!(output, vec![0.0]);
    assert_eq!(surface.text(), "0");
    // One work-group of eight is launched; seven invocations are guarded.
    let stats = platform.stats();
    assert_eq!(stats.invocations(), 8);
    assert_eq!(stats.memory_accesses(), 1);
}

#[test]
fn ten_thousand_elements_match_the_cpu_loop() {
    let platform = SoftPlatform::new();
    let mut surface = TextSurface::new();
    let input: Vec<f32> = (0..10_000).map(|i| i as f32).collect();

    let output = run_blocking(&platform, &input, &mut surface, &DispatcherOptions::default())
        .expect("dispatch succeeds");

    assert_eq!(output.len(), 10_000);
    for (i, value) in output.iter().enumerate() {
        assert_eq!(*value, 2.0 * i as f32, "element {i}");
    }
    assert_eq!(output, cpu_double(&input));
    assert_eq!(surface.text(), DONE_PLACEHOLDER);
    assert_eq!(platform.stats().workgroups(), 1250);
}

#[test]
fn unsupported_platform_shows_diagnostic_and_allocates_nothing() {
    let platform = SoftPlatform::unsupported();
    let mut surface = TextSurface::new();

    let err = run_blocking(&platform, &[1.0, 2.0], &mut surface, &DispatcherOptions::default())
        .unwrap_err();

    assert_eq!(err, DispatchError::PlatformUnavailable);
    assert_eq!(surface.text(), UNSUPPORTED_PLATFORM_MESSAGE);
    assert_eq!(surface.presentations(), 1);
    let stats = platform.stats();
    assert_eq!(stats.devices_granted(), 0);
    assert_eq!(stats.buffers_allocated(), 0);
}

#[test]
fn denied_device_shows_diagnostic() {
    let platform = SoftPlatform::denying_devices();
    let mut surface = TextSurface::new();

    let err = run_blocking(&platform, &[1.0], &mut surface, &DispatcherOptions::default())
        .unwrap_err();

    assert!(matches!(err, DispatchError::DeviceUnavailable(_)));
    assert_eq!(surface.text(), DEVICE_UNAVAILABLE_MESSAGE);
    assert_eq!(platform.stats().buffers_allocated(), 0);
}

#[test]
fn render_limit_can_be_lifted() {
    let platform = SoftPlatform::new();
    let mut surface = TextSurface::new();
    let input: Vec<f32> = (0..100).map(|i| i as f32).collect();
    let options = DispatcherOptions::default().with_render_limit(None);

    run_blocking(&platform, &input, &mut surface, &options).expect("dispatch succeeds");

    assert!(surface.text().starts_with("0,2,4,6"));
    assert!(surface.text().ends_with(",198"));
}

#[test]
fn lengths_off_the_workgroup_boundary_stay_in_bounds() {
    for len in [1usize, 7, 9, 15, 17, 63, 65, 1001] {
        let platform = SoftPlatform::new();
        let dispatcher = dispatcher(&platform);
        let input: Vec<f32> = (0..len).map(|i| i as f32 - 3.5).collect();

        let output = dispatcher.double_blocking(&input).expect("dispatch succeeds");

        assert_eq!(output, cpu_double(&input), "len {len}");
        let stats = platform.stats();
        assert_eq!(stats.workgroups(), len.div_ceil(8), "len {len}");
        assert_eq!(stats.memory_accesses(), len, "len {len}");
    }
}

#[test]
fn kernel_is_compiled_once_per_dispatcher() {
    let platform = SoftPlatform::new();
    let dispatcher = dispatcher(&platform);

    let once = dispatcher.double_blocking(&[1.5, -2.0, 3.0]).unwrap();
    let twice = dispatcher.double_blocking(&once).unwrap();

    assert_eq!(twice, vec![6.0, -8.0, 12.0]);
    let stats = platform.stats();
    assert_eq!(stats.pipelines_compiled(), 1);
    assert_eq!(stats.submissions(), 2);
    // input, result, params and readback per dispatch
    assert_eq!(stats.buffers_allocated(), 8);
}

#[test]
fn staging_buffers_are_sized_exactly() {
    let platform = SoftPlatform::new();
    let dispatcher = dispatcher(&platform);

    dispatcher.double_blocking(&[1.0, 2.0, 3.0]).unwrap();

    // 12-byte input, result and readback plus the 16-byte params block.
    let stats = platform.stats();
    assert_eq!(stats.buffers_allocated(), 4);
    assert_eq!(stats.bytes_allocated(), 3 * 12 + 16);
}

#[test]
fn grid_splits_when_one_dimension_is_not_enough() {
    let platform = SoftPlatform::new().with_max_workgroups_per_dimension(4);
    let dispatcher = dispatcher(&platform);
    let input: Vec<f32> = (0..100).map(|i| i as f32).collect();

    let output = dispatcher.double_blocking(&input).expect("dispatch succeeds");

    assert_eq!(output, cpu_double(&input));
    // 13 groups needed, laid out as 4 x 4.
    let stats = platform.stats();
    assert_eq!(stats.workgroups(), 16);
    assert_eq!(stats.memory_accesses(), 100);
}

#[test]
fn oversized_grid_is_a_configuration_error() {
    let platform = SoftPlatform::new().with_max_workgroups_per_dimension(2);
    let dispatcher = dispatcher(&platform);
    let input = vec![1.0f32; 8 * 5];

    let err = dispatcher.double_blocking(&input).unwrap_err();

    assert!(matches!(err, DispatchError::ConfigurationMismatch(_)));
    assert_eq!(platform.stats().submissions(), 0);
}

#[test]
fn input_over_the_storage_limit_is_rejected_before_allocation() {
    let platform = SoftPlatform::new().with_max_storage_binding_size(16);
    let dispatcher = dispatcher(&platform);

    let err = dispatcher.double_blocking(&[1.0f32; 5]).unwrap_err();

    assert!(matches!(err, DispatchError::ConfigurationMismatch(_)));
    assert_eq!(platform.stats().buffers_allocated(), 0);
}

#[test]
fn empty_input_is_rejected() {
    let platform = SoftPlatform::new();
    let mut surface = TextSurface::new();

    let err = run_blocking(&platform, &[], &mut surface, &DispatcherOptions::default())
        .unwrap_err();

    assert_eq!(err, DispatchError::EmptyInput);
    assert_eq!(surface.text(), "input slice must not be empty");
    assert_eq!(platform.stats().buffers_allocated(), 0);
}

#[test]
fn kernel_with_mismatched_schema_is_rejected_before_dispatch() {
    const SHORT_RESULT: &[gpu_doubler::kernel::BindingSlot] = &[
        DOUBLE_KERNEL.bindings[0],
        gpu_doubler::kernel::BindingSlot {
            binding: 1,
            access: gpu_doubler::kernel::SlotAccess::ReadWriteStorage,
            extent: gpu_doubler::kernel::SlotExtent::Fixed(4),
        },
        DOUBLE_KERNEL.bindings[2],
    ];
    let kernel = Kernel {
        bindings: SHORT_RESULT,
        ..DOUBLE_KERNEL
    };
    let platform = SoftPlatform::new();
    let dispatcher = pollster::block_on(async {
        let device = negotiate(&platform).await?;
        Dispatcher::with_kernel(device, kernel).await
    })
    .ok()
    .expect("soft platform grants a device");

    let err = dispatcher.double_blocking(&[1.0, 2.0]).unwrap_err();

    assert_eq!(
        err,
        DispatchError::ConfigurationMismatch("binding 1 is 8 bytes, expected 4".into())
    );
    assert_eq!(platform.stats().submissions(), 0);
}

#[test]
fn unknown_kernel_fails_at_compile_time() {
    let kernel = Kernel {
        label: "triple",
        ..DOUBLE_KERNEL
    };
    let platform = SoftPlatform::new();

    let outcome = pollster::block_on(async {
        let device = negotiate(&platform).await?;
        Dispatcher::with_kernel(device, kernel).await.map(|_| ())
    });

    assert!(matches!(outcome, Err(DispatchError::KernelCompilation(_))));
    assert_eq!(platform.stats().pipelines_compiled(), 0);
    assert_eq!(platform.stats().submissions(), 0);
}

fn soft_triple(
    index: u32,
    input: &[f32],
    result: &mut [f32],
    params: &gpu_doubler::kernel::Params,
) -> bool {
    if index >= params.len {
        return false;
    }
    result[index as usize] = input[index as usize] * 3.0;
    true
}

#[test]
fn registered_soft_program_runs_through_the_same_sequence() {
    let kernel = Kernel {
        label: "triple",
        ..DOUBLE_KERNEL
    };
    let platform = SoftPlatform::new();
    let dispatcher = pollster::block_on(async {
        let mut device = negotiate(&platform).await?;
        device.register_program("triple", soft_triple);
        Dispatcher::with_kernel(device, kernel).await
    })
    .ok()
    .expect("soft platform grants a device");

    let output = dispatcher.double_blocking(&[1.0, 2.0, 3.0]).unwrap();

    assert_eq!(output, vec![3.0, 6.0, 9.0]);
    assert_eq!(dispatcher.kernel().label, "triple");
    assert_eq!(dispatcher.device().stats().memory_accesses(), 3);
}
