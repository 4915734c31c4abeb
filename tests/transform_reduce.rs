use fused_reduce::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const SAMPLE: [i32; 10] = [-5, 0, 2, 3, 2, 4, -2, 1, 2, 3];

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[test]
fn test_sum_of_squares_on_every_host_backend() {
    init_tracing();
    for backend in [Backend::SerialCpu, Backend::MultiCoreCpu, Backend::Automatic] {
        let ctl = Control::with_backend(backend);
        let got = transform_reduce_with(&ctl, &SAMPLE[..], Square, 0, Plus).unwrap();
        assert_eq!(got, 76, "backend {backend:?}");
    }
}

#[test]
fn test_default_control() {
    assert_eq!(transform_reduce(&SAMPLE[..], Square, 0, Plus).unwrap(), 76);
    assert_eq!(transform_reduce(&SAMPLE, Square, 0, Plus).unwrap(), 76);
    assert_eq!(transform_reduce(&SAMPLE.to_vec(), Square, 0, Plus).unwrap(), 76);
}

#[test]
fn test_identity_plus_matches_sum() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let data: Vec<i64> = (0..10_000).map(|_| rng.random_range(-1_000_000..1_000_000)).collect();
    let expected: i64 = data.iter().sum();

    for lanes in [None, Some(1), Some(7), Some(64), Some(20_000)] {
        let mut ctl = Control::with_backend(Backend::MultiCoreCpu);
        ctl.lanes = lanes;
        let got = transform_reduce_with(&ctl, &data, Identity, 0i64, Plus).unwrap();
        assert_eq!(got, expected, "lanes {lanes:?}");
    }

    let serial = Control::with_backend(Backend::SerialCpu);
    assert_eq!(reduce_with(&serial, &data, 0i64, Plus).unwrap(), expected);
}

#[test]
fn test_empty_range_returns_init_without_calls() {
    let transform = |_: i32| -> i32 { panic!("transform must not run on an empty range") };
    let combine = |_: i32, _: i32| -> i32 { panic!("reduce must not run on an empty range") };

    let got = transform_reduce(Sequence::new(&SAMPLE, 4, 4), transform, 42, combine).unwrap();
    assert_eq!(got, 42);

    let empty: Vec<i32> = Vec::new();
    for backend in [Backend::SerialCpu, Backend::MultiCoreCpu, Backend::Wgpu] {
        let ctl = Control::with_backend(backend);
        let got = transform_reduce_with(&ctl, &empty, transform, -7, combine).unwrap();
        assert_eq!(got, -7);
    }
}

#[test]
fn test_single_element() {
    let one = [3];
    assert_eq!(transform_reduce(&one, Square, 5, Plus).unwrap(), 14);
    assert_eq!(transform_reduce(&one, Square, 5, Minus).unwrap(), -4);

    let ctl = Control::with_backend(Backend::MultiCoreCpu);
    assert_eq!(transform_reduce_with(&ctl, &one, Negate, 5, Multiplies).unwrap(), -15);
}

#[test]
fn test_subrange() {
    let seq = Sequence::new(&SAMPLE, 2, 5);
    assert_eq!(transform_reduce(seq, Square, 0, Plus).unwrap(), 17);
    assert_eq!(transform_reduce(Sequence::new(&SAMPLE, 0, 1), Square, 1, Plus).unwrap(), 26);
}

#[test]
fn test_invalid_ranges_are_preconditions() {
    let err = transform_reduce(Sequence::new(&SAMPLE, 6, 2), Square, 0, Plus).unwrap_err();
    assert!(matches!(err, Error::InvalidRange { first: 6, last: 2 }));
    assert_eq!(err.kind(), ErrorKind::Precondition);
    assert_eq!(err.stage(), None);

    let err = transform_reduce(Sequence::new(&SAMPLE, 0, 11), Square, 0, Plus).unwrap_err();
    assert!(matches!(err, Error::OutOfBounds { last: 11, len: 10 }));
    assert_eq!(err.kind(), ErrorKind::Precondition);
}

#[test]
fn test_non_associative_reduce_follows_lane_grouping() {
    let data = [1, 2, 3, 4];

    // one lane: 10 - (((1 - 2) - 3) - 4)
    let serial = Control::with_backend(Backend::SerialCpu);
    assert_eq!(transform_reduce_with(&serial, &data, Identity, 10, Minus).unwrap(), 18);

    // two lanes: (10 - (1 - 2)) - (3 - 4)
    let mut two = Control::with_backend(Backend::MultiCoreCpu);
    two.lanes = Some(2);
    let first = transform_reduce_with(&two, &data, Identity, 10, Minus).unwrap();
    assert_eq!(first, 12);
    for _ in 0..16 {
        assert_eq!(transform_reduce_with(&two, &data, Identity, 10, Minus).unwrap(), first);
    }

    // one element per lane degenerates to a plain left fold from init
    let mut four = Control::with_backend(Backend::MultiCoreCpu);
    four.lanes = Some(4);
    assert_eq!(transform_reduce_with(&four, &data, Identity, 10, Minus).unwrap(), 0);
}

#[test]
fn test_transform_may_change_type() {
    let widen = |x: i32| -> i64 { i64::from(x) * i64::from(x) };
    let add = |a: i64, b: i64| -> i64 { a + b };
    assert_eq!(transform_reduce(&SAMPLE, widen, 0i64, add).unwrap(), 76);

    let big = [i32::MAX, i32::MIN];
    let expected = i64::from(i32::MAX).pow(2) + i64::from(i32::MIN).pow(2);
    let ctl = Control::with_backend(Backend::MultiCoreCpu);
    assert_eq!(transform_reduce_with(&ctl, &big, widen, 0i64, add).unwrap(), expected);
}

#[test]
fn test_closures_and_stock_functors_mix() {
    let count_even = |x: i32| -> u32 { u32::from(x % 2 == 0) };
    assert_eq!(transform_reduce(&SAMPLE, count_even, 0u32, Plus).unwrap(), 6);

    let values = [1.0f32, 2.0, 3.0];
    assert_eq!(transform_reduce(&values, Scale(2.0f32), 0.0f32, Plus).unwrap(), 12.0);

    let bytes = [200u8, 100, 10];
    let wrapping = |a: u8, b: u8| a.wrapping_add(b);
    assert_eq!(reduce(&bytes, 0u8, wrapping).unwrap(), 54);

    assert_eq!(reduce(&SAMPLE, i32::MIN, Maximum).unwrap(), 4);
    assert_eq!(reduce(&SAMPLE, i32::MAX, Minimum).unwrap(), -5);
}

#[test]
fn test_integer_overflow_wraps_on_host_backends() {
    let big = [70_000i32];
    let squared = 70_000i32.wrapping_mul(70_000);
    let many = vec![i32::MAX; 1000];
    let wrapped_sum = many.iter().fold(0i32, |acc, &x| acc.wrapping_add(x));

    for backend in [Backend::SerialCpu, Backend::MultiCoreCpu] {
        let mut ctl = Control::with_backend(backend);
        ctl.lanes = Some(8);
        assert_eq!(transform_reduce_with(&ctl, &big, Square, 0, Plus).unwrap(), squared);
        assert_eq!(reduce_with(&ctl, &many, 0, Plus).unwrap(), wrapped_sum);
        assert_eq!(transform_reduce_with(&ctl, &[i32::MIN], Negate, 0, Plus).unwrap(), i32::MIN);
        assert_eq!(reduce_with(&ctl, &[u32::MAX, 2], 0, Plus).unwrap(), 1);
    }
}

#[test]
fn test_float_sum_close_to_exact() {
    let mut rng = StdRng::seed_from_u64(42);
    let data: Vec<f64> = (0..50_000).map(|_| rng.random_range(-1.0..1.0)).collect();
    let exact: f64 = data.iter().sum();

    let mut ctl = Control::with_backend(Backend::MultiCoreCpu);
    ctl.lanes = Some(32);
    let got = transform_reduce_with(&ctl, &data, Identity, 0.0f64, Plus).unwrap();
    assert!((got - exact).abs() < 1e-9, "got {got}, expected {exact}");
}

#[test]
fn test_debug_flags_do_not_change_results() {
    init_tracing();
    let mut ctl = Control::with_backend(Backend::MultiCoreCpu);
    ctl.debug = DebugFlags::COMPILE | DebugFlags::SHOW_CODE | DebugFlags::KERNEL_RUN;
    assert_eq!(transform_reduce_with(&ctl, &SAMPLE, Square, 0, Plus).unwrap(), 76);
}

#[cfg(not(feature = "wgpu"))]
#[test]
fn test_forced_gpu_without_feature_is_unavailable() {
    let ctl = Control::with_backend(Backend::Wgpu);
    let err = transform_reduce_with(&ctl, &SAMPLE, Square, 0, Plus).unwrap_err();
    assert!(matches!(err, Error::Unavailable { backend: Backend::Wgpu, .. }));
    assert_eq!(err.kind(), ErrorKind::Unavailable);
}

#[cfg(not(feature = "cuda"))]
#[test]
fn test_forced_cuda_without_feature_is_unavailable() {
    let ctl = Control::with_backend(Backend::Cuda);
    let err = transform_reduce_with(&ctl, &SAMPLE, Square, 0, Plus).unwrap_err();
    assert!(matches!(err, Error::Unavailable { backend: Backend::Cuda, .. }));
}
