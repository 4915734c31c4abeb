#![cfg(any(feature = "wgpu", feature = "cuda"))]

use fused_reduce::prelude::*;
use fused_reduce::resource::wgpu::{gpu_available, WgpuManager};
#[cfg(feature = "wgpu")]
use rand::rngs::StdRng;
#[cfg(feature = "wgpu")]
use rand::{Rng, SeedableRng};

const SAMPLE: [i32; 10] = [-5, 0, 2, 3, 2, 4, -2, 1, 2, 3];

/// `None` when the machine has no adapter; the test is then skipped.
#[cfg(feature = "wgpu")]
fn gpu() -> Option<Control> {
    if !gpu_available() {
        eprintln!("no GPU adapter, skipping");
        return None;
    }
    Some(Control::with_backend(Backend::Wgpu))
}

#[cfg(feature = "wgpu")]
#[test]
fn test_gpu_sum_of_squares() {
    let Some(ctl) = gpu() else { return };
    assert_eq!(transform_reduce_with(&ctl, &SAMPLE, Square, 0, Plus).unwrap(), 76);
}

#[cfg(feature = "wgpu")]
#[test]
fn test_gpu_matches_host_on_large_input() {
    let Some(mut ctl) = gpu() else { return };
    let mut rng = StdRng::seed_from_u64(7);
    let data: Vec<i32> = (0..200_000).map(|_| rng.random_range(-100..100)).collect();
    let expected: i32 = data.iter().sum();

    for lanes in [None, Some(1), Some(3), Some(500)] {
        ctl.lanes = lanes;
        let got = transform_reduce_with(&ctl, &data, Identity, 0, Plus).unwrap();
        assert_eq!(got, expected, "lanes {lanes:?}");
    }
}

#[cfg(feature = "wgpu")]
#[test]
fn test_gpu_state_and_subranges() {
    let Some(ctl) = gpu() else { return };
    let values = [1.0f32, 2.0, 3.0, 4.0];
    let got = transform_reduce_with(&ctl, &values, Scale(0.5f32), 0.0f32, Plus).unwrap();
    assert!((got - 5.0).abs() < 1e-6);

    let seq = Sequence::new(&SAMPLE, 2, 5);
    assert_eq!(transform_reduce_with(&ctl, seq, Square, 0, Plus).unwrap(), 17);
    assert_eq!(reduce_with(&ctl, &SAMPLE, i32::MIN, Maximum).unwrap(), 4);
}

#[cfg(feature = "wgpu")]
#[test]
fn test_gpu_rejects_host_only_functors() {
    let Some(ctl) = gpu() else { return };
    let closure = |x: i32| x + 1;
    let err = transform_reduce_with(&ctl, &SAMPLE, closure, 0, Plus).unwrap_err();
    assert!(matches!(err, Error::NotTransportable { .. }));
    assert_eq!(err.kind(), ErrorKind::Compile);

    let wide = [1.0f64, 2.0];
    let err = transform_reduce_with(&ctl, &wide, Square, 0.0, Plus).unwrap_err();
    assert!(matches!(err, Error::NotTransportable { item: "f64", .. }));
}

#[cfg(feature = "wgpu")]
#[test]
fn test_gpu_resident_vector_and_cache() {
    let Some(ctl) = gpu() else { return };
    let mut rm = WgpuManager::new(&ctl).unwrap();
    assert!(rm.target().starts_with("wgpu:"));

    let vector = DeviceVector::from_slice(&mut rm, &SAMPLE).unwrap();
    assert_eq!(vector.to_vec(&mut rm).unwrap(), SAMPLE.to_vec());
    for _ in 0..2 {
        let got = transform_reduce_resident(&mut rm, &ctl, &vector, 0, 10, Square, 0, Plus).unwrap();
        assert_eq!(got, 76);
    }
    let stats = rm.stats();
    assert_eq!(stats.compiles + stats.cache_hits, 2);
    assert_eq!(stats.launches, 2);
    assert_eq!(stats.live_buffers, 1);

    vector.release(&mut rm).unwrap();
    assert_eq!(rm.stats().live_buffers, 0);
}

#[cfg(feature = "cuda")]
#[test]
fn test_cuda_adapter_runs_on_wgpu() {
    if !gpu_available() {
        return;
    }
    let ctl = Control::with_backend(Backend::Cuda);
    let mut rm = fused_reduce::ops::dispatch::select(&ctl, SAMPLE.len(), true).unwrap();
    assert_eq!(rm.backend(), Backend::Cuda);
    assert!(rm.target().starts_with("cuda->wgpu:"));
    assert_eq!(transform_reduce_in(rm.as_mut(), &ctl, &SAMPLE, Square, 0, Plus).unwrap(), 76);

    // the adapter and a plain wgpu manager keep separate buffer tables
    let mut plain = WgpuManager::new(&ctl).unwrap();
    let vector = DeviceVector::from_slice(rm.as_mut(), &SAMPLE).unwrap();
    assert!(matches!(vector.to_vec(&mut plain), Err(Error::UnknownBuffer(_))));
    vector.release(rm.as_mut()).unwrap();
}
