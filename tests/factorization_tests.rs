//! End-to-end factorization tests over the emulated device engine.

use rand::Rng;
use rand_chacha::rand_core::SeedableRng;
use rand_chacha::ChaCha8Rng;

use cholforge::plan::BlockAlloc;
use cholforge::{
    factor_in_place, par_potrf, BlockPlan, CholForgeError, CholeskyOptions, DeviceId, DeviceInfo,
    DeviceRegistry, MatrixMut,
};

const GIB: usize = 1 << 30;

/// Seeded random SPD matrix: `M = R * R^T + n * I`, column-major.
fn random_spd(n: usize, seed: u64) -> Vec<f64> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let r: Vec<f64> = (0..n * n).map(|_| rng.gen_range(-1.0..1.0)).collect();
    let mut m = vec![0.0f64; n * n];
    for j in 0..n {
        for i in 0..n {
            let mut acc = 0.0;
            for t in 0..n {
                acc += r[t * n + i] * r[t * n + j];
            }
            m[j * n + i] = acc;
        }
        m[j * n + j] += n as f64;
    }
    m
}

fn registry(num_devices: usize) -> DeviceRegistry {
    let devices = (0..num_devices)
        .map(|i| DeviceInfo::native(i as i32, 4 * GIB))
        .collect();
    DeviceRegistry::new(devices).unwrap()
}

fn block_plan(n: usize, block: usize, num_devices: usize) -> BlockPlan {
    let mut blocks = Vec::new();
    let mut cursor = 0;
    let mut idx = 0;
    while cursor < n {
        let size = block.min(n - cursor);
        blocks.push(BlockAlloc {
            start: cursor,
            end: cursor + size,
            size,
            device_id: DeviceId((idx % num_devices) as i32),
            alloc_id: idx,
        });
        cursor += size;
        idx += 1;
    }
    BlockPlan::new(blocks, n).unwrap()
}

/// Check `L * L^T` against the lower triangle of the original matrix.
fn assert_reconstructs(factored: &[f64], original: &[f64], n: usize, tol: f64) {
    for j in 0..n {
        for i in j..n {
            let mut acc = 0.0;
            for t in 0..=j {
                acc += factored[t * n + i] * factored[t * n + j];
            }
            let want = original[j * n + i];
            assert!(
                (acc - want).abs() < tol,
                "reconstruction mismatch at ({i}, {j}): {acc} vs {want}"
            );
        }
    }
}

#[test]
fn single_device_factors_random_spd() {
    let n = 24;
    let original = random_spd(n, 7);
    let mut data = original.clone();
    let plan = block_plan(n, 5, 1);
    let mut m = MatrixMut::new_contiguous(&mut data, n).unwrap();
    par_potrf(&mut m, &registry(1), &plan, &CholeskyOptions::default()).unwrap();
    assert_reconstructs(&data, &original, n, 1e-8);
}

#[test]
fn two_devices_produce_the_same_factor_as_one() {
    let n = 20;
    let original = random_spd(n, 11);

    let mut single = original.clone();
    let plan1 = block_plan(n, 4, 1);
    par_potrf(
        &mut MatrixMut::new_contiguous(&mut single, n).unwrap(),
        &registry(1),
        &plan1,
        &CholeskyOptions::default(),
    )
    .unwrap();

    let mut dual = original.clone();
    let plan2 = block_plan(n, 4, 2);
    par_potrf(
        &mut MatrixMut::new_contiguous(&mut dual, n).unwrap(),
        &registry(2),
        &plan2,
        &CholeskyOptions::default(),
    )
    .unwrap();

    for j in 0..n {
        for i in j..n {
            assert!(
                (single[j * n + i] - dual[j * n + i]).abs() < 1e-10,
                "factor differs at ({i}, {j})"
            );
        }
    }
}

#[test]
fn three_devices_with_uneven_blocks() {
    let n = 30;
    let original = random_spd(n, 23);
    let mut data = original.clone();
    // Last block is a remainder block of 2 rows.
    let plan = block_plan(n, 7, 3);
    assert_eq!(plan.num_blocks(), 5);
    let mut m = MatrixMut::new_contiguous(&mut data, n).unwrap();
    par_potrf(&mut m, &registry(3), &plan, &CholeskyOptions::default()).unwrap();
    assert_reconstructs(&data, &original, n, 1e-8);
}

#[test]
fn factor_is_invariant_across_block_plans() {
    let n = 21;
    let original = random_spd(n, 17);
    let mut baseline = original.clone();
    par_potrf(
        &mut MatrixMut::new_contiguous(&mut baseline, n).unwrap(),
        &registry(1),
        &block_plan(n, n, 1),
        &CholeskyOptions::default(),
    )
    .unwrap();

    for (block, num_devices) in [(3, 1), (5, 2), (8, 3)] {
        let mut data = original.clone();
        let plan = block_plan(n, block, num_devices);
        par_potrf(
            &mut MatrixMut::new_contiguous(&mut data, n).unwrap(),
            &registry(num_devices),
            &plan,
            &CholeskyOptions::default(),
        )
        .unwrap();
        for j in 0..n {
            for i in j..n {
                assert!(
                    (data[j * n + i] - baseline[j * n + i]).abs() < 1e-9,
                    "block size {block} on {num_devices} devices diverges at ({i}, {j})"
                );
            }
        }
    }
}

#[test]
fn single_precision_factorization() {
    let n = 12;
    let mut rng = ChaCha8Rng::seed_from_u64(3);
    let r: Vec<f32> = (0..n * n).map(|_| rng.gen_range(-1.0f32..1.0)).collect();
    let mut original = vec![0.0f32; n * n];
    for j in 0..n {
        for i in 0..n {
            let mut acc = 0.0f32;
            for t in 0..n {
                acc += r[t * n + i] * r[t * n + j];
            }
            original[j * n + i] = acc;
        }
        original[j * n + j] += n as f32;
    }
    let mut data = original.clone();
    let plan = block_plan(n, 4, 2);
    let mut m = MatrixMut::new_contiguous(&mut data, n).unwrap();
    par_potrf(&mut m, &registry(2), &plan, &CholeskyOptions::default()).unwrap();
    for j in 0..n {
        for i in j..n {
            let mut acc = 0.0f32;
            for t in 0..=j {
                acc += data[t * n + i] * data[t * n + j];
            }
            assert!((acc - original[j * n + i]).abs() < 1e-3);
        }
    }
}

#[test]
fn indefinite_input_reports_block_column() {
    let n = 16;
    let mut data = random_spd(n, 5);
    // Sink one trailing diagonal entry far enough to break positive
    // definiteness in the last block column.
    data[(n - 1) * n + (n - 1)] = -100.0;
    let plan = block_plan(n, 4, 2);
    let mut m = MatrixMut::new_contiguous(&mut data, n).unwrap();
    let err = par_potrf(&mut m, &registry(2), &plan, &CholeskyOptions::default()).unwrap_err();
    match err {
        CholForgeError::NotPositiveDefinite { block } => assert_eq!(block, 3),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn front_door_out_of_core_matches_in_core() {
    let n = 32;
    let original = random_spd(n, 41);

    let mut in_core = original.clone();
    let reg = registry(2);
    let plan = factor_in_place(
        &mut MatrixMut::new_contiguous(&mut in_core, n).unwrap(),
        &reg,
        &CholeskyOptions::default(),
    )
    .unwrap();
    assert_eq!(plan.num_blocks(), 1);

    let mut ooc = original.clone();
    let opts = CholeskyOptions::default().with_force_out_of_core(true);
    let plan = factor_in_place(
        &mut MatrixMut::new_contiguous(&mut ooc, n).unwrap(),
        &reg,
        &opts,
    )
    .unwrap();
    assert!(plan.num_blocks() > 1);

    for j in 0..n {
        for i in j..n {
            assert!((in_core[j * n + i] - ooc[j * n + i]).abs() < 1e-9);
        }
    }
}

#[test]
#[cfg(not(feature = "rocm"))]
fn raw_solver_handles_require_the_accelerator_backend() {
    let solver = cholforge::SolverHandle::from_raw(0xdead_beef as *mut std::ffi::c_void).unwrap();
    let err = DeviceRegistry::new(vec![DeviceInfo::new(DeviceId(0), GIB, solver)]).unwrap_err();
    assert!(matches!(err, CholForgeError::UnsupportedDevice));
}

#[test]
fn plan_survives_serialization() {
    let plan = block_plan(20, 4, 2);
    let json = serde_json::to_string(&plan).unwrap();
    let restored: BlockPlan = serde_json::from_str(&json).unwrap();
    assert_eq!(restored.n(), plan.n());
    assert_eq!(restored.blocks(), plan.blocks());

    // The restored plan drives a factorization just like the original.
    let n = 20;
    let original = random_spd(n, 2);
    let mut data = original.clone();
    let mut m = MatrixMut::new_contiguous(&mut data, n).unwrap();
    par_potrf(&mut m, &registry(2), &restored, &CholeskyOptions::default()).unwrap();
    assert_reconstructs(&data, &original, n, 1e-8);
}
