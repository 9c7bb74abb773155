mod common;

use approx::assert_abs_diff_eq;
use common::init_logging;
use common::synthetic::{matches_between, point_cloud, rigid, rotation_z};
use nalgebra::Vector3;
use rand::rngs::StdRng;
use rand::SeedableRng;
use spim_reconstruction::synthetic::{
    bead_correspondences, random_beads, rotation_about_y, SyntheticView,
};
use spim_reconstruction::{
    register_views, Error, ModelKind, OptimizeParams, PointMatch, RegistrationParams,
    TileConfiguration, TransformModel, ViewId,
};

#[test]
fn five_degree_rotation_about_z_is_recovered() {
    init_logging();
    let truth = rotation_z(ModelKind::Rigid3D, 5.0);
    // triangle seen by the rotated view (p1) and the reference view (p2)
    let local = [
        Vector3::new(0.0, 0.0, 0.0),
        Vector3::new(100.0, 0.0, 0.0),
        Vector3::new(0.0, 80.0, 0.0),
    ];
    let matches: Vec<PointMatch> = local
        .iter()
        .map(|p| PointMatch::new(*p, truth.apply(p)))
        .collect();

    let mut tc = TileConfiguration::new();
    let reference = tc.add_tile(TransformModel::identity(ModelKind::Rigid3D));
    let rotated = tc.add_tile(TransformModel::identity(ModelKind::Rigid3D));
    tc.connect(rotated, reference, &matches).expect("connect");
    tc.fix_tile(reference).expect("fix");

    let outcome = tc
        .optimize(&OptimizeParams {
            max_allowed_error: 0.01,
            max_iterations: 50,
            max_plateau_width: 5,
        })
        .expect("optimize");

    let l = tc.model(rotated).linear();
    let angle = l[(1, 0)].atan2(l[(0, 0)]).to_degrees();
    assert!((angle - 5.0).abs() < 0.1, "recovered {angle:.4} degrees");
    assert!(outcome.error.average < 0.01);
    assert!(outcome.converged);
    assert!(outcome.iterations <= 50);
}

fn affine_chain() -> (TileConfiguration, Vec<TransformModel>) {
    let truths = vec![
        TransformModel::identity(ModelKind::Affine3D),
        rigid(Vector3::new(0.0, 1.0, 0.2), 12.0, Vector3::new(4.0, -2.0, 1.0)),
        rigid(Vector3::new(1.0, 0.0, 0.0), -8.0, Vector3::new(-3.0, 5.0, 2.0)),
    ];
    let world = point_cloud(12);
    let mut tc = TileConfiguration::new();
    for _ in &truths {
        tc.add_tile(TransformModel::identity(ModelKind::Affine3D));
    }
    for (a, b) in [(0, 1), (1, 2), (0, 2)] {
        tc.connect(a, b, &matches_between(&world, &truths[a], &truths[b]))
            .expect("connect");
    }
    tc.fix_tile(0).expect("fix");
    (tc, truths)
}

#[test]
fn converged_configuration_is_stable_on_rerun() {
    init_logging();
    let (mut tc, truths) = affine_chain();
    let params = OptimizeParams {
        max_allowed_error: 0.01,
        max_iterations: 2000,
        max_plateau_width: 50,
    };
    let first = tc.optimize(&params).expect("first run");
    assert!(first.converged);
    for (t, truth) in truths.iter().enumerate() {
        assert!(tc.model(t).max_parameter_delta(truth) < 1e-3);
    }

    let before: Vec<TransformModel> = (0..tc.len()).map(|t| tc.model(t).clone()).collect();
    let second = tc.optimize(&params).expect("second run");
    assert_eq!(second.iterations, 1);
    assert!(second.converged);
    for (t, model) in before.iter().enumerate() {
        assert!(tc.model(t).max_parameter_delta(model) < 1e-6);
    }
    assert_abs_diff_eq!(second.error.average, first.error.average, epsilon = 1e-6);
}

#[test]
fn new_matches_restart_the_full_optimization() {
    let (mut tc, truths) = affine_chain();
    let params = OptimizeParams {
        max_allowed_error: 0.01,
        max_iterations: 2000,
        max_plateau_width: 20,
    };
    tc.optimize(&params).expect("first run");
    let extra = matches_between(&point_cloud(6), &truths[2], &truths[1]);
    tc.connect(2, 1, &extra).expect("connect");
    let rerun = tc.optimize(&params).expect("rerun");
    assert!(rerun.iterations > 1);
}

/// Like [`affine_chain`], with every `p2` displaced by a fixed sub-pixel offset.
fn noisy_affine_chain() -> TileConfiguration {
    let truths = [
        TransformModel::identity(ModelKind::Affine3D),
        rigid(Vector3::new(0.0, 1.0, 0.2), 12.0, Vector3::new(4.0, -2.0, 1.0)),
        rigid(Vector3::new(1.0, 0.0, 0.0), -8.0, Vector3::new(-3.0, 5.0, 2.0)),
    ];
    let world = point_cloud(12);
    let mut tc = TileConfiguration::new();
    for _ in &truths {
        tc.add_tile(TransformModel::identity(ModelKind::Affine3D));
    }
    for (a, b) in [(0, 1), (1, 2), (0, 2)] {
        let noisy: Vec<PointMatch> = matches_between(&world, &truths[a], &truths[b])
            .into_iter()
            .enumerate()
            .map(|(i, m)| {
                let t = (i + 3 * a + 7 * b) as f64;
                let offset = Vector3::new((t * 1.3).sin(), (t * 2.1).cos(), (t * 0.7).sin()) * 0.1;
                PointMatch::new(m.p1, m.p2 + offset)
            })
            .collect();
        tc.connect(a, b, &noisy).expect("connect");
    }
    tc.fix_tile(0).expect("fix");
    tc
}

#[test]
fn stricter_tolerance_after_convergence_runs_the_full_optimization() {
    init_logging();
    let mut tc = noisy_affine_chain();
    let loose = OptimizeParams {
        max_allowed_error: 1.0,
        max_iterations: 2000,
        max_plateau_width: 20,
    };
    let first = tc.optimize(&loose).expect("loose run");
    assert!(first.converged);
    assert!(first.error.average > 1e-3, "residual {}", first.error.average);

    let strict = OptimizeParams {
        max_allowed_error: 1e-3,
        max_iterations: 300,
        max_plateau_width: 20,
    };
    let second = tc.optimize(&strict).expect("strict run");
    assert!(!second.converged);
    assert_eq!(second.iterations, 300);

    let third = tc.optimize(&strict).expect("repeated strict run");
    assert_eq!(third.iterations, second.iterations);
    assert_eq!(third.converged, second.converged);
}

#[test]
fn pre_align_reaches_every_tile_of_a_connected_graph() {
    init_logging();
    let truths = [
        TransformModel::identity(ModelKind::Rigid3D),
        rigid(Vector3::new(0.0, 1.0, 0.0), 40.0, Vector3::new(10.0, 0.0, 0.0)),
        rigid(Vector3::new(0.0, 1.0, 0.0), 80.0, Vector3::new(20.0, 5.0, 0.0)),
        rigid(Vector3::new(1.0, 1.0, 0.0), 120.0, Vector3::new(0.0, 0.0, 30.0)),
    ];
    let world = point_cloud(8);
    let mut tc = TileConfiguration::new();
    for _ in &truths {
        tc.add_tile(TransformModel::identity(ModelKind::Rigid3D));
    }
    for (a, b) in [(0, 1), (1, 2), (2, 3)] {
        tc.connect(a, b, &matches_between(&world, &truths[a], &truths[b]))
            .expect("connect");
    }
    tc.fix_tile(0).expect("fix");

    let unaligned = tc.pre_align().expect("pre-align");
    assert!(unaligned.is_empty());
    for (t, truth) in truths.iter().enumerate() {
        assert!(
            tc.model(t).max_parameter_delta(truth) < 1e-6,
            "tile {t} not aligned"
        );
    }
}

#[test]
fn pre_align_reports_the_disconnected_component() {
    let truths: Vec<TransformModel> = (0..5)
        .map(|i| rigid(Vector3::new(0.0, 0.0, 1.0), 10.0 * i as f64, Vector3::zeros()))
        .collect();
    let world = point_cloud(8);
    let mut tc = TileConfiguration::new();
    for _ in &truths {
        tc.add_tile(TransformModel::identity(ModelKind::Rigid3D));
    }
    for (a, b) in [(0, 1), (1, 2), (3, 4)] {
        tc.connect(a, b, &matches_between(&world, &truths[a], &truths[b]))
            .expect("connect");
    }
    tc.fix_tile(1).expect("fix");

    let mut unaligned = tc.pre_align().expect("pre-align");
    unaligned.sort();
    assert_eq!(unaligned, vec![3, 4]);
}

#[test]
fn pre_align_needs_more_than_the_minimal_match_count() {
    let truth = rigid(Vector3::new(0.0, 1.0, 0.0), 25.0, Vector3::new(3.0, 0.0, -2.0));
    let reference = TransformModel::identity(ModelKind::Rigid3D);
    let required = ModelKind::Rigid3D.min_matches();

    let mut tc = TileConfiguration::new();
    tc.add_tile(TransformModel::identity(ModelKind::Rigid3D));
    tc.add_tile(TransformModel::identity(ModelKind::Rigid3D));
    tc.connect(1, 0, &matches_between(&point_cloud(required), &truth, &reference))
        .expect("connect");
    tc.fix_tile(0).expect("fix");
    assert_eq!(tc.pre_align().expect("pre-align"), vec![1]);
    assert_eq!(
        tc.model(1).max_parameter_delta(&TransformModel::identity(ModelKind::Rigid3D)),
        0.0
    );

    let mut tc = TileConfiguration::new();
    tc.add_tile(TransformModel::identity(ModelKind::Rigid3D));
    tc.add_tile(TransformModel::identity(ModelKind::Rigid3D));
    tc.connect(1, 0, &matches_between(&point_cloud(required + 1), &truth, &reference))
        .expect("connect");
    tc.fix_tile(0).expect("fix");
    assert!(tc.pre_align().expect("pre-align").is_empty());
    assert!(tc.model(1).max_parameter_delta(&truth) < 1e-6);
}

fn colinear_affine_pair() -> TileConfiguration {
    let matches: Vec<PointMatch> = (0..5)
        .map(|i| {
            let p = Vector3::new(1.0, 2.0, 0.5) * i as f64;
            PointMatch::new(p, p + Vector3::new(2.0, -1.0, 0.0))
        })
        .collect();
    let mut tc = TileConfiguration::new();
    tc.add_tile(TransformModel::identity(ModelKind::Affine3D));
    tc.add_tile(TransformModel::identity(ModelKind::Affine3D));
    tc.connect(1, 0, &matches).expect("connect");
    tc.fix_tile(0).expect("fix");
    tc
}

#[test]
fn colinear_matches_fail_optimization_and_pre_alignment() {
    let err = colinear_affine_pair()
        .optimize(&OptimizeParams::default())
        .unwrap_err();
    assert!(
        matches!(err, Error::IllConditioned { model: ModelKind::Affine3D, .. }),
        "{err}"
    );

    let err = colinear_affine_pair().pre_align().unwrap_err();
    assert!(
        matches!(err, Error::IllConditioned { model: ModelKind::Affine3D, .. }),
        "{err}"
    );
}

#[test]
fn bead_scene_registration_recovers_the_acquisition_angles() {
    init_logging();
    let dims = [40, 40, 40];
    let center = Vector3::new(19.5, 19.5, 19.5);
    let mut rng = StdRng::seed_from_u64(11);
    let beads = random_beads(30, dims, 8.0, &mut rng);
    let views: Vec<SyntheticView> = [0.0, 30.0, 60.0]
        .iter()
        .map(|&angle| {
            SyntheticView::acquire(
                ViewId::angle(angle as u32),
                rotation_about_y(angle, center),
                &beads,
                dims,
                1.0,
                0.0,
                &mut rng,
            )
            .expect("acquire")
        })
        .collect();
    let sets = vec![
        bead_correspondences(&views[1], &views[0]),
        bead_correspondences(&views[2], &views[1]),
        bead_correspondences(&views[2], &views[0]),
    ];
    let ids: Vec<ViewId> = views.iter().map(|v| v.id).collect();
    let params = RegistrationParams {
        model: ModelKind::Rigid3D,
        optimize: OptimizeParams {
            max_allowed_error: 0.01,
            max_iterations: 500,
            max_plateau_width: 20,
        },
        ..RegistrationParams::default()
    };

    let result = register_views(&ids, &sets, &params).expect("registration");
    assert!(result.unresolved.is_empty());
    assert!(result.statistics.avg_error < 0.01);
    for view in &views {
        let model = &result.models[&view.id];
        assert!(
            model.max_parameter_delta(&view.truth) < 1e-4,
            "view {} deviates from its acquisition transform",
            view.id
        );
    }
    assert!(result.statistics.min_ratio > 0.0);
    assert!(result.statistics.max_ratio <= 1.0);
}
