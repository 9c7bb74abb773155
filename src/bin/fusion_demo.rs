use spim_reconstruction::config::{load_config, RuntimeConfig};
use spim_reconstruction::diagnostics::{GroupReport, RegistrationReport, RunReport};
use spim_reconstruction::fusion::{fuse_groups, SourceView};
use spim_reconstruction::image::io::{save_max_projection_png, write_json_file};
use spim_reconstruction::synthetic::{
    bead_correspondences, random_beads, rotation_about_y, SyntheticView,
};
use spim_reconstruction::{register_views, Result, ViewId};
use nalgebra::Vector3;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::env;
use std::path::PathBuf;
use std::time::Instant;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    if let Err(err) = run() {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let config = match env::args().nth(1) {
        Some(path) => load_config(&PathBuf::from(path))?,
        None => RuntimeConfig::default(),
    };
    let start = Instant::now();
    let mut report = RunReport::default();

    let scene = &config.scene;
    let mut rng = StdRng::seed_from_u64(scene.seed);
    let center = Vector3::new(
        (scene.dims[0] as f64 - 1.0) / 2.0,
        (scene.dims[1] as f64 - 1.0) / 2.0,
        (scene.dims[2] as f64 - 1.0) / 2.0,
    );
    let margin = 3.0 * scene.bead_sigma;
    let beads = report
        .timings
        .measure("scene", || random_beads(scene.beads, scene.dims, margin, &mut rng));

    let mut acquired = Vec::new();
    for timepoint in 0..scene.timepoints {
        for channel in 0..scene.channels {
            for &angle in &scene.angles {
                let id = ViewId::new(timepoint, channel, angle.round() as u32, 0);
                acquired.push(SyntheticView::acquire(
                    id,
                    rotation_about_y(angle, center),
                    &beads,
                    scene.dims,
                    scene.bead_sigma,
                    scene.detection_noise,
                    &mut rng,
                )?);
            }
        }
    }

    // Beads are shared by all channels of a timepoint, so every pair of views
    // of the same timepoint yields correspondences.
    let mut correspondences = Vec::new();
    for (i, a) in acquired.iter().enumerate() {
        for b in &acquired[i + 1..] {
            if a.id.timepoint == b.id.timepoint {
                correspondences.push(bead_correspondences(a, b));
            }
        }
    }

    let ids: Vec<ViewId> = acquired.iter().map(|v| v.id).collect();
    let registration = register_views(&ids, &correspondences, &config.registration)?;
    report.timings.extend_prefixed("registration", &registration.timings);
    println!(
        "Registration: {} views, avg error {:.4} px (min {:.4}, max {:.4}) after {} iterations",
        ids.len(),
        registration.statistics.avg_error,
        registration.statistics.min_error,
        registration.statistics.max_error,
        registration.outcome.iterations
    );
    report.registration = Some(RegistrationReport::from_result(&registration));

    let views: Vec<SourceView<'_>> = acquired
        .iter()
        .map(|v| SourceView {
            id: v.id,
            volume: v.volume.as_view(),
            model: registration.models[&v.id].clone(),
        })
        .collect();
    let groups = report
        .timings
        .measure("fusion", || fuse_groups(&views, None, &config.fusion));

    for group in &groups {
        let summary = GroupReport::from_result(group);
        match (&group.output, &config.output.preview_dir) {
            (Ok(out), Some(dir)) => {
                for (k, fused) in out.volumes.iter().enumerate() {
                    let path = dir.join(format!("{}_{k}_mip.png", group.key));
                    save_max_projection_png(&fused.volume, &path)?;
                    println!("Preview written to {}", path.display());
                }
            }
            (Err(e), _) => eprintln!("Group {} failed: {e}", group.key),
            _ => {}
        }
        report.groups.push(summary);
    }

    report.timings.total_ms = start.elapsed().as_secs_f64() * 1000.0;
    match &config.output.json_out {
        Some(path) => {
            write_json_file(path, &report)?;
            println!("JSON report written to {}", path.display());
        }
        None => println!("{}", serde_json::to_string_pretty(&report)?),
    }
    Ok(())
}
