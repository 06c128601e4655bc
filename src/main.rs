use std::{
    path::{Path, PathBuf},
    process::ExitCode,
    sync::Arc,
};

use clap::Parser;
use fog_vpl::{
    camera::PerspectiveCamera,
    error::Result,
    fog_system::{
        density_field::{DensityField, NoiseParams},
        fog_volume::FogVolume,
        preintegration::PreintegratedDensity,
    },
    raytrace_system::scene::{Scene, SceneDescription, cornell_box},
    settings::Settings,
    vpl_system::{
        light_array::LightArray, light_manager::LightManager, photon_tracer,
        point_light::PrimaryLight,
    },
};
use rand::{SeedableRng, rngs::StdRng};
use threadpool::ThreadPool;

#[derive(Clone, Debug, Parser)]
#[command(author, about, version)]
struct Args {
    /// Settings file; every setting not listed there keeps its default.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Scene file, either Wavefront OBJ (`.obj`) or a JSON scene description. The
    /// built-in Cornell box is used if not specified.
    #[arg(long, value_name = "FILE")]
    scene: Option<PathBuf>,

    /// Seed for the photon tracer.
    ///
    /// If not specified, a randomly chosen seed will be used.
    #[arg(long)]
    seed: Option<u64>,

    /// Number of VPLs to trace, overriding the settings file.
    #[arg(long)]
    vpls: Option<usize>,

    /// Also integrate the fog density along the camera rays. A cached grid is loaded
    /// even without this flag.
    #[arg(long)]
    preintegrate: bool,

    /// Where generated density grids and images are written.
    #[arg(long, value_name = "DIR", default_value = ".")]
    output_dir: PathBuf,
}

fn load_fog(
    scene: &Scene,
    settings: &Settings,
    output_dir: &Path,
    preintegrate: bool,
) -> Result<FogVolume> {
    let fog_settings = &settings.fog;
    let density_path = fog_settings
        .density_file
        .clone()
        .unwrap_or_else(|| output_dir.join("density.3dd"));
    let params = NoiseParams {
        frequency: fog_settings.frequency,
        amplitude: fog_settings.amplitude,
        octaves: fog_settings.octaves,
        seed: fog_settings.seed,
    };
    let field = DensityField::load_or_generate(
        scene.fog_bounds(),
        &density_path,
        fog_settings.resolution,
        &params,
    )?;

    let preintegrated_path = fog_settings
        .preintegrated_file
        .clone()
        .unwrap_or_else(|| output_dir.join("density.3dt"));
    let preintegrated = if preintegrate || preintegrated_path.exists() {
        let camera = PerspectiveCamera::from_settings(&settings.camera);
        let pool = ThreadPool::new(
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
        );
        Some(PreintegratedDensity::load_or_compute(
            &preintegrated_path,
            &field,
            &camera,
            scene.surfaces(),
            &pool,
        )?)
    } else {
        None
    };

    let mut fog = FogVolume::new(
        field,
        fog_settings.maj_ext_k,
        fog_settings.abs_k,
        fog_settings.sca_k,
    );
    if let Some(preintegrated) = preintegrated {
        if preintegrate {
            let last_slice = preintegrated.resolution()[2] - 1;
            let image_path = output_dir.join("preintegrated.png");
            preintegrated.slice_image(last_slice).save(&image_path)?;
            log::info!("wrote last preintegrated slice to {}", image_path.display());
        }
        fog.set_preintegrated(preintegrated);
    }
    Ok(fog)
}

fn run(args: &Args) -> Result<()> {
    let mut settings = match &args.config {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };
    if let Some(vpls) = args.vpls {
        settings.tracer.max_vpls = vpls;
    }
    std::fs::create_dir_all(&args.output_dir)?;

    let description = match &args.scene {
        Some(path) => SceneDescription::load(path)?,
        None => cornell_box(),
    };
    let surfaces = Arc::new(description.build(&settings.kdtree)?);
    let mut scene = Scene::new(surfaces, settings.fog.max_fog_height);

    if settings.fog.enabled {
        let fog = load_fog(&scene, &settings, &args.output_dir, args.preintegrate)?;
        scene.add_fog(fog);
    } else if args.preintegrate {
        log::warn!("no fog to preintegrate");
    }

    let seed = args.seed.unwrap_or_else(rand::random);
    log::info!("tracing {} VPLs with seed {seed}", settings.tracer.max_vpls);
    let mut rng = StdRng::seed_from_u64(seed);

    let mut manager = LightManager::new(settings.primary_light.clone(), settings.tracer.clone());
    let mut ppls: LightArray<PrimaryLight> = LightArray::new(1);
    let mut vpls = LightArray::new(settings.tracer.max_vpls);
    let target = photon_tracer::default_target(&manager.primary_light().position);

    match manager.update_lights(&scene, &target, &mut ppls, &mut vpls, &mut rng)? {
        Some(stats) => log::info!(
            "{} VPLs ({} in fog, {} on surfaces) from {} paths, total intensity {:?}",
            stats.vpls,
            stats.medium_vpls,
            stats.surface_vpls,
            stats.paths,
            vpls.total_intensity().as_slice()
        ),
        None => log::info!("global illumination disabled, only the primary light is lit"),
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err}");
            ExitCode::FAILURE
        }
    }
}
