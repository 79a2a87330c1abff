use argh::FromArgs;
use rayon::prelude::*;
use synshadow::{
    common::*,
    config::{Config, DiscriminatorKind, GenerateConfig},
    dataset::{SynthDataset, TrainingSample},
    model::{global_input_channels, patch_input_channels, Discriminator},
    utils,
};

lazy_static::lazy_static! {
    static ref SHUTDOWN_FLAG: AtomicBool = AtomicBool::new(false);
}

/// Renders synthetic shadow composites from shadow-free images and mattes.
#[derive(FromArgs)]
struct Args {
    /// the config file.
    #[argh(option, default = "PathBuf::from(\"config.json5\")")]
    config: PathBuf,
    /// build the discriminator and log its output shapes.
    #[argh(switch)]
    inspect_discriminator: bool,
}

#[derive(Debug, Serialize)]
struct IndexRecord {
    name: String,
    target_path: PathBuf,
    mask_path: PathBuf,
}

fn main() -> Fallible<()> {
    pretty_env_logger::init();

    // Set signal handler
    ctrlc::set_handler(|| {
        warn!("Interrupted by user");
        SHUTDOWN_FLAG.store(true, Ordering::SeqCst);
    })?;

    // Parse arguments
    let args: Args = argh::from_env();

    // load config
    let config = Config::open(&args.config)?;

    if args.inspect_discriminator {
        inspect_discriminator(&config)?;
    }

    match &config.generate {
        Some(generate) => render(&config, generate)?,
        None => {
            if !args.inspect_discriminator {
                warn!("the config has no generate section, nothing to do");
            }
        }
    }

    Ok(())
}

fn inspect_discriminator(config: &Config) -> Result<()> {
    let disc_config = &config.discriminator;
    let vs = nn::VarStore::new(config.device);
    let disc = Discriminator::from_config(&vs.root() / "discriminator", disc_config)?;

    let (in_c, size) = match disc_config.kind {
        DiscriminatorKind::Multiscale { .. } => (
            patch_input_channels(disc_config)?,
            config.transform.crop_size as i64,
        ),
        DiscriminatorKind::Global { input_size } => {
            (global_input_channels(disc_config)?, input_size as i64)
        }
    };

    let input = Tensor::randn(&[1, in_c, size, size], (Kind::Float, config.device));
    let output = tch::no_grad(|| disc.forward_t(&input, false));

    info!("discriminator input shape {:?}", input.size());
    for (index, layers) in output.scales.iter().enumerate() {
        let shapes = layers.iter().map(|layer| format!("{:?}", layer.size())).join(", ");
        info!("scale {}: {}", index, shapes);
    }

    Ok(())
}

fn render(config: &Config, generate: &GenerateConfig) -> Result<()> {
    let GenerateConfig {
        output_dir,
        num_samples,
        num_workers,
    } = generate;

    // Load dataset
    info!("Loading dataset");
    let dataset = SynthDataset::open(config)?;

    let dirs = ["input", "target", "mask"].map(|name| output_dir.join(name));
    for dir in &dirs {
        fs::create_dir_all(dir)?;
    }

    let num_workers = num_workers.map(|num| num.get()).unwrap_or_else(num_cpus::get);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(num_workers)
        .build()?;
    info!("rendering {} samples on {} workers", num_samples, num_workers);

    let normalized = config.transform.normalize;
    let records: Vec<_> = pool.install(|| {
        (0..*num_samples)
            .into_par_iter()
            .filter_map(|step| {
                if SHUTDOWN_FLAG.load(Ordering::SeqCst) {
                    return None;
                }

                let name = format!("{:06}.png", step);
                // targets repeat once steps pass the dataset size, the draws do not
                let index = step % dataset.len();
                let result = dataset.sample_at(index, step).and_then(|sample| {
                    save_sample(&sample, &dirs, &name, normalized)?;
                    Ok(IndexRecord {
                        name,
                        target_path: sample.path,
                        mask_path: sample.mask_path,
                    })
                });

                match result {
                    Ok(record) => Some((step, record)),
                    Err(err) => {
                        warn!("skip sample {}: {:#}", step, err);
                        None
                    }
                }
            })
            .collect()
    });

    let records = records
        .into_iter()
        .sorted_by_key(|(step, _)| *step)
        .map(|(_, record)| record)
        .collect_vec();

    let index_path = output_dir.join("index.json");
    let file = fs::File::create(&index_path)?;
    serde_json::to_writer_pretty(file, &records)?;
    info!(
        "wrote {} samples to {}",
        records.len(),
        output_dir.display()
    );

    Ok(())
}

fn save_sample(
    sample: &TrainingSample,
    dirs: &[PathBuf; 3],
    name: &str,
    normalized: bool,
) -> Result<()> {
    let denormalize = |tensor: &Tensor| {
        if normalized {
            (tensor + 1.0) / 2.0
        } else {
            tensor.shallow_clone()
        }
    };

    let [input_dir, target_dir, mask_dir] = dirs;
    utils::tensor_to_image(&denormalize(&sample.input))?.save(input_dir.join(name))?;
    utils::tensor_to_image(&denormalize(&sample.target))?.save(target_dir.join(name))?;
    utils::tensor_to_image(&sample.mask)?.save(mask_dir.join(name))?;
    Ok(())
}
