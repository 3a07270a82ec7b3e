use std::{env, path::PathBuf};

use anyhow::Context;
use log::info;

use flying_objects::{config::PipelineSpec, training::TrainerBuilder};

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let spec = match env::args().nth(1) {
        Some(path) => {
            let path = PathBuf::from(path);
            PipelineSpec::from_file(&path)
                .with_context(|| format!("loading config {}", path.display()))?
        }
        None => PipelineSpec::default(),
    };

    info!(
        "training on {} for {} epochs, batch size {}",
        spec.data_root.display(),
        spec.n_epochs,
        spec.batch_size
    );

    let mut trainer = TrainerBuilder::new()
        .build(&spec)
        .context("building the pipeline")?;
    trainer.run().context("running the pipeline")?;

    Ok(())
}
