mod animate;
mod args;
mod audio;
mod cleanup;
mod config;
mod error;
mod pipeline;
mod progress;
mod server;
#[cfg(test)]
mod testutil;
mod tts;
mod worker;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::args::{Args, Cmd};
use crate::cleanup::Cleaner;
use crate::pipeline::Pipeline;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = args.pipeline_config()?;
    info!("Starting talking avatar pipeline ({:?} preset)", config.preset);

    match args.command {
        Cmd::Generate { text, image } => {
            let pipeline = Pipeline::new(config)?;
            let record = pipeline.run(&text, image.as_deref()).await;
            println!("{}", serde_json::to_string_pretty(&record)?);
            if !record.success {
                error!(
                    "Generation failed: {}",
                    record.error.as_deref().unwrap_or("unknown error")
                );
                std::process::exit(1);
            }
            info!("Process complete.");
        }
        Cmd::Prune => {
            let cleaner = Cleaner::new(&config.audio_dir, &config.video_dir, config.keep);
            let reports = cleaner.prune_all();
            println!("{}", serde_json::to_string_pretty(&reports)?);
        }
        Cmd::Serve { addr } => {
            let pipeline = Pipeline::new(config)?;
            server::serve(pipeline, addr).await?;
        }
    }
    Ok(())
}
