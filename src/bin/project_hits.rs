use anyhow::Context;
use calo_cnn::cli::ProjectArgs;
use calo_cnn::projection::{display_event, event_display_path, project_tree};

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = ProjectArgs::parse()?;
    let n_events = project_tree(&args.input, &args.output, args.quantization)
        .with_context(|| format!("failed to project {:?}", args.input))?;
    println!("{n_events} events written to {:?}", args.output);

    if let Some(event) = args.display {
        let path = event_display_path(&args.output, event);
        display_event(&args.input, event, &path)
            .with_context(|| format!("failed to draw event {event}"))?;
        println!("event {event} drawn to {path:?}");
    }
    Ok(())
}
