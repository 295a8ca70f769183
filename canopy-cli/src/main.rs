//! Canopy terminal renderer
//!
//! Renders the built-in demo trees:
//! - `canopy render story --stream` prints every progressive snapshot
//! - `canopy step tools` expands the tree one level per step
//! - `canopy extract tools --tag Tool` pulls tool calls out and resumes them

mod demos;

use canopy::{debug_parts, debug_tree, RenderConfig, Renderer, Stepper};
use clap::{Parser, Subcommand};
use demos::Demo;
use futures::StreamExt;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "canopy")]
#[command(author, version, about = "Streaming renderer for lazy component trees", long_about = None)]
struct Cli {
    /// Path to a renderer configuration file (TOML format)
    #[arg(long, env = "CANOPY_CONFIG")]
    config: Option<PathBuf>,

    /// Print per-component metrics as JSON after rendering
    #[arg(long)]
    metrics: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Render a demo tree to text
    Render {
        #[arg(value_enum)]
        demo: Demo,

        /// Print every intermediate snapshot
        #[arg(long)]
        stream: bool,
    },

    /// Expand a demo tree one level at a time
    Step {
        #[arg(value_enum)]
        demo: Demo,
    },

    /// Stop on tagged elements, print them, then resume them
    Extract {
        #[arg(value_enum)]
        demo: Demo,

        /// Element name to stop on (repeatable)
        #[arg(long = "tag", required = true)]
        tags: Vec<String>,
    },
}

fn load_config(cli: &Cli) -> anyhow::Result<RenderConfig> {
    let mut config = match &cli.config {
        Some(path) => RenderConfig::load(path)?.merge_env(),
        None => RenderConfig::from_env(),
    };
    if cli.metrics {
        config.collect_metrics = true;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    let directive = config.log_filter.as_deref().unwrap_or("canopy=info");
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(directive.parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Some(path) = &cli.config {
        info!("Using configuration: {}", path.display());
    }
    let renderer = Renderer::from_config(config);

    match cli.command {
        Commands::Render { demo, stream } => {
            info!(?demo, stream, "rendering demo");
            if stream {
                let mut snapshots = renderer.render_stream(demo.build());
                let mut index = 0;
                while let Some(snapshot) = snapshots.next().await {
                    index += 1;
                    println!("--- snapshot {} ---\n{}", index, snapshot?);
                }
            } else {
                print!("{}", renderer.render(demo.build()).await?);
            }
        }
        Commands::Step { demo } => {
            let tree = demo.build();
            println!("tree: {}", debug_tree(&tree));
            let mut stepper = Stepper::with_renderer(renderer.clone(), tree).await?;
            println!("step 0: {}", stepper.output());
            while !stepper.is_settled() {
                stepper.step().await?;
                println!("step {}: {}", stepper.steps(), stepper.output());
            }
        }
        Commands::Extract { demo, tags } => {
            let tags: Vec<&str> = tags.iter().map(String::as_str).collect();
            let extraction = renderer.extract(demo.build(), &tags).await?;
            println!("text: {:?}", extraction.text());
            println!("snapshot: {}", debug_parts(&extraction.parts));
            let elements = extraction.elements();
            let outputs = extraction.resume().await?;
            for (element, output) in elements.iter().zip(outputs) {
                println!("{} -> {:?}", debug_parts(&[canopy::Part::Element(element.clone())]), output);
            }
        }
    }

    if let Some(metrics) = renderer.metrics() {
        println!("{}", serde_json::to_string_pretty(&metrics.snapshot())?);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parsing() {
        let cli = Cli::parse_from(["canopy", "--metrics", "render", "story", "--stream"]);
        assert!(cli.metrics);
        assert!(cli.config.is_none());
        match cli.command {
            Commands::Render { demo, stream } => {
                assert_eq!(demo, Demo::Story);
                assert!(stream);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_extract_requires_tags() {
        assert!(Cli::try_parse_from(["canopy", "extract", "tools"]).is_err());
        let cli = Cli::try_parse_from(["canopy", "extract", "tools", "--tag", "Tool", "--tag", "Answer"])
            .unwrap();
        match cli.command {
            Commands::Extract { tags, .. } => assert_eq!(tags, vec!["Tool", "Answer"]),
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
