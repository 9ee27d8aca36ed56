use clap::Parser;
use log::{error, info};
use oovm::{image, ExitStatus, StreamConsole, VmConfig};
use std::path::PathBuf;
use std::process;

#[derive(Parser, Debug)]
#[command(author, version, about = "Run a program image", long_about = None)]
struct Cli {
    /// Program image, binary or text (detected by magic)
    #[arg(help = "The image to run")]
    image: PathBuf,

    #[command(flatten)]
    config: VmConfig,
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let image = match image::load_any(&cli.image) {
        Ok(image) => image,
        Err(err) => {
            eprintln!("Error loading {}: {}", cli.image.display(), err);
            process::exit(1);
        }
    };
    info!("loaded {}", cli.image.display());

    match oovm::run(&image, cli.config, StreamConsole::stdio()) {
        Ok(ExitStatus::Completed) => {}
        Ok(ExitStatus::Halted(msg)) => {
            eprintln!("Halted: {}", msg);
            process::exit(2);
        }
        Err(err) => {
            error!("{}", err);
            eprintln!("Error executing {}: {}", cli.image.display(), err);
            process::exit(1);
        }
    }
}
