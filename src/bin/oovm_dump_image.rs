use clap::Parser;
use failure::Fail;
use oovm::image::{self, binary_format::BinaryFormat, text_format::TextFormat, ImageFormat};
use std::path::PathBuf;

/// Convert a program image between the binary and text formats.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Image to read, in either format
    input: PathBuf,

    /// Where to write the converted image
    output: PathBuf,

    /// Write the binary format instead of text
    #[arg(long, conflicts_with = "text")]
    binary: bool,

    /// Write the text format (the default)
    #[arg(long)]
    text: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let cli = Cli::parse();

    let image = image::load_any(&cli.input).map_err(|e| e.compat())?;
    log::info!(
        "{}: {} types, {} methods",
        cli.input.display(),
        image.types.len(),
        image.methods.len()
    );
    let saved = if cli.binary {
        BinaryFormat::save(&cli.output, &image)
    } else {
        TextFormat::save(&cli.output, &image)
    };
    saved.map_err(|e| e.compat())?;
    Ok(())
}
