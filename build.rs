//! Build script rendering the `volctl` manual pages.
//!
//! `volctl.1` documents the global flags (`--driver`, `--debug`, `--format`)
//! and `volctl-volume.1` documents the volume lifecycle subcommands. Both are
//! written to `OUT_DIR` from the same clap definitions the binary parses.

use std::env;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use clap::CommandFactory;
use clap_mangen::Man;

#[path = "src/cli/mod.rs"]
mod cli;

use cli::Cli;

fn render(command: clap::Command, target: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let mut buffer = Vec::new();
    Man::new(command).render(&mut buffer)?;
    File::create(target)?.write_all(&buffer)?;
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut stdout = std::io::stdout();
    writeln!(stdout, "cargo:rerun-if-changed=build.rs")?;
    writeln!(stdout, "cargo:rerun-if-changed=src/cli/mod.rs")?;

    let out_dir = env::var_os("OUT_DIR").map(PathBuf::from).ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::NotFound, "OUT_DIR was not set")
    })?;

    let root = Cli::command();
    if let Some(volume) = root.find_subcommand("volume") {
        render(
            volume.clone().name("volctl-volume"),
            &out_dir.join("volctl-volume.1"),
        )?;
    }
    render(root, &out_dir.join("volctl.1"))?;

    Ok(())
}
