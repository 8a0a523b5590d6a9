//! Build script for generating the `loadctl` man page.
use std::env;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

use clap::CommandFactory;
use clap_mangen::Man;

#[path = "src/cli.rs"]
mod cli;

use cli::Flags;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut stdout = std::io::stdout();
    writeln!(stdout, "cargo:rerun-if-changed=build.rs")?;
    writeln!(stdout, "cargo:rerun-if-changed=src/cli.rs")?;

    let out_dir = PathBuf::from(env::var_os("OUT_DIR").ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::NotFound, "OUT_DIR was not set")
    })?);

    let mut buffer = Vec::new();
    Man::new(Flags::command()).render(&mut buffer)?;

    let mut file = File::create(out_dir.join("loadctl.1"))?;
    file.write_all(&buffer)?;

    Ok(())
}
