use clap::Parser;
use tokamak_jit_bootstrap::cli::{Args, run};

fn main() {
    let args = Args::parse();
    if let Err(e) = run(args) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
