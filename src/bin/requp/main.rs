//! `requp`

mod cli;

use std::process;

use clap::Parser as _;

fn main() {
    let args = cli::Cli::parse();
    args.init_logger();

    if let Err(err) = args.exec() {
        eprintln!("Command failed due to unhandled error: {err}");
        for cause in err.chain().skip(1) {
            eprintln!("Caused by: {cause}");
        }
        process::exit(1);
    }
}
