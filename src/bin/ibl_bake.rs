use std::env;

use ibl_temporal::cli::{run_bake, BakeArgs, USAGE};

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = env::args().skip(1).collect();
    if args.iter().any(|a| a == "-h" || a == "--help") {
        println!("{USAGE}");
        return Ok(());
    }
    let parsed = match BakeArgs::parse(&args) {
        Ok(parsed) => parsed,
        Err(e) => {
            eprintln!("[ibl-bake] {e}");
            eprintln!("{USAGE}");
            std::process::exit(2);
        }
    };
    run_bake(&parsed)
}
