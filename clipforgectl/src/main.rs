use clap::Parser;

fn main() {
    let cli = clipforgectl::Cli::parse();
    if let Err(err) = clipforgectl::run(cli) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
