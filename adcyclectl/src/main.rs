use clap::Parser;

fn main() {
    let cli = adcyclectl::Cli::parse();
    adcyclectl::init_tracing(cli.verbose);
    if let Err(err) = adcyclectl::run(cli) {
        eprintln!("error: {err}");
        std::process::exit(err.exit_code());
    }
}
