fn main() {
    redline_cli::init_logging();

    if let Err(error) = redline_cli::run(std::env::args_os()) {
        eprintln!("{error:#}");
        std::process::exit(1);
    }
}
