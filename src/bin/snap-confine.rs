fn main() {
    if let Err(e) = snap_confine::cli::run() {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}
