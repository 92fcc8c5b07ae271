use crate::config::settings::ConfineConfig;
use crate::config::types::LaunchRequest;
use crate::exec;
use crate::utils::secure_env;
use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "snap-confine",
    version,
    about = "Run an application inside the confinement of its snap"
)]
pub struct Cli {
    /// Run with classic confinement: no private mount namespace
    #[arg(long)]
    pub classic: bool,

    /// Base snap providing the root filesystem
    #[arg(long, value_name = "BASE")]
    pub base: Option<String>,

    /// Security tag of the application, e.g. snap.hello.hello
    #[arg(value_name = "SECURITY_TAG")]
    pub security_tag: String,

    /// Program to execute once confined
    #[arg(value_name = "EXECUTABLE")]
    pub executable: PathBuf,

    /// Arguments passed to the program unchanged
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}

impl Cli {
    /// Combine the command line with `SNAP_INSTANCE_NAME`.
    pub fn into_request(self, instance_name: Option<String>) -> LaunchRequest {
        LaunchRequest {
            instance_name,
            security_tag: self.security_tag,
            executable: self.executable,
            args: self.args,
            base_snap_name: self.base,
            classic: self.classic,
        }
    }
}

extern "C" fn signal_handler(sig: i32) {
    // Async-signal-safe only: raw write(2) and _exit(2). Locks are flocks and
    // go away with the process.
    let msg = b"snap-confine: signal received, exiting\n";
    unsafe {
        libc::write(2, msg.as_ptr() as *const libc::c_void, msg.len());
        libc::_exit(128 + sig);
    }
}

fn setup_signal_handlers() {
    unsafe {
        libc::signal(libc::SIGTERM, signal_handler as usize);
        libc::signal(libc::SIGINT, signal_handler as usize);
    }
}

fn init_logging() {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(log::LevelFilter::Warn);
    builder.format_target(false);

    // A setuid process must not let the caller pick log targets.
    if !secure_env::is_secure_execution() {
        if let Ok(filters) = std::env::var("RUST_LOG") {
            builder.parse_filters(&filters);
        }
    }
    if std::env::var_os("SNAP_CONFINE_DEBUG").is_some() {
        builder.filter_level(log::LevelFilter::Debug);
    }
    let _ = builder.try_init();
}

pub fn run() -> Result<()> {
    setup_signal_handlers();
    init_logging();

    let cli = Cli::parse();
    let request = cli.into_request(std::env::var("SNAP_INSTANCE_NAME").ok());

    match exec::launch_request(&ConfineConfig::default(), request)? {}
}
