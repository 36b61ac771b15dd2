use std::fs::File;
use std::os::fd::AsFd as _;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::anyhow;
use anyhow::Context as _;
use clap::Parser;
use fhprobe::probe;
use fhprobe::probe::Target;
use fhprobe::AccessMode;
use fhprobe::EncodeOptions;
use fhprobe::ProbeError;
use fhprobe::Status;

/// Check that PATH survives a name_to_handle_at / open_by_handle_at round trip
#[derive(Parser)]
#[command(version)]
struct Command {
    path: PathBuf,

    /// Resolve PATH relative to this directory instead of the working directory
    #[arg(short = 'C', long)]
    directory: Option<PathBuf>,

    /// Handle payload bytes to offer on the first attempt
    #[arg(short = 'b', long, default_value_t = fhprobe::MAX_HANDLE_SZ)]
    max_bytes: u32,

    /// Fail instead of retrying with the size the kernel asks for
    #[arg(long)]
    no_retry: bool,

    /// Follow PATH if it is a symbolic link
    #[arg(short = 'L', long)]
    follow: bool,

    #[arg(short, long, value_enum, default_value = "read-only")]
    access: AccessMode,

    /// Print the handle and the identity of the reopened file
    #[arg(short, long)]
    dump: bool,
}

fn main() -> ExitCode {
    pretty_env_logger::init_timed();

    let command = Command::parse();

    match run(&command) {
        Ok(()) => Status::Success.into(),
        Err(error) => {
            eprintln!("{:#}", error);
            error
                .downcast_ref::<ProbeError>()
                .map_or(Status::Failure, Status::from)
                .into()
        }
    }
}

fn run(command: &Command) -> anyhow::Result<()> {
    let directory = command
        .directory
        .as_ref()
        .map(|dir| {
            File::open(dir).with_context(|| anyhow!("Failed to open {}", dir.display()))
        })
        .transpose()?;

    let target = Target {
        dir: directory.as_ref().map(|dir| dir.as_fd()),
        path: &command.path,
        encode: EncodeOptions {
            max_payload: command.max_bytes,
            follow_symlinks: command.follow,
            retry: !command.no_retry,
        },
        access: command.access,
    };

    let report = probe::run(&target)?;

    log::info!(
        "{}: mount {} dev={} ino={}",
        command.path.display(),
        report.volume,
        report.device,
        report.inode
    );

    if command.dump {
        println!("path = {}", command.path.display());
        println!("  mount_id = {}", report.volume);
        println!("  handle = {}", report.handle);
        println!("  dev = {} ino = {}", report.device, report.inode);
    }

    Ok(())
}
