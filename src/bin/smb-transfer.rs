//! SMB2 file transfer CLI

use clap::{Parser, Subcommand};
use smb_transfer::auth::Credentials;
use smb_transfer::{
    ClientConfig, Endpoint, NetBiosResolver, PartialPolicy, ResolverConfig, Session, SmbError,
    TransferOutcome, TransferTask, TreeHandle,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "smb-transfer")]
#[command(about = "Transfer files to and from SMB2 shares", long_about = None)]
struct Args {
    /// NetBIOS name or IP address of the server
    #[arg(short = 'H', long)]
    host: String,

    /// SMB port; 139 runs the NetBIOS session service first
    #[arg(short = 'p', long)]
    port: Option<u16>,

    /// Username for authentication
    #[arg(short = 'u', long)]
    username: Option<String>,

    /// Password for authentication
    #[arg(short = 'P', long, default_value = "")]
    password: String,

    /// Domain/workgroup
    #[arg(short = 'd', long, default_value = "")]
    domain: String,

    /// Fall back to guest access when the credentials are rejected
    #[arg(long)]
    guest: bool,

    /// Share name to connect to
    #[arg(short = 's', long)]
    share: Option<String>,

    /// Name server for directed queries instead of broadcast
    #[arg(long)]
    name_server: Option<SocketAddr>,

    /// Seconds a request may stall before the session is dropped
    #[arg(long, default_value = "30")]
    io_timeout: u64,

    /// Log level
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Resolve the host and print its address and service type
    Resolve,

    /// List a remote directory
    Ls {
        #[arg(default_value = "/")]
        path: String,
    },

    /// Download a file, or a directory with -r
    Get {
        remote: String,
        /// Local path (defaults to the remote file name)
        local: Option<PathBuf>,
        /// Download a directory tree
        #[arg(short = 'r', long)]
        recursive: bool,
        /// Continue from the length of an existing local file
        #[arg(long)]
        resume: bool,
        /// Remove the partial file if the download does not finish
        #[arg(long)]
        discard_partial: bool,
    },

    /// Upload a file
    Put {
        local: PathBuf,
        /// Remote path (defaults to the local file name)
        remote: Option<String>,
        /// Byte offset to continue an interrupted upload from
        #[arg(long, default_value = "0")]
        offset: u64,
    },

    /// Delete a file or a directory tree
    Rm { path: String },

    /// Create a directory and its missing parents
    Mkdir { path: String },

    /// Move or rename within the share
    Mv { from: String, to: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&args.log_level)),
        )
        .init();

    let resolver = NetBiosResolver::new(ResolverConfig {
        name_server: args.name_server,
        ..ResolverConfig::default()
    });
    let mut endpoint = resolver.resolve(&args.host).await.map_err(report)?;
    if let Some(port) = args.port {
        endpoint = endpoint.with_port(port);
    }

    if let Commands::Resolve = args.command {
        println!(
            "{}\t{}\t{:?}",
            endpoint.host_name(),
            endpoint.addr(),
            endpoint.service_type()
        );
        return Ok(());
    }

    let share = args
        .share
        .clone()
        .ok_or("a share is required for this command (--share)")?;
    let session = open_session(&args, endpoint).await?;
    let tree = session.connect_share(&share).await.map_err(report)?;
    tracing::info!("Connected to \\\\{}\\{}", session.endpoint().host_name(), share);

    let result = run(&tree, args.command).await;

    let _ = tree.disconnect().await;
    session.disconnect().await;
    result
}

async fn open_session(args: &Args, endpoint: Endpoint) -> Result<Session, SmbError> {
    let mut config = ClientConfig {
        io_timeout: Duration::from_secs(args.io_timeout),
        ..ClientConfig::default()
    }
    .with_guest(args.guest || args.username.is_none());
    if let Some(username) = &args.username {
        tracing::info!("Authenticating as {}\\{}", args.domain, username);
        config = config.with_credentials(Credentials::new(
            username.clone(),
            args.password.clone(),
            args.domain.clone(),
        ));
    }

    let session = Session::open(endpoint, config).await.map_err(report)?;
    if session.is_guest() {
        tracing::info!("Using guest access");
    }
    Ok(session)
}

async fn run(tree: &TreeHandle, command: Commands) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Commands::Resolve => {}

        Commands::Ls { path } => {
            let mut listing = tree.list_directory(&path).await.map_err(report)?;
            while let Some(entry) = listing.next_entry().await.map_err(report)? {
                let kind = if entry.is_directory { "<DIR>" } else { "" };
                println!(
                    "{:>12} {:>5} {} {}",
                    entry.size,
                    kind,
                    entry.modified.format("%Y-%m-%d %H:%M"),
                    entry.name
                );
            }
        }

        Commands::Get {
            remote,
            local,
            recursive,
            resume,
            discard_partial,
        } => {
            let local = local.unwrap_or_else(|| PathBuf::from(remote_file_name(&remote)));
            let task = if recursive {
                tree.download_directory_task(&remote, local)
            } else if resume {
                TransferTask::new(
                    tree.clone(),
                    smb_transfer::TransferRequest::Download {
                        remote: remote.clone(),
                        local,
                        resume: true,
                    },
                )
            } else {
                tree.download_task(&remote, local)
            };
            let policy = if discard_partial {
                PartialPolicy::Delete
            } else {
                PartialPolicy::Keep
            };
            drive(task.with_partial_policy(policy)).await?;
        }

        Commands::Put {
            local,
            remote,
            offset,
        } => {
            let remote = remote.unwrap_or_else(|| {
                local
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or("upload")
                    .to_string()
            });
            let task = TransferTask::new(
                tree.clone(),
                smb_transfer::TransferRequest::Upload {
                    local,
                    remote,
                    offset,
                },
            );
            drive(task).await?;
        }

        Commands::Rm { path } => drive(tree.delete_task(&path)).await?,
        Commands::Mkdir { path } => drive(tree.create_directory_task(&path)).await?,
        Commands::Mv { from, to } => drive(tree.move_task(&from, &to)).await?,
    }
    Ok(())
}

/// Start `task`, log its progress and cancel it on Ctrl-C
async fn drive(task: TransferTask) -> Result<(), Box<dyn std::error::Error>> {
    let mut progress = task.subscribe_progress();
    task.start()?;

    let reporter = tokio::spawn(async move {
        while progress.changed().await.is_ok() {
            let snapshot = *progress.borrow_and_update();
            match snapshot.fraction() {
                Some(fraction) => tracing::debug!(
                    "{} bytes ({:.1}%)",
                    snapshot.bytes_transferred,
                    fraction * 100.0
                ),
                None => tracing::debug!("{} done", snapshot.bytes_transferred),
            }
        }
    });

    let outcome = tokio::select! {
        outcome = task.wait() => outcome,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupted, cancelling");
            task.cancel()?;
            task.wait().await
        }
    };
    reporter.abort();

    match outcome.map_err(report)? {
        TransferOutcome::Completed { bytes } => {
            tracing::info!("Done ({} bytes)", bytes);
        }
        TransferOutcome::Cancelled => {
            if let Some(point) = task.resume_point() {
                tracing::info!("Cancelled at offset {}", point.offset);
            }
        }
    }
    Ok(())
}

fn remote_file_name(remote: &str) -> &str {
    remote
        .rsplit(['/', '\\'])
        .find(|part| !part.is_empty())
        .unwrap_or("download")
}

/// Log the diagnostic detail; the error itself carries the user message
fn report(e: SmbError) -> SmbError {
    if let Some(detail) = e.detail() {
        tracing::debug!("{:?}: {}", e.code(), detail);
    }
    e
}
