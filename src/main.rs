use adb_wire::{Adb, AdbConfig, Device, DeviceDescriptor, DeviceLister, Dialer, ForwardSpec, Transfer};
use clap::{CommandFactory, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "adb-wire")]
#[command(about = "Talk to the Android Debug Bridge server over its wire protocol")]
struct Cli {
    /// ADB server host. Defaults to $ANDROID_ADB_SERVER_ADDRESS or 127.0.0.1.
    #[arg(short = 'H', long)]
    host: Option<String>,

    /// ADB server port. Defaults to $ANDROID_ADB_SERVER_PORT or 5037.
    #[arg(short = 'P', long)]
    port: Option<u16>,

    /// Target device serial number.
    #[arg(short, long, conflicts_with_all = ["transport_id", "usb", "tcp"])]
    serial: Option<String>,

    /// Target device transport id.
    #[arg(short = 't', long, conflicts_with_all = ["usb", "tcp"])]
    transport_id: Option<u64>,

    /// Target the only USB device.
    #[arg(short = 'd', long, conflicts_with = "tcp")]
    usb: bool,

    /// Target the only TCP/IP device.
    #[arg(short = 'e', long)]
    tcp: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

impl Cli {
    fn descriptor(&self) -> DeviceDescriptor {
        if let Some(serial) = &self.serial {
            DeviceDescriptor::serial(serial.clone())
        } else if let Some(id) = self.transport_id {
            DeviceDescriptor::TransportId(id)
        } else if self.usb {
            DeviceDescriptor::AnyUsb
        } else if self.tcp {
            DeviceDescriptor::AnyTcp
        } else {
            DeviceDescriptor::AnyDevice
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Get ADB server version.
    Version,

    /// List connected devices.
    Devices {
        /// Show product, model and transport details.
        #[arg(short, long)]
        long: bool,
    },

    /// Show serial, state and device path of the target device.
    Info,

    /// Run a shell command on the device and exit with its status.
    Shell {
        command: String,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Push a local file to the device.
    Push {
        local: PathBuf,
        remote: String,
        /// Permission bits of the remote file, in octal.
        #[arg(short, long, default_value = "644")]
        mode: String,
    },

    /// Pull a file from the device.
    Pull { remote: String, local: PathBuf },

    /// Stat a remote file on the device.
    Stat { path: String },

    /// List a remote directory on the device.
    Ls { path: String },

    /// Manage port forwards, e.g. `forward tcp:8080 tcp:80`.
    Forward {
        /// List forwards of the device.
        #[arg(long, conflicts_with_all = ["remove", "remove_all"])]
        list: bool,
        /// Remove the forward on LOCAL.
        #[arg(long, conflicts_with = "remove_all")]
        remove: bool,
        /// Remove every forward of the device.
        #[arg(long)]
        remove_all: bool,
        local: Option<String>,
        remote: Option<String>,
    },

    /// Print system properties.
    Props,

    /// List processes running on the device.
    Ps,

    /// Show install path and version of a package.
    Package { name: String },

    /// Remount system partitions read-write.
    Remount,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let Some(command) = cli.command.as_ref() else {
        Cli::command().print_help()?;
        println!();
        return Ok(());
    };

    let mut config = AdbConfig::from_env()?;
    if let Some(host) = &cli.host {
        config.host = host.clone();
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    let adb = Adb::from_config(config);
    let device = adb.device(cli.descriptor());

    match command {
        Commands::Version => {
            let version = adb.server_version().await?;
            println!("ADB server version: {}", version);
        }
        Commands::Devices { long } => {
            let devices = adb.list_devices().await?;
            if devices.is_empty() {
                println!("No devices connected.");
            }
            for d in &devices {
                if *long {
                    println!(
                        "{:<24} {:<12} product:{} model:{} device:{} transport_id:{}",
                        d.serial,
                        d.state,
                        d.product,
                        d.model,
                        d.device_name,
                        d.transport_id.map(|id| id.to_string()).unwrap_or_default()
                    );
                } else {
                    println!("{:<24} {}", d.serial, d.state);
                }
            }
        }
        Commands::Info => {
            let info = device.device_info().await?;
            println!("Serial: {}", info.serial);
            println!("State:  {}", device.state().await?);
            println!("Model:  {}", info.model);
            println!("Path:   {}", device.device_path().await?);
        }
        Commands::Shell { command, args } => {
            let (output, code) = device.run_command_with_exit_code(command, args).await?;
            print!("{}", output);
            if code != 0 {
                std::process::exit(code);
            }
        }
        Commands::Push {
            local,
            remote,
            mode,
        } => {
            let permissions = u32::from_str_radix(mode, 8)
                .map_err(|_| format!("invalid octal mode: {}", mode))?;
            let transfer = device.push_file(local, remote, permissions).await?;
            let bytes = report_progress(transfer).await?;
            println!("Pushed {} -> {} ({} bytes)", local.display(), remote, bytes);
        }
        Commands::Pull { remote, local } => {
            let transfer = device.pull_file(remote, local).await?;
            let bytes = report_progress(transfer).await?;
            println!("Pulled {} -> {} ({} bytes)", remote, local.display(), bytes);
        }
        Commands::Stat { path } => {
            let stat = device.stat(path).await?;
            println!("Mode:     {:o}", stat.mode);
            println!("Size:     {} bytes", stat.size);
            println!("Modified: {} (unix timestamp)", stat.mtime);
            if stat.is_file() {
                println!("Type:     regular file");
            } else if stat.is_directory() {
                println!("Type:     directory");
            } else if stat.is_symlink() {
                println!("Type:     symlink");
            }
        }
        Commands::Ls { path } => {
            let mut entries = device.list_dir_entries(path).await?;
            while let Some(entry) = entries.next().await? {
                let type_char = if entry.is_directory() {
                    'd'
                } else if entry.is_symlink() {
                    'l'
                } else {
                    '-'
                };
                println!(
                    "{}{:o}  {:>8}  {}",
                    type_char,
                    entry.permissions(),
                    entry.size,
                    entry.name
                );
            }
        }
        Commands::Forward {
            list,
            remove,
            remove_all,
            local,
            remote,
        } => forward(&device, *list, *remove, *remove_all, local, remote).await?,
        Commands::Props => {
            let mut props: Vec<_> = device.properties().await?.into_iter().collect();
            props.sort();
            for (key, value) in props {
                println!("[{}]: [{}]", key, value);
            }
        }
        Commands::Ps => {
            println!("{:<12} {:>6}  NAME", "USER", "PID");
            for p in device.list_processes().await? {
                println!("{:<12} {:>6}  {}", p.user, p.pid, p.name);
            }
        }
        Commands::Package { name } => {
            let info = device.stat_package(name).await?;
            println!("Path:    {}", info.path);
            println!("Version: {} ({})", info.version_name, info.version_code);
        }
        Commands::Remount => {
            print!("{}", device.remount().await?);
        }
    }

    Ok(())
}

async fn forward<D: Dialer, L: DeviceLister>(
    device: &Device<D, L>,
    list: bool,
    remove: bool,
    remove_all: bool,
    local: &Option<String>,
    remote: &Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    if list {
        for pair in device.forward_list().await? {
            println!("{} {} {}", pair.serial, pair.local, pair.remote);
        }
        return Ok(());
    }
    if remove_all {
        device.forward_remove_all().await?;
        return Ok(());
    }

    let local: ForwardSpec = local.as_deref().ok_or("missing LOCAL forward spec")?.parse()?;
    if remove {
        device.forward_remove(&local).await?;
        return Ok(());
    }
    let remote: ForwardSpec = remote.as_deref().ok_or("missing REMOTE forward spec")?.parse()?;
    device.forward(&local, &remote).await?;
    println!("{} -> {}", local, remote);
    Ok(())
}

/// Print a progress line on every update until the transfer ends.
async fn report_progress(transfer: Transfer) -> Result<u64, Box<dyn std::error::Error>> {
    let mut progress = transfer.subscribe();
    let printer = tokio::spawn(async move {
        while progress.changed().await.is_ok() {
            let p = *progress.borrow_and_update();
            eprint!("\r{:>5.1}% ({}/{} bytes)", p.fraction() * 100.0, p.completed, p.total);
            if p.finished {
                break;
            }
        }
        eprintln!();
    });
    let result = transfer.wait().await;
    let _ = printer.await;
    Ok(result?)
}
