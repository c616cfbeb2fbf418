//! hookbridge CLI - exercises the return channel and shared mailbox from the command line

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use colored::Colorize;
use hookbridge::{
    BridgeConfig, CommunicationMode, ContextHandle, HookBridge, HookClass, HookSettings,
    ReturnChannel, SharedMailbox, write_to_channel,
};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "hookbridge")]
#[command(about = "Cross-process data exchange with injected hook procedures")]
#[command(version)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Open the return channel and print the first message written to it
    Listen {
        /// Give up after this many milliseconds (default: configured pull timeout)
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Write one message to the return channel, as a target would
    Send {
        /// Process ID reported with the write
        #[arg(long, default_value_t = std::process::id())]
        pid: u32,

        /// Message text
        #[arg(long, conflicts_with = "file")]
        text: Option<String>,

        /// Send the contents of a file
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Inspect or stage the shared mailbox
    Mailbox {
        #[command(subcommand)]
        action: MailboxAction,
    },

    /// Install a hook procedure, push a payload and optionally wait for the reply
    Hook {
        /// Exported hook procedure (default: `[hook]` from the configuration)
        #[arg(long)]
        name: Option<String>,

        /// Hook class name or WH_* number
        #[arg(long, default_value = "get_message")]
        class: HookClass,

        /// Target window handle (decimal or 0x hex)
        #[arg(long)]
        window: Option<ContextHandle>,

        /// Open the return channel and pull the reply
        #[arg(long)]
        two_way: bool,

        /// Payload pushed after installation
        #[arg(long)]
        text: Option<String>,
    },
}

#[derive(Subcommand)]
enum MailboxAction {
    /// Print and clear the staged payload
    Get {
        /// Decode the payload as UTF-16LE text
        #[arg(long)]
        wide: bool,
    },
    /// Stage a payload
    Put {
        /// Payload text
        text: String,

        /// Encode as UTF-16LE
        #[arg(long)]
        wide: bool,
    },
    /// Show or set the shared capacity ceiling
    Capacity {
        /// New ceiling in bytes
        size: Option<usize>,
    },
    /// Zero the mailbox
    Clear,
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = match BridgeConfig::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} {}", "[ERROR]".red(), e);
            return ExitCode::FAILURE;
        }
    };
    debug!(?config, "configuration loaded");

    let ok = match args.command {
        Command::Listen { timeout_ms } => listen(&config, timeout_ms),
        Command::Send { pid, text, file } => send(&config, pid, text, file),
        Command::Mailbox { action } => mailbox(&config, action),
        Command::Hook {
            name,
            class,
            window,
            two_way,
            text,
        } => hook(config, name, class, window, two_way, text),
    };

    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn print_payload(bytes: &[u8]) {
    println!(
        "{} Received {} bytes",
        "[OK]".green(),
        bytes.len().to_string().cyan()
    );
    println!("{}", String::from_utf8_lossy(bytes));
}

fn listen(config: &BridgeConfig, timeout_ms: Option<u64>) -> bool {
    let mut channel = match ReturnChannel::open(config) {
        Ok(channel) => channel,
        Err(e) => {
            eprintln!("{} {}", "[ERROR]".red(), e);
            return false;
        }
    };

    let timeout = timeout_ms
        .map(Duration::from_millis)
        .or_else(|| config.pull_timeout());
    match timeout {
        Some(t) => println!(
            "{} Listening on {} for {:?}...",
            "[INFO]".blue(),
            channel.name(),
            t
        ),
        None => println!("{} Listening on {}...", "[INFO]".blue(), channel.name()),
    }

    let bytes = channel.pull(timeout);
    if bytes.is_empty() {
        println!("{} No data received", "[WARN]".yellow());
        return false;
    }
    print_payload(&bytes);
    true
}

fn send(config: &BridgeConfig, pid: u32, text: Option<String>, file: Option<PathBuf>) -> bool {
    let bytes = match (text, file) {
        (Some(text), _) => text.into_bytes(),
        (None, Some(path)) => match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) => {
                eprintln!(
                    "{} Failed to read {}: {}",
                    "[ERROR]".red(),
                    path.display(),
                    e
                );
                return false;
            }
        },
        (None, None) => {
            eprintln!("{} Nothing to send: pass --text or --file", "[ERROR]".red());
            return false;
        }
    };

    println!(
        "{} Writing {} bytes to {} (PID: {})",
        "[INFO]".blue(),
        bytes.len(),
        config.channel_name,
        pid
    );
    // Failures are reported through the log
    write_to_channel(config, pid, &bytes);
    true
}

fn mailbox(config: &BridgeConfig, action: MailboxAction) -> bool {
    let mut mailbox = match SharedMailbox::open(&config.mailbox_name) {
        Ok(mailbox) => mailbox,
        Err(e) => {
            eprintln!("{} {}", "[ERROR]".red(), e);
            return false;
        }
    };

    match action {
        MailboxAction::Get { wide } => {
            let size = mailbox.size();
            if wide {
                println!("{}", mailbox.get_wide());
            } else {
                let bytes = mailbox.get(size);
                let end = bytes.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
                println!("{}", String::from_utf8_lossy(&bytes[..end]));
            }
        }
        MailboxAction::Put { text, wide } => {
            if wide {
                mailbox.put_wide(&text);
            } else {
                mailbox.put(text.as_bytes());
            }
            println!(
                "{} Staged {} bytes in {}",
                "[OK]".green(),
                mailbox.size(),
                config.mailbox_name
            );
        }
        MailboxAction::Capacity { size } => {
            if let Some(size) = size {
                mailbox.set_capacity(size);
            }
            println!(
                "{} Capacity: {} bytes, staged size: {} bytes",
                "[INFO]".blue(),
                mailbox.capacity(),
                mailbox.size()
            );
        }
        MailboxAction::Clear => {
            mailbox.clear();
            println!("{} Cleared {}", "[OK]".green(), config.mailbox_name);
        }
    }
    true
}

fn hook(
    config: BridgeConfig,
    name: Option<String>,
    class: HookClass,
    window: Option<ContextHandle>,
    two_way: bool,
    text: Option<String>,
) -> bool {
    let settings = match (name, config.hook.clone()) {
        (Some(name), _) => {
            let mut settings = HookSettings::new(name, class);
            if let Some(window) = window {
                settings = settings.with_target(window);
            }
            if two_way {
                settings = settings.with_mode(CommunicationMode::TwoWay);
            }
            settings
        }
        (None, Some(settings)) => settings,
        (None, None) => {
            eprintln!(
                "{} No hook procedure: pass --name or add a [hook] table",
                "[ERROR]".red()
            );
            return false;
        }
    };

    println!(
        "{} Installing {} ({})",
        "[INFO]".blue(),
        settings.callback_name,
        settings.callback_class
    );

    let mut bridge = HookBridge::new(config);
    bridge.initialize(&settings);
    if !bridge.is_installed() {
        eprintln!(
            "{} Hook procedure not installed (run with -v for details)",
            "[ERROR]".red()
        );
        return false;
    }
    println!("{} Hook installed", "[OK]".green());

    if let Some(text) = text {
        if bridge.push_wide(&text) {
            println!("{} Pushed {} characters", "[OK]".green(), text.chars().count());
        } else {
            println!("{} Push failed", "[WARN]".yellow());
        }
    }

    if settings.mode == CommunicationMode::TwoWay {
        println!("{} Waiting for the target to reply...", "[INFO]".blue());
        let reply = bridge.pull_data();
        if reply.is_empty() {
            println!("{} No data received", "[WARN]".yellow());
        } else {
            print_payload(&reply);
        }
    }

    bridge.dispose();
    true
}
