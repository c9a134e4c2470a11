//! `vmc` command-line tool.
//!
//! Opens the VMC link, performs one operation and prints the result as JSON.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use serde_json::json;
use tracing_subscriber::EnvFilter;
use vmc_driver::{AsyncEvent, Driver, DriverConfig, DriverError, DriverResult, Outcome};
use vmc_protocol::OutboundCommand;

#[derive(Parser, Debug)]
#[command(name = "vmc", version, about = "Talk to a vending machine controller over serial")]
struct Cli {
    /// YAML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Serial device (overrides the configuration file).
    #[arg(long, global = true)]
    port: Option<String>,

    /// Baud rate (overrides the configuration file).
    #[arg(long, global = true)]
    baud: Option<u32>,

    /// Seconds to wait for the VMC to answer.
    #[arg(long, global = true, value_parser = parse_seconds)]
    timeout: Option<Duration>,

    /// Skip the REQUEST_INFO_SYNC sent at startup.
    #[arg(long, global = true)]
    no_sync: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Request the simple machine status (0x53).
    Status,
    /// Dispense a selection (0x03).
    Dispense {
        /// Selection number.
        #[arg(long)]
        slot: u16,
    },
    /// Set the price of a selection (0x12).
    Price {
        /// Selection number.
        #[arg(long)]
        slot: u16,
        /// Price in the machine's smallest currency unit.
        #[arg(long)]
        price: u32,
    },
    /// Send a menu setting through the 0x70 wrapper.
    Menu {
        /// Sub-command name from the configured table.
        #[arg(long)]
        sub_cmd: String,
        /// Parameter bytes.
        params: Vec<u8>,
    },
    /// Send any outbound command by name with a hex payload.
    Send {
        /// Command name, e.g. CHECK_SELECTION_STATUS.
        #[arg(long)]
        cmd: String,
        /// Payload as hex, e.g. 000a.
        #[arg(long, default_value = "")]
        data: String,
    },
    /// Collect unsolicited events for a while, then print them.
    Events {
        /// Seconds to listen.
        #[arg(long, default_value = "2", value_parser = parse_seconds)]
        listen: Duration,
    },
    /// Print unsolicited events as JSON lines until interrupted.
    Monitor,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    let timeout = config.command_timeout();

    let driver = Driver::start(config);

    match cli.command {
        Commands::Status => print_result(driver.request_status()),
        Commands::Dispense { slot } => print_result(driver.dispense(slot)),
        Commands::Price { slot, price } => print_result(driver.set_price(slot, price)),
        Commands::Menu { sub_cmd, params } => {
            print_result(driver.menu_command(&sub_cmd, &params, timeout))
        }
        Commands::Send { cmd, data } => print_result(send_named(&driver, &cmd, &data, timeout)),
        Commands::Events { listen } => {
            std::thread::sleep(listen);
            let events: Vec<serde_json::Value> = driver.drain_events().iter().map(event_json).collect();
            println!("{}", serde_json::Value::Array(events));
            ExitCode::SUCCESS
        }
        Commands::Monitor => monitor(&driver),
    }
}

fn load_config(cli: &Cli) -> DriverResult<DriverConfig> {
    let mut config = match &cli.config {
        Some(path) => DriverConfig::load(path)?,
        None => DriverConfig::default(),
    };
    if let Some(port) = &cli.port {
        config.port = port.clone();
    }
    if let Some(baud) = cli.baud {
        config.baud_rate = baud;
    }
    if let Some(timeout) = cli.timeout {
        config.command_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
    }
    if cli.no_sync {
        config.startup_sync = false;
    }
    Ok(config)
}

/// Parse a non-negative, finite number of seconds.
fn parse_seconds(text: &str) -> Result<Duration, String> {
    let secs: f64 = text.parse().map_err(|e| format!("{}: {}", text, e))?;
    Duration::try_from_secs_f64(secs).map_err(|e| format!("{}: {}", text, e))
}

fn send_named(driver: &Driver, name: &str, data: &str, timeout: Duration) -> DriverResult<Outcome> {
    let command = OutboundCommand::from_name(name)?;
    let payload = hex::decode(data).map_err(|e| DriverError::Config(format!("bad --data: {}", e)))?;
    driver.submit_and_wait(command.code(), &payload, timeout)
}

fn print_result(result: DriverResult<Outcome>) -> ExitCode {
    match result {
        Ok(outcome) => {
            let value = json!({
                "result": outcome,
                "data_hex": hex::encode(outcome.payload()),
                "decoded": outcome.response().map(|r| r.summary()),
            });
            println!("{}", value);
            ExitCode::SUCCESS
        }
        Err(e) => {
            println!("{}", json!({ "error": e.code(), "message": e.to_string() }));
            ExitCode::FAILURE
        }
    }
}

fn event_json(event: &AsyncEvent) -> serde_json::Value {
    json!({
        "cmd": format!("0x{:02x}", event.code),
        "name": event.command().map(|c| c.name()),
        "data": event.payload,
        "summary": event.response().summary(),
        "received_at": event.received_at,
    })
}

fn monitor(driver: &Driver) -> ExitCode {
    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    if let Err(e) = ctrlc::set_handler(move || flag.store(false, Ordering::SeqCst)) {
        eprintln!("failed to install Ctrl-C handler: {}", e);
        return ExitCode::FAILURE;
    }

    let started = Instant::now();
    while running.load(Ordering::SeqCst) && driver.is_running() {
        for event in driver.drain_events() {
            println!("{}", event_json(&event));
        }
        std::thread::sleep(Duration::from_millis(200));
    }
    eprintln!("monitored for {:.1}s", started.elapsed().as_secs_f64());

    if driver.is_running() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_seconds() {
        assert_eq!(parse_seconds("2").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_seconds("0.25").unwrap(), Duration::from_millis(250));
        assert!(parse_seconds("-1").is_err());
        assert!(parse_seconds("NaN").is_err());
        assert!(parse_seconds("soon").is_err());
    }

    #[test]
    fn test_negative_listen_rejected_by_cli() {
        assert!(Cli::try_parse_from(["vmc", "events", "--listen=-1"]).is_err());
        assert!(Cli::try_parse_from(["vmc", "--timeout", "-3", "status"]).is_err());

        let cli = Cli::try_parse_from(["vmc", "--timeout", "1.5", "status"]).unwrap();
        let config = load_config(&cli).unwrap();
        assert_eq!(config.command_timeout_ms, 1500);
    }
}
