mod communicator;
mod config;
mod device;
mod endpoint;
mod error;
mod runner;
mod session;
#[cfg(target_os = "windows")]
mod setupapi;

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use clap::{Args, Parser};
use log::{error, info};

use crate::communicator::UsbConnector;
use crate::config::{Config, ExchangeConfig, RetryPolicy, Target};
use crate::device::list_usb_devices;
use crate::runner::{run, ThreadPacer};

#[derive(Parser, Debug)]
#[command(name = "usb-bulk-host")]
#[command(version)]
#[command(about = "Waits for a USB bulk device, then writes a counter message and prints each reply", long_about = None)]
struct Cli {
    #[command(flatten)]
    search_options: SearchOptions,

    #[command(flatten)]
    exchange_options: ExchangeOptions,

    #[command(flatten)]
    retry_options: RetryOptions,

    /// List all USB devices and exit
    #[arg(long = "list-all", help = "List all USB devices")]
    list_all: bool,
}

#[derive(Args, Debug)]
struct SearchOptions {
    /// Vendor ID to search for (hex format, e.g., 0xC0DE)
    #[arg(short = 'v', long = "vendor", help = "Vendor ID in hex format (e.g., 0xC0DE)", value_parser = parse_hex_u16, default_value = "0xC0DE")]
    vendor_id: u16,

    /// Product ID to search for (hex format, e.g., 0xCAFE)
    #[arg(short = 'p', long = "product", help = "Product ID in hex format (e.g., 0xCAFE)", value_parser = parse_hex_u16, default_value = "0xCAFE")]
    product_id: u16,

    /// Serial number the device must also report
    #[arg(short = 's', long = "serial", help = "Serial number to match")]
    serial: Option<String>,
}

#[derive(Args, Debug)]
struct ExchangeOptions {
    #[arg(long = "interface", help = "Interface number to claim", default_value_t = 0)]
    interface: u8,

    #[arg(long = "message", help = "Prefix of each message; the exchange counter is appended", default_value = "test")]
    message: String,

    #[arg(long = "read-size", help = "Maximum number of bytes to read per reply", default_value_t = 100)]
    read_size: usize,

    #[arg(long = "interval-ms", help = "Pause between exchanges in milliseconds", default_value_t = 1000)]
    interval_ms: u64,

    #[arg(long = "timeout-ms", help = "Timeout of each bulk transfer in milliseconds", default_value_t = 1000)]
    timeout_ms: u64,

    #[arg(long = "count", help = "Exchanges per session before looking for the device again", default_value_t = 1_000_000)]
    count: u64,

    #[arg(long = "verify-echo", help = "Warn when a reply differs from the message sent")]
    verify_echo: bool,

    #[arg(long = "hex", help = "Also print each reply in hex")]
    hex: bool,
}

#[derive(Args, Debug)]
struct RetryOptions {
    #[arg(long = "retry-ms", help = "Delay before looking for the device again, in milliseconds", default_value_t = 1000)]
    retry_ms: u64,

    /// Defaults to --retry-ms, i.e. no backoff
    #[arg(long = "max-retry-ms", help = "Upper bound of the doubling retry delay, in milliseconds")]
    max_retry_ms: Option<u64>,

    #[arg(long = "max-attempts", help = "Give up after this many consecutive failed attempts")]
    max_attempts: Option<u32>,
}

fn parse_hex_u16(s: &str) -> Result<u16, std::num::ParseIntError> {
    let s = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    u16::from_str_radix(s, 16)
}

impl Cli {
    fn into_config(self) -> Result<Config, error::Error> {
        let search = self.search_options;
        let exchange = self.exchange_options;
        let retry = self.retry_options;

        let config = Config {
            target: Target {
                vendor_id: search.vendor_id,
                product_id: search.product_id,
                serial: search.serial,
            },
            exchange: ExchangeConfig {
                interface: exchange.interface,
                message: exchange.message,
                read_size: exchange.read_size,
                interval: Duration::from_millis(exchange.interval_ms),
                timeout: Duration::from_millis(exchange.timeout_ms),
                count: exchange.count,
                verify_echo: exchange.verify_echo,
                hex: exchange.hex,
            },
            retry: RetryPolicy {
                initial: Duration::from_millis(retry.retry_ms),
                max: Duration::from_millis(retry.max_retry_ms.unwrap_or(retry.retry_ms)),
                max_attempts: retry.max_attempts,
            },
        };
        config.validate()?;
        Ok(config)
    }
}

fn list_all() -> Result<(), anyhow::Error> {
    let context = rusb::Context::new().map_err(error::Error::Context)?;
    println!("Listing all USB devices:");
    for device in list_usb_devices(&context)? {
        println!("{}", device);
    }

    #[cfg(target_os = "windows")]
    {
        println!("\nSetupAPI present USB devices:");
        for device in setupapi::present_usb_devices()? {
            println!("{}", device);
        }
    }

    Ok(())
}

static RUNNING: AtomicBool = AtomicBool::new(true);

fn main() -> Result<(), anyhow::Error> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    if cli.list_all {
        return list_all();
    }

    let config = cli.into_config()?;
    ctrlc::set_handler(|| RUNNING.store(false, Ordering::Relaxed))?;

    let mut connector = UsbConnector::new(config.exchange.interface, config.exchange.timeout)?;
    info!("waiting for device {}", config.target);

    let stdout = io::stdout();
    let mut out = stdout.lock();
    match run(&mut connector, &config, &mut ThreadPacer::new(&RUNNING), &RUNNING, &mut out) {
        Ok(report) => {
            info!(
                "stopped after {} sessions and {} exchanges",
                report.sessions, report.exchanges
            );
            Ok(())
        }
        Err(e) => {
            error!("{}", e);
            Err(e.into())
        }
    }
}
