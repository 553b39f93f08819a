use std::time::Duration;

use crate::error::Error;

pub const DEFAULT_VENDOR_ID: u16 = 0xC0DE;
pub const DEFAULT_PRODUCT_ID: u16 = 0xCAFE;

/// Which device to look for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub vendor_id: u16,
    pub product_id: u16,
    pub serial: Option<String>,
}

impl Target {
    pub fn new(vendor_id: u16, product_id: u16) -> Self {
        Target { vendor_id, product_id, serial: None }
    }

    pub fn matches_ids(&self, vendor_id: u16, product_id: u16) -> bool {
        self.vendor_id == vendor_id && self.product_id == product_id
    }

    /// `serial` is `None` when the device has no serial string or it could not be read.
    pub fn matches_serial(&self, serial: Option<&str>) -> bool {
        match &self.serial {
            Some(wanted) => serial == Some(wanted.as_str()),
            None => true,
        }
    }
}

impl Default for Target {
    fn default() -> Self {
        Target::new(DEFAULT_VENDOR_ID, DEFAULT_PRODUCT_ID)
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04x}:{:04x}", self.vendor_id, self.product_id)?;
        if let Some(serial) = &self.serial {
            write!(f, " (serial {})", serial)?;
        }
        Ok(())
    }
}

/// Parameters of one device session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeConfig {
    pub interface: u8,
    pub message: String,
    pub read_size: usize,
    pub interval: Duration,
    pub timeout: Duration,
    pub count: u64,
    pub verify_echo: bool,
    pub hex: bool,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        ExchangeConfig {
            interface: 0,
            message: String::from("test"),
            read_size: 100,
            interval: Duration::from_secs(1),
            timeout: Duration::from_secs(1),
            count: 1_000_000,
            verify_echo: false,
            hex: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub initial: Duration,
    pub max: Duration,
    /// Consecutive failed attempts tolerated before giving up. `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(1),
            max_attempts: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    pub target: Target,
    pub exchange: ExchangeConfig,
    pub retry: RetryPolicy,
}

impl Config {
    pub fn validate(&self) -> Result<(), Error> {
        let exchange = &self.exchange;
        if exchange.message.is_empty() {
            return Err(Error::InvalidConfig("message prefix must not be empty".into()));
        }
        if exchange.read_size == 0 {
            return Err(Error::InvalidConfig("read size must be at least one byte".into()));
        }
        if exchange.timeout.is_zero() {
            // libusb treats a zero timeout as "wait forever"
            return Err(Error::InvalidConfig("transfer timeout must be greater than zero".into()));
        }
        if exchange.count == 0 {
            return Err(Error::InvalidConfig("exchange count must be greater than zero".into()));
        }
        if self.retry.initial.is_zero() {
            return Err(Error::InvalidConfig("retry interval must be greater than zero".into()));
        }
        if self.retry.max < self.retry.initial {
            return Err(Error::InvalidConfig(format!(
                "maximum retry interval {:?} is shorter than the initial interval {:?}",
                self.retry.max, self.retry.initial
            )));
        }
        if self.retry.max_attempts == Some(0) {
            return Err(Error::InvalidConfig("max attempts must be greater than zero".into()));
        }
        Ok(())
    }
}
