use std::sync::atomic::{AtomicBool, Ordering};

use log::{info, warn};
use parking_lot::Mutex;
use thiserror::Error;

use crate::artnet::ArtNetError;
use crate::dmx_types::DMX_CHANNELS;

#[derive(Error, Debug)]
pub enum OutputError {
    #[error(transparent)]
    ArtNet(#[from] ArtNetError),
    #[error("Invalid DMX address: {0}. Must be between 1 and 512")]
    InvalidAddress(usize),
    #[error("DMX widget error: {0}")]
    Widget(String),
    #[error("DMX widget is closed")]
    Closed,
}

/// The transport a [`LiveCue`](crate::live_cue::LiveCue) writes its frames to.
///
/// `set_value`/`set_values` only touch the pending frame; `send_now` puts it
/// on the wire. `start_sending` keeps the receivers refreshed even when no
/// fade is running.
pub trait OutputInterface: Send + Sync {
    /// Sets one slot, `address` is 1-based.
    fn set_value(&self, address: usize, value: u8) -> Result<(), OutputError>;
    /// Copies `values` into the frame starting at address 1.
    fn set_values(&self, values: &[u8]);
    fn send_now(&self) -> Result<(), OutputError>;
    fn start_sending(&self);
    fn stop_sending(&self);
    fn is_sending(&self) -> bool;
    fn close(&self);
}

/// Output through an Open DMX USB widget.
///
/// The widget's background agent refreshes the line by itself, so sending
/// only hands the latest frame over and checks that the agent is alive.
pub struct SerialInterface {
    port: String,
    serial: Mutex<Option<open_dmx::DMXSerial>>,
    frame: Mutex<[u8; DMX_CHANNELS]>,
    sending: AtomicBool,
}

impl SerialInterface {
    pub fn open(port: impl Into<String>) -> Result<Self, OutputError> {
        let port = port.into();
        let serial =
            open_dmx::DMXSerial::open(&port).map_err(|e| OutputError::Widget(e.to_string()))?;
        info!("DMX widget connected on {port}");
        Ok(Self {
            port,
            serial: Mutex::new(Some(serial)),
            frame: Mutex::new([0u8; DMX_CHANNELS]),
            sending: AtomicBool::new(false),
        })
    }

    pub fn port(&self) -> &str {
        &self.port
    }
}

impl OutputInterface for SerialInterface {
    fn set_value(&self, address: usize, value: u8) -> Result<(), OutputError> {
        let mut frame = self.frame.lock();
        let slot = address
            .checked_sub(1)
            .and_then(|idx| frame.get_mut(idx))
            .ok_or(OutputError::InvalidAddress(address))?;
        *slot = value;
        Ok(())
    }

    fn set_values(&self, values: &[u8]) {
        let mut frame = self.frame.lock();
        frame
            .iter_mut()
            .zip(values)
            .for_each(|(slot, value)| *slot = *value);
    }

    fn send_now(&self) -> Result<(), OutputError> {
        let frame = *self.frame.lock();
        let mut serial = self.serial.lock();
        let dmx = serial.as_mut().ok_or(OutputError::Closed)?;
        dmx.set_channels(frame);
        dmx.check_agent()
            .map_err(|e| OutputError::Widget(e.to_string()))
    }

    fn start_sending(&self) {
        if !self.sending.swap(true, Ordering::SeqCst) {
            if let Err(e) = self.send_now() {
                warn!("DMX widget on {} is not responding: {e}", self.port);
            }
        }
    }

    fn stop_sending(&self) {
        self.sending.store(false, Ordering::SeqCst);
    }

    fn is_sending(&self) -> bool {
        self.sending.load(Ordering::SeqCst) && self.serial.lock().is_some()
    }

    fn close(&self) {
        self.stop_sending();
        if self.serial.lock().take().is_some() {
            info!("DMX widget on {} closed", self.port);
        }
    }
}
