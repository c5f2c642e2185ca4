use std::num::NonZeroU32;
use std::thread;
use std::time::Duration;

use governor::{Quota, RateLimiter};
use linux_embedded_hal::gpio_cdev::{Chip, LineRequestFlags};
use linux_embedded_hal::{CdevPin, Delay, I2cdev};
use max32664::{AlgoMode, BioHub, Poll, Reading};
use tokio::sync::mpsc::Sender;
use tracing::{debug, info, warn};

use crate::parser::Vital;
use crate::{SourceError, Update};

/// How often the FIFO is drained. The algorithm emits about one report per
/// second at its default sample rate, the threshold is set to one sample.
const POLL_PERIOD: Duration = Duration::from_millis(1500);
const REINIT_DELAY: Duration = Duration::from_secs(5);

pub struct HubConfig {
    pub i2c: String,
    pub gpiochip: String,
    pub reset_line: u32,
    pub mfio_line: u32,
    pub extended: bool,
}

type Hub = BioHub<I2cdev, CdevPin, CdevPin, Delay>;

/// Polls the sensor hub on its own thread.
///
/// A transport failure tears the driver down for a full bring-up on the
/// next pass (the bus needs reconnecting); a device fault is reported and
/// polling simply continues. Error reports toward the channel are rate
/// limited so a dead sensor does not flood the endpoint.
pub fn start_monitoring(cfg: HubConfig, tx: Sender<Update>) {
    thread::spawn(move || {
        let quota = Quota::per_hour(NonZeroU32::new(4).unwrap())
            .allow_burst(NonZeroU32::new(20).unwrap());
        let report_limiter = RateLimiter::direct(quota);
        let mut hub: Option<Hub> = None;

        loop {
            if hub.is_none() {
                match init(&cfg) {
                    Ok(driver) => hub = Some(driver),
                    Err(err) => {
                        warn!("could not bring up the sensor hub: {err}");
                        if report_limiter.check().is_ok() {
                            tx.blocking_send(Err(err))
                                .expect("bundle poster never stops");
                        }
                        thread::sleep(REINIT_DELAY);
                        continue;
                    }
                }
            }

            thread::sleep(POLL_PERIOD);
            let Some(driver) = hub.as_mut() else {
                continue;
            };
            match driver.read_sample() {
                Ok(Poll::Ready(reading)) => send_reading(reading, &tx),
                Ok(Poll::Empty) => debug!("hub fifo empty"),
                Ok(Poll::Fault(code)) => {
                    warn!("hub reports fault status {code:#04x}");
                    if report_limiter.check().is_ok() {
                        tx.blocking_send(Err(SourceError::Hub(format!(
                            "hub fault status {code:#04x}"
                        ))))
                        .expect("bundle poster never stops");
                    }
                }
                Err(err) => {
                    warn!("lost the sensor hub, reinitializing: {err:?}");
                    if report_limiter.check().is_ok() {
                        tx.blocking_send(Err(SourceError::Hub(format!("{err:?}"))))
                            .expect("bundle poster never stops");
                    }
                    hub = None;
                }
            }
        }
    });
}

fn init(cfg: &HubConfig) -> Result<Hub, SourceError> {
    let i2c = I2cdev::new(&cfg.i2c).map_err(|err| SourceError::HubSetup {
        device: cfg.i2c.clone(),
        err: err.to_string(),
    })?;
    let mut chip = Chip::new(&cfg.gpiochip).map_err(|err| SourceError::HubSetup {
        device: cfg.gpiochip.clone(),
        err: err.to_string(),
    })?;
    let reset = output_line(&mut chip, cfg.reset_line, "bio-hub-reset")?;
    let mfio = output_line(&mut chip, cfg.mfio_line, "bio-hub-mfio")?;

    let mut hub = BioHub::new(i2c, reset, mfio, Delay);
    hub.begin()
        .map_err(|err| SourceError::Hub(format!("{err:?}")))?;
    let mode = if cfg.extended {
        AlgoMode::Extended
    } else {
        AlgoMode::Basic
    };
    hub.config_bpm(mode)
        .map_err(|err| SourceError::Hub(format!("{err:?}")))?;
    info!(
        "sensor hub up, algorithm sample rate: {:?}",
        hub.sample_rate()
    );
    Ok(hub)
}

fn output_line(chip: &mut Chip, line: u32, consumer: &str) -> Result<CdevPin, SourceError> {
    let setup_error = |err: String| SourceError::HubSetup {
        device: format!("gpio line {line}"),
        err,
    };
    let handle = chip
        .get_line(line)
        .and_then(|line| line.request(LineRequestFlags::OUTPUT, 0, consumer))
        .map_err(|err| setup_error(err.to_string()))?;
    CdevPin::new(handle).map_err(|err| setup_error(err.to_string()))
}

fn send_reading(reading: Reading, tx: &Sender<Update>) {
    debug!("hub reading: {reading:?}");
    // zero bpm/SpO2 means the algorithm has no finger lock yet, the
    // downstream averages must not see those
    if reading.heart_rate > 0 {
        tx.blocking_send(Ok(Vital::HeartRate(f64::from(reading.heart_rate))))
            .expect("bundle poster never stops");
    }
    if reading.oxygen > 0.0 {
        tx.blocking_send(Ok(Vital::OxygenSaturation(f64::from(reading.oxygen))))
            .expect("bundle poster never stops");
    }
}
