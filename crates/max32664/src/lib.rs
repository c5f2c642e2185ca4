#![cfg_attr(not(test), no_std)]

//! Driver for the MAX32664 biometric sensor hub (pulse oximetry and heart
//! rate through a MAX30101 optical module).
//!
//! The hub speaks a `[family, index]` command protocol over I2C and pushes
//! algorithm reports through an on-device FIFO. This driver sequences the
//! reset handshake, the algorithm bring-up and the FIFO drain on top of the
//! `embedded-hal` 1.0 traits, so it runs against any blocking bus and GPIO
//! implementation (on a Raspberry Pi: `linux-embedded-hal`).
//!
//! Every register operation blocks for the bus transaction plus the fixed
//! 50 ms settle the hub needs between command and response. A [`BioHub`] is
//! one logical session: bring it up with [`begin`], select a report layout
//! with [`config_bpm`], then poll [`read_sample`].
//!
//! [`begin`]: BioHub::begin
//! [`config_bpm`]: BioHub::config_bpm
//! [`read_sample`]: BioHub::read_sample

pub mod registers;
mod sample;

pub use registers::AlgoMode;
pub use sample::{Extended, Poll, Reading};

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use embedded_hal::i2c::I2c;

use registers::{family, index};
use registers::{
    AGC_NUM_SAMPLES_ID, ALGO_WARMUP_MS, BASIC_FRAME_LEN, CMD_DELAY_MS, DEVICE_MODE_APPLICATION,
    DEVICE_MODE_BOOTLOADER, DISABLE, EXTENDED_FRAME_LEN, FIRMWARE_BOOT_MS, I2C_ADDRESS,
    MODE_EXIT_WAIT_MS, OUTPUT_FORMAT_ALGO, OUTPUT_FORMAT_MAX, OUTPUT_FORMAT_SENSOR,
    RESET_PULSE_MS, RESET_SETTLE_MS, SENSOR_WARMUP_MS, STATUS_SUCCESS,
};

/// Driver errors, generic over the bus error type.
///
/// A transport failure stays a transport failure: it is never folded into a
/// device status byte, since the caller's recovery differs (reconnect the
/// bus vs reconfigure the hub).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error<E> {
    /// The bus transaction itself failed.
    I2c(E),
    /// The reset or mfio line could not be driven.
    Pin,
    /// Argument outside the register's legal domain, nothing was sent.
    InvalidParameter,
    /// The hub acknowledged a write with this nonzero status byte.
    Device(u8),
    /// After reset the hub settled in a mode other than application mode.
    /// Terminal for the session, only [`BioHub::begin`] recovers.
    Startup(u8),
    /// [`BioHub::read_sample`] called while no algorithm mode is configured.
    NotConfigured,
}

impl<E: core::fmt::Display> core::fmt::Display for Error<E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::I2c(err) => write!(f, "i2c transaction failed: {err}"),
            Error::Pin => f.write_str("could not drive gpio line"),
            Error::InvalidParameter => f.write_str("argument outside the register's domain"),
            Error::Device(status) => write!(f, "hub returned status {status:#04x}"),
            Error::Startup(mode) => write!(f, "hub stuck in device mode {mode:#04x} after reset"),
            Error::NotConfigured => f.write_str("no algorithm mode configured"),
        }
    }
}

pub type Result<T, E> = core::result::Result<T, Error<E>>;

/// Handle to one hub session.
///
/// Owns the bus, the two control lines and the delay source for its whole
/// lifetime. All register state (the selected report layout, the cached
/// sample rate) lives here, nothing is global.
pub struct BioHub<I2C, RST, MFIO, D> {
    i2c: I2C,
    address: u8,
    reset: RST,
    mfio: MFIO,
    delay: D,
    mode: Option<AlgoMode>,
    sample_rate: Option<u8>,
}

impl<I2C, RST, MFIO, D, E> BioHub<I2C, RST, MFIO, D>
where
    I2C: I2c<Error = E>,
    RST: OutputPin,
    MFIO: OutputPin,
    D: DelayNs,
{
    /// Creates the handle without touching the hardware.
    pub fn new(i2c: I2C, reset: RST, mfio: MFIO, delay: D) -> Self {
        BioHub {
            i2c,
            address: I2C_ADDRESS,
            reset,
            mfio,
            delay,
            mode: None,
            sample_rate: None,
        }
    }

    /// Gives the bus, the control lines and the delay source back.
    pub fn release(self) -> (I2C, RST, MFIO, D) {
        (self.i2c, self.reset, self.mfio, self.delay)
    }

    /// Report layout selected by the last successful [`config_bpm`], if any.
    ///
    /// [`config_bpm`]: BioHub::config_bpm
    pub fn current_mode(&self) -> Option<AlgoMode> {
        self.mode
    }

    /// Sample rate read back during [`config_bpm`], if any.
    ///
    /// [`config_bpm`]: BioHub::config_bpm
    pub fn sample_rate(&self) -> Option<u8> {
        self.sample_rate
    }

    // lifecycle --------------------------------------------------------

    /// Resets the hub and waits for its firmware to come up.
    ///
    /// Holding mfio low through the reset pulse selects the I2C application
    /// interface. Should the hub still sit in its bootloader afterwards it
    /// is told to leave; a final device mode other than application mode is
    /// [`Error::Startup`]. No automatic retry, restarting a failed session
    /// is the caller's decision.
    pub fn begin(&mut self) -> Result<(), E> {
        self.mfio.set_low().map_err(|_| Error::Pin)?;
        self.reset.set_low().map_err(|_| Error::Pin)?;
        self.delay.delay_ms(RESET_PULSE_MS);
        self.reset.set_high().map_err(|_| Error::Pin)?;
        self.delay.delay_ms(RESET_SETTLE_MS);
        self.delay.delay_ms(FIRMWARE_BOOT_MS);

        let mut mode = self.read_register(family::READ_DEVICE_MODE, index::DEVICE_MODE)?;
        if mode == DEVICE_MODE_BOOTLOADER {
            self.command(family::SET_DEVICE_MODE, index::DEVICE_MODE, DEVICE_MODE_APPLICATION)?;
            self.delay.delay_ms(MODE_EXIT_WAIT_MS);
            mode = self.read_register(family::READ_DEVICE_MODE, index::DEVICE_MODE)?;
        }

        if mode != DEVICE_MODE_APPLICATION {
            return Err(Error::Startup(mode));
        }
        Ok(())
    }

    /// Configures the heart-rate/SpO2 algorithm and selects the report
    /// layout.
    ///
    /// The steps run in a strict order and the sequence aborts on the first
    /// step the hub does not acknowledge. Steps already committed are NOT
    /// rolled back; after an error the hub is in a partial configuration and
    /// the caller decides between retrying and resetting.
    pub fn config_bpm(&mut self, mode: AlgoMode) -> Result<(), E> {
        self.set_output_format(OUTPUT_FORMAT_ALGO)?;
        self.set_fifo_threshold(1)?;
        self.agc_control(true)?;
        self.sensor_control(true)?;
        self.set_algo_mode(mode)?;
        self.mode = Some(mode);
        self.sample_rate = Some(self.read_algo_sample_rate()?);
        // first trustworthy reports appear only once the algorithm settled
        self.delay.delay_ms(ALGO_WARMUP_MS);
        Ok(())
    }

    /// Configures raw optical streaming instead of algorithm reports.
    ///
    /// The mode-one algorithm is still enabled, it paces the FIFO. No
    /// report layout is recorded: raw frames are not algorithm frames, so
    /// [`read_sample`](BioHub::read_sample) stays rejected.
    pub fn config_sensor(&mut self) -> Result<(), E> {
        self.set_output_format(OUTPUT_FORMAT_SENSOR)?;
        self.set_fifo_threshold(1)?;
        self.sensor_control(true)?;
        self.set_algo_mode(AlgoMode::Basic)?;
        self.delay.delay_ms(SENSOR_WARMUP_MS);
        Ok(())
    }

    /// Disables the algorithm and the optical module, then holds the hub in
    /// reset. The inverse of [`begin`](BioHub::begin).
    pub fn shutdown(&mut self) -> Result<(), E> {
        self.command(family::ENABLE_ALGORITHM, index::ENABLE_WHRM, DISABLE)?;
        self.sensor_control(false)?;
        self.reset.set_low().map_err(|_| Error::Pin)?;
        self.mode = None;
        self.sample_rate = None;
        Ok(())
    }

    // register access --------------------------------------------------

    /// Reads one register: `[family, index]` write, settle, 1-byte read.
    pub fn read_register(&mut self, family: u8, index: u8) -> Result<u8, E> {
        self.i2c
            .write(self.address, &[family, index])
            .map_err(Error::I2c)?;
        self.settle();
        self.read_byte()
    }

    /// Like [`read_register`] for families that need a third byte to pick
    /// the value.
    ///
    /// [`read_register`]: BioHub::read_register
    pub fn read_register_with(&mut self, family: u8, index: u8, param: u8) -> Result<u8, E> {
        self.i2c
            .write(self.address, &[family, index, param])
            .map_err(Error::I2c)?;
        self.settle();
        self.read_byte()
    }

    /// Writes one register and returns the hub's acknowledgment byte as-is.
    ///
    /// The transaction is `[family, index, value]`, settle, 1-byte
    /// read-back. Interpreting the acknowledgment is left to the caller;
    /// the configuration paths go through [`Error::Device`] instead.
    pub fn write_register(&mut self, family: u8, index: u8, value: u8) -> Result<u8, E> {
        self.i2c
            .write(self.address, &[family, index, value])
            .map_err(Error::I2c)?;
        self.settle();
        self.read_byte()
    }

    fn read_block(&mut self, family: u8, index: u8, buf: &mut [u8]) -> Result<(), E> {
        self.i2c
            .write(self.address, &[family, index])
            .map_err(Error::I2c)?;
        self.settle();
        self.i2c.read(self.address, buf).map_err(Error::I2c)
    }

    fn read_byte(&mut self) -> Result<u8, E> {
        let mut byte = [0u8; 1];
        self.i2c.read(self.address, &mut byte).map_err(Error::I2c)?;
        Ok(byte[0])
    }

    fn settle(&mut self) {
        self.delay.delay_ms(CMD_DELAY_MS);
    }

    /// Write where anything but a success acknowledgment is an error.
    fn command(&mut self, family: u8, index: u8, value: u8) -> Result<(), E> {
        match self.write_register(family, index, value)? {
            STATUS_SUCCESS => Ok(()),
            status => Err(Error::Device(status)),
        }
    }

    // named operations -------------------------------------------------

    /// Selects what the FIFO carries. The register holds a 3-bit field;
    /// larger values are rejected before any bus activity.
    pub fn set_output_format(&mut self, format: u8) -> Result<(), E> {
        if format > OUTPUT_FORMAT_MAX {
            return Err(Error::InvalidParameter);
        }
        self.command(family::OUTPUT_MODE, index::SET_FORMAT, format)
    }

    /// Number of buffered samples that raises the almost-full signal.
    pub fn set_fifo_threshold(&mut self, samples: u8) -> Result<(), E> {
        self.command(family::OUTPUT_MODE, index::SET_THRESHOLD, samples)
    }

    /// Enables or disables the automatic gain control algorithm.
    pub fn agc_control(&mut self, enable: bool) -> Result<(), E> {
        self.command(family::ENABLE_ALGORITHM, index::ENABLE_AGC, enable as u8)
    }

    /// Enables or disables the MAX30101 optical module.
    pub fn sensor_control(&mut self, enable: bool) -> Result<(), E> {
        self.command(family::ENABLE_SENSOR, index::ENABLE_MAX30101, enable as u8)
    }

    /// Enables the heart-rate/SpO2 algorithm in the given report layout.
    pub fn set_algo_mode(&mut self, mode: AlgoMode) -> Result<(), E> {
        self.command(family::ENABLE_ALGORITHM, index::ENABLE_WHRM, mode as u8)
    }

    /// Sample rate the algorithm is configured for, in samples per second.
    pub fn read_algo_sample_rate(&mut self) -> Result<u8, E> {
        self.read_register_with(
            family::READ_ALGORITHM_CONFIG,
            index::AGC_NUM_SAMPLES,
            AGC_NUM_SAMPLES_ID,
        )
    }

    /// FIFO fill level in unread frames.
    pub fn fifo_sample_count(&mut self) -> Result<u8, E> {
        self.read_register(family::READ_DATA_OUTPUT, index::NUM_SAMPLES)
    }

    /// Hub status byte, zero when nominal.
    pub fn hub_status(&mut self) -> Result<u8, E> {
        self.read_register(family::HUB_STATUS, index::HUB_STATUS)
    }

    // decoding ---------------------------------------------------------

    /// Drains and decodes at most one FIFO frame.
    ///
    /// Three outcomes: a nonzero hub status short-circuits to
    /// [`Poll::Fault`], an empty FIFO to [`Poll::Empty`] (neither reads a
    /// frame), otherwise one frame of the configured layout is read and
    /// decoded. Faults and empty polls are per-poll conditions, polling may
    /// simply continue on the next tick.
    pub fn read_sample(&mut self) -> Result<Poll, E> {
        let mode = self.mode.ok_or(Error::NotConfigured)?;

        let status = self.hub_status()?;
        if status != STATUS_SUCCESS {
            return Ok(Poll::Fault(status));
        }
        if self.fifo_sample_count()? == 0 {
            return Ok(Poll::Empty);
        }

        match mode {
            AlgoMode::Basic => {
                let mut frame = [0u8; BASIC_FRAME_LEN];
                self.read_block(family::READ_DATA_OUTPUT, index::READ_DATA, &mut frame)?;
                Ok(Poll::Ready(Reading::from_basic_frame(&frame)))
            }
            AlgoMode::Extended => {
                let mut frame = [0u8; EXTENDED_FRAME_LEN];
                self.read_block(family::READ_DATA_OUTPUT, index::READ_DATA, &mut frame)?;
                Ok(Poll::Ready(Reading::from_extended_frame(&frame)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use embedded_hal_mock::eh1::delay::NoopDelay;
    use embedded_hal_mock::eh1::digital::{
        Mock as PinMock, State as PinState, Transaction as PinTransaction,
    };
    use embedded_hal_mock::eh1::i2c::{Mock as I2cMock, Transaction as I2cTransaction};

    type TestHub = BioHub<I2cMock, PinMock, PinMock, NoopDelay>;

    fn hub(transactions: &[I2cTransaction]) -> TestHub {
        BioHub::new(
            I2cMock::new(transactions),
            PinMock::new(&[]),
            PinMock::new(&[]),
            NoopDelay,
        )
    }

    fn verify(hub: TestHub) {
        let (mut i2c, mut reset, mut mfio, _) = hub.release();
        i2c.done();
        reset.done();
        mfio.done();
    }

    #[test]
    fn out_of_range_format_is_rejected_before_the_bus() {
        let mut hub = hub(&[]);
        assert_eq!(hub.set_output_format(0x08), Err(Error::InvalidParameter));
        verify(hub);
    }

    #[test]
    fn write_is_one_write_then_one_readback() {
        let mut hub = hub(&[
            I2cTransaction::write(I2C_ADDRESS, vec![0x10, 0x01, 0x01]),
            I2cTransaction::read(I2C_ADDRESS, vec![0x00]),
        ]);
        assert_eq!(hub.write_register(0x10, 0x01, 0x01), Ok(0x00));
        verify(hub);
    }

    #[test]
    fn write_acknowledgment_passes_through_raw() {
        let mut hub = hub(&[
            I2cTransaction::write(I2C_ADDRESS, vec![0x10, 0x00, 0x42]),
            I2cTransaction::read(I2C_ADDRESS, vec![0x42]),
        ]);
        assert_eq!(hub.write_register(0x10, 0x00, 0x42), Ok(0x42));
        verify(hub);
    }

    #[test]
    fn basic_frame_is_decoded_from_the_fifo() {
        let mut hub = hub(&[
            // hub status nominal
            I2cTransaction::write(I2C_ADDRESS, vec![0x00, 0x00]),
            I2cTransaction::read(I2C_ADDRESS, vec![0x00]),
            // one sample buffered
            I2cTransaction::write(I2C_ADDRESS, vec![0x12, 0x00]),
            I2cTransaction::read(I2C_ADDRESS, vec![0x01]),
            // the frame itself
            I2cTransaction::write(I2C_ADDRESS, vec![0x12, 0x01]),
            I2cTransaction::read(I2C_ADDRESS, vec![0x02, 0x58, 0x5F, 0x01, 0x10, 0x00]),
        ]);
        hub.mode = Some(AlgoMode::Basic);

        let poll = hub.read_sample().unwrap();
        let reading = poll.reading().unwrap();
        assert_eq!(reading.heart_rate, 60);
        assert_eq!(reading.confidence, 95);
        assert_eq!(reading.oxygen, 27.0);
        assert_eq!(reading.status, 0);
        verify(hub);
    }

    #[test]
    fn empty_fifo_skips_the_frame_read() {
        let mut hub = hub(&[
            I2cTransaction::write(I2C_ADDRESS, vec![0x00, 0x00]),
            I2cTransaction::read(I2C_ADDRESS, vec![0x00]),
            I2cTransaction::write(I2C_ADDRESS, vec![0x12, 0x00]),
            I2cTransaction::read(I2C_ADDRESS, vec![0x00]),
        ]);
        hub.mode = Some(AlgoMode::Extended);

        assert_eq!(hub.read_sample(), Ok(Poll::Empty));
        // mock verifies the 11-byte read never happened
        verify(hub);
    }

    #[test]
    fn hub_fault_short_circuits_the_decode() {
        for mode in [AlgoMode::Basic, AlgoMode::Extended] {
            let mut hub = hub(&[
                I2cTransaction::write(I2C_ADDRESS, vec![0x00, 0x00]),
                I2cTransaction::read(I2C_ADDRESS, vec![0x01]),
            ]);
            hub.mode = Some(mode);

            assert_eq!(hub.read_sample(), Ok(Poll::Fault(0x01)));
            verify(hub);
        }
    }

    #[test]
    fn unconfigured_decoder_is_rejected() {
        let mut hub = hub(&[]);
        assert_eq!(hub.read_sample(), Err(Error::NotConfigured));
        verify(hub);
    }

    #[test]
    fn config_stops_at_the_first_failing_step() {
        // output format and threshold acknowledged, AGC enable refused;
        // the sensor enable (family 0x44) must never be issued
        let mut hub = hub(&[
            I2cTransaction::write(I2C_ADDRESS, vec![0x10, 0x00, 0x02]),
            I2cTransaction::read(I2C_ADDRESS, vec![0x00]),
            I2cTransaction::write(I2C_ADDRESS, vec![0x10, 0x01, 0x01]),
            I2cTransaction::read(I2C_ADDRESS, vec![0x00]),
            I2cTransaction::write(I2C_ADDRESS, vec![0x52, 0x00, 0x01]),
            I2cTransaction::read(I2C_ADDRESS, vec![0x05]),
        ]);

        assert_eq!(hub.config_bpm(AlgoMode::Basic), Err(Error::Device(0x05)));
        assert_eq!(hub.current_mode(), None);
        verify(hub);
    }

    #[test]
    fn config_records_mode_and_sample_rate() {
        let ack = |cmd: Vec<u8>| {
            [
                I2cTransaction::write(I2C_ADDRESS, cmd),
                I2cTransaction::read(I2C_ADDRESS, vec![0x00]),
            ]
        };
        let mut transactions = Vec::new();
        transactions.extend(ack(vec![0x10, 0x00, 0x02]));
        transactions.extend(ack(vec![0x10, 0x01, 0x01]));
        transactions.extend(ack(vec![0x52, 0x00, 0x01]));
        transactions.extend(ack(vec![0x44, 0x03, 0x01]));
        transactions.extend(ack(vec![0x52, 0x02, 0x02]));
        // sample rate readback
        transactions.push(I2cTransaction::write(I2C_ADDRESS, vec![0x51, 0x00, 0x03]));
        transactions.push(I2cTransaction::read(I2C_ADDRESS, vec![100]));

        let mut hub = hub(&transactions);
        hub.config_bpm(AlgoMode::Extended).unwrap();
        assert_eq!(hub.current_mode(), Some(AlgoMode::Extended));
        assert_eq!(hub.sample_rate(), Some(100));
        verify(hub);
    }

    fn startup_pins() -> (PinMock, PinMock) {
        let reset = PinMock::new(&[
            PinTransaction::set(PinState::Low),
            PinTransaction::set(PinState::High),
        ]);
        let mfio = PinMock::new(&[PinTransaction::set(PinState::Low)]);
        (reset, mfio)
    }

    #[test]
    fn begin_accepts_application_mode() {
        let i2c = I2cMock::new(&[
            I2cTransaction::write(I2C_ADDRESS, vec![0x02, 0x00]),
            I2cTransaction::read(I2C_ADDRESS, vec![0x00]),
        ]);
        let (reset, mfio) = startup_pins();
        let mut hub = BioHub::new(i2c, reset, mfio, NoopDelay);

        assert_eq!(hub.begin(), Ok(()));
        verify(hub);
    }

    #[test]
    fn begin_walks_the_hub_out_of_its_bootloader() {
        let i2c = I2cMock::new(&[
            I2cTransaction::write(I2C_ADDRESS, vec![0x02, 0x00]),
            I2cTransaction::read(I2C_ADDRESS, vec![0x02]),
            // leave the bootloader
            I2cTransaction::write(I2C_ADDRESS, vec![0x01, 0x00, 0x00]),
            I2cTransaction::read(I2C_ADDRESS, vec![0x00]),
            // mode read again after the exit
            I2cTransaction::write(I2C_ADDRESS, vec![0x02, 0x00]),
            I2cTransaction::read(I2C_ADDRESS, vec![0x00]),
        ]);
        let (reset, mfio) = startup_pins();
        let mut hub = BioHub::new(i2c, reset, mfio, NoopDelay);

        assert_eq!(hub.begin(), Ok(()));
        verify(hub);
    }

    #[test]
    fn begin_reports_an_unexpected_mode_as_startup_failure() {
        let i2c = I2cMock::new(&[
            I2cTransaction::write(I2C_ADDRESS, vec![0x02, 0x00]),
            I2cTransaction::read(I2C_ADDRESS, vec![0xAB]),
        ]);
        let (reset, mfio) = startup_pins();
        let mut hub = BioHub::new(i2c, reset, mfio, NoopDelay);

        assert_eq!(hub.begin(), Err(Error::Startup(0xAB)));
        verify(hub);
    }
}
