#![no_std]

//! # sx127x_radio
//! A platform-agnostic driver for Semtech SX1276/77/78/79 based LoRa boards.
//! It supports any device that implements the `embedded-hal` traits. The chip
//! is connected over SPI; the driver takes the raw bus plus a dedicated
//! chip-select pin and frames every register access itself. It works with any
//! Semtech based board including:
//! * Modtronix inAir4, inAir9, and inAir9B
//! * HopeRF RFM95W, RFM96W, and RFM98W
//!
//! The driver mirrors the chip's own state machine: configuration happens in
//! Sleep/Standby, packets move through the shared FIFO, and completion is
//! detected by polling the IRQ-flag register. Receive polling via
//! [`LoRa::received_packet`] re-arms single-shot RX as a side effect, matching
//! the chip's auto-return to Standby.

use bit_field::BitField;
use embedded_hal::digital::OutputPin;
use embedded_hal::spi::{Mode, Phase, Polarity, SpiBus};

mod convert;
mod interrupt;
mod register;

use self::register::{Register, FIFO_RX_BASE_ADDR, FIFO_TX_BASE_ADDR};
pub use self::convert::{TxPower, BANDWIDTHS, FSTEP, FXOSC};
pub use self::interrupt::{Dio0, IrqFlags};
pub use self::register::MAX_PACKET_LENGTH;

/// Provides the necessary SPI mode configuration for the radio.
pub const MODE: Mode = Mode {
    phase: Phase::CaptureOnSecondTransition,
    polarity: Polarity::IdleHigh,
};

#[cfg(not(feature = "version_0x09"))]
const VERSION_CHECK: u8 = 0x12;

#[cfg(feature = "version_0x09")]
const VERSION_CHECK: u8 = 0x09;

#[derive(Debug)]
pub enum Error<SPI, CS> {
    /// RegVersion did not report the expected silicon revision. Nothing is
    /// written to the chip after this is detected.
    VersionMismatch(u8),
    Spi(SPI),
    Cs(CS),
    /// A transmission is already in flight.
    Transmitting,
    /// TX_DONE was not observed within the requested poll budget.
    TxTimeout,
}

use Error::*;

/// Which power-amplifier output pin the board wires to the antenna.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PaOutputPin {
    Rfo,
    PaBoost,
}

/// Radio parameters applied by [`LoRa::new`] and [`LoRa::apply_config`].
/// Out-of-range numeric values are clamped to the chip's limits when written,
/// never rejected.
#[derive(Clone, Debug)]
pub struct Config {
    pub frequency_hz: u32,
    pub bandwidth_hz: u32,
    pub spreading_factor: u8,
    pub coding_rate_denominator: u8,
    pub preamble_length: u16,
    pub implicit_header: bool,
    pub sync_word: u8,
    pub enable_crc: bool,
    pub tx_power_dbm: i32,
    pub pa_output_pin: PaOutputPin,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            frequency_hz: 433_000_000,
            bandwidth_hz: 125_000,
            spreading_factor: 10,
            coding_rate_denominator: 5,
            preamble_length: 8,
            implicit_header: false,
            sync_word: 0x12,
            enable_crc: false,
            tx_power_dbm: 17,
            pa_output_pin: PaOutputPin::PaBoost,
        }
    }
}

/// Outcome of one receive poll. Only `Received` means a clean packet is
/// waiting in the FIFO; `CrcError` and `Timeout` report the corresponding
/// IRQ bits, which always suppress the success result.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RxOutcome {
    Received,
    CrcError,
    Timeout,
    NotReady,
}

/// Operating modes of the radio and their RegOpMode values.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RadioMode {
    LongRangeMode = 0x80,
    Sleep = 0x00,
    Stdby = 0x01,
    Tx = 0x03,
    RxContinuous = 0x05,
    RxSingle = 0x06,
}

impl RadioMode {
    /// Returns the register value of the mode.
    pub fn addr(self) -> u8 {
        self as u8
    }
}

/// Provides high-level access to a Semtech SX1276/77/78/79 based board.
/// One instance maps to one physical chip; all operations run to completion
/// on the calling thread, so concurrent callers must serialize around the
/// whole driver.
pub struct LoRa<SPI, CS> {
    spi: SPI,
    cs: CS,
    frequency: u32,
    implicit_header: Option<bool>,
    mode: RadioMode,
}

impl<SPI, CS> LoRa<SPI, CS>
where
    SPI: SpiBus,
    CS: OutputPin,
{
    /// Builds a new instance of the radio and performs the full bring-up:
    /// version check, Sleep, parameter application, FIFO base setup, ending
    /// in Standby. Only one instance should exist per chip.
    pub fn new(spi: SPI, cs: CS, config: Config) -> Result<Self, Error<SPI::Error, CS::Error>> {
        let mut radio = LoRa {
            spi,
            cs,
            frequency: config.frequency_hz,
            implicit_header: None,
            mode: RadioMode::Sleep,
        };

        log::trace!("sx127x: init start");
        let version = radio.read_register(Register::RegVersion)?;
        if version != VERSION_CHECK {
            log::warn!("sx127x: unexpected RegVersion {version:#04x}");
            return Err(VersionMismatch(version));
        }
        radio.apply_config(&config)?;
        log::trace!("sx127x: init done, version {version:#04x}");
        Ok(radio)
    }

    /// Re-applies a full parameter set. This is the only point where the
    /// low-data-rate-optimization heuristic is evaluated, so call this again
    /// after changing bandwidth or spreading factor individually.
    pub fn apply_config(&mut self, config: &Config) -> Result<(), Error<SPI::Error, CS::Error>> {
        self.set_mode(RadioMode::Sleep)?;
        self.set_frequency(config.frequency_hz)?;
        self.set_signal_bandwidth(config.bandwidth_hz)?;
        let lna = self.read_register(Register::RegLna)?;
        self.write_register(Register::RegLna, lna | 0x03)?;
        // auto AGC
        self.write_register(Register::RegModemConfig3, 0x04)?;
        self.set_tx_power(config.tx_power_dbm, config.pa_output_pin)?;
        self.set_header_mode(config.implicit_header)?;
        self.set_spreading_factor(config.spreading_factor)?;
        self.set_coding_rate(config.coding_rate_denominator)?;
        self.set_preamble_length(config.preamble_length)?;
        self.set_sync_word(config.sync_word)?;
        self.enable_crc(config.enable_crc)?;
        let sf = config.spreading_factor.clamp(6, 12);
        if convert::low_data_rate_optimize(config.bandwidth_hz, sf) {
            let mut config_3 = self.read_register(Register::RegModemConfig3)?;
            config_3.set_bit(3, true);
            self.write_register(Register::RegModemConfig3, config_3)?;
        }
        self.write_register(Register::RegFifoTxBaseAddr, FIFO_TX_BASE_ADDR)?;
        self.write_register(Register::RegFifoRxBaseAddr, FIFO_RX_BASE_ADDR)?;
        self.set_mode(RadioMode::Stdby)
    }

    /// Sets the carrier frequency in Hz. The value is quantized to the
    /// synthesizer step of ~61 Hz.
    pub fn set_frequency(&mut self, hz: u32) -> Result<(), Error<SPI::Error, CS::Error>> {
        self.frequency = hz;
        let frf = convert::frf_from_frequency(hz);
        self.write_register(Register::RegFrfMsb, ((frf >> 16) & 0xff) as u8)?;
        self.write_register(Register::RegFrfMid, ((frf >> 8) & 0xff) as u8)?;
        self.write_register(Register::RegFrfLsb, (frf & 0xff) as u8)
    }

    /// Reads the carrier frequency back from the chip. The round-trip through
    /// [`LoRa::set_frequency`] is lossy to one synthesizer step.
    pub fn get_frequency(&mut self) -> Result<u32, Error<SPI::Error, CS::Error>> {
        let msb = self.read_register(Register::RegFrfMsb)?;
        let mid = self.read_register(Register::RegFrfMid)?;
        let lsb = self.read_register(Register::RegFrfLsb)?;
        let frf = (u32::from(msb) << 16) | (u32::from(mid) << 8) | u32::from(lsb);
        Ok(convert::frequency_from_frf(frf))
    }

    /// Sets the signal bandwidth to the smallest supported bin covering the
    /// requested Hz value. Supported bins are listed in [`BANDWIDTHS`].
    pub fn set_signal_bandwidth(&mut self, hz: u32) -> Result<(), Error<SPI::Error, CS::Error>> {
        self.set_bandwidth_index(convert::bandwidth_index(hz))
    }

    /// Sets the signal bandwidth by raw bin index, clamped to 0..=9.
    pub fn set_bandwidth_index(&mut self, index: u8) -> Result<(), Error<SPI::Error, CS::Error>> {
        let index = index.min((BANDWIDTHS.len() - 1) as u8);
        let modem_config_1 = self.read_register(Register::RegModemConfig1)?;
        self.write_register(
            Register::RegModemConfig1,
            (modem_config_1 & 0x0f) | (index << 4),
        )
    }

    /// Returns the configured bandwidth as (bin index, Hz).
    pub fn get_signal_bandwidth(&mut self) -> Result<(u8, u32), Error<SPI::Error, CS::Error>> {
        let index = self.read_register(Register::RegModemConfig1)? >> 4;
        Ok((index, convert::bandwidth_hz(index)))
    }

    /// Sets the spreading factor, clamped to 6..=12. SF6 requires implicit
    /// header mode and uses its own detection-optimize values.
    pub fn set_spreading_factor(&mut self, sf: u8) -> Result<(), Error<SPI::Error, CS::Error>> {
        let sf = sf.clamp(6, 12);
        if sf == 6 {
            self.write_register(Register::RegDetectionOptimize, 0xc5)?;
            self.write_register(Register::RegDetectionThreshold, 0x0c)?;
        } else {
            self.write_register(Register::RegDetectionOptimize, 0xc3)?;
            self.write_register(Register::RegDetectionThreshold, 0x0a)?;
        }
        let modem_config_2 = self.read_register(Register::RegModemConfig2)?;
        self.write_register(
            Register::RegModemConfig2,
            (modem_config_2 & 0x0f) | ((sf << 4) & 0xf0),
        )
    }

    pub fn get_spreading_factor(&mut self) -> Result<u8, Error<SPI::Error, CS::Error>> {
        Ok(self.read_register(Register::RegModemConfig2)? >> 4)
    }

    /// Sets the transmit power in dBm on the given output pin. RFO levels
    /// clamp to 0..=14, PA_BOOST levels to 2..=17.
    pub fn set_tx_power(
        &mut self,
        level_dbm: i32,
        output_pin: PaOutputPin,
    ) -> Result<(), Error<SPI::Error, CS::Error>> {
        let value = match output_pin {
            PaOutputPin::Rfo => convert::pa_config_rfo(level_dbm),
            PaOutputPin::PaBoost => convert::pa_config_boost(level_dbm),
        };
        self.write_register(Register::RegPaConfig, value)
    }

    /// Decodes RegPaConfig into the actual output power, the MaxPower
    /// ceiling, and the selected pin.
    pub fn get_tx_power(&mut self) -> Result<TxPower, Error<SPI::Error, CS::Error>> {
        Ok(convert::decode_pa_config(
            self.read_register(Register::RegPaConfig)?,
        ))
    }

    /// Sets the coding rate denominator of 4/x, clamped to 5..=8.
    pub fn set_coding_rate(&mut self, denominator: u8) -> Result<(), Error<SPI::Error, CS::Error>> {
        let cr = convert::coding_rate_field(denominator);
        let modem_config_1 = self.read_register(Register::RegModemConfig1)?;
        self.write_register(
            Register::RegModemConfig1,
            (modem_config_1 & 0xf1) | (cr << 1),
        )
    }

    pub fn get_coding_rate(&mut self) -> Result<u8, Error<SPI::Error, CS::Error>> {
        let modem_config_1 = self.read_register(Register::RegModemConfig1)?;
        Ok(convert::coding_rate_denominator((modem_config_1 & 0x0e) >> 1))
    }

    pub fn set_preamble_length(&mut self, length: u16) -> Result<(), Error<SPI::Error, CS::Error>> {
        self.write_register(Register::RegPreambleMsb, (length >> 8) as u8)?;
        self.write_register(Register::RegPreambleLsb, length as u8)
    }

    pub fn get_preamble_length(&mut self) -> Result<u16, Error<SPI::Error, CS::Error>> {
        let msb = self.read_register(Register::RegPreambleMsb)?;
        let lsb = self.read_register(Register::RegPreambleLsb)?;
        Ok((u16::from(msb) << 8) | u16::from(lsb))
    }

    pub fn set_sync_word(&mut self, sync_word: u8) -> Result<(), Error<SPI::Error, CS::Error>> {
        self.write_register(Register::RegSyncWord, sync_word)
    }

    pub fn get_sync_word(&mut self) -> Result<u8, Error<SPI::Error, CS::Error>> {
        self.read_register(Register::RegSyncWord)
    }

    /// Enables or disables the payload CRC check.
    pub fn enable_crc(&mut self, enable: bool) -> Result<(), Error<SPI::Error, CS::Error>> {
        let modem_config_2 = self.read_register(Register::RegModemConfig2)?;
        if enable {
            self.write_register(Register::RegModemConfig2, modem_config_2 | 0x04)
        } else {
            self.write_register(Register::RegModemConfig2, modem_config_2 & 0xfb)
        }
    }

    /// Switches between implicit (fixed length) and explicit (in-band length)
    /// header mode. The register is only touched when the mode changes.
    pub fn set_header_mode(&mut self, implicit: bool) -> Result<(), Error<SPI::Error, CS::Error>> {
        if self.implicit_header == Some(implicit) {
            return Ok(());
        }
        let modem_config_1 = self.read_register(Register::RegModemConfig1)?;
        let value = if implicit {
            modem_config_1 | 0x01
        } else {
            modem_config_1 & 0xfe
        };
        self.write_register(Register::RegModemConfig1, value)?;
        self.implicit_header = Some(implicit);
        Ok(())
    }

    /// Routes an event to the DIO0 pin, for callers that wire DIO0 to an
    /// edge-triggered interrupt line instead of polling.
    pub fn map_dio0(&mut self, event: Dio0) -> Result<(), Error<SPI::Error, CS::Error>> {
        let reg_val = self.read_register(Register::RegDioMapping1)?;
        self.write_register(
            Register::RegDioMapping1,
            (reg_val & !event.mask()) | (event as u8),
        )
    }

    /// Sets the state of the radio. Mode after initialization is `Stdby`.
    pub fn set_mode(&mut self, mode: RadioMode) -> Result<(), Error<SPI::Error, CS::Error>> {
        self.write_register(
            Register::RegOpMode,
            RadioMode::LongRangeMode.addr() | mode.addr(),
        )?;
        self.mode = mode;
        Ok(())
    }

    /// The mode most recently commanded by this driver. The chip returns to
    /// Standby by itself when a transmit or single receive completes.
    pub fn mode(&self) -> RadioMode {
        self.mode
    }

    pub fn sleep(&mut self) -> Result<(), Error<SPI::Error, CS::Error>> {
        self.set_mode(RadioMode::Sleep)
    }

    pub fn standby(&mut self) -> Result<(), Error<SPI::Error, CS::Error>> {
        self.set_mode(RadioMode::Stdby)
    }

    /// Starts an outgoing packet: forces Standby, selects the header mode,
    /// rewinds the FIFO pointer to the TX base and zeroes the payload length.
    pub fn begin_packet(&mut self, implicit_header: bool) -> Result<(), Error<SPI::Error, CS::Error>> {
        self.set_mode(RadioMode::Stdby)?;
        self.set_header_mode(implicit_header)?;
        self.write_register(Register::RegFifoAddrPtr, FIFO_TX_BASE_ADDR)?;
        self.write_register(Register::RegPayloadLength, 0)
    }

    /// Appends bytes to the outgoing packet. Returns the number of bytes
    /// accepted; anything beyond the chip's maximum packet length is silently
    /// truncated.
    pub fn write_payload(&mut self, buffer: &[u8]) -> Result<usize, Error<SPI::Error, CS::Error>> {
        let current_length = self.read_register(Register::RegPayloadLength)?;
        let space = MAX_PACKET_LENGTH - FIFO_TX_BASE_ADDR as usize - current_length as usize;
        let size = buffer.len().min(space);
        for byte in buffer.iter().take(size) {
            self.write_register(Register::RegFifo, *byte)?;
        }
        self.write_register(Register::RegPayloadLength, current_length + size as u8)?;
        Ok(size)
    }

    /// Finishes the outgoing packet: enters Tx and polls the IRQ flags until
    /// TX_DONE, then clears that flag. The chip drops back to Standby by
    /// itself on completion. `timeout` bounds the poll loop; `None` polls
    /// indefinitely, `Some(n)` gives up with [`Error::TxTimeout`] after `n`
    /// reads of the flag register.
    pub fn end_packet(&mut self, timeout: Option<u32>) -> Result<(), Error<SPI::Error, CS::Error>> {
        self.set_mode(RadioMode::Tx)?;
        let mut polls = 0u32;
        while !self.irq_flags()?.tx_done() {
            polls = polls.saturating_add(1);
            if let Some(max) = timeout {
                if polls >= max {
                    log::warn!("sx127x: TX_DONE not seen after {polls} polls");
                    return Err(TxTimeout);
                }
            }
        }
        self.write_register(Register::RegIrqFlags, IrqFlags::TX_DONE)?;
        self.mode = RadioMode::Stdby;
        log::trace!("sx127x: tx complete after {polls} polls");
        Ok(())
    }

    /// Transmits one explicit-header packet in a single call: begin, write,
    /// end. Returns the number of payload bytes actually sent.
    pub fn transmit(
        &mut self,
        payload: &[u8],
        timeout: Option<u32>,
    ) -> Result<usize, Error<SPI::Error, CS::Error>> {
        if self.transmitting()? {
            return Err(Transmitting);
        }
        self.begin_packet(false)?;
        let size = self.write_payload(payload)?;
        self.end_packet(timeout)?;
        Ok(size)
    }

    /// Returns true if the chip is currently in Tx mode.
    pub fn transmitting(&mut self) -> Result<bool, Error<SPI::Error, CS::Error>> {
        let op_mode = self.read_register(Register::RegOpMode)?;
        Ok(op_mode & 0x07 == RadioMode::Tx.addr())
    }

    /// Enters continuous receive. A nonzero `size` selects implicit header
    /// mode with fixed-length packets of that size.
    pub fn receive(&mut self, size: u8) -> Result<(), Error<SPI::Error, CS::Error>> {
        self.set_header_mode(size > 0)?;
        if size > 0 {
            self.write_register(Register::RegPayloadLength, size)?;
        }
        // The last packet always starts at FIFO_RX_CURRENT_ADDR, so the FIFO
        // pointer is left alone here.
        log::trace!("sx127x: entering continuous rx");
        self.set_mode(RadioMode::RxContinuous)
    }

    /// Reads the IRQ flags without clearing them.
    pub fn irq_flags(&mut self) -> Result<IrqFlags, Error<SPI::Error, CS::Error>> {
        Ok(IrqFlags::from_bits(
            self.read_register(Register::RegIrqFlags)?,
        ))
    }

    /// Reads the IRQ flags and clears every observed bit by writing the mask
    /// back. Bits raised between the read and the write-back stay pending.
    pub fn take_irq_flags(&mut self) -> Result<IrqFlags, Error<SPI::Error, CS::Error>> {
        let flags = self.irq_flags()?;
        self.write_register(Register::RegIrqFlags, flags.bits())?;
        Ok(flags)
    }

    /// Rewinds the FIFO pointer to the RX base and enters single receive.
    pub fn arm_single_receive(&mut self) -> Result<(), Error<SPI::Error, CS::Error>> {
        self.write_register(Register::RegFifoAddrPtr, FIFO_RX_BASE_ADDR)?;
        self.set_mode(RadioMode::RxSingle)
    }

    /// Non-blocking receive poll. Takes and clears the IRQ flags, classifies
    /// them, and re-arms single receive when no clean packet arrived and the
    /// chip is not already in single-receive mode. A packet counts as
    /// received only when RX_DONE is the sole flag set; a simultaneous CRC
    /// error or timeout suppresses it and is reported as its own outcome.
    pub fn check_rx(&mut self, size: u8) -> Result<RxOutcome, Error<SPI::Error, CS::Error>> {
        let flags = self.take_irq_flags()?;
        self.set_header_mode(size > 0)?;
        if size > 0 {
            self.write_register(Register::RegPayloadLength, size)?;
        }
        if flags.is_exactly_rx_done() {
            // the chip returned to standby on RX_DONE
            self.mode = RadioMode::Stdby;
            return Ok(RxOutcome::Received);
        }
        let outcome = if flags.crc_error() {
            RxOutcome::CrcError
        } else if flags.rx_timeout() {
            RxOutcome::Timeout
        } else {
            RxOutcome::NotReady
        };
        let op_mode = self.read_register(Register::RegOpMode)?;
        if op_mode != (RadioMode::LongRangeMode.addr() | RadioMode::RxSingle.addr()) {
            self.arm_single_receive()?;
        }
        Ok(outcome)
    }

    /// Compatibility form of [`LoRa::check_rx`]: true exactly when a clean
    /// packet is ready to be read.
    pub fn received_packet(&mut self, size: u8) -> Result<bool, Error<SPI::Error, CS::Error>> {
        Ok(self.check_rx(size)? == RxOutcome::Received)
    }

    /// Reads the newest packet out of the FIFO. Call at most once per
    /// successful receive poll; the FIFO pointer advances while reading, so a
    /// second call yields undefined bytes. Returns the payload buffer and
    /// the packet length.
    pub fn read_payload(
        &mut self,
    ) -> Result<([u8; MAX_PACKET_LENGTH], usize), Error<SPI::Error, CS::Error>> {
        let current_addr = self.read_register(Register::RegFifoRxCurrentAddr)?;
        self.write_register(Register::RegFifoAddrPtr, current_addr)?;
        let length = if self.implicit_header == Some(true) {
            self.read_register(Register::RegPayloadLength)?
        } else {
            self.read_register(Register::RegRxNbBytes)?
        };
        let mut buffer = [0u8; MAX_PACKET_LENGTH];
        for slot in buffer.iter_mut().take(length as usize) {
            *slot = self.read_register(Register::RegFifo)?;
        }
        Ok((buffer, length as usize))
    }

    /// RSSI of the last received packet in dBm. Valid immediately after a
    /// receive completes.
    pub fn packet_rssi(&mut self) -> Result<i16, Error<SPI::Error, CS::Error>> {
        let raw = self.read_register(Register::RegPktRssiValue)?;
        Ok(convert::rssi_from_raw(raw, self.frequency))
    }

    /// SNR of the last received packet in dB, 0.25 dB resolution.
    pub fn packet_snr(&mut self) -> Result<f32, Error<SPI::Error, CS::Error>> {
        let raw = self.read_register(Register::RegPktSnrValue)?;
        Ok(convert::snr_from_raw(raw))
    }

    fn read_register(&mut self, reg: Register) -> Result<u8, Error<SPI::Error, CS::Error>> {
        let mut read = [0u8; 2];
        let write = [reg.addr() & 0x7f, 0];
        self.cs.set_low().map_err(Cs)?;
        let transfer = self.spi.transfer(&mut read, &write);
        let flush = self.spi.flush();
        self.cs.set_high().map_err(Cs)?;
        transfer.map_err(Spi)?;
        flush.map_err(Spi)?;
        Ok(read[1])
    }

    fn write_register(&mut self, reg: Register, byte: u8) -> Result<(), Error<SPI::Error, CS::Error>> {
        let buffer = [reg.addr() | 0x80, byte];
        self.cs.set_low().map_err(Cs)?;
        let write = self.spi.write(&buffer);
        let flush = self.spi.flush();
        self.cs.set_high().map_err(Cs)?;
        write.map_err(Spi)?;
        flush.map_err(Spi)?;
        Ok(())
    }
}
