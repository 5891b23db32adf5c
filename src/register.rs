#![allow(dead_code)]

/// LoRa-mode register map, SX1276/77/78/79 datasheet table 41.
#[derive(Clone, Copy)]
pub enum Register {
    RegFifo = 0x00,
    RegOpMode = 0x01,
    RegFrfMsb = 0x06,
    RegFrfMid = 0x07,
    RegFrfLsb = 0x08,
    RegPaConfig = 0x09,
    RegLna = 0x0c,
    RegFifoAddrPtr = 0x0d,
    RegFifoTxBaseAddr = 0x0e,
    RegFifoRxBaseAddr = 0x0f,
    RegFifoRxCurrentAddr = 0x10,
    RegIrqFlagsMask = 0x11,
    RegIrqFlags = 0x12,
    RegRxNbBytes = 0x13,
    RegPktSnrValue = 0x19,
    RegPktRssiValue = 0x1a,
    RegModemConfig1 = 0x1d,
    RegModemConfig2 = 0x1e,
    RegPreambleMsb = 0x20,
    RegPreambleLsb = 0x21,
    RegPayloadLength = 0x22,
    RegModemConfig3 = 0x26,
    RegDetectionOptimize = 0x31,
    RegDetectionThreshold = 0x37,
    RegSyncWord = 0x39,
    RegDioMapping1 = 0x40,
    RegVersion = 0x42,
}

impl Register {
    pub fn addr(self) -> u8 {
        self as u8
    }
}

/// RegPaConfig bit fields.
#[derive(Clone, Copy)]
pub enum PaConfig {
    PaBoost = 0x80,
    MaxPower = 0x70,
    PaOutputRfoPin = 0,
}

impl PaConfig {
    pub fn addr(self) -> u8 {
        self as u8
    }
}

/// The shared FIFO is partitioned at fixed base offsets for TX and RX. Both
/// sit at zero so either direction can use the full buffer.
pub const FIFO_TX_BASE_ADDR: u8 = 0x00;
pub const FIFO_RX_BASE_ADDR: u8 = 0x00;

/// Largest LoRa payload the chip accepts.
pub const MAX_PACKET_LENGTH: usize = 255;
