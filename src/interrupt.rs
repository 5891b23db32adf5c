use crate::register::Register;

/// Snapshot of RegIrqFlags. Reading the register does not clear it; the
/// driver clears flags by writing the observed mask back, so a snapshot
/// taken with [`crate::LoRa::irq_flags`] stays pending on the chip while
/// one taken with [`crate::LoRa::take_irq_flags`] does not.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct IrqFlags(u8);

impl IrqFlags {
    pub const RX_TIMEOUT: u8 = 0x80;
    pub const RX_DONE: u8 = 0x40;
    pub const PAYLOAD_CRC_ERROR: u8 = 0x20;
    pub const VALID_HEADER: u8 = 0x10;
    pub const TX_DONE: u8 = 0x08;

    pub fn from_bits(bits: u8) -> Self {
        IrqFlags(bits)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn tx_done(self) -> bool {
        self.0 & Self::TX_DONE != 0
    }

    pub fn rx_done(self) -> bool {
        self.0 & Self::RX_DONE != 0
    }

    pub fn crc_error(self) -> bool {
        self.0 & Self::PAYLOAD_CRC_ERROR != 0
    }

    pub fn rx_timeout(self) -> bool {
        self.0 & Self::RX_TIMEOUT != 0
    }

    /// True only when RX_DONE is the sole bit set. A simultaneous CRC error
    /// or timeout bit disqualifies the packet.
    pub fn is_exactly_rx_done(self) -> bool {
        self.0 == Self::RX_DONE
    }
}

/// Events routable to the DIO0 pin through RegDioMapping1.
#[derive(Clone, Copy)]
pub enum Dio0 {
    RxDone = 0x00,
    TxDone = 0x40,
}

impl Dio0 {
    pub fn mask(self) -> u8 {
        0xc0 // DIO0 owns the top two bits of the mapping register
    }

    pub fn reg_addr(self) -> u8 {
        Register::RegDioMapping1.addr()
    }
}
