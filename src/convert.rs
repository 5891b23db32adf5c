//! Pure conversions between radio parameters and register field values.

/// Crystal oscillator frequency (datasheet 2.5, chip specification).
pub const FXOSC: u32 = 32_000_000;

/// Frequency synthesizer step, FXOSC / 2^19 ≈ 61.03516 Hz.
pub const FSTEP: f64 = 61.03516;

/// The ten discrete signal bandwidths of RegModemConfig1, in Hz, indexed by
/// the 4-bit BW field.
pub const BANDWIDTHS: [u32; 10] = [
    7_800, 10_400, 15_600, 20_800, 31_250, 41_700, 62_500, 125_000, 250_000, 500_000,
];

/// Converts a carrier frequency in Hz into the 24-bit FRF word.
pub fn frf_from_frequency(hz: u32) -> u32 {
    ((f64::from(hz) / FSTEP) + 0.5) as u32
}

/// Converts a 24-bit FRF word back into Hz. Lossy to one synthesizer step.
pub fn frequency_from_frf(frf: u32) -> u32 {
    (f64::from(frf) * FSTEP) as u32
}

/// Selects the smallest bandwidth bin that covers the requested Hz value.
/// Requests above the largest bin select it.
pub fn bandwidth_index(hz: u32) -> u8 {
    for (index, bin) in BANDWIDTHS.iter().enumerate() {
        if hz <= *bin {
            return index as u8;
        }
    }
    (BANDWIDTHS.len() - 1) as u8
}

/// The bandwidth in Hz for a (clamped) bin index.
pub fn bandwidth_hz(index: u8) -> u32 {
    BANDWIDTHS[(index as usize).min(BANDWIDTHS.len() - 1)]
}

/// RegPaConfig value for the RFO output pin. Levels clamp to 0..=14 dBm.
pub fn pa_config_rfo(level_dbm: i32) -> u8 {
    crate::register::PaConfig::MaxPower.addr() | level_dbm.clamp(0, 14) as u8
}

/// RegPaConfig value for the PA_BOOST output pin. Levels clamp to 2..=17 dBm
/// and are stored biased by -2.
pub fn pa_config_boost(level_dbm: i32) -> u8 {
    crate::register::PaConfig::PaBoost.addr()
        | crate::register::PaConfig::MaxPower.addr()
        | (level_dbm.clamp(2, 17) - 2) as u8
}

/// Decoded view of RegPaConfig.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TxPower {
    /// Configured output power in dBm.
    pub output_dbm: f32,
    /// Ceiling implied by the MaxPower field, Pmax = 10.8 + 0.6 * field.
    pub max_dbm: f32,
    /// Whether the PA_BOOST pin is selected.
    pub pa_boost: bool,
}

/// Inverse of the two RegPaConfig encodings.
pub fn decode_pa_config(reg_pa_config: u8) -> TxPower {
    let pa_boost = reg_pa_config & 0x80 != 0;
    let max_power_field = (reg_pa_config >> 4) & 0x07;
    let output_field = reg_pa_config & 0x0f;
    let max_dbm = 10.8 + 0.6 * f32::from(max_power_field);
    let output_dbm = if pa_boost {
        17.0 - (15.0 - f32::from(output_field))
    } else {
        max_dbm - (15.0 - f32::from(output_field))
    };
    TxPower {
        output_dbm,
        max_dbm,
        pa_boost,
    }
}

/// 3-bit coding-rate field from the denominator of 4/x, clamped to 5..=8.
pub fn coding_rate_field(denominator: u8) -> u8 {
    denominator.clamp(5, 8) - 4
}

pub fn coding_rate_denominator(field: u8) -> u8 {
    field + 4
}

/// Whether the low-data-rate-optimization bit is required: symbol period
/// 2^sf / bandwidth longer than 16 ms (datasheet 4.1.1.6).
pub fn low_data_rate_optimize(bandwidth_hz: u32, spreading_factor: u8) -> bool {
    (1000u64 << spreading_factor) > 16 * u64::from(bandwidth_hz)
}

/// Packet SNR in dB from the raw two's-complement register value.
pub fn snr_from_raw(raw: u8) -> f32 {
    f32::from(raw as i8) * 0.25
}

/// Packet RSSI in dBm. The offset is a band-dependent calibration constant:
/// -164 below 868 MHz, -157 at and above.
pub fn rssi_from_raw(raw: u8, frequency_hz: u32) -> i16 {
    let offset = if frequency_hz < 868_000_000 { 164 } else { 157 };
    i16::from(raw) - offset
}
