//! Peripheral base discovery.
//!
//! The ARM physical address of the peripheral window differs per SoC. The
//! running kernel publishes it in the device tree: `/proc/device-tree/soc/ranges`
//! is a list of big-endian `(child, parent, size)` cells and the parent
//! address of the first entry is the base.

/// BCM2835 (Pi 1, Zero).
pub const BCM2835_PERI_BASE: u32 = 0x2000_0000;
/// BCM2836 / BCM2837 (Pi 2, Pi 3).
pub const BCM2837_PERI_BASE: u32 = 0x3F00_0000;
/// BCM2711 (Pi 4).
pub const BCM2711_PERI_BASE: u32 = 0xFE00_0000;

/// Base used when the device tree gives no answer.
pub const DEFAULT_PERI_BASE: u32 = BCM2837_PERI_BASE;

/// Size of the peripheral window.
pub const PERI_SIZE: u32 = 0x0100_0000;

/// Device-tree node carrying the bus ranges.
pub const SOC_RANGES_PATH: &str = "/proc/device-tree/soc/ranges";

/// Every base the bridge is known to run on.
pub const KNOWN_BASES: [u32; 3] = [BCM2835_PERI_BASE, BCM2837_PERI_BASE, BCM2711_PERI_BASE];

/// Extract the peripheral base from raw `soc/ranges` bytes.
///
/// Returns `None` when the blob is too short or the parent cell is zero.
#[must_use]
pub fn parse_soc_ranges(bytes: &[u8]) -> Option<u32> {
    let cell: [u8; 4] = bytes.get(4..8)?.try_into().ok()?;
    match u32::from_be_bytes(cell) {
        0 => None,
        base => Some(base),
    }
}

/// Whether `base` is one of [`KNOWN_BASES`].
#[must_use]
pub fn is_known_base(base: u32) -> bool {
    KNOWN_BASES.contains(&base)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pi4_ranges() {
        let blob = [
            0x7E, 0x00, 0x00, 0x00, 0xFE, 0x00, 0x00, 0x00, 0x01, 0x80, 0x00, 0x00,
        ];
        assert_eq!(parse_soc_ranges(&blob), Some(BCM2711_PERI_BASE));
    }

    #[test]
    fn parses_pi3_ranges() {
        let blob = [0x7E, 0, 0, 0, 0x3F, 0, 0, 0, 0x01, 0, 0, 0];
        assert_eq!(parse_soc_ranges(&blob), Some(BCM2837_PERI_BASE));
    }

    #[test]
    fn zero_parent_means_unknown() {
        // Pi 4 64-bit trees put the base in a later cell.
        let blob = [0x7E, 0, 0, 0, 0, 0, 0, 0, 0xFE, 0, 0, 0];
        assert_eq!(parse_soc_ranges(&blob), None);
    }

    #[test]
    fn short_blob_rejected() {
        assert_eq!(parse_soc_ranges(&[0x7E, 0, 0]), None);
        assert_eq!(parse_soc_ranges(&[]), None);
    }

    #[test]
    fn known_bases() {
        assert!(is_known_base(0x2000_0000));
        assert!(!is_known_base(0x1234_0000));
    }
}
