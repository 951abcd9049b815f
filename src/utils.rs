//! Utility functions.

/// Aligns an address or size up to the next multiple of `align`.
/// `align` must be a power of two; zero leaves `addr` unchanged.
pub fn align_up(addr: u64, align: u64) -> u64 {
    if align == 0 {
        return addr;
    }
    debug_assert!(align.is_power_of_two());
    (addr + align - 1) & !(align - 1)
}

/// Rounds `value` up to a multiple of `multiple`, which need not be a power of two.
pub fn round_up(value: u64, multiple: u64) -> u64 {
    if multiple <= 1 {
        return value;
    }
    value.div_ceil(multiple) * multiple
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_up_powers_of_two() {
        assert_eq!(align_up(0, 0x1000), 0);
        assert_eq!(align_up(1, 0x1000), 0x1000);
        assert_eq!(align_up(0x1000, 0x1000), 0x1000);
        assert_eq!(align_up(0x1001, 0x10), 0x1010);
        assert_eq!(align_up(7, 0), 7);
    }

    #[test]
    fn round_up_any_multiple() {
        assert_eq!(round_up(10, 3), 12);
        assert_eq!(round_up(0x1000, 0x10000), 0x10000);
        assert_eq!(round_up(5, 0), 5);
        assert_eq!(round_up(5, 1), 5);
    }
}
