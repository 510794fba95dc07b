use crate::result::*;

/// A checked cast from u64 to usize
///
/// Offsets and counts in a zip archive's directory can be 64 bits wide,
/// but we index into a memory map with them.
pub fn usize<I: Into<u64>>(i: I) -> ArchiveResult<usize> {
    usize::try_from(i.into()).map_err(|_| ArchiveError::InsufficientAddressSpace)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_values_fit() {
        assert_eq!(usize(42u32).unwrap(), 42);
        assert_eq!(usize(u16::MAX).unwrap(), u16::MAX as usize);
    }

    #[test]
    #[cfg(target_pointer_width = "32")]
    fn large_values_dont_fit_in_32_bits() {
        assert!(matches!(
            usize(u64::MAX),
            Err(ArchiveError::InsufficientAddressSpace)
        ));
    }
}
