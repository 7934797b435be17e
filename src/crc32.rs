//! PostgreSQL's CRC-32 variant: reflected, polynomial 0xEDB88320, initial
//! 0xFFFFFFFF, final XOR 0xFFFFFFFF. This is the common zlib/Ethernet
//! CRC-32, which is what `crc32fast` implements. `postgres_ffi`'s own
//! CRC (`crc32c`) is the Castagnoli
//! variant used for WAL, a different polynomial than the relmapper's.

pub fn postgres_crc32(bytes: &[u8]) -> u32 {
    crc32fast::hash(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_the_standard_check_value() {
        // The canonical CRC-32 check value for the ASCII string "123456789".
        assert_eq!(postgres_crc32(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn empty_input_is_zero() {
        assert_eq!(postgres_crc32(b""), 0);
    }
}
