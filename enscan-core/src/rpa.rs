//! Resolvable Private Address resolution (Bluetooth Core 5.0 §2.2.2).

use crate::address::Address;
use aes::{
    cipher::{BlockEncrypt, KeyInit},
    Aes128,
};
use aes::cipher::generic_array::GenericArray;

/// A 16-byte Identity Resolving Key.
pub type Irk = [u8; 16];

/// True if `irk` is the all-zero placeholder meaning "no key set".
fn is_unset(irk: &Irk) -> bool {
    irk.iter().all(|&b| b == 0)
}

/// Decides whether `addr` could have been generated from `irk`.
///
/// An all-zero IRK never resolves, and a non-resolvable address (the top two
/// bits of its most significant byte are not `01`) never resolves regardless
/// of the key.
pub fn resolve(addr: &Address, irk: &Irk) -> bool {
    if !addr.is_resolvable_private() || is_unset(irk) {
        return false;
    }

    // addr.0 is stored most-significant-byte first (as printed), so
    // addr.0[0..3] holds the 24-bit prand and addr.0[3..6] holds the 24-bit hash.
    let mut block = [0u8; 16];
    block[13] = addr.0[0];
    block[14] = addr.0[1];
    block[15] = addr.0[2];

    let cipher = Aes128::new(GenericArray::from_slice(irk));
    let mut out = GenericArray::clone_from_slice(&block);
    cipher.encrypt_block(&mut out);

    out[13] == addr.0[3] && out[14] == addr.0[4] && out[15] == addr.0[5]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex16(s: &str) -> Irk {
        let bytes = hex::decode(s).unwrap();
        bytes.try_into().unwrap()
    }

    #[test]
    fn s1_resolver_vector() {
        let irk = hex16("e2270523033eb8f92204cba9ea221cf3");
        let addr: Address = "4A:A0:D4:FF:C8:57".parse().unwrap();
        assert!(resolve(&addr, &irk));
    }

    #[test]
    fn non_resolvable_address_never_matches() {
        let irk = [0x11; 16];
        let addr = Address::new([0x00, 0xA0, 0xD4, 0xFF, 0xC8, 0x57]);
        assert!(!resolve(&addr, &irk));
    }

    #[test]
    fn zero_irk_never_matches() {
        let addr = Address::new([0x40, 0xA0, 0xD4, 0xFF, 0xC8, 0x57]);
        assert!(!resolve(&addr, &[0; 16]));
    }
}
