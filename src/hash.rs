//! Streaming Adler-32 — the checksum stored per entry and verified by
//! [`crate::Archive::verify_entry`].

const MOD: u32 = 65521;
/// Largest n such that 255n(n+1)/2 + (n+1)(MOD-1) fits in u32, letting the
/// modulo be deferred across a whole block.
const NMAX: usize = 5552;

/// Incremental Adler-32 accumulator.
#[derive(Debug, Clone)]
pub struct Adler32 {
    a: u32,
    b: u32,
}

impl Default for Adler32 {
    fn default() -> Self {
        Self::new()
    }
}

impl Adler32 {
    pub fn new() -> Self {
        Self { a: 1, b: 0 }
    }

    pub fn update(&mut self, data: &[u8]) {
        for block in data.chunks(NMAX) {
            for &byte in block {
                self.a += byte as u32;
                self.b += self.a;
            }
            self.a %= MOD;
            self.b %= MOD;
        }
    }

    pub fn finalize(&self) -> u32 {
        (self.b << 16) | self.a
    }
}

/// One-shot convenience over [`Adler32`].
pub fn adler32(data: &[u8]) -> u32 {
    let mut h = Adler32::new();
    h.update(data);
    h.finalize()
}
