/// Primitive polynomial of the CCSDS Reed-Solomon code, x^8 + x^7 + x^2 + x + 1.
pub const CCSDS_POLY: u16 = 0x187;

/// Log/antilog tables for GF(2^8) generated by α = 2 under a given primitive polynomial.
///
/// `exp` is stored twice over (510 entries) so that a product of two logs can index it
/// without a modulo.
///
/// # Fields
/// - `exp`: `exp[i] = α^i` for `i` in `0..510`
/// - `log`: `log[x]` is the discrete log of `x`, `log[0]` is unused
#[derive(Debug, Clone)]
pub struct GaloisField {
    pub exp: [u8; 510],
    pub log: [u8; 256],
}

impl GaloisField {
    pub fn new(primitive_poly: u16) -> GaloisField {
        let mut exp: [u8; 510] = [0u8; 510];
        let mut log: [u8; 256] = [0u8; 256];

        let mut x: u16 = 1;
        for i in 0..255 {
            exp[i] = x as u8;
            exp[i + 255] = x as u8;
            log[x as usize] = i as u8;

            x <<= 1;
            if x & 0x100 != 0 {
                x ^= primitive_poly;
            }
        }

        return GaloisField { exp: exp, log: log };
    }

    pub fn add(a: u8, b: u8) -> u8 {
        return a ^ b;
    }

    pub fn multiply(&self, a: u8, b: u8) -> u8 {
        if a == 0 || b == 0 {
            return 0;
        }

        let log_sum: usize = self.log[a as usize] as usize + self.log[b as usize] as usize;
        return self.exp[log_sum];
    }

    /// Divides `a` by `b`. Division by zero yields zero, callers guard against it.
    pub fn divide(&self, a: u8, b: u8) -> u8 {
        if a == 0 || b == 0 {
            return 0;
        }

        let log_diff: usize = self.log[a as usize] as usize + 255 - self.log[b as usize] as usize;
        return self.exp[log_diff];
    }

    pub fn inverse(&self, a: u8) -> u8 {
        return self.divide(1, a);
    }

    /// α^power, for any non-negative power.
    pub fn alpha_pow(&self, power: usize) -> u8 {
        return self.exp[power % 255];
    }

    /// Evaluates a polynomial stored highest-degree coefficient first at `x` (Horner).
    pub fn poly_eval(&self, poly: &[u8], x: u8) -> u8 {
        let mut y: u8 = 0;
        for &coef in poly {
            y = self.multiply(y, x) ^ coef;
        }

        return y;
    }
}
