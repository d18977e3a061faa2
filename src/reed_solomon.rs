//! # Reed-Solomon Error Correction
//!
//! A systematic RS(255, 223) code over GF(256), built on the CCSDS primitive polynomial
//! `0x187` with generator roots α^1 .. α^32. It corrects up to 16 corrupted bytes per
//! 255-byte codeword.
//!
//! # Overview
//!
//! - **Encoding**: a 223-byte message is followed by 32 parity bytes. The first byte of the
//!   codeword is the highest-degree coefficient.
//! - **Decoding**:
//!     - **Syndrome Calculation**: evaluates the codeword at every generator root.
//!     - **Error Locator Polynomial**: Berlekamp-Massey.
//!     - **Error Positions**: Chien search over all 255 positions.
//!     - **Error Magnitudes**: Forney's algorithm, followed by a syndrome re-check.
//!
//! # Usage
//!
//! ```
//! use obc_gs_link::reed_solomon::{ReedSolomon, RS_MESSAGE_LEN};
//!
//! let rs = ReedSolomon::new();
//!
//! let message: [u8; RS_MESSAGE_LEN] = [42; RS_MESSAGE_LEN];
//! let mut codeword = rs.encode(&message).unwrap();
//!
//! codeword[10] ^= 0xFF; // Corrupt one byte
//! codeword[200] ^= 0x01; // Corrupt another byte
//!
//! assert_eq!(rs.decode(&codeword).unwrap(), message);
//! ```
use tracing::trace;

use crate::error::{CommsError, Result};
use crate::gf::{GaloisField, CCSDS_POLY};

/// The total length of the codeword (message + parity bytes).
pub const RS_CODEWORD_LEN: usize = 255;

/// The length of the message to be encoded.
pub const RS_MESSAGE_LEN: usize = 223;

/// The number of parity bytes added to the message.
pub const RS_PARITY_LEN: usize = RS_CODEWORD_LEN - RS_MESSAGE_LEN;

/// The number of correctable byte errors.
pub const RS_CORRECTABLE: usize = RS_PARITY_LEN / 2;

/// Exponent of the first consecutive generator root.
const FIRST_ROOT: usize = 1;

/// Spacing between consecutive generator roots.
const ROOT_GAP: usize = 1;

/// A Reed-Solomon encoder/decoder.
///
/// Holds the field tables and the generator polynomial. It is built once at start-up and
/// is read-only afterwards, so one instance can be shared between tasks behind an `Arc`.
/// Dropping it releases the tables.
///
/// # Fields
/// - `gf`: log/antilog tables for the CCSDS field
/// - `generator`: the monic generator polynomial, highest-degree coefficient first
#[derive(Debug, Clone)]
pub struct ReedSolomon {
    gf: GaloisField,
    generator: [u8; RS_PARITY_LEN + 1],
}

impl Default for ReedSolomon {
    fn default() -> Self {
        return Self::new();
    }
}

impl ReedSolomon {
    /// Builds the field tables and the generator polynomial
    /// `g(x) = (x - α^1)(x - α^2)...(x - α^32)`.
    pub fn new() -> Self {
        let gf: GaloisField = GaloisField::new(CCSDS_POLY);

        let mut generator: [u8; RS_PARITY_LEN + 1] = [0u8; RS_PARITY_LEN + 1];
        generator[0] = 1;

        for i in 0..RS_PARITY_LEN {
            let root: u8 = gf.alpha_pow((FIRST_ROOT + i) * ROOT_GAP);

            // multiply the current degree-i polynomial by (x + root)
            for j in (1..=i + 1).rev() {
                generator[j] ^= gf.multiply(root, generator[j - 1]);
            }
        }

        return Self {
            gf: gf,
            generator: generator,
        };
    }

    /// Encodes a 223-byte message into a 255-byte codeword.
    ///
    /// # Arguments
    /// - `message`: exactly `RS_MESSAGE_LEN` bytes
    ///
    /// # Returns
    /// The codeword, message bytes first and parity last, or `InvalidArgument` if the message
    /// has the wrong length.
    pub fn encode(&self, message: &[u8]) -> Result<[u8; RS_CODEWORD_LEN]> {
        if message.len() != RS_MESSAGE_LEN {
            return Err(CommsError::InvalidArgument("RS message must be 223 bytes"));
        }

        let mut parity: [u8; RS_PARITY_LEN] = [0u8; RS_PARITY_LEN];

        for &byte in message {
            let feedback: u8 = byte ^ parity[0];

            for k in 0..RS_PARITY_LEN - 1 {
                parity[k] = parity[k + 1] ^ self.gf.multiply(feedback, self.generator[k + 1]);
            }
            parity[RS_PARITY_LEN - 1] = self.gf.multiply(feedback, self.generator[RS_PARITY_LEN]);
        }

        let mut codeword: [u8; RS_CODEWORD_LEN] = [0u8; RS_CODEWORD_LEN];
        codeword[..RS_MESSAGE_LEN].copy_from_slice(message);
        codeword[RS_MESSAGE_LEN..].copy_from_slice(&parity);

        return Ok(codeword);
    }

    /// Calculates syndromes for the received codeword.
    ///
    /// # Returns
    /// `syndromes[k] = r(α^(FIRST_ROOT + k))`, all zero for a valid codeword.
    fn calc_syndromes(&self, received: &[u8; RS_CODEWORD_LEN]) -> [u8; RS_PARITY_LEN] {
        let mut syndromes: [u8; RS_PARITY_LEN] = [0u8; RS_PARITY_LEN];

        for k in 0..RS_PARITY_LEN {
            let root: u8 = self.gf.alpha_pow((FIRST_ROOT + k) * ROOT_GAP);
            syndromes[k] = self.gf.poly_eval(received, root);
        }

        return syndromes;
    }

    /// Finds the error locator polynomial using the Berlekamp-Massey algorithm.
    ///
    /// # Returns
    /// The locator, lowest-degree coefficient first, and its degree.
    fn find_error_locator(&self, syndromes: &[u8; RS_PARITY_LEN]) -> ([u8; RS_PARITY_LEN + 1], usize) {
        let mut locator: [u8; RS_PARITY_LEN + 1] = [0u8; RS_PARITY_LEN + 1];
        locator[0] = 1;
        let mut previous: [u8; RS_PARITY_LEN + 1] = locator;

        let mut degree: usize = 0;
        let mut shift: usize = 1;
        let mut previous_discrepancy: u8 = 1;

        for n in 0..RS_PARITY_LEN {
            let mut discrepancy: u8 = syndromes[n];
            for i in 1..=degree.min(n) {
                discrepancy ^= self.gf.multiply(locator[i], syndromes[n - i]);
            }

            if discrepancy == 0 {
                shift += 1;
                continue;
            }

            let scale: u8 = self.gf.divide(discrepancy, previous_discrepancy);
            let snapshot: [u8; RS_PARITY_LEN + 1] = locator;

            for i in 0..(RS_PARITY_LEN + 1).saturating_sub(shift) {
                locator[i + shift] ^= self.gf.multiply(scale, previous[i]);
            }

            if 2 * degree <= n {
                degree = n + 1 - degree;
                previous = snapshot;
                previous_discrepancy = discrepancy;
                shift = 1;
            } else {
                shift += 1;
            }
        }

        return (locator, degree);
    }

    /// Chien search: every codeword index whose locator root is a zero of the error locator.
    fn find_errors(&self, locator: &[u8; RS_PARITY_LEN + 1], degree: usize) -> Vec<usize> {
        let mut positions: Vec<usize> = Vec::with_capacity(degree);

        for i in 0..RS_CODEWORD_LEN {
            // index i holds the coefficient of x^(254 - i), its inverse locator is α^(i + 1)
            let x_inv: u8 = self.gf.alpha_pow(i + 1);

            let mut sum: u8 = 0;
            let mut power: u8 = 1;
            for j in 0..=degree {
                sum ^= self.gf.multiply(locator[j], power);
                power = self.gf.multiply(power, x_inv);
            }

            if sum == 0 {
                positions.push(i);
            }
        }

        return positions;
    }

    /// Forney's algorithm: computes and applies the error magnitude at each position.
    fn correct_errors(
        &self,
        received: &mut [u8; RS_CODEWORD_LEN],
        syndromes: &[u8; RS_PARITY_LEN],
        locator: &[u8; RS_PARITY_LEN + 1],
        degree: usize,
        positions: &[usize],
    ) -> Result<()> {
        // omega(x) = S(x) * lambda(x) mod x^32
        let mut evaluator: [u8; RS_PARITY_LEN] = [0u8; RS_PARITY_LEN];
        for k in 0..RS_PARITY_LEN {
            for j in 0..=degree.min(k) {
                evaluator[k] ^= self.gf.multiply(locator[j], syndromes[k - j]);
            }
        }

        for &position in positions {
            let x_power: usize = RS_CODEWORD_LEN - 1 - position;
            let x_inv: u8 = self.gf.alpha_pow(position + 1);

            let mut omega: u8 = 0;
            let mut power: u8 = 1;
            for k in 0..RS_PARITY_LEN {
                omega ^= self.gf.multiply(evaluator[k], power);
                power = self.gf.multiply(power, x_inv);
            }

            // formal derivative keeps only the odd-degree terms
            let mut derivative: u8 = 0;
            let mut j: usize = 1;
            while j <= degree {
                let term_power: u8 = self.gf.alpha_pow((position + 1) * (j - 1));
                derivative ^= self.gf.multiply(locator[j], term_power);
                j += 2;
            }

            if derivative == 0 {
                return Err(CommsError::RsDecodeFailure);
            }

            let root_fix: u8 = self.gf.alpha_pow(x_power * (255 + 1 - FIRST_ROOT));
            let magnitude: u8 = self.gf.multiply(root_fix, self.gf.divide(omega, derivative));
            received[position] ^= magnitude;
        }

        return Ok(());
    }

    /// Corrects a received codeword in place.
    ///
    /// The buffer is only written when decoding succeeds, so a failed decode leaves the
    /// caller's bytes untouched.
    ///
    /// # Returns
    /// The number of corrected bytes, or `RsDecodeFailure` if the codeword holds more errors
    /// than the code can correct.
    pub fn decode_in_place(&self, received: &mut [u8; RS_CODEWORD_LEN]) -> Result<usize> {
        let syndromes: [u8; RS_PARITY_LEN] = self.calc_syndromes(received);

        if syndromes.iter().all(|&s| s == 0) {
            return Ok(0);
        }

        let (locator, degree) = self.find_error_locator(&syndromes);
        if degree == 0 || degree > RS_CORRECTABLE {
            return Err(CommsError::RsDecodeFailure);
        }

        let positions: Vec<usize> = self.find_errors(&locator, degree);
        if positions.len() != degree {
            return Err(CommsError::RsDecodeFailure);
        }

        let mut corrected: [u8; RS_CODEWORD_LEN] = *received;
        self.correct_errors(&mut corrected, &syndromes, &locator, degree, &positions)?;

        if self.calc_syndromes(&corrected).iter().any(|&s| s != 0) {
            return Err(CommsError::RsDecodeFailure);
        }

        trace!(corrected = degree, "reed-solomon corrected codeword");
        *received = corrected;
        return Ok(degree);
    }

    /// Decodes a received Reed-Solomon codeword into the original message.
    ///
    /// # Arguments
    /// - `received`: exactly `RS_CODEWORD_LEN` bytes
    ///
    /// # Returns
    /// The 223-byte message, `InvalidArgument` for a wrongly sized input or `RsDecodeFailure`
    /// when the block is uncorrectable.
    pub fn decode(&self, received: &[u8]) -> Result<[u8; RS_MESSAGE_LEN]> {
        let mut codeword: [u8; RS_CODEWORD_LEN] = received
            .try_into()
            .map_err(|_| CommsError::InvalidArgument("RS codeword must be 255 bytes"))?;

        self.decode_in_place(&mut codeword)?;

        let mut message: [u8; RS_MESSAGE_LEN] = [0u8; RS_MESSAGE_LEN];
        message.copy_from_slice(&codeword[..RS_MESSAGE_LEN]);
        return Ok(message);
    }
}
