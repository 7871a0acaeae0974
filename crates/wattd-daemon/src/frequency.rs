//! Discrete frequency table and p-state conversion.
//!
//! The platform exposes an ordered list of valid frequencies, highest
//! first; the index of a frequency in that list is its p-state. All
//! frequency arguments arriving over the wire are validated against this
//! table, snapping down to the next lower valid entry when they miss.

use crate::error::{DaemonError, Result};

/// Ordered table of valid CPU frequencies in kHz, highest performance first.
#[derive(Debug, Clone)]
pub struct FrequencyTable {
    freqs: Vec<u64>,
}

impl FrequencyTable {
    /// Builds a table from a descending frequency list.
    pub fn new(freqs: Vec<u64>) -> Result<Self> {
        if freqs.is_empty() {
            return Err(DaemonError::Config(
                "frequency table must not be empty".to_string(),
            ));
        }
        if freqs.windows(2).any(|w| w[0] <= w[1]) {
            return Err(DaemonError::Config(
                "frequency table must be strictly descending".to_string(),
            ));
        }
        Ok(Self { freqs })
    }

    /// Number of p-states the platform offers.
    pub fn num_pstates(&self) -> usize {
        self.freqs.len()
    }

    /// Whether `freq` is a member of the table.
    pub fn is_valid(&self, freq: u64) -> bool {
        self.freqs.contains(&freq)
    }

    /// Greatest valid frequency strictly below `freq`, if any.
    pub fn lower_valid(&self, freq: u64) -> Option<u64> {
        self.freqs.iter().copied().find(|&f| f < freq)
    }

    /// Resolves `freq` to a usable table member: the frequency itself if
    /// valid, otherwise snapped down to the next lower valid entry.
    pub fn resolve(&self, freq: u64) -> Result<u64> {
        if self.is_valid(freq) {
            return Ok(freq);
        }
        self.lower_valid(freq)
            .ok_or(DaemonError::NoLowerFrequency(freq))
    }

    /// Frequency for a p-state index.
    pub fn pstate_to_freq(&self, pstate: u32) -> Result<u64> {
        self.freqs
            .get(pstate as usize)
            .copied()
            .ok_or(DaemonError::PstateOutOfRange {
                pstate,
                count: self.freqs.len(),
            })
    }

    /// P-state whose frequency is closest to `freq` without exceeding it.
    /// Frequencies below the whole table land on the last p-state.
    pub fn closest_pstate(&self, freq: u64) -> u32 {
        self.freqs
            .iter()
            .position(|&f| f <= freq)
            .unwrap_or(self.freqs.len() - 1) as u32
    }

    /// Clamps a p-state index into the valid range.
    pub fn clamp_pstate(&self, pstate: u32) -> u32 {
        pstate.min(self.freqs.len() as u32 - 1)
    }
}
