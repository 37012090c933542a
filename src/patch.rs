//! Channel to DMX address patch.
//!
//! Every control channel owns an ordered list of [`PatchedAddress`]es. An
//! address belongs to at most one channel: patching it somewhere new first
//! removes it from wherever it was.

use serde::{Deserialize, Serialize};

use crate::dmx_types::{CueError, channel_index};

/// How a patched address responds to its channel level and the master.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::FromRepr,
)]
#[strum(ascii_case_insensitive)]
#[repr(u8)]
pub enum PatchOption {
    /// Proportional to channel level, patch level and master
    #[default]
    Normal = 0,
    /// Full whenever the dimmed value is above zero
    NonDim = 1,
    /// Patch level regardless of channel level and master
    AlwaysOn = 2,
    /// Proportional to channel level and patch level, ignores the master
    NoMaster = 3,
}

impl PatchOption {
    /// Numeric code used by the cue file's `$$dimoption` records.
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// One output address inside a channel's patch list.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PatchedAddress {
    /// 0-based DMX address
    pub address: usize,
    /// Scale applied to the channel level (0.0 - 1.0)
    pub level: f64,
    pub option: PatchOption,
}

impl PatchedAddress {
    pub fn dmx_for_level(&self, level: f64, master: f64) -> u8 {
        match self.option {
            PatchOption::Normal => convert_percent(master * self.level * level),
            PatchOption::NonDim => {
                if master * self.level * level > 0.0 {
                    255
                } else {
                    0
                }
            }
            PatchOption::AlwaysOn => convert_percent(100.0 * self.level),
            PatchOption::NoMaster => convert_percent(level * self.level),
        }
    }
}

/// Percentage (0-100) to a DMX value, rounded and clamped.
fn convert_percent(level: f64) -> u8 {
    let value = (level / 100.0 * 255.0).round();
    if value.is_nan() {
        return 0;
    }
    value.clamp(0.0, 255.0) as u8
}

#[derive(Clone, Debug)]
pub struct PatchTable {
    addresses: usize,
    patch: Vec<Vec<PatchedAddress>>,
}

impl PatchTable {
    /// Creates a table with the 1:1 patch (channel n on address n).
    pub fn new(channels: usize, addresses: usize) -> Self {
        let patch = (0..channels)
            .map(|idx| {
                if idx < addresses {
                    vec![PatchedAddress {
                        address: idx,
                        level: 1.0,
                        option: PatchOption::Normal,
                    }]
                } else {
                    Vec::new()
                }
            })
            .collect();
        Self { addresses, patch }
    }

    pub fn channels(&self) -> usize {
        self.patch.len()
    }

    pub fn address_count(&self) -> usize {
        self.addresses
    }

    fn address_index(&self, address: usize) -> Result<usize, CueError> {
        if address == 0 || address > self.addresses {
            return Err(CueError::InvalidAddress(address, self.addresses));
        }
        Ok(address - 1)
    }

    /// Patches `address` (1-based) to `channel` (1-based) with a level of 0.0 - 1.0.
    pub fn patch(
        &mut self,
        address: usize,
        channel: usize,
        level: f64,
        option: PatchOption,
    ) -> Result<(), CueError> {
        let addr = self.address_index(address)?;
        let ch = channel_index(channel, self.patch.len())?;
        self.remove(addr);
        self.patch[ch].push(PatchedAddress {
            address: addr,
            level: level.clamp(0.0, 1.0),
            option,
        });
        Ok(())
    }

    fn remove(&mut self, addr: usize) {
        for list in &mut self.patch {
            list.retain(|p| p.address != addr);
        }
    }

    pub fn unpatch(&mut self, address: usize) -> Result<(), CueError> {
        let addr = self.address_index(address)?;
        self.remove(addr);
        Ok(())
    }

    pub fn unpatch_all(&mut self) {
        self.patch.iter_mut().for_each(Vec::clear);
    }

    /// Changes the option of a patched address, and its level if one is given.
    pub fn set_option(
        &mut self,
        address: usize,
        option: PatchOption,
        level: Option<f64>,
    ) -> Result<(), CueError> {
        let addr = self.address_index(address)?;
        let patched = self
            .patch
            .iter_mut()
            .flat_map(|list| list.iter_mut())
            .find(|p| p.address == addr)
            .ok_or(CueError::UnpatchedAddress(address))?;
        patched.option = option;
        if let Some(level) = level {
            patched.level = level.clamp(0.0, 1.0);
        }
        Ok(())
    }

    /// The channel (1-based) driving `address` (1-based), if any.
    pub fn channel_for_address(&self, address: usize) -> Option<usize> {
        let addr = address.checked_sub(1)?;
        self.patch
            .iter()
            .position(|list| list.iter().any(|p| p.address == addr))
            .map(|idx| idx + 1)
    }

    pub fn addresses_for_channel(&self, channel: usize) -> &[PatchedAddress] {
        channel
            .checked_sub(1)
            .and_then(|idx| self.patch.get(idx))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Highest patched address (1-based), 0 when nothing is patched.
    pub fn highest_address(&self) -> usize {
        self.patch
            .iter()
            .flatten()
            .map(|p| p.address + 1)
            .max()
            .unwrap_or(0)
    }

    /// Builds the output frame for a set of channel levels (0-100).
    /// Unpatched addresses stay at zero.
    pub fn translate(&self, levels: &[f64], master: f64) -> Vec<u8> {
        let mut frame = vec![0u8; self.addresses];
        for (list, level) in self.patch.iter().zip(levels) {
            for patched in list {
                if let Some(slot) = frame.get_mut(patched.address) {
                    *slot = patched.dmx_for_level(*level, master);
                }
            }
        }
        frame
    }

    /// `Patch 1 ch<addr@pct` records for every address, six per line.
    pub fn patch_string(&self) -> String {
        let mut channel_of = vec![0usize; self.addresses];
        let mut level_of = vec![0i64; self.addresses];
        for (idx, list) in self.patch.iter().enumerate() {
            for p in list {
                if p.address < self.addresses {
                    channel_of[p.address] = idx + 1;
                    level_of[p.address] = (p.level * 100.0).round() as i64;
                }
            }
        }
        let mut s = String::new();
        let mut count = 0;
        for addr in 0..self.addresses {
            let entry = format!("{}<{}@{}", channel_of[addr], addr + 1, level_of[addr]);
            if count == 0 {
                s.push_str("Patch 1 ");
            } else {
                s.push(' ');
            }
            s.push_str(&entry);
            count += 1;
            if count > 5 {
                s.push('\n');
                count = 0;
            }
        }
        if count > 0 {
            s.push('\n');
        }
        s
    }

    /// `$$dimoption addr code` records for every address with a non-normal option.
    pub fn option_string(&self) -> String {
        let mut s = String::from("\n");
        for p in self.patch.iter().flatten() {
            if p.option != PatchOption::Normal {
                s.push_str(&format!("$$dimoption {} {}\n", p.address + 1, p.option.code()));
            }
        }
        s.push('\n');
        s
    }
}
