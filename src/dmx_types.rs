//! Core lighting types shared by the patch, the fade engine and the cue list.
//!
//! - [`Cue`] - a numbered snapshot of channel levels with fade timing
//! - [`CueTiming`] - up/down fade times, their waits and the follow-on time
//! - [`CueError`] - misuse of channels, addresses and cue numbers
//! - [`DMX_CHANNELS`] - number of slots in one DMX frame

pub use open_dmx::DMX_CHANNELS;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Highest level a channel can hold. Levels are percentages.
pub const MAX_LEVEL: f64 = 100.0;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CueError {
    #[error("Invalid channel: {0}. Must be between 1 and {1}")]
    InvalidChannel(usize, usize),
    #[error("Invalid address: {0}. Must be between 1 and {1}")]
    InvalidAddress(usize, usize),
    #[error("Address {0} is not patched")]
    UnpatchedAddress(usize),
    #[error("Invalid cue number: {0}")]
    InvalidCueNumber(f64),
    #[error("Cue {0} not found")]
    UnknownCue(f64),
    #[error("Cue {0} exists")]
    CueExists(f64),
    #[error("The cue list is empty")]
    EmptyList,
}

/// Fade times of a cue, in seconds.
///
/// Rising channels follow `uptime` after `waituptime`, falling channels follow
/// `downtime` after `waitdowntime`. A negative `followtime` disables the
/// automatic follow-on to the next cue.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq)]
pub struct CueTiming {
    pub uptime: f64,
    pub downtime: f64,
    pub waituptime: f64,
    pub waitdowntime: f64,
    pub followtime: f64,
}

impl Default for CueTiming {
    fn default() -> Self {
        Self {
            uptime: 5.0,
            downtime: 5.0,
            waituptime: 0.0,
            waitdowntime: 0.0,
            followtime: -1.0,
        }
    }
}

impl CueTiming {
    /// Same time for rising and falling channels, no waits, no follow-on.
    pub fn symmetric(time: f64) -> Self {
        Self {
            uptime: time,
            downtime: time,
            ..Default::default()
        }
    }

    pub fn has_follow(&self) -> bool {
        self.followtime >= 0.0
    }

    /// Negative times become zero, except `followtime` which keeps -1 as "off".
    pub fn sanitized(self) -> Self {
        Self {
            uptime: self.uptime.max(0.0),
            downtime: self.downtime.max(0.0),
            waituptime: self.waituptime.max(0.0),
            waitdowntime: self.waitdowntime.max(0.0),
            followtime: if self.followtime >= 0.0 { self.followtime } else { -1.0 },
        }
    }
}

/// A snapshot of every channel level plus the times used to fade into it.
/// Cues are kept by number in a [`CueList`](crate::cue_list::CueList).
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct Cue {
    /// Cue number, determines playback order
    pub number: f64,
    /// Channel levels (0-100), index 0 = channel 1
    pub livestate: Vec<f64>,
    pub timing: CueTiming,
    /// `ip:port~/address` message sent when the cue is played
    pub control_string: Option<String>,
}

impl Cue {
    pub fn new(number: f64, channels: usize) -> Self {
        Self {
            number,
            livestate: vec![0.0; channels],
            timing: CueTiming::default(),
            control_string: None,
        }
    }

    pub fn from_levels(number: f64, levels: &[f64]) -> Self {
        let mut cue = Self::new(number, levels.len());
        cue.copy_levels_from(levels);
        cue
    }

    pub fn channels(&self) -> usize {
        self.livestate.len()
    }

    /// Copies as many levels as both sides have; extra channels are left alone.
    pub fn copy_levels_from(&mut self, levels: &[f64]) {
        self.livestate
            .iter_mut()
            .zip(levels)
            .for_each(|(dst, src)| *dst = clamp_level(*src));
    }

    /// Sets a channel (1-based) to a level, clamped to 0-100.
    pub fn set_level(&mut self, channel: usize, level: f64) -> Result<(), CueError> {
        let idx = channel_index(channel, self.livestate.len())?;
        self.livestate[idx] = clamp_level(level);
        Ok(())
    }

    pub fn level(&self, channel: usize) -> Option<f64> {
        channel.checked_sub(1).and_then(|idx| self.livestate.get(idx).copied())
    }

    pub fn title(&self) -> String {
        format!("Cue {}", self.number)
    }

    /// `Cue n`, `Up t [wait]`, `Down t [wait]` and `Followon t` joined by `sep`.
    pub fn description(&self, sep: &str) -> String {
        let t = &self.timing;
        let mut s = format!("Cue {}{sep}", self.number);
        if t.waituptime > 0.0 {
            s.push_str(&format!("Up {} {}{sep}", t.uptime, t.waituptime));
        } else {
            s.push_str(&format!("Up {}{sep}", t.uptime));
        }
        if t.waitdowntime > 0.0 {
            s.push_str(&format!("Down {} {}", t.downtime, t.waitdowntime));
        } else {
            s.push_str(&format!("Down {}", t.downtime));
        }
        if t.has_follow() {
            s.push_str(&format!("{sep}Followon {}", t.followtime));
        }
        s
    }

    /// Non-zero levels as `Chan c@l` records, seven per line.
    pub fn levels_string(&self) -> String {
        let mut s = String::new();
        let mut count = 0;
        for (idx, level) in self.livestate.iter().enumerate() {
            if *level <= 0.0 {
                continue;
            }
            let entry = format!("{}@{}", idx + 1, level.trunc() as i64);
            if count == 0 {
                s.push_str("Chan ");
                s.push_str(&entry);
                count = 1;
            } else {
                s.push(' ');
                s.push_str(&entry);
                count += 1;
                if count > 6 {
                    s.push('\n');
                    count = 0;
                }
            }
        }
        if count > 0 {
            s.push('\n');
        }
        s
    }

    /// Full cue record for the plain-text cue file.
    pub fn ascii_string(&self) -> String {
        let mut s = self.description("\n");
        s.push('\n');
        s.push_str(&self.levels_string());
        if let Some(control) = &self.control_string {
            s.push_str(&format!("$$OSCstring {control}\n"));
        }
        s
    }

    pub fn control_line(&self) -> Option<String> {
        self.control_string
            .as_ref()
            .map(|control| format!("Cue {} {control}", self.number))
    }
}

pub fn clamp_level(level: f64) -> f64 {
    if level.is_nan() {
        return 0.0;
    }
    level.clamp(0.0, MAX_LEVEL)
}

/// Converts a 1-based channel number into an index, checking the range.
pub fn channel_index(channel: usize, channels: usize) -> Result<usize, CueError> {
    if channel == 0 || channel > channels {
        return Err(CueError::InvalidChannel(channel, channels));
    }
    Ok(channel - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_level_clamps_and_checks_range() {
        let mut cue = Cue::new(1.0, 4);
        cue.set_level(2, 140.0).unwrap();
        cue.set_level(3, -5.0).unwrap();
        assert_eq!(cue.level(2), Some(100.0));
        assert_eq!(cue.level(3), Some(0.0));
        assert_eq!(cue.set_level(0, 10.0), Err(CueError::InvalidChannel(0, 4)));
        assert_eq!(cue.set_level(5, 10.0), Err(CueError::InvalidChannel(5, 4)));
        assert_eq!(cue.level(5), None);
    }

    #[test]
    fn test_description_includes_waits_and_follow() {
        let mut cue = Cue::new(2.5, 1);
        cue.timing = CueTiming {
            uptime: 3.0,
            downtime: 4.0,
            waituptime: 1.0,
            waitdowntime: 0.0,
            followtime: 10.0,
        };
        assert_eq!(cue.description(","), "Cue 2.5,Up 3 1,Down 4,Followon 10");
    }

    #[test]
    fn test_ascii_string() {
        let mut cue = Cue::new(1.0, 10);
        for ch in 1..=9 {
            cue.set_level(ch, 50.5).unwrap();
        }
        cue.control_string = Some("10.0.0.2:53000~/go".to_string());
        let text = cue.ascii_string();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Cue 1");
        assert_eq!(lines[1], "Up 5");
        assert_eq!(lines[2], "Down 5");
        assert_eq!(lines[3], "Chan 1@50 2@50 3@50 4@50 5@50 6@50 7@50");
        assert_eq!(lines[4], "Chan 8@50 9@50");
        assert_eq!(lines[5], "$$OSCstring 10.0.0.2:53000~/go");
    }

    #[test]
    fn test_sanitized_timing() {
        let t = CueTiming {
            uptime: -1.0,
            downtime: 2.0,
            waituptime: -3.0,
            waitdowntime: 0.5,
            followtime: -7.0,
        }
        .sanitized();
        assert_eq!(t.uptime, 0.0);
        assert_eq!(t.waituptime, 0.0);
        assert_eq!(t.followtime, -1.0);
        assert!(!t.has_follow());
    }
}
