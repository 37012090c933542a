use std::fmt;
use std::io;

use scan_fmt::scan_fmt;
use thiserror::Error;

use crate::cue_list::{CueList, Overwrite};
use crate::dmx_types::{CueError, CueTiming, MAX_LEVEL, channel_index};
use crate::osc::{OscError, parse_control_string};
use crate::patch::PatchOption;

#[derive(Error, Debug)]
pub enum ConsoleError {
    #[error("Unknown command: {0}")]
    UnknownCommand(String),
    #[error("Invalid channel: {0}")]
    InvalidChannel(String),
    #[error("Invalid level: {0}. Must be between 0 and 100")]
    InvalidLevel(String),
    #[error("Invalid number: {0}")]
    InvalidNumber(String),
    #[error("Invalid dimmer option: {0}")]
    InvalidOption(String),
    #[error("Missing arguments for command: {0}")]
    MissingArgs(String),
    #[error("No current cue")]
    NoCurrentCue,
    #[error(transparent)]
    Cue(#[from] CueError),
    #[error(transparent)]
    Osc(#[from] OscError),
    #[error("Could not write {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
}

/// Channels addressed by a level command: `3`, `1,4,7` or `2>6`.
#[derive(Clone, Debug, PartialEq)]
pub enum Channels {
    Single(usize),
    List(Vec<usize>),
    Range(usize, usize),
}

impl Channels {
    pub fn parse(input: &str) -> Result<Self, ConsoleError> {
        let input = input.trim();
        let channel = |s: &str| {
            s.trim()
                .parse::<usize>()
                .map_err(|_| ConsoleError::InvalidChannel(s.trim().to_string()))
        };
        if let Some((from, to)) = input.split_once('>') {
            return Ok(Channels::Range(channel(from)?, channel(to)?));
        }
        if input.contains(',') {
            return input
                .split(',')
                .map(channel)
                .collect::<Result<Vec<_>, _>>()
                .map(Channels::List);
        }
        channel(input).map(Channels::Single)
    }

    /// The channels addressed, each checked against `count` before any is
    /// returned.
    pub fn channels(&self, count: usize) -> Result<Vec<usize>, CueError> {
        let check = |ch: usize| channel_index(ch, count).map(|_| ch);
        match self {
            Channels::Single(ch) => Ok(vec![check(*ch)?]),
            Channels::List(list) => list.iter().map(|ch| check(*ch)).collect(),
            Channels::Range(from, to) => {
                let (low, high) = (check(*from.min(to))?, check(*from.max(to))?);
                Ok((low..=high).collect())
            }
        }
    }
}

impl fmt::Display for Channels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channels::Single(ch) => write!(f, "{ch}"),
            Channels::List(list) => {
                let list: Vec<String> = list.iter().map(ToString::to_string).collect();
                write!(f, "{}", list.join(","))
            }
            Channels::Range(from, to) => write!(f, "{from} thru {to}"),
        }
    }
}

/// Fade times typed after `time`, `rec n` or `cue n`.
///
/// | count | meaning                                  |
/// |-------|------------------------------------------|
/// | 1     | up and down                              |
/// | 2     | up, down                                 |
/// | 3     | up, down, follow-on                      |
/// | 4     | up, wait up, down, wait down             |
/// | 5     | up, wait up, down, wait down, follow-on  |
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Times(Vec<f64>);

impl Times {
    fn parse(words: &[&str]) -> Result<Self, ConsoleError> {
        if words.len() > 5 {
            return Err(ConsoleError::InvalidNumber(words.join(" ")));
        }
        words
            .iter()
            .map(|w| parse_number(w))
            .collect::<Result<Vec<_>, _>>()
            .map(Times)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn apply(&self, timing: CueTiming) -> CueTiming {
        let mut t = timing;
        match self.0.as_slice() {
            [time] => {
                t.uptime = *time;
                t.downtime = *time;
            }
            [up, down] => {
                t.uptime = *up;
                t.downtime = *down;
            }
            [up, down, follow] => {
                t.uptime = *up;
                t.downtime = *down;
                t.followtime = *follow;
            }
            [up, wait_up, down, wait_down, rest @ ..] => {
                t.uptime = *up;
                t.waituptime = *wait_up;
                t.downtime = *down;
                t.waitdowntime = *wait_down;
                if let Some(follow) = rest.first() {
                    t.followtime = *follow;
                }
            }
            [] => {}
        }
        t
    }
}

impl fmt::Display for Times {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let times: Vec<String> = self.0.iter().map(ToString::to_string).collect();
        write!(f, "{}", times.join(" "))
    }
}

fn parse_number(s: &str) -> Result<f64, ConsoleError> {
    s.parse::<f64>()
        .ok()
        .filter(|n| n.is_finite())
        .ok_or_else(|| ConsoleError::InvalidNumber(s.to_string()))
}

fn parse_level(s: &str) -> Result<f64, ConsoleError> {
    let s = s.trim();
    let level = match s {
        "full" | "f" => MAX_LEVEL,
        "out" | "x" => 0.0,
        _ => s
            .parse::<f64>()
            .map_err(|_| ConsoleError::InvalidLevel(s.to_string()))?,
    };
    if !(0.0..=MAX_LEVEL).contains(&level) {
        return Err(ConsoleError::InvalidLevel(s.to_string()));
    }
    Ok(level)
}

fn parse_option(s: &str) -> Result<PatchOption, ConsoleError> {
    s.parse::<u8>()
        .ok()
        .and_then(PatchOption::from_repr)
        .or_else(|| s.parse::<PatchOption>().ok())
        .ok_or_else(|| ConsoleError::InvalidOption(s.to_string()))
}

#[derive(Clone, Debug, PartialEq, strum::Display)]
pub enum ConsoleCommand {
    #[strum(serialize = "Chan {channels} at {level}")]
    SetLevel { channels: Channels, level: f64 },
    /// `number` 0 records into the current cue
    #[strum(serialize = "Record {number} {overwrite} {times}")]
    Record {
        number: f64,
        overwrite: Overwrite,
        times: Times,
    },
    #[strum(serialize = "Time {times}")]
    Time { times: Times },
    #[strum(serialize = "Patch {address} to {channel} at {level} {option}")]
    Patch {
        address: usize,
        channel: usize,
        level: f64,
        option: PatchOption,
    },
    #[strum(serialize = "Patch")]
    ShowPatch,
    #[strum(serialize = "Dimmer {address} {option}")]
    DimmerOption { address: usize, option: PatchOption },
    #[strum(serialize = "Cue {number} {times}")]
    SelectCue { number: f64, times: Times },
    #[strum(serialize = "Delete Cue {number}")]
    DeleteCue { number: f64 },
    /// `number` 0 plays the next cue
    #[strum(serialize = "Go {number}")]
    Go { number: f64 },
    #[strum(serialize = "Back")]
    Back,
    #[strum(serialize = "Stop")]
    Stop,
    #[strum(serialize = "Master {level}")]
    Master { level: f64 },
    /// An empty control string clears it
    #[strum(serialize = "Osc {control}")]
    Osc { control: String },
    #[strum(serialize = "List")]
    List,
    #[strum(serialize = "Save {path}")]
    Save { path: String },
    #[strum(serialize = "Quit")]
    Quit,
}

impl TryFrom<String> for ConsoleCommand {
    type Error = ConsoleError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let raw = value.trim();
        let s = raw.to_lowercase();
        if s.is_empty() {
            return Err(ConsoleError::UnknownCommand(value));
        }

        let keyword = s.split_whitespace().next().unwrap_or_default();
        let takes_text = matches!(keyword, "osc" | "save");
        if let Some((channels, level)) = s.split_once('@').filter(|_| !takes_text) {
            return Ok(ConsoleCommand::SetLevel {
                channels: Channels::parse(channels)?,
                level: parse_level(level)?,
            });
        }

        match s.as_str() {
            "go" => return Ok(ConsoleCommand::Go { number: 0.0 }),
            "back" => return Ok(ConsoleCommand::Back),
            "stop" => return Ok(ConsoleCommand::Stop),
            "list" | "cue" | "cue ?" => return Ok(ConsoleCommand::List),
            "patch" => return Ok(ConsoleCommand::ShowPatch),
            "quit" | "exit" => return Ok(ConsoleCommand::Quit),
            _ => {}
        }
        if let Ok(number) = scan_fmt!(&s, "go {}", f64) {
            return Ok(ConsoleCommand::Go { number });
        }
        if let Ok(level) = scan_fmt!(&s, "master {}", String) {
            return Ok(ConsoleCommand::Master {
                level: parse_level(&level)?,
            });
        }
        if let Ok(number) = scan_fmt!(&s, "delete cue {}", f64) {
            return Ok(ConsoleCommand::DeleteCue { number });
        }

        let words: Vec<&str> = s.split_whitespace().collect();
        let args = &words[1..];
        // arguments of osc and save keep their case
        let rest = raw
            .split_once(char::is_whitespace)
            .map(|(_, rest)| rest.trim().to_string());

        match words[0] {
            "rec" | "record" | "rec!" | "rec+" => {
                let overwrite = match words[0] {
                    "rec!" => Overwrite::Replace,
                    "rec+" => Overwrite::AddNew,
                    _ => Overwrite::Reject,
                };
                let number = args.first().map(|n| parse_number(n)).transpose()?;
                Ok(ConsoleCommand::Record {
                    number: number.unwrap_or(0.0),
                    overwrite,
                    times: Times::parse(args.get(1..).unwrap_or(&[]))?,
                })
            }
            "time" => {
                if args.is_empty() {
                    return Err(ConsoleError::MissingArgs(value));
                }
                Ok(ConsoleCommand::Time {
                    times: Times::parse(args)?,
                })
            }
            "patch" => match args {
                [address, channel, more @ ..] if more.len() <= 2 => {
                    let address = address
                        .parse()
                        .map_err(|_| ConsoleError::InvalidNumber(address.to_string()))?;
                    let channel = channel
                        .parse()
                        .map_err(|_| ConsoleError::InvalidChannel(channel.to_string()))?;
                    let level = more.first().map(|l| parse_level(l)).transpose()?;
                    let option = more.get(1).map(|o| parse_option(o)).transpose()?;
                    Ok(ConsoleCommand::Patch {
                        address,
                        channel,
                        level: level.unwrap_or(MAX_LEVEL),
                        option: option.unwrap_or_default(),
                    })
                }
                _ => Err(ConsoleError::MissingArgs(value)),
            },
            "dim" | "dimmer" | "dimmer_option" => match scan_fmt!(
                &args.join(" "),
                "{} {}",
                usize,
                String
            ) {
                Ok((address, option)) => Ok(ConsoleCommand::DimmerOption {
                    address,
                    option: parse_option(&option)?,
                }),
                Err(_) => Err(ConsoleError::MissingArgs(value)),
            },
            "cue" => {
                let number = parse_number(args[0])?;
                Ok(ConsoleCommand::SelectCue {
                    number,
                    times: Times::parse(&args[1..])?,
                })
            }
            "osc" => {
                let control = rest.unwrap_or_default();
                Ok(ConsoleCommand::Osc {
                    control: if control == "-" { String::new() } else { control },
                })
            }
            "save" => match rest {
                Some(path) if !path.is_empty() => Ok(ConsoleCommand::Save { path }),
                _ => Err(ConsoleError::MissingArgs(value)),
            },
            _ => Err(ConsoleError::UnknownCommand(value)),
        }
    }
}

impl ConsoleCommand {
    pub fn parse(input: &str) -> Result<ConsoleCommand, ConsoleError> {
        ConsoleCommand::try_from(input.to_string())
    }
}

/// Applies typed commands to a cue list.
pub struct Console {
    cues: CueList,
    command_history: Vec<ConsoleCommand>,
}

impl Console {
    pub fn new(cues: CueList) -> Self {
        Self {
            cues,
            command_history: Vec::new(),
        }
    }

    pub fn cues(&self) -> &CueList {
        &self.cues
    }

    pub fn command_history(&self) -> &[ConsoleCommand] {
        &self.command_history
    }

    pub fn execute_line(&mut self, line: &str) -> Result<Option<String>, ConsoleError> {
        let command = ConsoleCommand::parse(line)?;
        self.execute(command)
    }

    fn current_cue(&self) -> Result<f64, ConsoleError> {
        self.cues.current().ok_or(ConsoleError::NoCurrentCue)
    }

    fn apply_times(&self, number: f64, times: &Times) -> Result<(), ConsoleError> {
        if times.is_empty() {
            return Ok(());
        }
        let cue = self.cues.cue(number).ok_or(CueError::UnknownCue(number))?;
        self.cues.set_cue_timing(number, times.apply(cue.timing))?;
        Ok(())
    }

    /// Runs a command. Returns text to show, if any.
    pub fn execute(&mut self, command: ConsoleCommand) -> Result<Option<String>, ConsoleError> {
        let reply = match &command {
            ConsoleCommand::SetLevel { channels, level } => {
                for channel in channels.channels(self.cues.channels())? {
                    self.cues.set_channel_level(channel, *level)?;
                }
                None
            }
            ConsoleCommand::Record {
                number,
                overwrite,
                times,
            } => {
                let recorded = self.cues.record_from_live(*number, *overwrite)?;
                self.apply_times(recorded, times)?;
                Some(format!("Cue {recorded} recorded"))
            }
            ConsoleCommand::Time { times } => {
                let current = self.current_cue()?;
                self.apply_times(current, times)?;
                self.cues.cue(current).map(|cue| cue.description(" "))
            }
            ConsoleCommand::Patch {
                address,
                channel,
                level,
                option,
            } => {
                self.cues
                    .patch_address_to_channel(*address, *channel, *level, *option)?;
                None
            }
            ConsoleCommand::ShowPatch => {
                let patch = self.cues.live().patch_snapshot();
                Some(format!("{}{}", patch.patch_string(), patch.option_string()))
            }
            ConsoleCommand::DimmerOption { address, option } => {
                self.cues.set_option_for_address(*address, *option, None)?;
                None
            }
            ConsoleCommand::SelectCue { number, times } => {
                self.cues.set_current(*number)?;
                self.apply_times(*number, times)?;
                self.cues.cue(*number).map(|cue| cue.description(" "))
            }
            ConsoleCommand::DeleteCue { number } => {
                self.cues.remove_cue(*number)?;
                Some(format!("Cue {number} deleted"))
            }
            ConsoleCommand::Go { number } => {
                let started = self.cues.start_fade_to_cue_number(*number)?;
                Some(format!("Fading: Cue {started}"))
            }
            ConsoleCommand::Back => {
                let started = self.cues.go_back()?;
                Some(format!("Fading: Cue {started}"))
            }
            ConsoleCommand::Stop => {
                self.cues.stop();
                None
            }
            ConsoleCommand::Master { level } => {
                self.cues.set_master_level(*level);
                None
            }
            ConsoleCommand::Osc { control } => {
                let current = self.current_cue()?;
                if control.is_empty() {
                    self.cues.set_cue_control_string(current, None)?;
                } else {
                    parse_control_string(control)?;
                    self.cues
                        .set_cue_control_string(current, Some(control.clone()))?;
                }
                None
            }
            ConsoleCommand::List => Some(self.cues.description_string()),
            ConsoleCommand::Save { path } => {
                std::fs::write(path, self.cues.ascii_string()).map_err(|source| {
                    ConsoleError::Io {
                        path: path.clone(),
                        source,
                    }
                })?;
                Some(format!("Saved {path}"))
            }
            ConsoleCommand::Quit => None,
        };
        self.command_history.push(command);
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level_commands() {
        assert_eq!(
            ConsoleCommand::parse("5@50").unwrap(),
            ConsoleCommand::SetLevel {
                channels: Channels::Single(5),
                level: 50.0
            }
        );
        assert_eq!(
            ConsoleCommand::parse("1,3, 7@full").unwrap(),
            ConsoleCommand::SetLevel {
                channels: Channels::List(vec![1, 3, 7]),
                level: 100.0
            }
        );
        let range = ConsoleCommand::parse("6>2@0").unwrap();
        assert_eq!(range.to_string(), "Chan 6 thru 2 at 0");
        match range {
            ConsoleCommand::SetLevel { channels, .. } => {
                assert_eq!(channels.channels(8).unwrap(), vec![2, 3, 4, 5, 6])
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert!(matches!(
            ConsoleCommand::parse("1@150"),
            Err(ConsoleError::InvalidLevel(_))
        ));
        assert!(matches!(
            ConsoleCommand::parse("a@50"),
            Err(ConsoleError::InvalidChannel(_))
        ));
    }

    #[test]
    fn test_parse_cue_commands() {
        assert_eq!(
            ConsoleCommand::parse("rec").unwrap(),
            ConsoleCommand::Record {
                number: 0.0,
                overwrite: Overwrite::Reject,
                times: Times::default()
            }
        );
        assert_eq!(
            ConsoleCommand::parse("rec! 4.5 3 2").unwrap(),
            ConsoleCommand::Record {
                number: 4.5,
                overwrite: Overwrite::Replace,
                times: Times(vec![3.0, 2.0])
            }
        );
        assert_eq!(
            ConsoleCommand::parse("GO").unwrap(),
            ConsoleCommand::Go { number: 0.0 }
        );
        assert_eq!(
            ConsoleCommand::parse("go 12").unwrap(),
            ConsoleCommand::Go { number: 12.0 }
        );
        assert_eq!(
            ConsoleCommand::parse("delete cue 3").unwrap(),
            ConsoleCommand::DeleteCue { number: 3.0 }
        );
        assert_eq!(
            ConsoleCommand::parse("cue 2 1 0.5 4").unwrap(),
            ConsoleCommand::SelectCue {
                number: 2.0,
                times: Times(vec![1.0, 0.5, 4.0])
            }
        );
        assert!(matches!(
            ConsoleCommand::parse("time"),
            Err(ConsoleError::MissingArgs(_))
        ));
        assert!(matches!(
            ConsoleCommand::parse("time 1 2 3 4 5 6"),
            Err(ConsoleError::InvalidNumber(_))
        ));
    }

    #[test]
    fn test_parse_patch_and_misc() {
        assert_eq!(
            ConsoleCommand::parse("patch 10 2").unwrap(),
            ConsoleCommand::Patch {
                address: 10,
                channel: 2,
                level: 100.0,
                option: PatchOption::Normal
            }
        );
        assert_eq!(
            ConsoleCommand::parse("patch 10 2 50 1").unwrap(),
            ConsoleCommand::Patch {
                address: 10,
                channel: 2,
                level: 50.0,
                option: PatchOption::NonDim
            }
        );
        assert_eq!(
            ConsoleCommand::parse("dim 7 NoMaster").unwrap(),
            ConsoleCommand::DimmerOption {
                address: 7,
                option: PatchOption::NoMaster
            }
        );
        assert!(matches!(
            ConsoleCommand::parse("dim 7 9"),
            Err(ConsoleError::InvalidOption(_))
        ));
        assert_eq!(
            ConsoleCommand::parse("osc 10.0.0.2:53000~/Show/Go").unwrap(),
            ConsoleCommand::Osc {
                control: "10.0.0.2:53000~/Show/Go".to_string()
            }
        );
        assert_eq!(
            ConsoleCommand::parse("save /tmp/Show.asc").unwrap(),
            ConsoleCommand::Save {
                path: "/tmp/Show.asc".to_string()
            }
        );
        assert_eq!(
            ConsoleCommand::parse("master 80").unwrap(),
            ConsoleCommand::Master { level: 80.0 }
        );
        assert!(matches!(
            ConsoleCommand::parse("jump"),
            Err(ConsoleError::UnknownCommand(_))
        ));
        assert!(matches!(
            ConsoleCommand::parse("   "),
            Err(ConsoleError::UnknownCommand(_))
        ));
    }

    #[test]
    fn test_times_apply() {
        let base = CueTiming::default();
        let t = Times(vec![2.0]).apply(base);
        assert_eq!((t.uptime, t.downtime), (2.0, 2.0));
        let t = Times(vec![1.0, 3.0, 6.0]).apply(base);
        assert_eq!((t.uptime, t.downtime, t.followtime), (1.0, 3.0, 6.0));
        let t = Times(vec![1.0, 0.5, 3.0, 1.5]).apply(base);
        assert_eq!(
            (t.uptime, t.waituptime, t.downtime, t.waitdowntime, t.followtime),
            (1.0, 0.5, 3.0, 1.5, -1.0)
        );
        let t = Times(vec![1.0, 0.5, 3.0, 1.5, 9.0]).apply(base);
        assert_eq!(t.followtime, 9.0);
    }

    #[test]
    fn test_execute_record_and_time() {
        let mut console = Console::new(CueList::new(4, 512));
        console.execute_line("1>2@60").unwrap();
        assert_eq!(
            console.execute_line("rec 1 3").unwrap().as_deref(),
            Some("Cue 1 recorded")
        );
        let cue = console.cues().cue(1.0).unwrap();
        assert_eq!(cue.livestate, vec![60.0, 60.0, 0.0, 0.0]);
        assert_eq!(cue.timing.uptime, 3.0);

        assert!(matches!(
            console.execute_line("rec 1"),
            Err(ConsoleError::Cue(CueError::CueExists(_)))
        ));
        console.execute_line("time 1 2 3 4").unwrap();
        let timing = console.cues().cue(1.0).unwrap().timing;
        assert_eq!(timing.waitdowntime, 4.0);

        console.execute_line("osc 10.0.0.9:9000~/go").unwrap();
        assert_eq!(
            console.cues().cue(1.0).unwrap().control_string.as_deref(),
            Some("10.0.0.9:9000~/go")
        );
        assert!(matches!(
            console.execute_line("osc nonsense"),
            Err(ConsoleError::Osc(_))
        ));
        console.execute_line("osc -").unwrap();
        assert_eq!(console.cues().cue(1.0).unwrap().control_string, None);

        let history: Vec<String> = console
            .command_history()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(history[0], "Chan 1 thru 2 at 60");
    }

    #[test]
    fn test_channel_range_checked_before_expanding() {
        let mut console = Console::new(CueList::new(4, 512));
        assert!(matches!(
            console.execute_line(&format!("1>{}@50", usize::MAX)),
            Err(ConsoleError::Cue(CueError::InvalidChannel(ch, 4))) if ch == usize::MAX
        ));
        assert!(matches!(
            console.execute_line("999999999>2@0"),
            Err(ConsoleError::Cue(CueError::InvalidChannel(999999999, 4)))
        ));
        assert!(matches!(
            console.execute_line("2,9@10"),
            Err(ConsoleError::Cue(CueError::InvalidChannel(9, 4)))
        ));
        // nothing was set by the rejected lists
        assert_eq!(console.cues().live().level(2), Some(0.0));

        console.execute_line("4>3@20").unwrap();
        assert_eq!(console.cues().live().levels(), vec![0.0, 0.0, 20.0, 20.0]);
    }

    #[test]
    fn test_text_arguments_may_contain_at() {
        assert_eq!(
            ConsoleCommand::parse("osc 10.0.0.2:53000~/show@1").unwrap(),
            ConsoleCommand::Osc {
                control: "10.0.0.2:53000~/show@1".to_string()
            }
        );
        assert_eq!(
            ConsoleCommand::parse("save /tmp/show@home.asc").unwrap(),
            ConsoleCommand::Save {
                path: "/tmp/show@home.asc".to_string()
            }
        );
    }

    #[test]
    fn test_execute_without_current_cue() {
        let mut console = Console::new(CueList::new(2, 512));
        assert!(matches!(
            console.execute_line("time 2"),
            Err(ConsoleError::NoCurrentCue)
        ));
        assert!(matches!(
            console.execute_line("go"),
            Err(ConsoleError::Cue(CueError::EmptyList))
        ));
        assert!(matches!(
            console.execute_line("cue 4"),
            Err(ConsoleError::Cue(CueError::UnknownCue(_)))
        ));
        assert!(matches!(
            console.execute_line("3@10"),
            Err(ConsoleError::Cue(CueError::InvalidChannel(3, 2)))
        ));
        assert!(console.command_history().is_empty());
    }

    #[test]
    fn test_execute_patch_and_save() {
        let mut console = Console::new(CueList::new(2, 4));
        console.execute_line("patch 4 1 50").unwrap();
        console.execute_line("dim 4 2").unwrap();
        let listing = console.execute_line("patch").unwrap().unwrap();
        assert!(listing.starts_with("Patch 1 1<1@100 2<2@100 0<3@0 1<4@50"));
        assert!(listing.contains("$$dimoption 4 2"));

        let path = std::env::temp_dir().join(format!("lx-cue-{}.asc", std::process::id()));
        let path = path.to_string_lossy().to_string();
        console.execute_line("rec").unwrap();
        console.execute_line(&format!("save {path}")).unwrap();
        let saved = std::fs::read_to_string(&path).unwrap();
        assert!(saved.starts_with("Ident 3:0\n"));
        assert!(saved.ends_with("enddata\n"));
        let _ = std::fs::remove_file(&path);
    }
}
