use std::sync::{Arc, Weak};
use std::time::Duration;

use log::{debug, info};
use parking_lot::Mutex;

use crate::dmx_output::OutputInterface;
use crate::dmx_types::{Cue, CueError, CueTiming};
use crate::live_cue::{FadeObserver, FadeOutcome, LiveCue};
use crate::patch::PatchOption;

/// What recording does when the target cue already exists.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, strum::Display, strum::EnumString, strum::FromRepr,
)]
#[strum(ascii_case_insensitive)]
#[repr(u8)]
pub enum Overwrite {
    /// Leave the cue alone and fail
    #[default]
    Reject = 0,
    /// Copy the live levels into the existing cue
    Replace = 1,
    /// Record a new cue at the end of the list instead
    AddNew = 2,
}

/// Receives the control string of every cue that is played.
pub trait ControlSink: Send + Sync {
    fn send_control_string(&self, control: &str);
}

#[derive(Default)]
struct CueSet {
    /// Always sorted by number
    cues: Vec<Cue>,
    current: Option<f64>,
    next: Option<f64>,
    last_complete: Option<f64>,
    back: Option<f64>,
}

impl CueSet {
    fn position(&self, number: f64) -> Option<usize> {
        self.cues.iter().position(|c| c.number == number)
    }

    fn cue(&self, number: f64) -> Option<&Cue> {
        self.cues.iter().find(|c| c.number == number)
    }

    fn cue_mut(&mut self, number: f64) -> Option<&mut Cue> {
        self.cues.iter_mut().find(|c| c.number == number)
    }

    /// A number set as current or next only counts while its cue exists.
    fn resolve(&self, number: Option<f64>) -> Option<f64> {
        number.filter(|n| self.position(*n).is_some())
    }

    fn next_cue_number(&self) -> f64 {
        self.cues.last().map_or(1.0, |c| c.number + 1.0)
    }

    /// The cue following `number`, or the first cue when there is none.
    fn cue_after(&self, number: Option<f64>) -> Option<f64> {
        number
            .and_then(|n| self.position(n))
            .and_then(|idx| self.cues.get(idx + 1))
            .or_else(|| self.cues.first())
            .map(|c| c.number)
    }

    fn insert(&mut self, cue: Cue) {
        let at = self
            .cues
            .partition_point(|c| c.number.total_cmp(&cue.number).is_lt());
        self.cues.insert(at, cue);
    }
}

fn check_number(number: f64) -> Result<f64, CueError> {
    if number.is_finite() && number > 0.0 {
        Ok(number)
    } else {
        Err(CueError::InvalidCueNumber(number))
    }
}

struct CueListInner {
    channels: usize,
    set: Mutex<CueSet>,
    live: LiveCue,
    delegate: Mutex<Option<Arc<dyn FadeObserver>>>,
    control: Mutex<Option<Arc<dyn ControlSink>>>,
}

/// Numbered cues played back through a [`LiveCue`].
///
/// `current` is the cue last started, `next` the one GO plays. Both are cue
/// numbers and stop resolving when their cue is removed.
#[derive(Clone)]
pub struct CueList {
    inner: Arc<CueListInner>,
}

/// Forwards fade events from the live cue and runs follow-ons.
struct ListObserver {
    list: Weak<CueListInner>,
}

impl ListObserver {
    fn delegate(list: &CueListInner) -> Option<Arc<dyn FadeObserver>> {
        list.delegate.lock().clone()
    }
}

impl FadeObserver for ListObserver {
    fn on_fade_start(&self, cue: f64) {
        let Some(list) = self.list.upgrade() else {
            return;
        };
        {
            let mut set = list.set.lock();
            set.back = set.last_complete;
        }
        if let Some(delegate) = Self::delegate(&list) {
            delegate.on_fade_start(cue);
        }
    }

    fn on_fade_progress(&self, elapsed: Duration) {
        if let Some(delegate) = self.list.upgrade().and_then(|l| Self::delegate(&l)) {
            delegate.on_fade_progress(elapsed);
        }
    }

    fn on_fade_complete(&self, cue: f64, outcome: FadeOutcome) {
        let Some(inner) = self.list.upgrade() else {
            return;
        };
        {
            let mut set = inner.set.lock();
            match outcome {
                FadeOutcome::Stopped => set.next = set.current,
                FadeOutcome::Completed => set.last_complete = set.current,
            }
        }
        if outcome == FadeOutcome::Completed && inner.live.timing().has_follow() {
            debug!("Cue {cue} follows on");
            let list = CueList { inner };
            if let Err(e) = list.start_fade_to(None) {
                debug!("Follow-on after cue {cue} failed: {e}");
            }
            return;
        }
        if let Some(delegate) = Self::delegate(&inner) {
            delegate.on_fade_complete(cue, outcome);
        }
    }
}

impl CueList {
    pub fn new(channels: usize, addresses: usize) -> Self {
        Self {
            inner: Arc::new(CueListInner {
                channels,
                set: Mutex::new(CueSet::default()),
                live: LiveCue::new(channels, addresses),
                delegate: Mutex::new(None),
                control: Mutex::new(None),
            }),
        }
    }

    pub fn channels(&self) -> usize {
        self.inner.channels
    }

    pub fn live(&self) -> &LiveCue {
        &self.inner.live
    }

    pub fn set_delegate(&self, delegate: Option<Arc<dyn FadeObserver>>) {
        *self.inner.delegate.lock() = delegate;
    }

    pub fn set_control_sink(&self, sink: Option<Arc<dyn ControlSink>>) {
        *self.inner.control.lock() = sink;
    }

    pub fn set_output(&self, output: Option<Arc<dyn OutputInterface>>) {
        self.inner.live.set_output(output);
    }

    pub fn len(&self) -> usize {
        self.inner.set.lock().cues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.set.lock().cues.is_empty()
    }

    pub fn cue(&self, number: f64) -> Option<Cue> {
        self.inner.set.lock().cue(number).cloned()
    }

    /// Copies of all cues in number order.
    pub fn cues(&self) -> Vec<Cue> {
        self.inner.set.lock().cues.clone()
    }

    /// Returns the cue numbered `number`, creating an empty one if needed.
    pub fn create_cue_for_number(&self, number: f64) -> Result<Cue, CueError> {
        let number = check_number(number)?;
        let mut set = self.inner.set.lock();
        if let Some(cue) = set.cue(number) {
            return Ok(cue.clone());
        }
        let cue = Cue::new(number, self.inner.channels);
        set.insert(cue.clone());
        Ok(cue)
    }

    pub fn remove_cue(&self, number: f64) -> Result<Cue, CueError> {
        let mut set = self.inner.set.lock();
        let idx = set.position(number).ok_or(CueError::UnknownCue(number))?;
        info!("Cue {number} deleted");
        Ok(set.cues.remove(idx))
    }

    fn update_cue<T>(
        &self,
        number: f64,
        update: impl FnOnce(&mut Cue) -> Result<T, CueError>,
    ) -> Result<T, CueError> {
        let mut set = self.inner.set.lock();
        let cue = set.cue_mut(number).ok_or(CueError::UnknownCue(number))?;
        update(cue)
    }

    pub fn set_cue_level(&self, number: f64, channel: usize, level: f64) -> Result<(), CueError> {
        self.update_cue(number, |cue| cue.set_level(channel, level))
    }

    pub fn set_cue_timing(&self, number: f64, timing: CueTiming) -> Result<(), CueError> {
        self.update_cue(number, |cue| {
            cue.timing = timing.sanitized();
            Ok(())
        })
    }

    pub fn set_cue_control_string(
        &self,
        number: f64,
        control: Option<String>,
    ) -> Result<(), CueError> {
        self.update_cue(number, |cue| {
            cue.control_string = control.filter(|c| !c.is_empty());
            Ok(())
        })
    }

    pub fn current(&self) -> Option<f64> {
        let set = self.inner.set.lock();
        set.resolve(set.current)
    }

    pub fn next(&self) -> Option<f64> {
        let set = self.inner.set.lock();
        set.resolve(set.next)
    }

    /// The cue BACK returns to: the last one completed before the running fade.
    pub fn back(&self) -> Option<f64> {
        let set = self.inner.set.lock();
        set.resolve(set.back)
    }

    /// Selects a cue; it becomes both current and next.
    pub fn set_current(&self, number: f64) -> Result<(), CueError> {
        let mut set = self.inner.set.lock();
        if set.position(number).is_none() {
            return Err(CueError::UnknownCue(number));
        }
        set.current = Some(number);
        set.next = Some(number);
        Ok(())
    }

    /// Number for a cue appended after the last one.
    pub fn next_cue_number(&self) -> f64 {
        self.inner.set.lock().next_cue_number()
    }

    pub fn cue_after(&self, number: Option<f64>) -> Option<f64> {
        self.inner.set.lock().cue_after(number)
    }

    /// Records the live levels.
    ///
    /// `number` 0 records into the current cue, or appends a new cue when there
    /// is none. Returns the number of the cue written.
    pub fn record_from_live(&self, number: f64, overwrite: Overwrite) -> Result<f64, CueError> {
        let levels = self.inner.live.levels();
        let mut set = self.inner.set.lock();

        let existing = if number == 0.0 {
            set.resolve(set.current)
        } else {
            let number = check_number(number)?;
            set.position(number).map(|_| number)
        };
        let new_number = match existing {
            None if number == 0.0 => set.next_cue_number(),
            None => number,
            Some(existing) => match overwrite {
                Overwrite::Reject => return Err(CueError::CueExists(existing)),
                Overwrite::AddNew => set.next_cue_number(),
                Overwrite::Replace => {
                    if let Some(cue) = set.cue_mut(existing) {
                        cue.copy_levels_from(&levels);
                    }
                    set.current = Some(existing);
                    info!("Cue {existing} replaced");
                    return Ok(existing);
                }
            },
        };

        let mut cue = Cue::new(new_number, self.inner.channels);
        cue.copy_levels_from(&levels);
        set.insert(cue);
        set.current = Some(new_number);
        info!("Cue {new_number} recorded");
        Ok(new_number)
    }

    /// Fades to cue `number`, or with `None` to next (or the cue after current).
    /// Returns the number of the cue started.
    pub fn start_fade_to(&self, number: Option<f64>) -> Result<f64, CueError> {
        let cue = {
            let mut set = self.inner.set.lock();
            let target = match number {
                Some(n) => set.resolve(Some(n)).ok_or(CueError::UnknownCue(n))?,
                None => set
                    .resolve(set.next)
                    .or_else(|| set.cue_after(set.current))
                    .ok_or(CueError::EmptyList)?,
            };
            set.current = Some(target);
            set.next = set.cue_after(Some(target));
            set.cue(target).cloned().ok_or(CueError::UnknownCue(target))?
        };

        info!("GO cue {}", cue.number);
        let observer: Arc<dyn FadeObserver> = Arc::new(ListObserver {
            list: Arc::downgrade(&self.inner),
        });
        self.inner.live.start_fade_to(&cue, Some(observer));

        if let Some(control) = &cue.control_string {
            let sink = self.inner.control.lock().clone();
            if let Some(sink) = sink {
                sink.send_control_string(control);
            }
        }
        Ok(cue.number)
    }

    /// `number` 0 plays the next cue.
    pub fn start_fade_to_cue_number(&self, number: f64) -> Result<f64, CueError> {
        if number == 0.0 {
            self.start_fade_to(None)
        } else {
            self.start_fade_to(Some(number))
        }
    }

    /// Returns to the last completed cue.
    pub fn go_back(&self) -> Result<f64, CueError> {
        let back = self.back().ok_or(CueError::EmptyList)?;
        self.start_fade_to(Some(back))
    }

    pub fn stop(&self) {
        self.inner.live.stop();
    }

    pub fn start_live_output(&self) {
        if let Some(output) = self.inner.live.output() {
            output.start_sending();
        }
    }

    pub fn stop_live_output(&self) {
        if let Some(output) = self.inner.live.output() {
            output.stop_sending();
        }
    }

    pub fn set_master_level(&self, percent: f64) {
        self.inner.live.set_master(percent);
    }

    pub fn set_channel_level(&self, channel: usize, level: f64) -> Result<(), CueError> {
        self.inner.live.set_level(channel, level)
    }

    pub fn set_dimmer_level(&self, address: usize, level: f64) -> Result<(), CueError> {
        self.inner.live.set_dimmer_level(address, level)
    }

    pub fn patch_address_to_channel(
        &self,
        address: usize,
        channel: usize,
        percent: f64,
        option: PatchOption,
    ) -> Result<(), CueError> {
        self.inner
            .live
            .patch_address(address, channel, percent, option)
    }

    pub fn set_option_for_address(
        &self,
        address: usize,
        option: PatchOption,
        percent: Option<f64>,
    ) -> Result<(), CueError> {
        self.inner
            .live
            .set_option_for_address(address, option, percent)
    }

    pub fn clear_patch(&self) {
        self.inner.live.clear_patch();
    }

    /// Patch and cues as USITT ASCII text.
    pub fn ascii_string(&self) -> String {
        let patch = self.inner.live.patch_snapshot();
        let mut s = String::from("Ident 3:0\n");
        s.push_str(&patch.patch_string());
        s.push_str(&patch.option_string());
        for cue in self.inner.set.lock().cues.iter() {
            s.push_str(&cue.ascii_string());
        }
        s.push_str("enddata\n");
        s
    }

    /// One line per cue with its times.
    pub fn description_string(&self) -> String {
        self.inner
            .set
            .lock()
            .cues
            .iter()
            .map(|cue| format!("{}\n", cue.description(",")))
            .collect()
    }

    pub fn control_strings(&self) -> String {
        self.inner
            .set
            .lock()
            .cues
            .iter()
            .filter_map(Cue::control_line)
            .map(|line| format!("{line}\n"))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::live_cue::tests::{CompletionWatcher, RecordingOutput};

    const WAIT: Duration = Duration::from_secs(5);

    #[derive(Default)]
    struct RecordingSink {
        sent: parking_lot::Mutex<Vec<String>>,
    }

    impl ControlSink for RecordingSink {
        fn send_control_string(&self, control: &str) {
            self.sent.lock().push(control.to_string());
        }
    }

    fn quick_cue(list: &CueList, number: f64, levels: &[f64]) {
        list.create_cue_for_number(number).unwrap();
        for (idx, level) in levels.iter().enumerate() {
            list.set_cue_level(number, idx + 1, *level).unwrap();
        }
        list.set_cue_timing(number, CueTiming::symmetric(0.0)).unwrap();
    }

    #[test]
    fn test_record_into_empty_list() {
        let list = CueList::new(2, 512);
        list.set_channel_level(1, 100.0).unwrap();
        assert_eq!(list.record_from_live(0.0, Overwrite::Reject), Ok(1.0));
        assert_eq!(list.current(), Some(1.0));
        assert_eq!(list.cue(1.0).unwrap().livestate, vec![100.0, 0.0]);

        // current exists now
        assert_eq!(
            list.record_from_live(0.0, Overwrite::Reject),
            Err(CueError::CueExists(1.0))
        );
        assert_eq!(list.record_from_live(0.0, Overwrite::AddNew), Ok(2.0));
        assert_eq!(list.current(), Some(2.0));
    }

    #[test]
    fn test_reject_leaves_cue_unchanged() {
        let list = CueList::new(2, 512);
        list.set_channel_level(1, 40.0).unwrap();
        list.record_from_live(5.0, Overwrite::Reject).unwrap();

        list.set_channel_level(1, 90.0).unwrap();
        assert_eq!(
            list.record_from_live(5.0, Overwrite::Reject),
            Err(CueError::CueExists(5.0))
        );
        assert_eq!(list.cue(5.0).unwrap().livestate, vec![40.0, 0.0]);

        assert_eq!(list.record_from_live(5.0, Overwrite::Replace), Ok(5.0));
        assert_eq!(list.cue(5.0).unwrap().livestate, vec![90.0, 0.0]);
        assert_eq!(list.record_from_live(5.0, Overwrite::AddNew), Ok(6.0));
    }

    #[test]
    fn test_cues_stay_sorted() {
        let list = CueList::new(1, 512);
        for n in [3.0, 1.0, 2.5, 10.0] {
            list.create_cue_for_number(n).unwrap();
        }
        list.create_cue_for_number(2.5).unwrap();
        let numbers: Vec<f64> = list.cues().iter().map(|c| c.number).collect();
        assert_eq!(numbers, vec![1.0, 2.5, 3.0, 10.0]);
        assert_eq!(list.next_cue_number(), 11.0);
        assert_eq!(list.cue_after(Some(3.0)), Some(10.0));
        assert_eq!(list.cue_after(Some(10.0)), Some(1.0));
        assert_eq!(list.cue_after(None), Some(1.0));
        assert_eq!(
            list.create_cue_for_number(-1.0),
            Err(CueError::InvalidCueNumber(-1.0))
        );
    }

    #[test]
    fn test_go_advances_and_wraps() {
        let list = CueList::new(1, 512);
        assert_eq!(list.start_fade_to(None), Err(CueError::EmptyList));
        quick_cue(&list, 1.0, &[10.0]);
        quick_cue(&list, 2.0, &[20.0]);

        let (watcher, done) = CompletionWatcher::new();
        list.set_delegate(Some(watcher));
        assert_eq!(list.start_fade_to(None), Ok(1.0));
        assert_eq!(done.recv_timeout(WAIT).unwrap().0, 1.0);
        assert_eq!(list.current(), Some(1.0));
        assert_eq!(list.next(), Some(2.0));

        assert_eq!(list.start_fade_to_cue_number(0.0), Ok(2.0));
        done.recv_timeout(WAIT).unwrap();
        assert_eq!(list.next(), Some(1.0));
        assert_eq!(list.live().level(1), Some(20.0));
        assert_eq!(list.back(), Some(1.0));

        assert_eq!(list.go_back(), Ok(1.0));
        done.recv_timeout(WAIT).unwrap();
        assert_eq!(list.live().level(1), Some(10.0));

        assert_eq!(
            list.start_fade_to_cue_number(7.0),
            Err(CueError::UnknownCue(7.0))
        );
    }

    #[test]
    fn test_follow_on_chains_next_cue() {
        let list = CueList::new(1, 512);
        quick_cue(&list, 1.0, &[50.0]);
        quick_cue(&list, 2.0, &[75.0]);
        list.set_cue_timing(
            1.0,
            CueTiming {
                uptime: 0.0,
                downtime: 0.0,
                followtime: 0.05,
                ..Default::default()
            },
        )
        .unwrap();

        let (watcher, done) = CompletionWatcher::new();
        list.set_delegate(Some(watcher));
        list.start_fade_to(Some(1.0)).unwrap();

        // only the last cue of the chain reaches the delegate
        assert_eq!(done.recv_timeout(WAIT).unwrap(), (2.0, FadeOutcome::Completed));
        assert_eq!(list.current(), Some(2.0));
        assert_eq!(list.live().level(1), Some(75.0));
    }

    #[test]
    fn test_stop_makes_next_current() {
        let list = CueList::new(1, 512);
        quick_cue(&list, 1.0, &[100.0]);
        quick_cue(&list, 2.0, &[0.0]);
        list.set_cue_timing(1.0, CueTiming::symmetric(30.0)).unwrap();

        let (watcher, done) = CompletionWatcher::new();
        list.set_delegate(Some(watcher));
        list.start_fade_to(Some(1.0)).unwrap();
        assert_eq!(list.next(), Some(2.0));
        list.stop();

        assert_eq!(done.recv_timeout(WAIT).unwrap(), (1.0, FadeOutcome::Stopped));
        assert_eq!(list.next(), Some(1.0));
    }

    #[test]
    fn test_control_string_sent_on_go() {
        let list = CueList::new(1, 512);
        let sink = Arc::new(RecordingSink::default());
        list.set_control_sink(Some(sink.clone()));
        quick_cue(&list, 1.0, &[0.0]);
        list.set_cue_control_string(1.0, Some("10.0.0.5:53000~/go".to_string()))
            .unwrap();

        list.start_fade_to(Some(1.0)).unwrap();
        assert_eq!(sink.sent.lock().as_slice(), ["10.0.0.5:53000~/go"]);
        assert_eq!(list.control_strings(), "Cue 1 10.0.0.5:53000~/go\n");
    }

    #[test]
    fn test_removed_cue_no_longer_resolves() {
        let list = CueList::new(1, 512);
        quick_cue(&list, 1.0, &[0.0]);
        list.set_current(1.0).unwrap();
        list.remove_cue(1.0).unwrap();
        assert_eq!(list.current(), None);
        assert_eq!(list.remove_cue(1.0), Err(CueError::UnknownCue(1.0)));
        assert_eq!(list.set_current(1.0), Err(CueError::UnknownCue(1.0)));
    }

    #[test]
    fn test_ascii_string_layout() {
        let list = CueList::new(2, 3);
        list.patch_address_to_channel(3, 2, 50.0, PatchOption::NonDim)
            .unwrap();
        list.set_channel_level(1, 100.0).unwrap();
        list.record_from_live(1.0, Overwrite::Reject).unwrap();

        let text = list.ascii_string();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Ident 3:0");
        assert_eq!(lines[1], "Patch 1 1<1@100 2<2@100 2<3@50");
        assert!(text.contains("$$dimoption 3 1\n"));
        assert!(text.contains("Cue 1\nUp 5\nDown 5\nChan 1@100\n"));
        assert_eq!(lines.last(), Some(&"enddata"));
        assert_eq!(list.description_string(), "Cue 1,Up 5,Down 5\n");
    }

    #[test]
    fn test_live_output_follows_list() {
        let list = CueList::new(2, 512);
        let output = Arc::new(RecordingOutput::default());
        list.set_output(Some(output.clone()));
        list.set_master_level(100.0);
        list.set_dimmer_level(2, 100.0).unwrap();
        assert_eq!(output.last_frame().unwrap()[1], 255);

        list.set_master_level(0.0);
        assert_eq!(output.last_frame().unwrap()[1], 0);
    }
}
