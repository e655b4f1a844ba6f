use std::collections::{HashMap, HashSet};
use std::fmt;
use std::ops::Range;
use std::str::FromStr;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::{debug, info, warn};

use crate::record::VideoRecord;
use crate::vote::{transition, Press, VoteState};

/// Maximum number of media slots mounted per container.
pub const WINDOW_SIZE: usize = 5;
const WINDOW_LEAD: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Container {
    Popular,
    Private,
}

impl Container {
    pub const ALL: [Container; 2] = [Container::Popular, Container::Private];

    pub fn as_str(self) -> &'static str {
        match self {
            Container::Popular => "popular",
            Container::Private => "private",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Container::Popular => "Popular",
            Container::Private => "Private",
        }
    }

    /// Key of the surface subtree owned by this container.
    pub fn surface_key(self) -> String {
        format!("video-items-{}", self.as_str())
    }

    pub fn next(self) -> Self {
        match self {
            Container::Popular => Container::Private,
            Container::Private => Container::Popular,
        }
    }

    pub fn for_record(record: &VideoRecord) -> Self {
        if record.is_private() {
            Container::Private
        } else {
            Container::Popular
        }
    }
}

impl fmt::Display for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Container {
    type Err = FeedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "popular" | "top" => Ok(Container::Popular),
            "private" => Ok(Container::Private),
            other => Err(FeedError::UnknownContainer(other.to_string())),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FeedError {
    #[error("unknown container {0:?}")]
    UnknownContainer(String),
    #[error("no delete is pending")]
    NoPendingDelete,
}

#[derive(Debug, thiserror::Error)]
pub enum PlaybackError {
    #[error("autoplay is disabled")]
    AutoplayDisabled,
    #[error("player unavailable: {0}")]
    Player(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Playback {
    Idle,
    Playing,
    /// Playback was refused; a play affordance is shown instead.
    Blocked,
}

/// What asked for playback to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Autoplay,
    User,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    pub index: usize,
    pub video_id: String,
    pub autoplay: bool,
    pub playback: Playback,
}

/// Rendering target for a container's media slots.
pub trait Stage {
    fn mount(&mut self, container: Container, video: &VideoRecord, autoplay: bool);
    fn unmount(&mut self, container: Container, video_id: &str);
    fn play(
        &mut self,
        container: Container,
        video: &VideoRecord,
        muted: bool,
        trigger: Trigger,
    ) -> Result<(), PlaybackError>;
    /// Pause and rewind to the start.
    fn stop(&mut self, container: Container, video_id: &str);
    fn set_muted(&mut self, container: Container, video_id: &str, muted: bool);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    Rendered {
        container: Container,
        window: Range<usize>,
        current: Option<usize>,
    },
    CurrentChanged {
        container: Container,
        from: usize,
        to: usize,
    },
    VoteChanged {
        container: Container,
        video_id: String,
        state: VoteState,
        upvotes: u64,
        downvotes: u64,
    },
    PlaybackBlocked {
        container: Container,
        video_id: String,
        reason: String,
    },
    Inserted {
        container: Container,
        video_id: String,
    },
    Removed {
        container: Container,
        video_id: String,
    },
    Reloaded {
        container: Container,
        len: usize,
    },
}

/// Indices of the mounted window around `current`.
pub fn window_bounds(len: usize, current: usize) -> Range<usize> {
    if len == 0 {
        return 0..0;
    }
    let current = current.min(len - 1);
    let max_start = len.saturating_sub(WINDOW_SIZE);
    let start = current.saturating_sub(WINDOW_LEAD).min(max_start);
    let end = (start + WINDOW_SIZE).min(len);
    start..end
}

#[derive(Debug, Default)]
pub struct FeedState {
    items: Vec<VideoRecord>,
    current: usize,
    votes: HashMap<String, VoteState>,
    muted: bool,
    slots: Vec<Slot>,
    pending_delete: Option<String>,
    swipe_ready_at: Option<Instant>,
    generation: u64,
}

impl FeedState {
    pub fn items(&self) -> &[VideoRecord] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn current_index(&self) -> Option<usize> {
        if self.items.is_empty() {
            None
        } else {
            Some(self.current.min(self.items.len() - 1))
        }
    }

    pub fn current(&self) -> Option<&VideoRecord> {
        self.current_index().and_then(|index| self.items.get(index))
    }

    pub fn vote_state(&self, video_id: &str) -> VoteState {
        self.votes.get(video_id).copied().unwrap_or_default()
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    pub fn window(&self) -> Range<usize> {
        window_bounds(self.items.len(), self.current)
    }

    pub fn pending_delete(&self) -> Option<&str> {
        self.pending_delete.as_deref()
    }

    pub fn playback_of(&self, video_id: &str) -> Option<Playback> {
        self.slots
            .iter()
            .find(|slot| slot.video_id == video_id)
            .map(|slot| slot.playback)
    }

    fn position_of(&self, video_id: &str) -> Option<usize> {
        self.items.iter().position(|item| item.id() == video_id)
    }
}

/// Owns every container's feed state and the stage they render into.
pub struct FeedController<S: Stage> {
    stage: S,
    feeds: HashMap<Container, FeedState>,
    subscribers: HashMap<Container, Vec<Sender<FeedEvent>>>,
    swipe_guard: Duration,
    start_muted: bool,
    active: Option<Container>,
}

impl<S: Stage> FeedController<S> {
    pub fn new(stage: S, swipe_guard: Duration) -> Self {
        Self {
            stage,
            feeds: HashMap::new(),
            subscribers: HashMap::new(),
            swipe_guard,
            start_muted: false,
            active: None,
        }
    }

    pub fn with_start_muted(mut self, muted: bool) -> Self {
        self.start_muted = muted;
        self
    }

    pub fn stage(&self) -> &S {
        &self.stage
    }

    pub fn stage_mut(&mut self) -> &mut S {
        &mut self.stage
    }

    pub fn feed(&self, container: Container) -> Option<&FeedState> {
        self.feeds.get(&container)
    }

    /// Container currently on screen. `None` lets every container autoplay.
    pub fn active(&self) -> Option<Container> {
        self.active
    }

    /// Puts `container` on screen: the previous one is suspended and only
    /// the active container autoplays from now on.
    pub fn activate(&mut self, container: Container) {
        if let Some(previous) = self.active.filter(|previous| *previous != container) {
            self.suspend(previous);
        }
        self.active = Some(container);
        self.render(container);
    }

    pub fn subscribe(&mut self, container: Container) -> Receiver<FeedEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.entry(container).or_default().push(tx);
        rx
    }

    pub fn initialize(&mut self, container: Container, mut items: Vec<VideoRecord>) {
        let start_muted = self.start_muted;
        let feed = self.feeds.entry(container).or_insert_with(|| FeedState {
            muted: start_muted,
            ..FeedState::default()
        });

        let received = items.len();
        let mut seen = HashSet::new();
        items.retain(|item| seen.insert(item.id().to_string()));
        if items.len() != received {
            debug!(
                container = %container,
                dropped = received - items.len(),
                "dropped duplicate ids"
            );
        }

        feed.votes
            .retain(|id, _| items.iter().any(|item| item.id() == id));
        for item in &mut items {
            restore_vote(&feed.votes, item);
        }

        let len = items.len();
        feed.items = items;
        feed.current = 0;
        feed.pending_delete = None;
        info!(container = %container, len, "feed initialized");
        self.emit(container, vec![FeedEvent::Reloaded { container, len }]);
        self.render(container);
    }

    /// Starts a reload and returns its generation number.
    pub fn begin_reload(&mut self, container: Container) -> u64 {
        let start_muted = self.start_muted;
        let feed = self.feeds.entry(container).or_insert_with(|| FeedState {
            muted: start_muted,
            ..FeedState::default()
        });
        feed.generation += 1;
        feed.generation
    }

    /// Applies a reload result unless a newer reload has been started since.
    pub fn apply_reload(
        &mut self,
        container: Container,
        generation: u64,
        items: Vec<VideoRecord>,
    ) -> bool {
        let latest = self
            .feeds
            .get(&container)
            .map(|feed| feed.generation)
            .unwrap_or(0);
        if generation != latest {
            debug!(
                container = %container,
                generation,
                latest,
                "discarding stale reload"
            );
            return false;
        }
        self.initialize(container, items);
        true
    }

    pub fn is_reload_current(&self, container: Container, generation: u64) -> bool {
        self.feeds
            .get(&container)
            .is_some_and(|feed| feed.generation == generation)
    }

    pub fn remove_container(&mut self, container: Container) {
        if let Some(mut feed) = self.feeds.remove(&container) {
            for slot in feed.slots.drain(..) {
                if slot.playback == Playback::Playing {
                    self.stage.stop(container, &slot.video_id);
                }
                self.stage.unmount(container, &slot.video_id);
            }
        }
        self.subscribers.remove(&container);
    }

    pub fn advance(&mut self, container: Container) -> bool {
        self.step(container, Direction::Forward)
    }

    pub fn retreat(&mut self, container: Container) -> bool {
        self.step(container, Direction::Backward)
    }

    /// Gesture/keyboard navigation. Input arriving before the previous
    /// transition's guard interval has elapsed is dropped.
    pub fn swipe(&mut self, container: Container, direction: Direction, now: Instant) -> bool {
        let Some(feed) = self.feeds.get(&container) else {
            return false;
        };
        if let Some(ready_at) = feed.swipe_ready_at {
            if now < ready_at {
                debug!(container = %container, ?direction, "swipe ignored during transition");
                return false;
            }
        }
        let moved = self.step(container, direction);
        if moved {
            let guard = self.swipe_guard;
            if let Some(feed) = self.feeds.get_mut(&container) {
                feed.swipe_ready_at = Some(now + guard);
            }
        }
        moved
    }

    fn step(&mut self, container: Container, direction: Direction) -> bool {
        let Some(feed) = self.feeds.get_mut(&container) else {
            return false;
        };
        let Some(from) = feed.current_index() else {
            return false;
        };
        let to = match direction {
            Direction::Forward => (from + 1).min(feed.items.len() - 1),
            Direction::Backward => from.saturating_sub(1),
        };
        if to == from {
            return false;
        }
        feed.current = to;
        self.emit(container, vec![FeedEvent::CurrentChanged { container, from, to }]);
        self.render(container);
        true
    }

    pub fn render(&mut self, container: Container) {
        let may_autoplay = self.active.map_or(true, |active| active == container);
        if may_autoplay && self.wants_playback(container) {
            self.halt_others(container);
        }
        let Some(feed) = self.feeds.get_mut(&container) else {
            return;
        };
        let events = render_feed(&mut self.stage, container, feed, may_autoplay);
        self.emit(container, events);
    }

    /// True when rendering would start the current item.
    fn wants_playback(&self, container: Container) -> bool {
        let Some(feed) = self.feeds.get(&container) else {
            return false;
        };
        let Some(current) = feed.current() else {
            return false;
        };
        feed.slots
            .iter()
            .find(|slot| slot.video_id == current.id())
            .map_or(true, |slot| slot.playback == Playback::Idle)
    }

    /// Stops whatever plays in other containers; the stage runs one video at a time.
    fn halt_others(&mut self, container: Container) {
        for (other, feed) in self.feeds.iter_mut() {
            if *other == container {
                continue;
            }
            for slot in feed.slots.iter_mut() {
                if slot.playback == Playback::Playing {
                    self.stage.stop(*other, &slot.video_id);
                    slot.playback = Playback::Idle;
                }
            }
        }
    }

    /// Explicit play request for the current item, e.g. after autoplay was refused.
    pub fn play_current(&mut self, container: Container) -> Result<(), PlaybackError> {
        let needs_start = self
            .feeds
            .get(&container)
            .and_then(|feed| {
                let index = feed.current_index()?;
                feed.slots.iter().find(|slot| slot.index == index)
            })
            .is_some_and(|slot| slot.playback != Playback::Playing);
        if needs_start {
            self.halt_others(container);
        }
        let Some(feed) = self.feeds.get_mut(&container) else {
            return Ok(());
        };
        let Some(index) = feed.current_index() else {
            return Ok(());
        };
        let muted = feed.muted;
        let Some(slot) = feed.slots.iter_mut().find(|slot| slot.index == index) else {
            return Ok(());
        };
        if slot.playback == Playback::Playing {
            return Ok(());
        }
        match self.stage.play(container, &feed.items[index], muted, Trigger::User) {
            Ok(()) => {
                slot.playback = Playback::Playing;
                Ok(())
            }
            Err(err) => {
                slot.playback = Playback::Blocked;
                Err(err)
            }
        }
    }

    /// Stops playback in a container without moving its position. The next
    /// render resumes autoplay.
    pub fn suspend(&mut self, container: Container) {
        let Some(feed) = self.feeds.get_mut(&container) else {
            return;
        };
        for slot in feed.slots.iter_mut() {
            if slot.playback == Playback::Playing {
                self.stage.stop(container, &slot.video_id);
            }
            slot.playback = Playback::Idle;
        }
    }

    /// The stage reports that a video stopped on its own (player closed).
    pub fn playback_ended(&mut self, container: Container, video_id: &str) {
        let Some(feed) = self.feeds.get_mut(&container) else {
            return;
        };
        if let Some(slot) = feed
            .slots
            .iter_mut()
            .find(|slot| slot.video_id == video_id && slot.playback == Playback::Playing)
        {
            slot.playback = Playback::Idle;
        }
    }

    pub fn toggle_mute(&mut self, container: Container) -> Option<bool> {
        let feed = self.feeds.get_mut(&container)?;
        feed.muted = !feed.muted;
        for slot in &feed.slots {
            if slot.playback == Playback::Playing {
                self.stage.set_muted(container, &slot.video_id, feed.muted);
            }
        }
        Some(feed.muted)
    }

    pub fn vote_up(&mut self, video_id: &str, container: Container) -> Option<VoteState> {
        self.vote(container, video_id, Press::Up)
    }

    pub fn vote_down(&mut self, video_id: &str, container: Container) -> Option<VoteState> {
        self.vote(container, video_id, Press::Down)
    }

    pub fn vote_current(&mut self, container: Container, press: Press) -> Option<VoteState> {
        let video_id = self.feeds.get(&container)?.current()?.id().to_string();
        self.vote(container, &video_id, press)
    }

    fn vote(&mut self, container: Container, video_id: &str, press: Press) -> Option<VoteState> {
        let feed = self.feeds.get_mut(&container)?;
        let position = feed.position_of(video_id)?;
        let state = feed.vote_state(video_id);
        let step = transition(state, press);
        let record = &mut feed.items[position];
        record.apply_vote(step);
        feed.votes.insert(video_id.to_string(), step.next);
        let event = FeedEvent::VoteChanged {
            container,
            video_id: video_id.to_string(),
            state: step.next,
            upvotes: record.upvotes(),
            downvotes: record.downvotes(),
        };
        self.emit(container, vec![event]);
        Some(step.next)
    }

    /// First phase of deleting the current item: remembers its id.
    pub fn request_delete_current(&mut self, container: Container) -> Option<String> {
        let feed = self.feeds.get_mut(&container)?;
        let id = feed.current()?.id().to_string();
        feed.pending_delete = Some(id.clone());
        Some(id)
    }

    pub fn cancel_delete(&mut self, container: Container) -> Option<String> {
        self.feeds.get_mut(&container)?.pending_delete.take()
    }

    /// Second phase: removes the pending item wherever it sits now.
    pub fn confirm_delete_current(
        &mut self,
        container: Container,
    ) -> Result<Option<VideoRecord>, FeedError> {
        let feed = self
            .feeds
            .get_mut(&container)
            .ok_or_else(|| FeedError::UnknownContainer(container.to_string()))?;
        let id = feed
            .pending_delete
            .take()
            .ok_or(FeedError::NoPendingDelete)?;
        let Some(position) = feed.position_of(&id) else {
            warn!(container = %container, video_id = %id, "pending delete no longer in feed");
            return Ok(None);
        };

        let removed = feed.items.remove(position);
        feed.votes.remove(&id);
        if position < feed.current {
            feed.current -= 1;
        }
        feed.current = feed.current.min(feed.items.len().saturating_sub(1));

        self.emit(
            container,
            vec![FeedEvent::Removed {
                container,
                video_id: id,
            }],
        );
        self.render(container);
        Ok(Some(removed))
    }

    /// Puts a freshly shared record at the head of the feed and focuses it.
    pub fn prepend(&mut self, container: Container, record: VideoRecord) {
        let start_muted = self.start_muted;
        let feed = self.feeds.entry(container).or_insert_with(|| FeedState {
            muted: start_muted,
            ..FeedState::default()
        });
        let mut record = record;
        let video_id = record.id().to_string();
        feed.items.retain(|item| item.id() != video_id);
        restore_vote(&feed.votes, &mut record);
        feed.items.insert(0, record);
        feed.current = 0;
        self.emit(container, vec![FeedEvent::Inserted { container, video_id }]);
        self.render(container);
    }

    fn emit(&mut self, container: Container, events: Vec<FeedEvent>) {
        if events.is_empty() {
            return;
        }
        if let Some(subscribers) = self.subscribers.get_mut(&container) {
            subscribers.retain(|tx| events.iter().all(|event| tx.send(event.clone()).is_ok()));
        }
    }
}

/// Re-applies a remembered vote to freshly received counters.
fn restore_vote(votes: &HashMap<String, VoteState>, item: &mut VideoRecord) {
    let press = match votes.get(item.id()) {
        Some(VoteState::Up) => Press::Up,
        Some(VoteState::Down) => Press::Down,
        _ => return,
    };
    item.apply_vote(transition(VoteState::None, press));
}

fn render_feed<S: Stage>(
    stage: &mut S,
    container: Container,
    feed: &mut FeedState,
    may_autoplay: bool,
) -> Vec<FeedEvent> {
    let mut events = Vec::new();

    if feed.items.is_empty() {
        for slot in feed.slots.drain(..) {
            if slot.playback == Playback::Playing {
                stage.stop(container, &slot.video_id);
            }
            stage.unmount(container, &slot.video_id);
        }
        feed.current = 0;
        events.push(FeedEvent::Rendered {
            container,
            window: 0..0,
            current: None,
        });
        return events;
    }

    feed.current = feed.current.min(feed.items.len() - 1);
    let window = window_bounds(feed.items.len(), feed.current);
    let current_id = feed.items[feed.current].id().to_string();

    // Everything that is not the current item is paused and rewound first.
    for slot in feed.slots.iter_mut() {
        if slot.video_id == current_id {
            continue;
        }
        if slot.playback == Playback::Playing {
            stage.stop(container, &slot.video_id);
        }
        slot.playback = Playback::Idle;
    }

    let in_window = &feed.items[window.clone()];
    feed.slots.retain(|slot| {
        if in_window.iter().any(|item| item.id() == slot.video_id) {
            true
        } else {
            stage.unmount(container, &slot.video_id);
            false
        }
    });

    let mut next_slots = Vec::with_capacity(window.len());
    for index in window.clone() {
        let video = &feed.items[index];
        let autoplay = index == feed.current;
        match feed
            .slots
            .iter()
            .position(|slot| slot.video_id == video.id())
        {
            Some(pos) => {
                let mut slot = feed.slots.swap_remove(pos);
                slot.index = index;
                slot.autoplay = autoplay;
                next_slots.push(slot);
            }
            None => {
                stage.mount(container, video, autoplay);
                next_slots.push(Slot {
                    index,
                    video_id: video.id().to_string(),
                    autoplay,
                    playback: Playback::Idle,
                });
            }
        }
    }
    feed.slots = next_slots;

    if let Some(slot) = feed.slots.iter_mut().find(|slot| slot.autoplay) {
        if may_autoplay && slot.playback == Playback::Idle {
            match stage.play(
                container,
                &feed.items[slot.index],
                feed.muted,
                Trigger::Autoplay,
            ) {
                Ok(()) => slot.playback = Playback::Playing,
                Err(err) => {
                    debug!(
                        container = %container,
                        video_id = %slot.video_id,
                        %err,
                        "autoplay refused"
                    );
                    slot.playback = Playback::Blocked;
                    events.push(FeedEvent::PlaybackBlocked {
                        container,
                        video_id: slot.video_id.clone(),
                        reason: err.to_string(),
                    });
                }
            }
        }
    }

    events.push(FeedEvent::Rendered {
        container,
        window,
        current: Some(feed.current),
    });
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Mount(String, bool),
        Unmount(String),
        Play(String),
        Stop(String),
        Mute(String, bool),
    }

    #[derive(Default)]
    struct RecordingStage {
        calls: Vec<Call>,
        mounted: HashSet<String>,
        playing: HashSet<String>,
        refuse_autoplay: bool,
        max_playing: usize,
    }

    impl Stage for RecordingStage {
        fn mount(&mut self, _container: Container, video: &VideoRecord, autoplay: bool) {
            self.calls.push(Call::Mount(video.id().into(), autoplay));
            self.mounted.insert(video.id().into());
        }

        fn unmount(&mut self, _container: Container, video_id: &str) {
            assert!(!self.playing.contains(video_id), "unmounted while playing");
            self.calls.push(Call::Unmount(video_id.into()));
            self.mounted.remove(video_id);
        }

        fn play(
            &mut self,
            _container: Container,
            video: &VideoRecord,
            _muted: bool,
            trigger: Trigger,
        ) -> Result<(), PlaybackError> {
            if self.refuse_autoplay && trigger == Trigger::Autoplay {
                return Err(PlaybackError::AutoplayDisabled);
            }
            assert!(self.mounted.contains(video.id()), "played before mount");
            self.calls.push(Call::Play(video.id().into()));
            self.playing.insert(video.id().into());
            self.max_playing = self.max_playing.max(self.playing.len());
            Ok(())
        }

        fn stop(&mut self, _container: Container, video_id: &str) {
            self.calls.push(Call::Stop(video_id.into()));
            self.playing.remove(video_id);
        }

        fn set_muted(&mut self, _container: Container, video_id: &str, muted: bool) {
            self.calls.push(Call::Mute(video_id.into(), muted));
        }
    }

    fn videos(ids: &[&str]) -> Vec<VideoRecord> {
        ids.iter()
            .map(|id| {
                VideoRecord::new(
                    *id,
                    "canh",
                    format!("Video {id}"),
                    format!("https://youtube.com/embed/{id}"),
                    "",
                    false,
                )
            })
            .collect()
    }

    fn numbered(n: usize) -> Vec<VideoRecord> {
        (0..n)
            .map(|i| VideoRecord::new(i.to_string(), "u", "t", "m", "d", false))
            .collect()
    }

    fn controller() -> FeedController<RecordingStage> {
        FeedController::new(RecordingStage::default(), Duration::from_millis(300))
    }

    #[test]
    fn window_has_min_len_five_and_contains_current() {
        for len in 0..14 {
            for current in 0..len.max(1) {
                let window = window_bounds(len, current);
                assert_eq!(window.len(), len.min(WINDOW_SIZE), "len={len} current={current}");
                if len > 0 {
                    assert!(window.contains(&current), "len={len} current={current}");
                }
            }
        }
    }

    #[test]
    fn window_is_biased_near_edges() {
        assert_eq!(window_bounds(10, 0), 0..5);
        assert_eq!(window_bounds(10, 1), 0..5);
        assert_eq!(window_bounds(10, 4), 2..7);
        assert_eq!(window_bounds(10, 9), 5..10);
        assert_eq!(window_bounds(3, 2), 0..3);
    }

    #[test]
    fn empty_feed_renders_empty_window() {
        let mut ctl = controller();
        let events = ctl.subscribe(Container::Popular);
        ctl.initialize(Container::Popular, Vec::new());
        let feed = ctl.feed(Container::Popular).unwrap();
        assert!(feed.slots().is_empty());
        assert_eq!(feed.current_index(), None);
        assert!(!ctl.advance(Container::Popular));
        assert!(!ctl.retreat(Container::Popular));
        assert!(ctl.stage().calls.is_empty());
        let rendered: Vec<_> = events.try_iter().collect();
        assert!(rendered.contains(&FeedEvent::Rendered {
            container: Container::Popular,
            window: 0..0,
            current: None,
        }));
    }

    #[test]
    fn navigation_is_clamped_at_both_ends() {
        let mut ctl = controller();
        ctl.initialize(Container::Popular, videos(&["a", "b", "c"]));
        assert!(!ctl.retreat(Container::Popular));
        assert_eq!(ctl.feed(Container::Popular).unwrap().current_index(), Some(0));
        assert!(ctl.advance(Container::Popular));
        assert!(ctl.advance(Container::Popular));
        assert!(!ctl.advance(Container::Popular));
        assert_eq!(ctl.feed(Container::Popular).unwrap().current_index(), Some(2));
    }

    #[test]
    fn advancing_pauses_previous_and_plays_next() {
        let mut ctl = controller();
        ctl.initialize(Container::Popular, videos(&["A", "B", "C"]));
        assert_eq!(
            ctl.feed(Container::Popular).unwrap().playback_of("A"),
            Some(Playback::Playing)
        );
        ctl.stage_mut().calls.clear();

        ctl.advance(Container::Popular);
        let feed = ctl.feed(Container::Popular).unwrap();
        assert_eq!(feed.current_index(), Some(1));
        assert_eq!(feed.playback_of("A"), Some(Playback::Idle));
        assert_eq!(feed.playback_of("B"), Some(Playback::Playing));
        assert_eq!(
            ctl.stage().calls,
            vec![Call::Stop("A".into()), Call::Play("B".into())]
        );
        assert_eq!(ctl.stage().max_playing, 1);
    }

    #[test]
    fn vote_scenario_follows_table() {
        let mut ctl = controller();
        ctl.initialize(Container::Popular, videos(&["A", "B", "C"]));
        ctl.advance(Container::Popular);

        let counts = |ctl: &FeedController<RecordingStage>| {
            let feed = ctl.feed(Container::Popular).unwrap();
            let b = &feed.items()[1];
            (feed.vote_state("B"), b.upvotes(), b.downvotes())
        };

        assert_eq!(ctl.vote_up("B", Container::Popular), Some(VoteState::Up));
        assert_eq!(counts(&ctl), (VoteState::Up, 1, 0));
        assert_eq!(ctl.vote_up("B", Container::Popular), Some(VoteState::None));
        assert_eq!(counts(&ctl), (VoteState::None, 0, 0));
        assert_eq!(ctl.vote_down("B", Container::Popular), Some(VoteState::Down));
        assert_eq!(counts(&ctl), (VoteState::Down, 0, 1));
        assert_eq!(ctl.vote_up("B", Container::Popular), Some(VoteState::Up));
        assert_eq!(counts(&ctl), (VoteState::Up, 1, 0));
    }

    #[test]
    fn votes_on_unknown_ids_are_ignored() {
        let mut ctl = controller();
        ctl.initialize(Container::Popular, videos(&["A"]));
        assert_eq!(ctl.vote_up("missing", Container::Popular), None);
        assert_eq!(ctl.vote_down("A", Container::Private), None);
    }

    #[test]
    fn deleting_last_current_item_moves_back() {
        let mut ctl = controller();
        ctl.initialize(Container::Popular, videos(&["A", "B", "C"]));
        ctl.advance(Container::Popular);
        ctl.advance(Container::Popular);

        assert_eq!(
            ctl.request_delete_current(Container::Popular).as_deref(),
            Some("C")
        );
        let removed = ctl.confirm_delete_current(Container::Popular).unwrap();
        assert_eq!(removed.map(|r| r.id().to_string()).as_deref(), Some("C"));
        let feed = ctl.feed(Container::Popular).unwrap();
        assert_eq!(feed.current_index(), Some(1));
        assert_eq!(feed.playback_of("B"), Some(Playback::Playing));
        assert!(!ctl.stage().mounted.contains("C"));
    }

    #[test]
    fn deleting_only_item_leaves_empty_feed() {
        let mut ctl = controller();
        ctl.initialize(Container::Private, videos(&["A"]));
        ctl.request_delete_current(Container::Private);
        ctl.confirm_delete_current(Container::Private).unwrap();
        let feed = ctl.feed(Container::Private).unwrap();
        assert!(feed.is_empty());
        assert_eq!(feed.current_index(), None);
        assert!(feed.slots().is_empty());
        assert!(ctl.stage().playing.is_empty());
    }

    #[test]
    fn confirm_requires_request_and_survives_reload() {
        let mut ctl = controller();
        ctl.initialize(Container::Popular, videos(&["A", "B"]));
        assert_eq!(
            ctl.confirm_delete_current(Container::Popular),
            Err(FeedError::NoPendingDelete)
        );

        ctl.request_delete_current(Container::Popular);
        assert_eq!(ctl.cancel_delete(Container::Popular).as_deref(), Some("A"));
        assert_eq!(ctl.feed(Container::Popular).unwrap().len(), 2);

        ctl.advance(Container::Popular);
        ctl.request_delete_current(Container::Popular);
        // the list shifts underneath the pending delete
        ctl.prepend(Container::Popular, videos(&["Z"]).remove(0));
        let removed = ctl.confirm_delete_current(Container::Popular).unwrap();
        assert_eq!(removed.map(|r| r.id().to_string()).as_deref(), Some("B"));
        let ids: Vec<_> = ctl
            .feed(Container::Popular)
            .unwrap()
            .items()
            .iter()
            .map(|v| v.id().to_string())
            .collect();
        assert_eq!(ids, vec!["Z", "A"]);
    }

    #[test]
    fn pending_delete_of_vanished_item_is_noop() {
        let mut ctl = controller();
        ctl.initialize(Container::Popular, videos(&["A", "B"]));
        ctl.request_delete_current(Container::Popular);
        if let Some(feed) = ctl.feeds.get_mut(&Container::Popular) {
            feed.pending_delete = Some("gone".into());
        }
        assert_eq!(ctl.confirm_delete_current(Container::Popular), Ok(None));
        assert_eq!(ctl.feed(Container::Popular).unwrap().len(), 2);
    }

    #[test]
    fn rapid_swipes_do_not_double_advance() {
        let mut ctl = controller();
        ctl.initialize(Container::Popular, numbered(10));
        let t0 = Instant::now();
        assert!(ctl.swipe(Container::Popular, Direction::Forward, t0));
        assert!(!ctl.swipe(Container::Popular, Direction::Forward, t0));
        assert!(!ctl.swipe(
            Container::Popular,
            Direction::Forward,
            t0 + Duration::from_millis(120)
        ));
        assert_eq!(ctl.feed(Container::Popular).unwrap().current_index(), Some(1));
        assert!(ctl.swipe(
            Container::Popular,
            Direction::Forward,
            t0 + Duration::from_millis(300)
        ));
        assert_eq!(ctl.feed(Container::Popular).unwrap().current_index(), Some(2));
    }

    #[test]
    fn swipe_at_boundary_does_not_lock() {
        let mut ctl = controller();
        ctl.initialize(Container::Popular, numbered(3));
        let t0 = Instant::now();
        assert!(!ctl.swipe(Container::Popular, Direction::Backward, t0));
        assert!(ctl.swipe(Container::Popular, Direction::Forward, t0));
    }

    #[test]
    fn slots_outside_window_are_unmounted() {
        let mut ctl = controller();
        ctl.initialize(Container::Popular, numbered(10));
        for _ in 0..5 {
            ctl.advance(Container::Popular);
        }
        let feed = ctl.feed(Container::Popular).unwrap();
        let mounted: Vec<_> = feed.slots().iter().map(|s| s.index).collect();
        assert_eq!(mounted, vec![3, 4, 5, 6, 7]);
        assert_eq!(ctl.stage().mounted.len(), 5);
        assert!(!ctl.stage().mounted.contains("0"));
        assert_eq!(ctl.stage().max_playing, 1);
        let autoplay: Vec<_> = feed.slots().iter().filter(|s| s.autoplay).collect();
        assert_eq!(autoplay.len(), 1);
        assert_eq!(autoplay[0].index, 5);
    }

    #[test]
    fn refused_autoplay_shows_affordance() {
        let mut ctl = controller();
        ctl.stage_mut().refuse_autoplay = true;
        let events = ctl.subscribe(Container::Popular);
        ctl.initialize(Container::Popular, videos(&["A", "B"]));
        let feed = ctl.feed(Container::Popular).unwrap();
        assert_eq!(feed.len(), 2);
        assert_eq!(feed.playback_of("A"), Some(Playback::Blocked));
        assert!(events.try_iter().any(|e| matches!(
            e,
            FeedEvent::PlaybackBlocked { ref video_id, .. } if video_id == "A"
        )));

        ctl.play_current(Container::Popular).unwrap();
        assert_eq!(
            ctl.feed(Container::Popular).unwrap().playback_of("A"),
            Some(Playback::Playing)
        );
    }

    #[test]
    fn suspended_container_resumes_on_render() {
        let mut ctl = controller();
        ctl.initialize(Container::Popular, videos(&["A", "B"]));
        ctl.initialize(Container::Private, videos(&["P"]));
        ctl.suspend(Container::Popular);
        assert!(!ctl.stage().playing.contains("A"));
        assert_eq!(
            ctl.feed(Container::Popular).unwrap().playback_of("A"),
            Some(Playback::Idle)
        );
        ctl.suspend(Container::Private);
        ctl.render(Container::Popular);
        assert_eq!(
            ctl.feed(Container::Popular).unwrap().playback_of("A"),
            Some(Playback::Playing)
        );
    }

    #[test]
    fn ended_playback_can_be_restarted() {
        let mut ctl = controller();
        ctl.initialize(Container::Popular, videos(&["A"]));
        ctl.playback_ended(Container::Popular, "A");
        assert_eq!(
            ctl.feed(Container::Popular).unwrap().playback_of("A"),
            Some(Playback::Idle)
        );
        ctl.stage_mut().calls.clear();
        ctl.play_current(Container::Popular).unwrap();
        assert_eq!(ctl.stage().calls, vec![Call::Play("A".into())]);
    }

    #[test]
    fn stale_reload_is_discarded() {
        let mut ctl = controller();
        let first = ctl.begin_reload(Container::Popular);
        let second = ctl.begin_reload(Container::Popular);
        assert!(ctl.apply_reload(Container::Popular, second, videos(&["new"])));
        assert!(!ctl.apply_reload(Container::Popular, first, videos(&["old"])));
        let feed = ctl.feed(Container::Popular).unwrap();
        assert_eq!(feed.current().map(|v| v.id()), Some("new"));
    }

    #[test]
    fn reload_keeps_user_votes_consistent() {
        let mut ctl = controller();
        ctl.initialize(Container::Popular, videos(&["A", "B"]));
        ctl.vote_down("B", Container::Popular);
        ctl.initialize(Container::Popular, videos(&["B", "C"]));
        let feed = ctl.feed(Container::Popular).unwrap();
        assert_eq!(feed.vote_state("B"), VoteState::Down);
        assert_eq!(feed.items()[0].downvotes(), 1);
        assert_eq!(ctl.vote_down("B", Container::Popular), Some(VoteState::None));
        assert_eq!(ctl.feed(Container::Popular).unwrap().items()[0].downvotes(), 0);
    }

    #[test]
    fn mute_applies_to_playing_slot() {
        let mut ctl = controller();
        ctl.initialize(Container::Popular, videos(&["A", "B"]));
        assert_eq!(ctl.toggle_mute(Container::Popular), Some(true));
        assert!(ctl
            .stage()
            .calls
            .contains(&Call::Mute("A".into(), true)));
        assert_eq!(ctl.toggle_mute(Container::Private), None);
    }

    #[test]
    fn prepend_focuses_shared_record() {
        let mut ctl = controller();
        ctl.initialize(Container::Private, videos(&["A", "B"]));
        ctl.advance(Container::Private);
        ctl.prepend(Container::Private, videos(&["N"]).remove(0));
        let feed = ctl.feed(Container::Private).unwrap();
        assert_eq!(feed.current().map(|v| v.id()), Some("N"));
        assert_eq!(feed.playback_of("N"), Some(Playback::Playing));
        assert_eq!(feed.playback_of("B"), Some(Playback::Idle));
    }

    #[test]
    fn removing_container_stops_playback() {
        let mut ctl = controller();
        ctl.initialize(Container::Popular, numbered(3));
        ctl.remove_container(Container::Popular);
        assert!(ctl.feed(Container::Popular).is_none());
        assert!(ctl.stage().playing.is_empty());
        assert!(ctl.stage().mounted.is_empty());
    }

    /// One player for the whole application, like the mpv stage.
    #[derive(Default)]
    struct SingleProcessStage {
        now: Option<(Container, String)>,
    }

    impl SingleProcessStage {
        fn now_playing(&self) -> Option<(Container, &str)> {
            self.now.as_ref().map(|(c, id)| (*c, id.as_str()))
        }

        fn owns(&self, container: Container, video_id: &str) -> bool {
            self.now_playing() == Some((container, video_id))
        }
    }

    impl Stage for SingleProcessStage {
        fn mount(&mut self, _container: Container, _video: &VideoRecord, _autoplay: bool) {}

        fn unmount(&mut self, container: Container, video_id: &str) {
            if self.owns(container, video_id) {
                self.now = None;
            }
        }

        fn play(
            &mut self,
            container: Container,
            video: &VideoRecord,
            _muted: bool,
            _trigger: Trigger,
        ) -> Result<(), PlaybackError> {
            self.now = Some((container, video.id().to_string()));
            Ok(())
        }

        fn stop(&mut self, container: Container, video_id: &str) {
            if self.owns(container, video_id) {
                self.now = None;
            }
        }

        fn set_muted(&mut self, _container: Container, _video_id: &str, _muted: bool) {}
    }

    fn playing_slots<S: Stage>(ctl: &FeedController<S>) -> usize {
        Container::ALL
            .iter()
            .filter_map(|c| ctl.feed(*c))
            .flat_map(|feed| feed.slots())
            .filter(|slot| slot.playback == Playback::Playing)
            .count()
    }

    #[test]
    fn background_load_does_not_take_over_the_player() {
        let mut ctl = FeedController::new(SingleProcessStage::default(), Duration::ZERO);
        ctl.activate(Container::Popular);
        ctl.initialize(Container::Popular, videos(&["A"]));
        ctl.initialize(Container::Private, videos(&["P"]));

        assert_eq!(ctl.stage().now_playing(), Some((Container::Popular, "A")));
        assert_eq!(
            ctl.feed(Container::Private).unwrap().playback_of("P"),
            Some(Playback::Idle)
        );

        ctl.activate(Container::Private);
        assert_eq!(ctl.stage().now_playing(), Some((Container::Private, "P")));
        assert_eq!(
            ctl.feed(Container::Popular).unwrap().playback_of("A"),
            Some(Playback::Idle)
        );

        ctl.activate(Container::Popular);
        assert_eq!(ctl.stage().now_playing(), Some((Container::Popular, "A")));
        assert_eq!(playing_slots(&ctl), 1);
    }

    #[test]
    fn playing_in_one_container_idles_the_others() {
        let mut ctl = FeedController::new(SingleProcessStage::default(), Duration::ZERO);
        ctl.initialize(Container::Popular, videos(&["A"]));
        ctl.initialize(Container::Private, videos(&["P"]));
        assert_eq!(ctl.stage().now_playing(), Some((Container::Private, "P")));
        assert_eq!(
            ctl.feed(Container::Popular).unwrap().playback_of("A"),
            Some(Playback::Idle)
        );

        ctl.play_current(Container::Popular).unwrap();
        assert_eq!(ctl.stage().now_playing(), Some((Container::Popular, "A")));
        assert_eq!(
            ctl.feed(Container::Private).unwrap().playback_of("P"),
            Some(Playback::Idle)
        );
        assert_eq!(playing_slots(&ctl), 1);
    }

    #[test]
    fn duplicate_ids_keep_a_single_playing_slot() {
        let mut ctl = controller();
        ctl.initialize(Container::Popular, videos(&["X", "X", "Y"]));
        let ids: Vec<_> = ctl
            .feed(Container::Popular)
            .unwrap()
            .items()
            .iter()
            .map(|v| v.id().to_string())
            .collect();
        assert_eq!(ids, vec!["X", "Y"]);

        ctl.advance(Container::Popular);
        assert_eq!(
            ctl.feed(Container::Popular).unwrap().current().map(|v| v.id()),
            Some("Y")
        );
        assert_eq!(playing_slots(&ctl), 1);
        assert_eq!(ctl.stage().max_playing, 1);
    }

    #[test]
    fn prepend_keeps_vote_of_replaced_record() {
        let mut ctl = controller();
        ctl.initialize(Container::Popular, videos(&["A", "B"]));
        ctl.vote_up("A", Container::Popular);
        ctl.prepend(Container::Popular, videos(&["A"]).remove(0));

        let feed = ctl.feed(Container::Popular).unwrap();
        assert_eq!(feed.len(), 2);
        assert_eq!(feed.vote_state("A"), VoteState::Up);
        assert_eq!(feed.items()[0].upvotes(), 1);
        assert_eq!(ctl.vote_up("A", Container::Popular), Some(VoteState::None));
        assert_eq!(ctl.feed(Container::Popular).unwrap().items()[0].upvotes(), 0);
    }

    #[test]
    fn containers_parse_from_names() {
        assert_eq!("popular".parse::<Container>(), Ok(Container::Popular));
        assert_eq!(" Private ".parse::<Container>(), Ok(Container::Private));
        assert!("trending".parse::<Container>().is_err());
        assert_eq!(Container::Private.surface_key(), "video-items-private");
    }
}
