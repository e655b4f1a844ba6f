use serde::{Deserialize, Serialize};

/// The current user's single active reaction to a video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteState {
    #[default]
    None,
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Press {
    Up,
    Down,
}

/// Outcome of one press: the next state and the counter deltas it implies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub next: VoteState,
    pub up_delta: i64,
    pub down_delta: i64,
}

impl Transition {
    const fn new(next: VoteState, up_delta: i64, down_delta: i64) -> Self {
        Self {
            next,
            up_delta,
            down_delta,
        }
    }
}

/// Full transition table for the vote widget. Counters are only ever moved
/// through the deltas returned here.
pub const fn transition(state: VoteState, press: Press) -> Transition {
    match (state, press) {
        (VoteState::None, Press::Up) => Transition::new(VoteState::Up, 1, 0),
        (VoteState::None, Press::Down) => Transition::new(VoteState::Down, 0, 1),
        (VoteState::Up, Press::Up) => Transition::new(VoteState::None, -1, 0),
        (VoteState::Up, Press::Down) => Transition::new(VoteState::Down, -1, 1),
        (VoteState::Down, Press::Up) => Transition::new(VoteState::Up, 1, -1),
        (VoteState::Down, Press::Down) => Transition::new(VoteState::None, 0, -1),
    }
}

impl VoteState {
    pub fn marker(self) -> &'static str {
        match self {
            VoteState::Up => "▲",
            VoteState::Down => "▼",
            VoteState::None => "·",
        }
    }

    pub fn is_none(self) -> bool {
        matches!(self, VoteState::None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATES: [VoteState; 3] = [VoteState::None, VoteState::Up, VoteState::Down];

    fn counters_for(state: VoteState) -> (i64, i64) {
        match state {
            VoteState::None => (0, 0),
            VoteState::Up => (1, 0),
            VoteState::Down => (0, 1),
        }
    }

    #[test]
    fn deltas_match_state_counters() {
        for state in STATES {
            for press in [Press::Up, Press::Down] {
                let t = transition(state, press);
                let (up_before, down_before) = counters_for(state);
                let (up_after, down_after) = counters_for(t.next);
                assert_eq!(up_after - up_before, t.up_delta, "{state:?} {press:?}");
                assert_eq!(down_after - down_before, t.down_delta, "{state:?} {press:?}");
            }
        }
    }

    #[test]
    fn same_press_twice_reverts() {
        for press in [Press::Up, Press::Down] {
            let first = transition(VoteState::None, press);
            let second = transition(first.next, press);
            assert_eq!(second.next, VoteState::None);
            assert_eq!(first.up_delta + second.up_delta, 0);
            assert_eq!(first.down_delta + second.down_delta, 0);
        }
    }

    #[test]
    fn long_sequence_never_drifts() {
        let presses = [
            Press::Up,
            Press::Down,
            Press::Down,
            Press::Up,
            Press::Up,
            Press::Down,
            Press::Up,
            Press::Up,
            Press::Down,
        ];
        let mut state = VoteState::None;
        let (mut up, mut down) = (0i64, 0i64);
        for press in presses {
            let t = transition(state, press);
            state = t.next;
            up += t.up_delta;
            down += t.down_delta;
            assert!((0..=1).contains(&up));
            assert!((0..=1).contains(&down));
            assert!(up + down <= 1, "both directions active at once");
        }
        assert_eq!((up, down), counters_for(state));
    }
}
