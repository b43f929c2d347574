//! Refresh state machine
//!
//! Pure state machine: receives events, returns (new_state, action).
//! The coordinator executes the I/O implied by each action. All transitions
//! happen under the coordinator's lock, so checking for an in-flight refresh
//! and joining its queue is a single step.

use std::collections::VecDeque;

use tokio::sync::oneshot;
use transport::{ApiRequest, ApiResponse};

use crate::error::Result;

/// A request that failed with an expired credential and waits for a new one.
///
/// `settle` is consumed when the request is replayed or rejected, so each
/// waiter is resolved at most once.
#[derive(Debug)]
pub struct PendingRequest {
    pub request: ApiRequest,
    pub settle: oneshot::Sender<Result<ApiResponse>>,
}

impl PendingRequest {
    /// Whether the caller stopped waiting (dropped its future).
    pub fn is_withdrawn(&self) -> bool {
        self.settle.is_closed()
    }
}

#[derive(Debug)]
pub enum RefreshState {
    /// No refresh in flight. `generation` is the last one issued.
    Idle { generation: u64 },
    /// One refresh call in flight; everything that expired since waits here
    /// in arrival order.
    Refreshing {
        generation: u64,
        queue: VecDeque<PendingRequest>,
    },
}

impl Default for RefreshState {
    fn default() -> Self {
        RefreshState::Idle { generation: 0 }
    }
}

impl RefreshState {
    pub fn generation(&self) -> u64 {
        match self {
            RefreshState::Idle { generation } | RefreshState::Refreshing { generation, .. } => {
                *generation
            }
        }
    }

    pub fn is_refreshing(&self) -> bool {
        matches!(self, RefreshState::Refreshing { .. })
    }

    /// Whether the refresh for `generation` is the one in flight.
    pub fn is_current(&self, generation: u64) -> bool {
        matches!(self, RefreshState::Refreshing { generation: g, .. } if *g == generation)
    }

    pub fn queued(&self) -> usize {
        match self {
            RefreshState::Idle { .. } => 0,
            RefreshState::Refreshing { queue, .. } => queue.len(),
        }
    }
}

#[derive(Debug)]
pub enum RefreshEvent {
    /// A first-attempt request came back 401.
    Expired {
        pending: PendingRequest,
        /// A refresh credential is stored
        refreshable: bool,
        /// The store already holds a different access credential than the one
        /// the request was sent with (a refresh or login finished meanwhile)
        superseded: bool,
    },
    /// The refresh for `generation` produced new credentials and they were
    /// stored.
    RefreshSucceeded { generation: u64 },
    /// The refresh for `generation` failed or timed out.
    RefreshFailed { generation: u64 },
    /// The session is being torn down (logout, or a new login replaced it).
    Terminated,
}

/// What the coordinator must do after a transition.
#[derive(Debug)]
pub enum RefreshAction {
    /// Issue the refresh call for this generation
    StartRefresh { generation: u64 },
    /// Request joined an in-flight refresh; nothing to do
    Queued,
    /// Replay these requests in order with the current credential
    Replay(VecDeque<PendingRequest>),
    /// Reject these requests and end the session
    Terminate(VecDeque<PendingRequest>),
    /// A refresh completed for a generation that is no longer current
    Discard,
}

/// Handle a state transition. Pure function: no I/O.
pub fn handle_event(state: RefreshState, event: RefreshEvent) -> (RefreshState, RefreshAction) {
    match (state, event) {
        // --- Idle ---
        (
            RefreshState::Idle { generation },
            RefreshEvent::Expired {
                pending,
                superseded: true,
                ..
            },
        ) => (
            RefreshState::Idle { generation },
            RefreshAction::Replay(VecDeque::from([pending])),
        ),

        (
            RefreshState::Idle { generation },
            RefreshEvent::Expired {
                pending,
                refreshable: true,
                ..
            },
        ) => {
            let generation = generation + 1;
            (
                RefreshState::Refreshing {
                    generation,
                    queue: VecDeque::from([pending]),
                },
                RefreshAction::StartRefresh { generation },
            )
        }

        (
            RefreshState::Idle { generation },
            RefreshEvent::Expired {
                pending,
                refreshable: false,
                ..
            },
        ) => (
            RefreshState::Idle { generation },
            RefreshAction::Terminate(VecDeque::from([pending])),
        ),

        (RefreshState::Idle { generation }, RefreshEvent::Terminated) => (
            RefreshState::Idle { generation },
            RefreshAction::Terminate(VecDeque::new()),
        ),

        // --- Refreshing ---
        (
            RefreshState::Refreshing {
                generation,
                mut queue,
            },
            RefreshEvent::Expired { pending, .. },
        ) => {
            queue.push_back(pending);
            (
                RefreshState::Refreshing { generation, queue },
                RefreshAction::Queued,
            )
        }

        (
            RefreshState::Refreshing { generation, queue },
            RefreshEvent::RefreshSucceeded { generation: done },
        ) if done == generation => (RefreshState::Idle { generation }, RefreshAction::Replay(queue)),

        (
            RefreshState::Refreshing { generation, queue },
            RefreshEvent::RefreshFailed { generation: done },
        ) if done == generation => (
            RefreshState::Idle { generation },
            RefreshAction::Terminate(queue),
        ),

        (RefreshState::Refreshing { generation, queue }, RefreshEvent::Terminated) => (
            RefreshState::Idle { generation },
            RefreshAction::Terminate(queue),
        ),

        // --- Stale completions ---
        (
            state,
            RefreshEvent::RefreshSucceeded { .. } | RefreshEvent::RefreshFailed { .. },
        ) => (state, RefreshAction::Discard),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending(path: &str) -> (PendingRequest, oneshot::Receiver<Result<ApiResponse>>) {
        let (settle, rx) = oneshot::channel();
        (
            PendingRequest {
                request: ApiRequest::get(path),
                settle,
            },
            rx,
        )
    }

    fn paths(queue: &VecDeque<PendingRequest>) -> Vec<&str> {
        queue.iter().map(|p| p.request.path()).collect()
    }

    #[test]
    fn idle_expired_with_refresh_credential_starts_refresh() {
        let (p, _rx) = pending("/a");
        let (state, action) = handle_event(
            RefreshState::default(),
            RefreshEvent::Expired {
                pending: p,
                refreshable: true,
                superseded: false,
            },
        );
        assert!(matches!(action, RefreshAction::StartRefresh { generation: 1 }));
        assert!(state.is_refreshing());
        assert_eq!(state.queued(), 1);
    }

    #[test]
    fn idle_expired_without_refresh_credential_terminates() {
        let (p, _rx) = pending("/a");
        let (state, action) = handle_event(
            RefreshState::default(),
            RefreshEvent::Expired {
                pending: p,
                refreshable: false,
                superseded: false,
            },
        );
        assert!(!state.is_refreshing());
        match action {
            RefreshAction::Terminate(queue) => assert_eq!(paths(&queue), ["/a"]),
            other => panic!("unexpected action: {other:?}"),
        }
    }

    #[test]
    fn expired_during_refresh_joins_queue_in_order() {
        let (a, _ra) = pending("/a");
        let (b, _rb) = pending("/b");
        let (c, _rc) = pending("/c");
        let (state, _) = handle_event(
            RefreshState::default(),
            RefreshEvent::Expired {
                pending: a,
                refreshable: true,
                superseded: false,
            },
        );
        let (state, action) = handle_event(
            state,
            RefreshEvent::Expired {
                pending: b,
                refreshable: true,
                superseded: false,
            },
        );
        assert!(matches!(action, RefreshAction::Queued));
        // refreshable is irrelevant once a refresh is in flight
        let (state, action) = handle_event(
            state,
            RefreshEvent::Expired {
                pending: c,
                refreshable: false,
                superseded: false,
            },
        );
        assert!(matches!(action, RefreshAction::Queued));

        let (state, action) = handle_event(state, RefreshEvent::RefreshSucceeded { generation: 1 });
        assert!(!state.is_refreshing());
        match action {
            RefreshAction::Replay(queue) => assert_eq!(paths(&queue), ["/a", "/b", "/c"]),
            other => panic!("unexpected action: {other:?}"),
        }
    }

    #[test]
    fn late_401_after_refresh_replays_without_new_refresh() {
        let (p, _rx) = pending("/slow");
        let (state, action) = handle_event(
            RefreshState::Idle { generation: 3 },
            RefreshEvent::Expired {
                pending: p,
                refreshable: true,
                superseded: true,
            },
        );
        assert_eq!(state.generation(), 3);
        assert!(!state.is_refreshing());
        match action {
            RefreshAction::Replay(queue) => assert_eq!(paths(&queue), ["/slow"]),
            other => panic!("unexpected action: {other:?}"),
        }
    }

    #[test]
    fn superseded_request_still_queues_behind_running_refresh() {
        let (a, _ra) = pending("/a");
        let state = RefreshState::Refreshing {
            generation: 1,
            queue: VecDeque::from([a]),
        };
        let (b, _rb) = pending("/b");
        let (state, action) = handle_event(
            state,
            RefreshEvent::Expired {
                pending: b,
                refreshable: true,
                superseded: true,
            },
        );
        assert!(matches!(action, RefreshAction::Queued));
        assert_eq!(state.queued(), 2);
    }

    #[test]
    fn refresh_failure_terminates_with_queue() {
        let (a, _ra) = pending("/a");
        let (b, _rb) = pending("/b");
        let state = RefreshState::Refreshing {
            generation: 4,
            queue: VecDeque::from([a, b]),
        };
        let (state, action) = handle_event(state, RefreshEvent::RefreshFailed { generation: 4 });
        assert_eq!(state.generation(), 4);
        match action {
            RefreshAction::Terminate(queue) => assert_eq!(paths(&queue), ["/a", "/b"]),
            other => panic!("unexpected action: {other:?}"),
        }
    }

    #[test]
    fn completion_after_termination_is_discarded() {
        let (a, _ra) = pending("/a");
        let state = RefreshState::Refreshing {
            generation: 2,
            queue: VecDeque::from([a]),
        };
        let (state, action) = handle_event(state, RefreshEvent::Terminated);
        assert!(matches!(action, RefreshAction::Terminate(ref q) if q.len() == 1));

        let (state, action) = handle_event(state, RefreshEvent::RefreshSucceeded { generation: 2 });
        assert!(matches!(action, RefreshAction::Discard));
        assert!(!state.is_refreshing());
    }

    #[test]
    fn completion_for_older_generation_is_discarded() {
        let state = RefreshState::Refreshing {
            generation: 3,
            queue: VecDeque::new(),
        };
        let (state, action) = handle_event(state, RefreshEvent::RefreshFailed { generation: 2 });
        assert!(matches!(action, RefreshAction::Discard));
        assert!(state.is_current(3));
        assert!(!state.is_current(2));
    }

    #[test]
    fn generations_increase_across_refreshes() {
        let (a, _ra) = pending("/a");
        let (state, _) = handle_event(
            RefreshState::Idle { generation: 7 },
            RefreshEvent::Expired {
                pending: a,
                refreshable: true,
                superseded: false,
            },
        );
        assert_eq!(state.generation(), 8);
    }

    #[test]
    fn terminate_when_idle_is_a_noop_transition() {
        let (state, action) = handle_event(RefreshState::Idle { generation: 5 }, RefreshEvent::Terminated);
        assert_eq!(state.generation(), 5);
        assert!(matches!(action, RefreshAction::Terminate(ref q) if q.is_empty()));
    }
}
