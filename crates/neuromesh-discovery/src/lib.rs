//! Neuromesh Discovery -- candidate store and peer discovery state machine.
//!
//! Pure logic, no sockets and no timers: the node drives it from a periodic
//! sweep task and feeds back connect outcomes, handshakes and disconnects.
//! One tick yields at most one connection attempt, which throttles outbound
//! connection storms regardless of how many candidates are queued.

use std::collections::{HashMap, HashSet, VecDeque};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

/// Cap on concurrent handshake-confirmed peers. No new attempts are made
/// once reached.
pub const DEFAULT_MAX_ACTIVE_PEERS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateState {
    Idle,
    Trying,
    Active,
    Failed,
}

impl CandidateState {
    pub fn name(&self) -> &'static str {
        match self {
            CandidateState::Idle => "idle",
            CandidateState::Trying => "trying",
            CandidateState::Active => "active",
            CandidateState::Failed => "failed",
        }
    }
}

/// A known peer endpoint. Candidates are never deleted, only re-queued with
/// updated state; failed ones become eligible again on later sweeps.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub endpoint: SocketAddr,
    pub node_id: Option<String>,
    pub state: CandidateState,
    pub consecutive_failures: u32,
    pub last_attempt: Option<Instant>,
}

impl Candidate {
    fn new(endpoint: SocketAddr, node_id: Option<String>) -> Self {
        Self {
            endpoint,
            node_id,
            state: CandidateState::Idle,
            consecutive_failures: 0,
            last_attempt: None,
        }
    }
}

/// A peer with a live, handshake-confirmed channel.
#[derive(Debug, Clone)]
pub struct ActivePeer {
    pub node_id: String,
    pub protocol_version: i32,
    pub session_id: String,
    pub connected_since: DateTime<Utc>,
    pub endpoint: SocketAddr,
}

/// Retry throttle for repeatedly failing candidates. Retries stay unbounded,
/// but a candidate that has failed `failure_threshold` times in a row is
/// only re-attempted after `failure_cooldown` has elapsed since its last
/// attempt.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub failure_threshold: u32,
    pub failure_cooldown: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            failure_cooldown: Duration::from_secs(300),
        }
    }
}

/// Candidate store plus active-peer registry.
///
/// Rotation order: `tick` pops the front candidate and pushes it back, so
/// repeated sweeps cycle through the whole store.
pub struct DiscoveryEngine {
    candidates: VecDeque<Candidate>,
    known_endpoints: HashSet<SocketAddr>,
    active: HashMap<String, ActivePeer>,
    max_active: usize,
    retry: RetryPolicy,
}

impl DiscoveryEngine {
    pub fn new(max_active: usize, retry: RetryPolicy) -> Self {
        Self {
            candidates: VecDeque::new(),
            known_endpoints: HashSet::new(),
            active: HashMap::new(),
            max_active,
            retry,
        }
    }

    /// Whether the store needs seeding (DNS or static list).
    pub fn store_is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// Add endpoints as idle candidates. Endpoints already present are
    /// suppressed. Returns how many were actually added.
    pub fn add_candidates<I>(&mut self, endpoints: I) -> usize
    where
        I: IntoIterator<Item = (SocketAddr, Option<String>)>,
    {
        let mut added = 0;
        for (endpoint, node_id) in endpoints {
            if !self.known_endpoints.insert(endpoint) {
                continue;
            }
            self.candidates.push_back(Candidate::new(endpoint, node_id));
            added += 1;
        }
        added
    }

    /// One discovery sweep. Returns the endpoint to dial, if any; at most
    /// one per call, and none while the active-peer cap is met.
    pub fn tick(&mut self) -> Option<SocketAddr> {
        if self.active.len() >= self.max_active {
            return None;
        }

        let mut candidate = self.candidates.pop_front()?;
        let mut dial = None;
        if matches!(
            candidate.state,
            CandidateState::Idle | CandidateState::Failed
        ) && self.retry_allowed(&candidate)
        {
            candidate.state = CandidateState::Trying;
            candidate.last_attempt = Some(Instant::now());
            dial = Some(candidate.endpoint);
        }
        self.candidates.push_back(candidate);
        dial
    }

    fn retry_allowed(&self, candidate: &Candidate) -> bool {
        if candidate.consecutive_failures < self.retry.failure_threshold {
            return true;
        }
        candidate
            .last_attempt
            .is_none_or(|t| t.elapsed() >= self.retry.failure_cooldown)
    }

    /// Record a connect outcome for an endpoint. Failure marks the candidate
    /// failed and counts toward its cooldown threshold.
    pub fn on_connect_outcome(&mut self, endpoint: SocketAddr, success: bool) {
        if let Some(candidate) = self.candidate_mut(endpoint) {
            if success {
                tracing::debug!(%endpoint, "connect succeeded, awaiting handshake");
            } else if candidate.state != CandidateState::Failed {
                candidate.state = CandidateState::Failed;
                candidate.consecutive_failures += 1;
                tracing::debug!(
                    %endpoint,
                    failures = candidate.consecutive_failures,
                    "connect failed"
                );
            }
        }
    }

    /// Record a version-handshake response received over a channel: the
    /// candidate for that endpoint becomes active and the peer is tracked
    /// under its advertised node id.
    pub fn on_handshake(
        &mut self,
        endpoint: SocketAddr,
        session_id: &str,
        node_id: &str,
        protocol_version: i32,
    ) {
        if let Some(candidate) = self.candidate_mut(endpoint) {
            candidate.state = CandidateState::Active;
            candidate.node_id = Some(node_id.to_string());
            candidate.consecutive_failures = 0;
        }

        let peer = ActivePeer {
            node_id: node_id.to_string(),
            protocol_version,
            session_id: session_id.to_string(),
            connected_since: Utc::now(),
            endpoint,
        };
        if self.active.insert(node_id.to_string(), peer).is_none() {
            tracing::info!(
                node_id,
                %endpoint,
                active = self.active.len(),
                "peer active"
            );
        }
    }

    /// Record an observed disconnect. Active peers on that session are
    /// dropped and their candidates marked failed.
    pub fn on_session_closed(&mut self, session_id: &str) {
        let closed: Vec<ActivePeer> = {
            let ids: Vec<String> = self
                .active
                .values()
                .filter(|p| p.session_id == session_id)
                .map(|p| p.node_id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| self.active.remove(&id))
                .collect()
        };

        for peer in closed {
            tracing::info!(node_id = %peer.node_id, endpoint = %peer.endpoint, "peer lost");
            if let Some(candidate) = self.candidate_mut(peer.endpoint) {
                if candidate.state != CandidateState::Failed {
                    candidate.state = CandidateState::Failed;
                    candidate.consecutive_failures += 1;
                }
            }
        }
    }

    fn candidate_mut(&mut self, endpoint: SocketAddr) -> Option<&mut Candidate> {
        self.candidates
            .iter_mut()
            .find(|c| c.endpoint == endpoint)
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Snapshot of active peers for reporting collaborators.
    pub fn active_peers(&self) -> Vec<ActivePeer> {
        self.active.values().cloned().collect()
    }

    /// Snapshot of the candidate store for reporting collaborators.
    pub fn candidates(&self) -> Vec<Candidate> {
        self.candidates.iter().cloned().collect()
    }
}
