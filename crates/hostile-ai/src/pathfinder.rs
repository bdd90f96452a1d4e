//! Reposition pathfinder.
//!
//! Grid A* with an octile heuristic, run on background workers. Each agent
//! owns a [`PathMailbox`]: issuing a request bumps its generation and cancels
//! whatever was in flight, and a worker may only deliver a result stamped
//! with the current generation. The tick loop polls the mailbox without
//! blocking.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use ahash::AHashMap;
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, warn};

use hostile_common::{CellCoord, Position, UnitId};

use crate::config::AiTuning;
use crate::world::ZoneQuery;

/// Integer cost of a straight step.
const STRAIGHT_COST: u32 = 1000;

/// Expansions between two cancellation checks.
const CANCEL_POLL_INTERVAL: usize = 32;

// ============================================================================
// Search
// ============================================================================

/// Cooperative cancellation flag shared with a running search.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Creates a live token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Asks the search to stop.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Returns whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Circle a search may not leave.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchArea {
    /// Circle center
    pub center: Position,
    /// Circle radius
    pub radius: f32,
}

impl SearchArea {
    fn contains(&self, cell: CellCoord) -> bool {
        cell.center().distance(self.center) <= self.radius
    }
}

/// What the search is looking for.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SearchGoal {
    /// Any cell within `tolerance` of `target`
    Near {
        /// Destination
        target: Position,
        /// Accepted distance
        tolerance: f32,
    },
    /// The first cell within `optimal_range` of `hostile` with a clear shot
    FiringPosition {
        /// Hostile position
        hostile: Position,
        /// Required range
        optimal_range: f32,
        /// Shot type used for the line-of-sight check
        ballistic: bool,
    },
}

/// One search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PathRequest {
    /// Start position
    pub start: Position,
    /// Goal
    pub goal: SearchGoal,
    /// Bounding circle, `None` for unbounded
    pub area: Option<SearchArea>,
    /// Steepest walkable slope
    pub max_slope: f32,
    /// Skip walkability checks entirely
    pub ignore_terrain: bool,
}

impl PathRequest {
    /// The same request with terrain and area restrictions lifted.
    #[must_use]
    pub fn unconstrained(mut self) -> Self {
        self.area = None;
        self.ignore_terrain = true;
        self
    }
}

/// Search budget.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchLimits {
    /// Node expansion cap
    pub max_expansions: usize,
    /// Diagonal step cost relative to a straight one
    pub diagonal_cost: f32,
}

impl SearchLimits {
    /// Limits taken from tuning.
    #[must_use]
    pub fn from_tuning(tuning: &AiTuning) -> Self {
        Self {
            max_expansions: tuning.path_max_expansions,
            diagonal_cost: tuning.path_diagonal_cost,
        }
    }
}

/// Waypoints to follow, in order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Path {
    waypoints: VecDeque<Position>,
}

impl Path {
    /// Creates a path from waypoints.
    #[must_use]
    pub fn new(waypoints: impl IntoIterator<Item = Position>) -> Self {
        Self {
            waypoints: waypoints.into_iter().collect(),
        }
    }

    /// Remaining waypoint count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.waypoints.len()
    }

    /// Returns whether the path is finished.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.waypoints.is_empty()
    }

    /// Last waypoint.
    #[must_use]
    pub fn destination(&self) -> Option<Position> {
        self.waypoints.back().copied()
    }

    /// Remaining waypoints.
    pub fn waypoints(&self) -> impl Iterator<Item = &Position> {
        self.waypoints.iter()
    }

    /// Moves `from` along the path by at most `distance`, consuming reached
    /// waypoints, and returns the new position.
    pub fn advance(&mut self, mut from: Position, mut distance: f32) -> Position {
        while let Some(next) = self.waypoints.front().copied() {
            let gap = from.distance(next);
            if gap <= distance {
                from = next;
                distance -= gap;
                self.waypoints.pop_front();
                continue;
            }
            return from.step_towards(next, distance);
        }
        from
    }
}

/// Result of one search.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchOutcome {
    /// A goal cell was reached
    Found(Path),
    /// The area or budget was exhausted
    NotFound,
    /// The token was cancelled mid-search
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct OpenNode {
    f: Reverse<u32>,
    g: Reverse<u32>,
    cell: CellCoord,
}

/// Runs one A* search against `zone`.
pub fn find_path(
    zone: &dyn ZoneQuery,
    request: &PathRequest,
    limits: &SearchLimits,
    cancel: &CancelToken,
) -> SearchOutcome {
    if cancel.is_cancelled() {
        return SearchOutcome::Cancelled;
    }

    let diagonal = (limits.diagonal_cost.max(1.0) * STRAIGHT_COST as f32) as u32;
    let start = request.start.cell();
    let target_cell = match request.goal {
        SearchGoal::Near { target, .. } => target.cell(),
        SearchGoal::FiringPosition { hostile, .. } => hostile.cell(),
    };

    let heuristic = |cell: CellCoord| -> u32 {
        let cells = cell.octile_distance(target_cell, limits.diagonal_cost.max(1.0));
        let cells = match request.goal {
            SearchGoal::Near { .. } => cells,
            SearchGoal::FiringPosition { optimal_range, .. } => (cells - optimal_range).max(0.0),
        };
        (cells * STRAIGHT_COST as f32) as u32
    };

    let is_goal = |cell: CellCoord| -> bool {
        let center = cell.center();
        match request.goal {
            SearchGoal::Near { target, tolerance } => {
                cell == target_cell || center.distance(target) <= tolerance
            },
            SearchGoal::FiringPosition {
                hostile,
                optimal_range,
                ballistic,
            } => {
                center.distance(hostile) <= optimal_range
                    && zone.line_of_sight(center, hostile, ballistic).is_clear()
            },
        }
    };

    let passable = |cell: CellCoord| -> bool {
        if request.area.is_some_and(|area| !area.contains(cell)) {
            return false;
        }
        request.ignore_terrain || zone.is_walkable(cell.x, cell.y, request.max_slope)
    };

    let mut open = BinaryHeap::new();
    let mut g_scores: AHashMap<CellCoord, u32> = AHashMap::new();
    let mut came_from: AHashMap<CellCoord, CellCoord> = AHashMap::new();

    g_scores.insert(start, 0);
    open.push(OpenNode {
        f: Reverse(heuristic(start)),
        g: Reverse(0),
        cell: start,
    });

    let mut expansions = 0usize;
    while let Some(OpenNode {
        g: Reverse(g_cost),
        cell,
        ..
    }) = open.pop()
    {
        if g_scores.get(&cell).is_some_and(|best| g_cost > *best) {
            continue;
        }
        if is_goal(cell) {
            return SearchOutcome::Found(build_path(request, start, cell, &came_from));
        }

        expansions += 1;
        if expansions > limits.max_expansions {
            break;
        }
        if expansions % CANCEL_POLL_INTERVAL == 0 && cancel.is_cancelled() {
            return SearchOutcome::Cancelled;
        }

        for (next, is_diagonal) in cell.neighbors8() {
            if !passable(next) {
                continue;
            }
            if is_diagonal && !request.ignore_terrain {
                // No corner cutting past blocked orthogonals
                let side_a = CellCoord::new(next.x, cell.y);
                let side_b = CellCoord::new(cell.x, next.y);
                if !passable(side_a) || !passable(side_b) {
                    continue;
                }
            }
            let step = if is_diagonal { diagonal } else { STRAIGHT_COST };
            let tentative = g_cost.saturating_add(step);
            if g_scores.get(&next).is_some_and(|known| tentative >= *known) {
                continue;
            }
            g_scores.insert(next, tentative);
            came_from.insert(next, cell);
            open.push(OpenNode {
                f: Reverse(tentative.saturating_add(heuristic(next))),
                g: Reverse(tentative),
                cell: next,
            });
        }
    }

    SearchOutcome::NotFound
}

fn build_path(
    request: &PathRequest,
    start: CellCoord,
    goal: CellCoord,
    came_from: &AHashMap<CellCoord, CellCoord>,
) -> Path {
    let mut cells = vec![goal];
    let mut current = goal;
    while current != start {
        match came_from.get(&current) {
            Some(prev) => {
                current = *prev;
                if current != start {
                    cells.push(current);
                }
            },
            None => break,
        }
    }
    cells.reverse();

    let mut waypoints: Vec<Position> = cells.into_iter().map(CellCoord::center).collect();
    if let SearchGoal::Near { target, .. } = request.goal {
        if waypoints.last().map_or(true, |last| last.distance(target) > 0.01) {
            waypoints.push(target);
        }
    }
    Path::new(waypoints)
}

// ============================================================================
// Mailbox
// ============================================================================

/// Why an agent asked for a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathPurpose {
    /// Idle wandering
    Roam,
    /// Returning home
    Homing,
    /// Seeking a firing position against a hostile
    FiringPosition {
        /// Hostile being engaged
        hostile: UnitId,
    },
}

/// Final outcome of a planned request after every attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum PathOutcome {
    /// Path to follow
    Found(Path),
    /// Every attempt failed
    Failed,
}

/// Result waiting in a mailbox.
#[derive(Debug, Clone, PartialEq)]
pub struct PathResult {
    /// Request generation
    pub generation: u64,
    /// Purpose of the request
    pub purpose: PathPurpose,
    /// Outcome
    pub outcome: PathOutcome,
}

/// Handle for one issued request.
#[derive(Debug, Clone)]
pub struct PathTicket {
    /// Generation stamped on the request
    pub generation: u64,
    /// Token cancelled when the request is superseded
    pub cancel: CancelToken,
}

/// Single-slot, latest-wins exchange between an agent and the workers.
#[derive(Debug, Default)]
pub struct PathMailbox {
    generation: AtomicU64,
    in_flight: Mutex<Option<(u64, CancelToken)>>,
    result: Mutex<Option<PathResult>>,
}

impl PathMailbox {
    /// Creates an empty mailbox.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current generation.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Starts a new request, cancelling and superseding the previous one.
    pub fn begin(&self) -> PathTicket {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let cancel = CancelToken::new();
        if let Some((_, old)) = self.in_flight.lock().replace((generation, cancel.clone())) {
            old.cancel();
        }
        self.result.lock().take();
        PathTicket { generation, cancel }
    }

    /// Stores a result if it belongs to the current generation.
    ///
    /// Returns `false` when the result was superseded and dropped.
    pub fn deliver(&self, result: PathResult) -> bool {
        let mut slot = self.result.lock();
        if result.generation != self.generation() {
            return false;
        }
        let generation = result.generation;
        *slot = Some(result);
        drop(slot);
        let mut in_flight = self.in_flight.lock();
        if in_flight.as_ref().is_some_and(|(g, _)| *g == generation) {
            in_flight.take();
        }
        true
    }

    /// Takes the pending result, if any.
    pub fn take(&self) -> Option<PathResult> {
        self.result.lock().take()
    }

    /// Returns whether a request is still being searched.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.in_flight.lock().is_some()
    }

    /// Cancels in-flight work and discards any unread result.
    pub fn cancel_all(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        if let Some((_, token)) = self.in_flight.lock().take() {
            token.cancel();
        }
        self.result.lock().take();
    }
}

// ============================================================================
// Service
// ============================================================================

struct PathJob {
    ticket: PathTicket,
    purpose: PathPurpose,
    attempts: Vec<PathRequest>,
    mailbox: Arc<PathMailbox>,
}

/// Pathfinding service backed by worker threads.
///
/// With zero workers, requests are solved inline on the caller's thread and
/// the result is still delivered through the mailbox.
pub struct Pathfinder {
    zone: Arc<dyn ZoneQuery>,
    limits: SearchLimits,
    jobs: Option<Sender<PathJob>>,
    workers: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for Pathfinder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pathfinder")
            .field("limits", &self.limits)
            .field("workers", &self.workers.len())
            .finish_non_exhaustive()
    }
}

impl Pathfinder {
    /// Starts the service with `tuning.path_workers` threads.
    pub fn new(zone: Arc<dyn ZoneQuery>, tuning: &AiTuning) -> Self {
        let limits = SearchLimits::from_tuning(tuning);
        let mut pathfinder = Self {
            zone,
            limits,
            jobs: None,
            workers: Vec::new(),
        };
        if tuning.path_workers == 0 {
            return pathfinder;
        }

        let (sender, receiver) = unbounded::<PathJob>();
        for index in 0..tuning.path_workers {
            let zone = Arc::clone(&pathfinder.zone);
            let receiver: Receiver<PathJob> = receiver.clone();
            let spawned = std::thread::Builder::new()
                .name(format!("hostile-path-{index}"))
                .spawn(move || {
                    for job in &receiver {
                        run_job(zone.as_ref(), &limits, job);
                    }
                });
            match spawned {
                Ok(handle) => pathfinder.workers.push(handle),
                Err(e) => warn!("Failed to spawn path worker {index}: {e}"),
            }
        }
        if pathfinder.workers.is_empty() {
            warn!("No path workers running, solving paths inline");
        } else {
            pathfinder.jobs = Some(sender);
        }
        pathfinder
    }

    /// Number of background workers.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Issues a request for `mailbox`, superseding whatever it had in flight.
    ///
    /// `attempts` are tried in order until one succeeds. Returns the
    /// generation the result will carry.
    pub fn submit(
        &self,
        mailbox: &Arc<PathMailbox>,
        purpose: PathPurpose,
        attempts: Vec<PathRequest>,
    ) -> u64 {
        let ticket = mailbox.begin();
        let generation = ticket.generation;
        let job = PathJob {
            ticket,
            purpose,
            attempts,
            mailbox: Arc::clone(mailbox),
        };

        match &self.jobs {
            Some(jobs) => {
                if let Err(e) = jobs.send(job) {
                    run_job(self.zone.as_ref(), &self.limits, e.into_inner());
                }
            },
            None => run_job(self.zone.as_ref(), &self.limits, job),
        }
        generation
    }
}

impl Drop for Pathfinder {
    fn drop(&mut self) {
        self.jobs.take();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                warn!("Path worker panicked");
            }
        }
    }
}

fn run_job(zone: &dyn ZoneQuery, limits: &SearchLimits, job: PathJob) {
    let PathJob {
        ticket,
        purpose,
        attempts,
        mailbox,
    } = job;

    let mut outcome = PathOutcome::Failed;
    for (index, request) in attempts.iter().enumerate() {
        match find_path(zone, request, limits, &ticket.cancel) {
            SearchOutcome::Found(path) => {
                if index > 0 {
                    debug!("{purpose:?} path found by fallback attempt {index}");
                }
                outcome = PathOutcome::Found(path);
                break;
            },
            SearchOutcome::NotFound => {},
            SearchOutcome::Cancelled => {
                debug!("{purpose:?} search {} cancelled", ticket.generation);
                return;
            },
        }
    }

    let delivered = mailbox.deliver(PathResult {
        generation: ticket.generation,
        purpose,
        outcome,
    });
    if !delivered {
        debug!("{purpose:?} result {} superseded", ticket.generation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid_zone::GridZone;
    use std::time::{Duration, Instant};

    fn limits() -> SearchLimits {
        SearchLimits::from_tuning(&AiTuning::default())
    }

    fn near(start: Position, target: Position) -> PathRequest {
        PathRequest {
            start,
            goal: SearchGoal::Near {
                target,
                tolerance: 0.75,
            },
            area: None,
            max_slope: 45.0,
            ignore_terrain: false,
        }
    }

    #[test]
    fn test_open_field_path() {
        let zone = GridZone::new(20, 20);
        let request = near(Position::new(1.5, 1.5), Position::new(8.5, 1.5));
        let SearchOutcome::Found(path) = find_path(&zone, &request, &limits(), &CancelToken::new())
        else {
            panic!("expected a path");
        };
        assert_eq!(path.destination(), Some(Position::new(8.5, 1.5)));
        assert!(path.len() >= 7);
    }

    #[test]
    fn test_path_goes_around_wall() {
        let zone = GridZone::new(20, 20);
        zone.wall_column(5, 0, 15).expect("in bounds");
        let request = near(Position::new(2.5, 2.5), Position::new(8.5, 2.5));

        let SearchOutcome::Found(path) = find_path(&zone, &request, &limits(), &CancelToken::new())
        else {
            panic!("expected a path");
        };
        assert!(path.waypoints().all(|p| p.cell().x != 5 || p.cell().y > 15));
        assert!(path.waypoints().any(|p| p.y > 15.0));
    }

    #[test]
    fn test_sealed_target_not_found_then_unconstrained() {
        let zone = GridZone::new(20, 20);
        zone.wall_column(5, 0, 19).expect("in bounds");
        let request = near(Position::new(2.5, 2.5), Position::new(8.5, 2.5));

        assert_eq!(
            find_path(&zone, &request, &limits(), &CancelToken::new()),
            SearchOutcome::NotFound
        );
        assert!(matches!(
            find_path(&zone, &request.unconstrained(), &limits(), &CancelToken::new()),
            SearchOutcome::Found(_)
        ));
    }

    #[test]
    fn test_area_bound_respected() {
        let zone = GridZone::new(40, 40);
        let mut request = near(Position::new(2.5, 2.5), Position::new(30.5, 2.5));
        request.area = Some(SearchArea {
            center: Position::new(2.5, 2.5),
            radius: 10.0,
        });
        assert_eq!(
            find_path(&zone, &request, &limits(), &CancelToken::new()),
            SearchOutcome::NotFound
        );
    }

    #[test]
    fn test_firing_position_stops_early_with_los() {
        let zone = GridZone::new(30, 30);
        zone.wall_row(10, 5, 15).expect("in bounds");
        let hostile = Position::new(10.5, 15.5);
        let request = PathRequest {
            start: Position::new(10.5, 5.5),
            goal: SearchGoal::FiringPosition {
                hostile,
                optimal_range: 8.0,
                ballistic: false,
            },
            area: None,
            max_slope: 45.0,
            ignore_terrain: false,
        };

        let SearchOutcome::Found(path) = find_path(&zone, &request, &limits(), &CancelToken::new())
        else {
            panic!("expected a firing position");
        };
        let spot = path.destination().expect("non-empty");
        assert!(spot.distance(hostile) <= 8.0);
        assert!(zone.line_of_sight(spot, hostile, false).is_clear());
    }

    #[test]
    fn test_cancelled_search() {
        let zone = GridZone::new(20, 20);
        let token = CancelToken::new();
        token.cancel();
        let request = near(Position::new(1.5, 1.5), Position::new(8.5, 1.5));
        assert_eq!(find_path(&zone, &request, &limits(), &token), SearchOutcome::Cancelled);
    }

    #[test]
    fn test_path_advance() {
        let mut path = Path::new([Position::new(1.0, 0.0), Position::new(2.0, 0.0)]);
        let pos = path.advance(Position::new(0.0, 0.0), 1.5);
        assert!((pos.x - 1.5).abs() < 1e-4);
        assert_eq!(path.len(), 1);
        let pos = path.advance(pos, 5.0);
        assert_eq!(pos, Position::new(2.0, 0.0));
        assert!(path.is_empty());
    }

    fn found(generation: u64, to: Position) -> PathResult {
        PathResult {
            generation,
            purpose: PathPurpose::Roam,
            outcome: PathOutcome::Found(Path::new([to])),
        }
    }

    #[test]
    fn test_mailbox_latest_wins() {
        let mailbox = PathMailbox::new();
        let r1 = mailbox.begin();
        let r2 = mailbox.begin();
        assert!(r1.cancel.is_cancelled());
        assert!(!r2.cancel.is_cancelled());

        assert!(mailbox.deliver(found(r2.generation, Position::new(2.0, 2.0))));
        assert!(!mailbox.deliver(found(r1.generation, Position::new(1.0, 1.0))));

        let result = mailbox.take().expect("r2 delivered");
        assert_eq!(result.generation, r2.generation);
        assert_eq!(
            result.outcome,
            PathOutcome::Found(Path::new([Position::new(2.0, 2.0)]))
        );
        assert!(mailbox.take().is_none());
    }

    #[test]
    fn test_mailbox_discards_unread_on_new_request() {
        let mailbox = PathMailbox::new();
        let r1 = mailbox.begin();
        assert!(mailbox.deliver(found(r1.generation, Position::new(1.0, 1.0))));
        let _r2 = mailbox.begin();
        assert!(mailbox.take().is_none());
        assert!(mailbox.is_pending());

        mailbox.cancel_all();
        assert!(!mailbox.is_pending());
    }

    #[test]
    fn test_worker_supersession() {
        let zone: Arc<dyn ZoneQuery> = Arc::new(GridZone::new(64, 64));
        let tuning = AiTuning {
            path_workers: 2,
            ..AiTuning::default()
        };
        let pathfinder = Pathfinder::new(zone, &tuning);
        let mailbox = Arc::new(PathMailbox::new());

        let p1 = Position::new(60.5, 60.5);
        let p2 = Position::new(4.5, 1.5);
        pathfinder.submit(
            &mailbox,
            PathPurpose::Roam,
            vec![near(Position::new(1.5, 1.5), p1)],
        );
        let g2 = pathfinder.submit(
            &mailbox,
            PathPurpose::Roam,
            vec![near(Position::new(1.5, 1.5), p2)],
        );

        let deadline = Instant::now() + Duration::from_secs(5);
        let result = loop {
            if let Some(result) = mailbox.take() {
                break result;
            }
            assert!(Instant::now() < deadline, "no path delivered");
            std::thread::sleep(Duration::from_millis(1));
        };
        assert_eq!(result.generation, g2);
        let PathOutcome::Found(path) = result.outcome else {
            panic!("expected a path");
        };
        assert_eq!(path.destination(), Some(p2));
    }

    #[test]
    fn test_inline_mode() {
        let zone: Arc<dyn ZoneQuery> = Arc::new(GridZone::new(16, 16));
        let tuning = AiTuning {
            path_workers: 0,
            ..AiTuning::default()
        };
        let pathfinder = Pathfinder::new(zone, &tuning);
        assert_eq!(pathfinder.worker_count(), 0);

        let mailbox = Arc::new(PathMailbox::new());
        pathfinder.submit(
            &mailbox,
            PathPurpose::Homing,
            vec![near(Position::new(1.5, 1.5), Position::new(3.5, 3.5))],
        );
        assert!(matches!(
            mailbox.take().map(|r| r.outcome),
            Some(PathOutcome::Found(_))
        ));
    }
}
