//! The admission queue: holds excess clients while the realm is over
//! its slot ceiling and keeps them informed of their position.
//!
//! Position updates run off a timer rather than on every change so a
//! long, fast-moving queue doesn't turn into a packet storm.

use std::{
    cmp::Reverse,
    sync::{Arc, Mutex},
    time::Duration,
};

use ebonhold_game::types::ClientRef;
use tracing::trace;

/// Invoked with the client's 1-based position on each broadcast.
pub type UpdateCallback = Arc<dyn Fn(usize) + Send + Sync>;
/// Invoked once when the client leaves the queue through the front.
pub type LeaveCallback = Box<dyn FnOnce() + Send>;

const DEFAULT_FREQUENCY: Duration = Duration::from_millis(250);

struct QueueEntry {
    priority: i32,
    client: ClientRef,
    on_update: UpdateCallback,
    on_leave: LeaveCallback,
}

#[derive(Default)]
struct QueueState {
    entries: Vec<QueueEntry>,
    dirty: bool,
    timer_running: bool,
}

/// The wait-list itself. Cheap to clone and share.
#[derive(Clone)]
pub struct RealmQueue {
    state: Arc<Mutex<QueueState>>,
    frequency: Duration,
}

impl Default for RealmQueue {
    fn default() -> Self {
        Self::new(DEFAULT_FREQUENCY)
    }
}

impl RealmQueue {
    pub fn new(frequency: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState::default())),
            frequency,
        }
    }

    /// Insert a client, keeping the queue sorted by priority with
    /// insertion order preserved inside each priority band. Starts the
    /// broadcast timer when the queue was empty. The first position
    /// update arrives on the next tick, not at enqueue time.
    pub fn enqueue(
        &self,
        client: ClientRef,
        on_update: UpdateCallback,
        on_leave: LeaveCallback,
        priority: i32,
    ) {
        let start_timer = {
            let mut state = self.state.lock().expect("queue lock poisoned");

            state.entries.push(QueueEntry {
                priority,
                client,
                on_update,
                on_leave,
            });

            // stable by construction, so equal priorities keep order
            state.entries.sort_by_key(|entry| Reverse(entry.priority));
            state.dirty = true;

            let start = !state.timer_running;
            state.timer_running = true;
            start
        };

        if start_timer {
            let queue = self.clone();
            tokio::spawn(async move { queue.broadcast_loop().await });
        }
    }

    /// A queued client gave up and disconnected.
    pub fn dequeue(&self, client: &ClientRef) {
        let mut state = self.state.lock().expect("queue lock poisoned");
        state.entries.retain(|entry| entry.client != *client);
        state.dirty = true;
    }

    /// A slot opened up; pop the head and let it in. No-op on an empty
    /// queue.
    pub fn free_slot(&self) {
        let entry = {
            let mut state = self.state.lock().expect("queue lock poisoned");

            if state.entries.is_empty() {
                return;
            }

            state.dirty = true;
            state.entries.remove(0)
        };

        // invoked outside the lock; the callback may re-enter
        (entry.on_leave)();
    }

    pub fn len(&self) -> usize {
        let state = self.state.lock().expect("queue lock poisoned");
        state.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs while the queue is populated; exits once drained.
    async fn broadcast_loop(&self) {
        loop {
            tokio::time::sleep(self.frequency).await;

            let updates = {
                let mut state = self.state.lock().expect("queue lock poisoned");

                if state.entries.is_empty() {
                    state.timer_running = false;
                    return;
                }

                if !state.dirty {
                    continue;
                }

                state.dirty = false;
                state
                    .entries
                    .iter()
                    .enumerate()
                    .map(|(index, entry)| (Arc::clone(&entry.on_update), index + 1))
                    .collect::<Vec<_>>()
            };

            trace!("broadcasting {} queue position(s)", updates.len());

            for (on_update, position) in updates {
                on_update(position);
            }
        }
    }
}

impl std::fmt::Debug for RealmQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealmQueue").field("len", &self.len()).finish()
    }
}

/// World slot accounting; the queue engages when the ceiling is hit.
#[derive(Debug)]
pub struct Capacity {
    active: Mutex<usize>,
    max: usize,
}

impl Capacity {
    pub fn new(max: usize) -> Self {
        Self {
            active: Mutex::new(0),
            max,
        }
    }

    /// Claim a slot if one is free.
    pub fn try_acquire(&self) -> bool {
        let mut active = self.active.lock().expect("capacity lock poisoned");
        if *active >= self.max {
            return false;
        }

        *active += 1;
        true
    }

    /// Return a slot; the caller is responsible for offering it to the
    /// queue head.
    pub fn release(&self) {
        let mut active = self.active.lock().expect("capacity lock poisoned");
        *active = active.saturating_sub(1);
    }

    pub fn active(&self) -> usize {
        *self.active.lock().expect("capacity lock poisoned")
    }

    pub fn max(&self) -> usize {
        self.max
    }
}

#[cfg(test)]
mod test {
    use std::{
        sync::{Arc, Mutex},
        time::Duration,
    };

    use ebonhold_game::types::ClientRef;

    use super::{Capacity, RealmQueue};

    fn observer() -> (
        super::UpdateCallback,
        Arc<Mutex<Vec<usize>>>,
    ) {
        let positions = Arc::new(Mutex::new(Vec::new()));
        let writer = Arc::clone(&positions);
        (
            Arc::new(move |position| writer.lock().unwrap().push(position)),
            positions,
        )
    }

    fn leaver() -> (super::LeaveCallback, Arc<Mutex<bool>>) {
        let left = Arc::new(Mutex::new(false));
        let writer = Arc::clone(&left);
        (Box::new(move || *writer.lock().unwrap() = true), left)
    }

    /// Two default-priority clients and a priority client: departures
    /// run C3, C1, C2 and the first broadcast shows C3=1, C1=2, C2=3.
    #[tokio::test(start_paused = true)]
    async fn priority_order_and_positions() {
        let queue = RealmQueue::new(Duration::from_millis(250));

        let (u1, p1) = observer();
        let (u2, p2) = observer();
        let (u3, p3) = observer();
        let (l1, left1) = leaver();
        let (l2, left2) = leaver();
        let (l3, left3) = leaver();

        queue.enqueue(ClientRef::generate(0), u1, l1, 0);
        queue.enqueue(ClientRef::generate(0), u2, l2, 0);
        queue.enqueue(ClientRef::generate(0), u3, l3, 1);

        // cross the first timer tick
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(*p3.lock().unwrap(), vec![1]);
        assert_eq!(*p1.lock().unwrap(), vec![2]);
        assert_eq!(*p2.lock().unwrap(), vec![3]);

        queue.free_slot();
        assert!(*left3.lock().unwrap());
        assert!(!*left1.lock().unwrap());

        queue.free_slot();
        assert!(*left1.lock().unwrap());

        queue.free_slot();
        assert!(*left2.lock().unwrap());
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn no_broadcast_without_changes() {
        let queue = RealmQueue::new(Duration::from_millis(250));
        let (update, positions) = observer();
        let (leave, _) = leaver();

        queue.enqueue(ClientRef::generate(0), update, leave, 0);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(*positions.lock().unwrap(), vec![1]);

        // nothing changed; the next ticks stay quiet
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(*positions.lock().unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn free_slot_on_empty_queue_is_noop() {
        let queue = RealmQueue::default();
        queue.free_slot();
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn dequeue_removes_by_client() {
        let queue = RealmQueue::new(Duration::from_millis(250));
        let client = ClientRef::generate(0);

        let (update, _) = observer();
        let (leave, left) = leaver();
        queue.enqueue(client, update, leave, 0);

        queue.dequeue(&client);
        assert!(queue.is_empty());
        assert!(!*left.lock().unwrap());
    }

    #[test]
    fn capacity_accounting() {
        let capacity = Capacity::new(2);
        assert!(capacity.try_acquire());
        assert!(capacity.try_acquire());
        assert!(!capacity.try_acquire());

        capacity.release();
        assert!(capacity.try_acquire());
        assert_eq!(capacity.active(), 2);
    }
}
