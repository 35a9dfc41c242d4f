//! Simulated host for engine testing
//!
//! Keeps windows and replicas in memory and reports every mutation as a
//! [`HostEvent`], including the ones caused by engine commands, the way a
//! real host does. User actions (`open_replica`, `navigate`, ...) mutate the
//! same state and emit the same events but are not recorded as commands.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use async_trait::async_trait;
use mirror_core::{
    CreateOptions, Host, HostEvent, MirrorError, MirrorResult, Replica, ReplicaId, SpaceId, Window,
    WindowId, WindowKind,
};
use parking_lot::Mutex;
use tokio::sync::mpsc;

/// A command the engine issued
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Create { window: WindowId, uri: String, space: SpaceId },
    Remove(ReplicaId),
    Update(ReplicaId, String),
    Move(ReplicaId, u32),
    Focus(ReplicaId),
}

#[derive(Debug)]
struct SimWindow {
    window: Window,
    /// Replicas in position order
    order: Vec<ReplicaId>,
}

#[derive(Debug, Default)]
struct HostState {
    windows: BTreeMap<WindowId, SimWindow>,
    replicas: HashMap<ReplicaId, Replica>,
    next_window: u64,
    next_replica: u64,
    events: VecDeque<HostEvent>,
    commands: Vec<Command>,
    /// Commands targeting these windows fail
    closing: HashSet<WindowId>,
    subscriber: Option<mpsc::UnboundedSender<HostEvent>>,
}

impl HostState {
    fn emit(&mut self, event: HostEvent) {
        match &self.subscriber {
            Some(tx) => {
                let _ = tx.send(event);
            }
            None => self.events.push_back(event),
        }
    }

    fn reindex(&mut self, window: WindowId) {
        let Some(w) = self.windows.get(&window) else {
            return;
        };
        for (index, id) in w.order.iter().enumerate() {
            if let Some(replica) = self.replicas.get_mut(id) {
                replica.index = index as u32;
            }
        }
    }

    fn add_window(&mut self, kind: WindowKind, private: bool) -> Window {
        self.next_window += 1;
        let window = Window {
            id: WindowId::new(self.next_window),
            kind,
            private,
        };
        self.windows.insert(
            window.id,
            SimWindow {
                window: window.clone(),
                order: Vec::new(),
            },
        );
        window
    }

    fn add_replica(&mut self, template: Replica, index: Option<u32>) -> MirrorResult<Replica> {
        let window = template.window;
        let Some(w) = self.windows.get_mut(&window) else {
            return Err(MirrorError::WindowNotFound(window));
        };
        self.next_replica += 1;
        let id = ReplicaId::new(self.next_replica);
        let pos = index
            .map(|i| (i as usize).min(w.order.len()))
            .unwrap_or(w.order.len());
        w.order.insert(pos, id);
        let private = w.window.private;

        let mut replica = template;
        replica.id = id;
        replica.private = replica.private || private;
        self.replicas.insert(id, replica);
        if self.replicas.get(&id).is_some_and(|r| r.active) {
            self.set_active(id);
        }
        self.reindex(window);
        let created = self.replicas[&id].clone();
        self.emit(HostEvent::ReplicaCreated(created.clone()));
        Ok(created)
    }

    fn drop_replica(&mut self, id: ReplicaId) -> MirrorResult<()> {
        let replica = self
            .replicas
            .remove(&id)
            .ok_or(MirrorError::ReplicaNotFound(id))?;
        if let Some(w) = self.windows.get_mut(&replica.window) {
            w.order.retain(|r| *r != id);
        }
        self.reindex(replica.window);
        self.emit(HostEvent::ReplicaRemoved {
            replica: id,
            window: replica.window,
            window_closing: false,
        });
        Ok(())
    }

    fn set_uri(&mut self, id: ReplicaId, uri: &str) -> MirrorResult<()> {
        let replica = self
            .replicas
            .get_mut(&id)
            .ok_or(MirrorError::ReplicaNotFound(id))?;
        if replica.uri == uri {
            return Ok(());
        }
        replica.uri = uri.to_string();
        let snapshot = replica.clone();
        self.emit(HostEvent::ReplicaUpdated {
            replica_id: id,
            changed_uri: Some(uri.to_string()),
            replica: snapshot,
        });
        Ok(())
    }

    fn set_position(&mut self, id: ReplicaId, index: u32) -> MirrorResult<()> {
        let window = self
            .replicas
            .get(&id)
            .ok_or(MirrorError::ReplicaNotFound(id))?
            .window;
        let w = self
            .windows
            .get_mut(&window)
            .ok_or(MirrorError::WindowNotFound(window))?;
        let Some(from) = w.order.iter().position(|r| *r == id) else {
            return Err(MirrorError::ReplicaNotFound(id));
        };
        let to = (index as usize).min(w.order.len() - 1);
        if from == to {
            return Ok(());
        }
        w.order.remove(from);
        w.order.insert(to, id);
        self.reindex(window);
        self.emit(HostEvent::ReplicaMoved {
            replica: id,
            window,
            to_index: to as u32,
        });
        Ok(())
    }

    fn set_active(&mut self, id: ReplicaId) -> bool {
        let Some(window) = self.replicas.get(&id).map(|r| r.window) else {
            return false;
        };
        let already = self.replicas[&id].active
            && self
                .replicas
                .values()
                .filter(|r| r.window == window && r.active)
                .count()
                == 1;
        for replica in self.replicas.values_mut().filter(|r| r.window == window) {
            replica.active = replica.id == id;
        }
        !already
    }

    fn check_target(&self, id: ReplicaId) -> MirrorResult<()> {
        let replica = self
            .replicas
            .get(&id)
            .ok_or(MirrorError::ReplicaNotFound(id))?;
        if self.closing.contains(&replica.window) {
            return Err(MirrorError::host("command", format!("window {} closing", replica.window)));
        }
        Ok(())
    }
}

/// In-memory host
#[derive(Debug, Default)]
pub struct SimulatedHost {
    state: Mutex<HostState>,
}

impl SimulatedHost {
    pub fn new() -> Self {
        SimulatedHost::default()
    }

    /// Route future events to a channel instead of the internal queue
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<HostEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.lock().subscriber = Some(tx);
        rx
    }

    pub fn next_event(&self) -> Option<HostEvent> {
        self.state.lock().events.pop_front()
    }

    pub fn pending_events(&self) -> usize {
        self.state.lock().events.len()
    }

    pub fn discard_events(&self) {
        self.state.lock().events.clear();
    }

    /// Commands issued by the engine so far
    pub fn commands(&self) -> Vec<Command> {
        self.state.lock().commands.clone()
    }

    pub fn clear_commands(&self) {
        self.state.lock().commands.clear();
    }

    /// Make commands targeting `window` fail
    pub fn set_closing(&self, window: WindowId, closing: bool) {
        let mut state = self.state.lock();
        if closing {
            state.closing.insert(window);
        } else {
            state.closing.remove(&window);
        }
    }

    pub fn window_ids(&self) -> Vec<WindowId> {
        self.state.lock().windows.keys().copied().collect()
    }

    /// Replicas of a window in position order
    pub fn replicas_in(&self, window: WindowId) -> Vec<Replica> {
        let state = self.state.lock();
        state
            .windows
            .get(&window)
            .map(|w| w.order.iter().map(|id| state.replicas[id].clone()).collect())
            .unwrap_or_default()
    }

    pub fn replica(&self, id: ReplicaId) -> Option<Replica> {
        self.state.lock().replicas.get(&id).cloned()
    }

    pub fn replica_count(&self) -> usize {
        self.state.lock().replicas.len()
    }

    // User actions

    pub fn open_window(&self) -> WindowId {
        self.open_window_with(WindowKind::Normal, false)
    }

    pub fn open_private_window(&self) -> WindowId {
        self.open_window_with(WindowKind::Normal, true)
    }

    pub fn open_window_with(&self, kind: WindowKind, private: bool) -> WindowId {
        let mut state = self.state.lock();
        let window = state.add_window(kind, private);
        let id = window.id;
        state.emit(HostEvent::WindowOpened(window));
        id
    }

    /// Tear down a window and every replica in it
    pub fn close_window(&self, window: WindowId) {
        let mut state = self.state.lock();
        let Some(w) = state.windows.remove(&window) else {
            return;
        };
        for id in w.order {
            state.replicas.remove(&id);
            state.emit(HostEvent::ReplicaRemoved {
                replica: id,
                window,
                window_closing: true,
            });
        }
        state.closing.remove(&window);
        state.emit(HostEvent::WindowClosed(window));
    }

    pub fn open_replica(&self, window: WindowId, uri: &str) -> ReplicaId {
        self.open_replica_with(Replica::new(ReplicaId::default(), window, uri))
    }

    /// Open a replica from a template; id and index are assigned by the host
    pub fn open_replica_with(&self, template: Replica) -> ReplicaId {
        self.state
            .lock()
            .add_replica(template, None)
            .map(|r| r.id)
            .unwrap_or_default()
    }

    pub fn close_replica(&self, id: ReplicaId) {
        let _ = self.state.lock().drop_replica(id);
    }

    pub fn navigate(&self, id: ReplicaId, uri: &str) {
        let _ = self.state.lock().set_uri(id, uri);
    }

    pub fn reorder(&self, id: ReplicaId, index: u32) {
        let _ = self.state.lock().set_position(id, index);
    }

    pub fn activate(&self, id: ReplicaId) {
        let mut state = self.state.lock();
        if state.set_active(id) {
            let window = state.replicas[&id].window;
            state.emit(HostEvent::FocusChanged { replica: id, window });
        }
    }
}

#[async_trait]
impl Host for SimulatedHost {
    async fn create_replica(
        &self,
        window: WindowId,
        uri: &str,
        space: &SpaceId,
        options: CreateOptions,
    ) -> MirrorResult<Replica> {
        let mut state = self.state.lock();
        state.commands.push(Command::Create {
            window,
            uri: uri.to_string(),
            space: space.clone(),
        });
        if state.closing.contains(&window) {
            return Err(MirrorError::host("create_replica", format!("window {} closing", window)));
        }
        let mut template = Replica::new(ReplicaId::default(), window, uri).with_space(space.clone());
        template.active = options.focused;
        state.add_replica(template, options.index)
    }

    async fn remove_replica(&self, replica: ReplicaId) -> MirrorResult<()> {
        let mut state = self.state.lock();
        state.commands.push(Command::Remove(replica));
        state.check_target(replica)?;
        state.drop_replica(replica)
    }

    async fn update_replica(&self, replica: ReplicaId, uri: &str) -> MirrorResult<()> {
        let mut state = self.state.lock();
        state.commands.push(Command::Update(replica, uri.to_string()));
        state.check_target(replica)?;
        state.set_uri(replica, uri)
    }

    async fn move_replica(&self, replica: ReplicaId, index: u32) -> MirrorResult<()> {
        let mut state = self.state.lock();
        state.commands.push(Command::Move(replica, index));
        state.check_target(replica)?;
        state.set_position(replica, index)
    }

    async fn focus_replica(&self, replica: ReplicaId) -> MirrorResult<()> {
        let mut state = self.state.lock();
        state.commands.push(Command::Focus(replica));
        state.check_target(replica)?;
        if state.set_active(replica) {
            let window = state.replicas[&replica].window;
            state.emit(HostEvent::FocusChanged { replica, window });
        }
        Ok(())
    }

    async fn get_replica(&self, replica: ReplicaId) -> MirrorResult<Replica> {
        self.replica(replica)
            .ok_or(MirrorError::ReplicaNotFound(replica))
    }

    async fn list_windows(&self) -> MirrorResult<Vec<Window>> {
        Ok(self
            .state
            .lock()
            .windows
            .values()
            .map(|w| w.window.clone())
            .collect())
    }

    async fn list_replicas(&self, window: WindowId) -> MirrorResult<Vec<Replica>> {
        if !self.state.lock().windows.contains_key(&window) {
            return Err(MirrorError::WindowNotFound(window));
        }
        Ok(self.replicas_in(window))
    }
}
