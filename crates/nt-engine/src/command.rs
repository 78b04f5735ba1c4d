//! Control-to-render messages.
//!
//! The control thread never touches the engine directly. It pushes
//! [`Command`]s into a lock-free ring that the render thread drains at the
//! start of every block, and reads [`Notice`]s the engine pushes back.

use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

use crate::insert::Insert;
use crate::param::ParamEvent;
use crate::voice::{BusId, Voice, VoiceId};

/// Default ring capacity for commands and notices.
pub const DEFAULT_CAPACITY: usize = 4096;

/// Which parameter an automation event targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamTarget {
    VoiceGain(VoiceId),
    BusGain(BusId),
    MasterGain,
    /// Parameter `param` of the insert on `bus`.
    Insert { bus: BusId, param: u16 },
}

/// A request for the render thread.
pub enum Command {
    /// Start a fully built voice. Boxed so the ring stays small.
    StartVoice(Box<Voice>),
    /// Schedule a voice's end at context time `at`.
    StopVoice { id: VoiceId, at: f64 },
    /// Remove a voice immediately.
    KillVoice(VoiceId),
    /// Add a bus mixing into `parent`. Parents must be created first.
    CreateBus { id: BusId, parent: BusId, gain: f32 },
    /// Remove a bus and every voice routed to it.
    RemoveBus(BusId),
    /// Install or clear the insert effect of a bus.
    SetInsert { bus: BusId, insert: Option<Box<dyn Insert>> },
    /// Add an automation event.
    Automate { target: ParamTarget, event: ParamEvent },
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::StartVoice(v) => write!(f, "StartVoice({})", v.id),
            Command::StopVoice { id, at } => write!(f, "StopVoice({id} at {at})"),
            Command::KillVoice(id) => write!(f, "KillVoice({id})"),
            Command::CreateBus { id, parent, gain } => write!(f, "CreateBus({id} -> {parent}, {gain})"),
            Command::RemoveBus(id) => write!(f, "RemoveBus({id})"),
            Command::SetInsert { bus, insert } => {
                write!(f, "SetInsert({bus}, {})", insert.as_ref().map_or("none", |i| i.name()))
            }
            Command::Automate { target, event } => write!(f, "Automate({target:?}, {event:?})"),
        }
    }
}

/// Something the render thread reports back.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Notice {
    /// The voice finished or was stolen; its id will not be reused.
    VoiceEnded(VoiceId),
}

/// Control-side end of the link.
pub struct ControlLink {
    commands: HeapProd<Command>,
    notices: HeapCons<Notice>,
}

/// Render-side end of the link.
pub struct EngineLink {
    commands: HeapCons<Command>,
    notices: HeapProd<Notice>,
}

/// Create a connected pair of links.
pub fn link(capacity: usize) -> (ControlLink, EngineLink) {
    let (cmd_prod, cmd_cons) = HeapRb::<Command>::new(capacity).split();
    let (note_prod, note_cons) = HeapRb::<Notice>::new(capacity).split();
    (
        ControlLink { commands: cmd_prod, notices: note_cons },
        EngineLink { commands: cmd_cons, notices: note_prod },
    )
}

impl ControlLink {
    /// Queue a command. Returns it back if the ring is full.
    pub fn send(&mut self, command: Command) -> Result<(), Command> {
        self.commands.try_push(command)
    }

    /// Take the next pending notice.
    pub fn poll_notice(&mut self) -> Option<Notice> {
        self.notices.try_pop()
    }
}

impl EngineLink {
    pub fn next_command(&mut self) -> Option<Command> {
        self.commands.try_pop()
    }

    /// Report a notice. Dropped if the control side is not keeping up.
    pub fn notify(&mut self, notice: Notice) {
        let _ = self.notices.try_push(notice);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_arrive_in_order() {
        let (mut control, mut engine) = link(8);
        control.send(Command::KillVoice(1)).unwrap();
        control.send(Command::StopVoice { id: 2, at: 0.5 }).unwrap();
        assert!(matches!(engine.next_command(), Some(Command::KillVoice(1))));
        assert!(matches!(engine.next_command(), Some(Command::StopVoice { id: 2, .. })));
        assert!(engine.next_command().is_none());
    }

    #[test]
    fn full_ring_returns_command() {
        let (mut control, _engine) = link(1);
        control.send(Command::KillVoice(1)).unwrap();
        let rejected = control.send(Command::KillVoice(2));
        assert!(matches!(rejected, Err(Command::KillVoice(2))));
    }

    #[test]
    fn notices_flow_back() {
        let (mut control, mut engine) = link(4);
        engine.notify(Notice::VoiceEnded(9));
        assert_eq!(control.poll_notice(), Some(Notice::VoiceEnded(9)));
        assert_eq!(control.poll_notice(), None);
    }
}
