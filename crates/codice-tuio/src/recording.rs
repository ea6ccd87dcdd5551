//! In-memory [`TuioServer`] that records every call.

use crate::bridge::{BridgeError, TuioObject, TuioServer};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One call received by a [`RecordingServer`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum TuioCommand {
    Begin { frame_id: u64 },
    Add(TuioObject),
    Update(TuioObject),
    Remove { session_id: u64 },
    Commit,
}

/// Records the call sequence; can be told to reject specific symbols.
#[derive(Clone, Debug, Default)]
pub struct RecordingServer {
    commands: Vec<TuioCommand>,
    rejected_symbols: BTreeSet<u32>,
    open_frame: bool,
}

impl RecordingServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `add_object` and `update_object` fail for `symbol_id`.
    pub fn reject_symbol(&mut self, symbol_id: u32) {
        self.rejected_symbols.insert(symbol_id);
    }

    pub fn commands(&self) -> &[TuioCommand] {
        &self.commands
    }

    pub fn take_commands(&mut self) -> Vec<TuioCommand> {
        std::mem::take(&mut self.commands)
    }

    /// Commands grouped per committed frame, without the begin/commit markers.
    pub fn frames(&self) -> Vec<Vec<TuioCommand>> {
        let mut frames = Vec::new();
        let mut current: Option<Vec<TuioCommand>> = None;
        for cmd in &self.commands {
            match cmd {
                TuioCommand::Begin { .. } => current = Some(Vec::new()),
                TuioCommand::Commit => {
                    if let Some(frame) = current.take() {
                        frames.push(frame);
                    }
                }
                other => {
                    if let Some(frame) = current.as_mut() {
                        frame.push(other.clone());
                    }
                }
            }
        }
        frames
    }

    fn check(&self, op: &'static str, object: &TuioObject) -> Result<(), BridgeError> {
        if !self.open_frame {
            return Err(BridgeError::Unavailable(format!("{op} outside a frame")));
        }
        if self.rejected_symbols.contains(&object.symbol_id) {
            return Err(BridgeError::Rejected {
                op,
                session_id: object.session_id,
                reason: format!("symbol {} rejected", object.symbol_id),
            });
        }
        Ok(())
    }
}

impl TuioServer for RecordingServer {
    fn begin_frame(&mut self, frame_id: u64) -> Result<(), BridgeError> {
        if self.open_frame {
            return Err(BridgeError::Unavailable("frame already open".to_string()));
        }
        self.open_frame = true;
        self.commands.push(TuioCommand::Begin { frame_id });
        Ok(())
    }

    fn add_object(&mut self, object: &TuioObject) -> Result<(), BridgeError> {
        self.check("add", object)?;
        self.commands.push(TuioCommand::Add(*object));
        Ok(())
    }

    fn update_object(&mut self, object: &TuioObject) -> Result<(), BridgeError> {
        self.check("update", object)?;
        self.commands.push(TuioCommand::Update(*object));
        Ok(())
    }

    fn remove_object(&mut self, session_id: u64) -> Result<(), BridgeError> {
        if !self.open_frame {
            return Err(BridgeError::Unavailable("remove outside a frame".to_string()));
        }
        self.commands.push(TuioCommand::Remove { session_id });
        Ok(())
    }

    fn commit_frame(&mut self) -> Result<(), BridgeError> {
        if !self.open_frame {
            return Err(BridgeError::Unavailable("commit without begin".to_string()));
        }
        self.open_frame = false;
        self.commands.push(TuioCommand::Commit);
        Ok(())
    }
}
