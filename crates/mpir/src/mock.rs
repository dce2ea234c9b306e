// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scripted inferior control for tests: canned proctables, no processes.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use cti_core::{Proctable, ProctableEntry};
use parking_lot::Mutex;

use crate::control::{Inferior, InferiorControl, LaunchSpec};
use crate::error::MpirError;

/// What a scripted launch should produce.
#[derive(Debug, Clone)]
pub struct Script {
    pub launcher_pid: i32,
    pub strings: HashMap<String, String>,
    pub proctable: Proctable,
}

impl Script {
    /// A one-node, `num_pes`-rank job on `hostname`.
    pub fn single_node(hostname: &str, num_pes: usize) -> Self {
        let entries = (0..num_pes)
            .map(|rank| ProctableEntry {
                rank,
                hostname: hostname.to_string(),
                pid: 1000 + rank as i32,
                executable: "/apps/a.out".to_string(),
            })
            .collect();
        let mut strings = HashMap::new();
        strings.insert("totalview_jobid".to_string(), "36939".to_string());
        strings.insert("totalview_stepid".to_string(), "0".to_string());
        Self {
            launcher_pid: 4242,
            strings,
            // single_node always yields at least one rank
            proctable: Proctable::new(entries).unwrap_or_default(),
        }
    }
}

#[derive(Debug, Default)]
pub struct ScriptedEvents {
    pub launches: usize,
    pub attaches: Vec<i32>,
    pub released: usize,
    pub waited: usize,
    pub terminated: usize,
}

/// [`InferiorControl`] that replays a [`Script`] and records transitions.
pub struct ScriptedControl {
    script: Script,
    pub events: Arc<Mutex<ScriptedEvents>>,
    fail_launch: AtomicU32,
}

impl ScriptedControl {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            events: Arc::new(Mutex::new(ScriptedEvents::default())),
            fail_launch: AtomicU32::new(0),
        }
    }

    /// Make the next `count` launches fail.
    pub fn fail_next_launches(&self, count: u32) {
        self.fail_launch.store(count, Ordering::SeqCst);
    }
}

impl InferiorControl for ScriptedControl {
    fn launch_stopped(&self, spec: LaunchSpec) -> Result<Box<dyn Inferior>, MpirError> {
        if self.fail_launch.load(Ordering::SeqCst) > 0 {
            self.fail_launch.fetch_sub(1, Ordering::SeqCst);
            return Err(MpirError::Launch(format!(
                "scripted failure starting {:?}",
                spec.path
            )));
        }
        self.events.lock().launches += 1;
        Ok(Box::new(ScriptedInferior {
            script: self.script.clone(),
            events: Arc::clone(&self.events),
        }))
    }

    fn attach_stopped(&self, _launcher: &Path, pid: i32) -> Result<Box<dyn Inferior>, MpirError> {
        self.events.lock().attaches.push(pid);
        let mut script = self.script.clone();
        script.launcher_pid = pid;
        Ok(Box::new(ScriptedInferior { script, events: Arc::clone(&self.events) }))
    }
}

pub struct ScriptedInferior {
    script: Script,
    events: Arc<Mutex<ScriptedEvents>>,
}

impl Inferior for ScriptedInferior {
    fn pid(&self) -> i32 {
        self.script.launcher_pid
    }

    fn read_string(&mut self, symbol: &str) -> Result<String, MpirError> {
        self.script
            .strings
            .get(symbol)
            .cloned()
            .ok_or_else(|| MpirError::SymbolRead(symbol.to_string()))
    }

    fn read_proctable(&mut self) -> Result<Proctable, MpirError> {
        Ok(self.script.proctable.clone())
    }

    fn release(self: Box<Self>) -> Result<(), MpirError> {
        self.events.lock().released += 1;
        Ok(())
    }

    fn wait(self: Box<Self>) -> Result<i32, MpirError> {
        self.events.lock().waited += 1;
        Ok(0)
    }

    fn terminate(self: Box<Self>) -> Result<(), MpirError> {
        self.events.lock().terminated += 1;
        Ok(())
    }
}
