//! Machine reuse pool.
//!
//! Machines carry pre-sized stacks and frame arrays; reusing one across
//! runs avoids re-allocating them. `put` resets the machine, so a pooled
//! machine never leaks stack values, scopes or arena growth from its
//! previous principal.

use crate::machine::Machine;

#[derive(Default)]
pub struct MachinePool {
    idle: Vec<Machine>,
}

impl MachinePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&mut self) -> Machine {
        self.idle.pop().unwrap_or_default()
    }

    pub fn put(&mut self, mut m: Machine) {
        m.reset();
        self.idle.push(m);
    }

    pub fn idle_count(&self) -> usize {
        self.idle.len()
    }
}
