//
// Copyright 2017-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! Process-wide networking stack lifecycle
//!
//! Reactors may only start while the stack is initialized. Calls are
//! reference counted so independent users in one process (test binaries,
//! embedded servers) can each pair an initialize with a teardown.

use crate::{ReactorError, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

static STACK: StackGate = StackGate::new();

/// Initialize the networking stack
///
/// Must be called before the first [`CompletionReactor::start`](crate::CompletionReactor::start)
/// and paired with one [`teardown_networking_stack`] after the last stop.
pub fn initialize_networking_stack() -> Result<()> {
    let users = STACK.acquire();
    debug!(users, "Networking stack initialized");
    Ok(())
}

/// Tear down the networking stack
///
/// Fails with [`ReactorError::StackNotRunning`] if there is no matching
/// [`initialize_networking_stack`] call.
pub fn teardown_networking_stack() -> Result<()> {
    let users = STACK.release()?;
    debug!(users, "Networking stack released");
    Ok(())
}

/// Check whether the networking stack is initialized
pub fn is_networking_stack_initialized() -> bool {
    STACK.is_held()
}

struct StackGate {
    users: AtomicUsize,
}

impl StackGate {
    const fn new() -> Self {
        Self {
            users: AtomicUsize::new(0),
        }
    }

    fn acquire(&self) -> usize {
        self.users.fetch_add(1, Ordering::AcqRel) + 1
    }

    fn release(&self) -> Result<usize> {
        self.users
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .map(|previous| previous - 1)
            .map_err(|_| ReactorError::StackNotRunning)
    }

    fn is_held(&self) -> bool {
        self.users.load(Ordering::Acquire) > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gate_pairs_acquire_and_release() {
        let gate = StackGate::new();
        assert!(!gate.is_held());

        assert_eq!(gate.acquire(), 1);
        assert_eq!(gate.acquire(), 2);
        assert!(gate.is_held());

        assert_eq!(gate.release().unwrap(), 1);
        assert!(gate.is_held());
        assert_eq!(gate.release().unwrap(), 0);
        assert!(!gate.is_held());
    }

    #[test]
    fn test_gate_release_without_acquire() {
        let gate = StackGate::new();
        assert!(matches!(gate.release(), Err(ReactorError::StackNotRunning)));
        assert!(!gate.is_held());
    }

    #[test]
    fn test_global_stack() {
        initialize_networking_stack().unwrap();
        assert!(is_networking_stack_initialized());
        teardown_networking_stack().unwrap();
    }
}
