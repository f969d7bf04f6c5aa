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

//! Networking stack gating
//!
//! Kept in its own test binary with a single test so nothing else in the
//! process holds the stack while the uninitialized paths are checked.

use ioport_server::{
    CompletionReactor, ReactorConfig, ReactorError, initialize_networking_stack,
    is_networking_stack_initialized, teardown_networking_stack,
};

#[test]
fn test_start_requires_initialized_stack() {
    assert!(!is_networking_stack_initialized());
    assert!(matches!(
        teardown_networking_stack(),
        Err(ReactorError::StackNotRunning)
    ));

    let config = ReactorConfig::new(0).with_bind_address("127.0.0.1".parse().unwrap());
    let mut reactor = CompletionReactor::new(config);
    let err = reactor.start_with(|_, data| data.len(), |_| {}).unwrap_err();
    assert!(matches!(err, ReactorError::StackNotInitialized));
    assert!(err.is_setup_error());
    assert!(!reactor.is_running());

    initialize_networking_stack().unwrap();
    reactor.start_with(|_, data| data.len(), |_| {}).unwrap();
    reactor.stop().unwrap();
    teardown_networking_stack().unwrap();
    assert!(!is_networking_stack_initialized());
}
