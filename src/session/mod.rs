// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Agent sessions and command routing.
//!
//! Each agent session may be bound to one workspace. Commands from a bound
//! session are classified ([`HostAllowList::classify`]) and, when they
//! belong to the workspace, rewritten to run there ([`SessionRouter`]).

mod binding;
mod classify;
mod quote;
mod router;
mod store;

pub use binding::{SessionBinding, WorkspaceKind};
pub use classify::{
    first_token, is_self_invocation, strip_escape, CommandClass, HostAllowList,
    DEFAULT_HOST_COMMANDS, SELF_COMMAND,
};
pub use quote::{command_argv, shell_quote};
pub use router::{run_routed, CommandOutput, RouteTarget, RoutedCommand, SessionRouter};
pub use store::{validate_session_id, SessionStore};
