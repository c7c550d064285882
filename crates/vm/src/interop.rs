//! The host seam: named syscalls and opaque handles.

use crate::engine::ExecutionEngine;
use crate::error::{VmError, VmResult};

/// An opaque host-owned value on the stack. The VM only moves and compares
/// handles; interpretation belongs to the [`SyscallHandler`] that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InteropHandle(pub u32);

/// Host functions exposed to scripts through `SYSCALL`.
///
/// The handler is passed alongside the engine during execution so it can pop
/// arguments from and push results to the current context.
pub trait SyscallHandler {
    /// Gas charged for the named syscall before it runs.
    fn price(&self, name: &str) -> i64;

    /// Executes the named syscall. Unknown names must return
    /// [`VmError::UnknownSyscall`].
    fn invoke(&mut self, name: &str, engine: &mut ExecutionEngine) -> VmResult<()>;

    /// Resolves a contract script for `APPCALL`/`TAILCALL`. `call_depth` is
    /// the invocation-stack depth the loaded script will run at; hosts use
    /// it to scope nested state snapshots.
    fn contract_script(&mut self, hash: &neo2_core::UInt160, call_depth: usize) -> VmResult<Vec<u8>> {
        let _ = (hash, call_depth);
        Err(VmError::syscall("application calls are not available here"))
    }

    /// Called after a context unloads, with the remaining invocation-stack
    /// depth. Hosts commit nested state snapshots opened at deeper levels.
    fn on_context_unloaded(&mut self, remaining_depth: usize) {
        let _ = remaining_depth;
    }
}

/// A handler that refuses every syscall; used for pure script runs such as
/// witness verification of standard contracts.
#[derive(Debug, Default)]
pub struct NoSyscalls;

impl SyscallHandler for NoSyscalls {
    fn price(&self, _name: &str) -> i64 {
        1
    }

    fn invoke(&mut self, name: &str, _engine: &mut ExecutionEngine) -> VmResult<()> {
        Err(VmError::UnknownSyscall(name.to_string()))
    }
}
