//! Named states mirroring §4.5's transition diagram. The control flow
//! itself is ordinary function composition in [`super::Orchestrator`]; this
//! enum exists so every transition is logged uniformly and so tests can
//! assert which state a failure occurred in.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    Start,
    TryUnprivileged,
    Classify,
    ResolveDevice,
    ResolveFstype,
    ResolveMountPoint,
    PolicyGate,
    RunValidateHooks,
    AttachLoop,
    MountSyscall,
    RunSuccessHooks,
    Cleanup,
    DoneOk,
    DoneErr,
}

impl OrchestratorState {
    pub fn enter(self) {
        tracing::debug!(state = ?self, "orchestrator transition");
    }
}
