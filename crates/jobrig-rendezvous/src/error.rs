use thiserror::Error;

/// A rendezvous that did not happen. Distinct from assertion failures so a
/// hang in the harness is triaged as a timing problem, not a scheduler bug.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RendezvousError {
    /// No execution signalled that it started within the bound.
    #[error("rendezvous never occurred: no job started within {waited_ms}ms")]
    NeverStarted { waited_ms: u64 },

    /// A suspended execution was not released within the bound.
    #[error("rendezvous never occurred: job was not continued within {waited_ms}ms")]
    NeverContinued { waited_ms: u64 },

    /// Executions were still running when the bound expired.
    #[error("rendezvous incomplete: {running} job(s) still running after {waited_ms}ms")]
    NeverIdle { running: usize, waited_ms: u64 },

    #[error("rendezvous closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, RendezvousError>;
