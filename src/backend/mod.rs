//! Remote account backend seam
//!
//! The engine never speaks to the remote service itself; it is handed an
//! implementation of [`AccountBackend`] at session construction. All four
//! calls are blocking and are only ever invoked from worker threads inside
//! scheduler-driven procedures.

use crate::types::error::Result;
use crate::types::{ContactEntry, ThreadSnapshot};

/// Blocking capabilities the remote account must provide
///
/// Each fetch returns the full current snapshot set for its resource; the
/// merge and diff engines turn those repeated full snapshots into
/// incremental local state. Implementations report transport failures as
/// `Network`, credential failures as `Auth`, and anything provider-specific
/// as `Backend`.
pub trait AccountBackend: Send + Sync {
    /// Establish or refresh the remote session.
    fn login(&self) -> Result<()>;

    /// Fetch every current SMS conversation thread.
    fn fetch_texts(&self) -> Result<Vec<ThreadSnapshot>>;

    /// Fetch every current voicemail item.
    fn fetch_voicemails(&self) -> Result<Vec<ThreadSnapshot>>;

    /// Fetch the full contact list.
    fn fetch_contacts(&self) -> Result<Vec<ContactEntry>>;
}
