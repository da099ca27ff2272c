//! Client-side prediction and reconciliation
//!
//! The server is authoritative. A client predicts its own car with the same
//! vehicle model the server runs, corrects it against incoming snapshots, and
//! smooths every other car between snapshots.

pub mod interpolation;
pub mod reconciliation;
pub mod session;

pub use interpolation::{RemoteSmoothing, RemoteTracker, TrackerState, VisualTransform};
pub use reconciliation::{Correction, OwnedReconciler, ReconcileConfig};
pub use session::{ClientSession, CorrectionStats};
