// src/lib.rs
// Client-resident trust gate: device fingerprint and best-effort IP
// identity, decaying behavioral risk scoring, durable ban lists, and
// fail-closed access decisions.


pub mod admin; // Dashboard management API and stats
pub mod audit; // Append-only security audit sink
pub mod ban; // Ban lists and the access-record ledger
pub mod behavior; // Passive interaction monitoring
pub mod config; // Tunables with compiled-in defaults
pub mod enforcement; // Denial payload and ban enforcement
pub mod fingerprint; // Device fingerprint composition
pub mod gate; // Access gate orchestration
pub mod identity; // Public IP resolution chain
pub mod probe; // Environment capability boundary
pub mod risk; // On-demand risk evaluation
pub mod store; // Durable key-value storage boundary

pub use admin::SecurityStats;
pub use behavior::{Activity, ActivityKind, FocusTransition, RiskState};
pub use config::Config;
pub use enforcement::DenialNotice;
pub use gate::{now_ms, AccessGate, GateError, GateState, SessionIdentity};
pub use identity::{IdentityResolver, IpLookup, LookupEndpoint, LookupError, PeerReflector};
pub use probe::{EnvironmentProbe, StaticProbe};
pub use risk::RiskVerdict;
pub use store::{FileStore, KeyValueStore, MemoryStore};
