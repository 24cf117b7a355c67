//! Plant lifecycle engine: an append-only phase history and watering ledger
//! per plant, and stateless calculators that replay those ledgers to derive
//! every metric. Nothing derived is ever stored.
//!
//! All calculators take "now"/"today" explicitly; the engine never reads the
//! wall clock.

pub mod dates;
pub mod error;
pub mod notes;
pub mod phase_ledger;
pub mod phase_metrics;
pub mod plant;
pub mod snapshot;
pub mod stored;
pub mod taxonomy;
pub mod watering;
pub mod watering_metrics;

pub use error::{EngineError, Result};
pub use notes::{NoteEntry, NoteLedger};
pub use phase_ledger::{PhaseEvent, PhaseLedger};
pub use plant::{Loaded, Plant};
pub use snapshot::{MetricValue, MetricsSnapshot};
pub use stored::{StoredNote, StoredPhaseEvent, StoredPlant, StoredWatering};
pub use taxonomy::{Category, Phase};
pub use watering::{WateringEvent, WateringLedger};
pub use watering_metrics::{WateringPattern, WateringStatus};
