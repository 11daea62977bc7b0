pub mod defs;
pub mod state;

pub use defs::{
    IngestItem, Incident, IncidentSource, ProviderKind, RawDocument, SummaryProjection,
    SummaryRun, UnknownProvider,
};
pub use state::{AdvisoryStore, NewRawDocument, SUMMARIZER_SETTING_KEY};
