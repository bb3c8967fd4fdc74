mod locate;

pub mod diff;
pub mod pull;
pub mod push;
pub mod query;

pub use diff::{compare_artifacts, Diff, DiffError, DiffOptions, Difference, DifferenceKind};
pub use locate::LocateError;
pub use pull::{Pull, PullError, PullOptions, PullResult};
pub use push::{Push, PushError, PushOptions, DEFAULT_SELECTION_TIMEOUT};
pub use query::{
    AbiSummary, ContractSummary, Export, HardhatArtifact, Inspect, Inspection, List, Listing,
    QueryError,
};
