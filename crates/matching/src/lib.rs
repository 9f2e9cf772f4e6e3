pub mod batch;
pub mod dedup;
pub mod error;
pub mod matcher;
pub mod similarity;

pub use batch::{
    BatchMatcher, BatchMatches, BatchMember, BatchTransaction, LocalBatchMatcher,
    MatchBatchRequest, MatchBatchResponse, RemoteBatchMatcher, TransactionMatches,
};
pub use dedup::{Counterpart, CounterpartKind, DuplicateDetector, DuplicateHit};
pub use error::MatchError;
pub use matcher::{MatchCandidate, MatchDecision, MatchSignal, MatcherConfig, MemberMatcher};
pub use similarity::name_similarity;
