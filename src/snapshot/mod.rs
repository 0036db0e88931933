pub mod aliases;
pub mod differ;
pub mod normalize;
pub mod schema;

pub use aliases::AliasTable;
pub use differ::{diff_snapshots, Change, ChangeKind, ChangeSet};
pub use normalize::{Normalizer, RowError, ValueParser};
pub use schema::{format_score, GradeRecord, GradeValue, RawRow, RecordKey, Snapshot};
