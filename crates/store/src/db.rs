//! The `Database` trait: a column-oriented, lexicographically ordered
//! byte store. Backends (in-memory, rocksdb) implement this; everything
//! above it (keyspace, transactions, CRDT registers) is backend-agnostic.

use eyre::Result;
use strum::{EnumCount, EnumIter};

use crate::slice::Slice;

/// Logical partitions of the keyspace. Real backends (rocksdb) may map
/// these to column families; the in-memory backend just nests a map per
/// column. Grouping mirrors the prefix table in spec §4.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, EnumCount, EnumIter)]
pub enum Column {
    /// `/<colID>/{v,p,d}/<docID>/<fieldID>` and `/<colID>/pk/<docID>`.
    Documents,
    /// `/<docID>/<fieldID>/<cid>` head-store heights.
    Heads,
    /// Collection, schema-version and index descriptor keys.
    Collections,
    /// Secondary index entries: `/<colID>/<indexID>/...`.
    Indexes,
    /// `/seq/<name>` monotonically increasing counters.
    Sequences,
    /// `/p2p/collection/<colID>` and `/replicator/id/<id>`.
    Network,
    /// DAG block bodies, addressed by CID.
    Blocks,
    /// Schema migration (lens) configuration.
    Migrations,
}

pub trait Database: Send + Sync {
    fn has(&self, column: Column, key: Slice<'_>) -> Result<bool>;
    fn get(&self, column: Column, key: Slice<'_>) -> Result<Option<Slice<'static>>>;
    fn put(&self, column: Column, key: Slice<'_>, value: Slice<'_>) -> Result<()>;
    fn delete(&self, column: Column, key: Slice<'_>) -> Result<()>;

    /// Lexicographic range scan over `[start, end)` within `column`; `end =
    /// None` scans to the end of the column.
    fn scan(
        &self,
        column: Column,
        start: Slice<'_>,
        end: Option<Slice<'_>>,
    ) -> Result<Vec<(Box<[u8]>, Box<[u8]>)>>;
}

/// Appends the lexicographic successor of `prefix`, i.e. the smallest key
/// strictly greater than every key beginning with `prefix`.
///
/// Increments the last byte that isn't already `0xff`, dropping every
/// trailing `0xff` byte. If the whole prefix is `0xff` bytes (or empty),
/// there is no successor within the byte space; falls back to appending
/// `KeyMax` (`0xff 0xff`) rather than returning the unmodified prefix —
/// callers that need an unbounded upper end should pass `None` to
/// `Database::scan` instead of relying on this edge case.
#[must_use]
pub fn prefix_end(prefix: &[u8]) -> Vec<u8> {
    let mut end = prefix.to_vec();
    while let Some(&last) = end.last() {
        if last == 0xff {
            end.pop();
        } else {
            let len = end.len();
            end[len - 1] += 1;
            return end;
        }
    }
    vec![0xff, 0xff]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn increments_last_non_ff_byte() {
        assert_eq!(prefix_end(b"/a/b"), b"/a/c");
    }

    #[test]
    fn strips_trailing_ff_bytes() {
        assert_eq!(prefix_end(&[1, 0xff, 0xff]), vec![2]);
    }

    #[test]
    fn all_ff_or_empty_falls_back_to_key_max() {
        assert_eq!(prefix_end(&[0xff, 0xff]), vec![0xff, 0xff]);
        assert_eq!(prefix_end(&[]), vec![0xff, 0xff]);
    }
}
