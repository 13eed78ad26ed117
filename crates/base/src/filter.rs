//! Filter policy abstraction.

/// A named membership-test algorithm over a set of keys.
///
/// The writer collects the keys of a table (or of one data block) and
/// asks the policy to produce a bitmap; the reader asks the same policy
/// whether a key *may* be in the bitmap. A policy must never report a
/// false negative — if `may_contain` returns `false`, the key was
/// definitely not in the set handed to `create_filter`.
pub trait FilterPolicy: Send + Sync {
    /// Stable name, embedded in the meta-block name on disk. A reader
    /// whose policy name does not match the file's simply runs without a
    /// filter.
    fn name(&self) -> &'static str;

    /// Builds a bitmap from `keys`.
    fn create_filter(&self, keys: &[Vec<u8>]) -> Vec<u8>;

    /// Tests `key` against a bitmap previously produced by
    /// `create_filter`. An unparseable bitmap must answer `true` so that
    /// a damaged filter degrades to a useless one, never to a lying one.
    fn may_contain(&self, bitmap: &[u8], key: &[u8]) -> bool;
}
