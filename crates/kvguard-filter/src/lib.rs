//! kvguard Filter - probabilistic set membership over a store bit string
//!
//! A filter is one bit-string value in the store. Its size and hash count are
//! derived from the expected number of insertions and the target
//! false-positive rate when the value is first created.

pub mod filter;
pub mod sizing;

pub use filter::{
    FILTER_OPS_TOTAL, FilterConfig, MembershipFilter, MembershipFilterState, describe_metrics,
};
pub use sizing::{
    MAX_BIT_ARRAY_SIZE, bit_offsets, optimal_bit_array_size, optimal_hash_iterations,
};
